//! Direct delivery: kubectl dry-run and apply against the cluster

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::delivery::channel::{
    render_manifests, ApplyReport, DeliveryChannel, DeliveryRequest, DryRunReport, PhaseOutput,
    Rendered,
};
use crate::delivery::tool::ToolCommand;
use crate::errors::FleetError;

/// Applies rendered manifests straight to the downstream cluster
#[derive(Debug, Clone)]
pub struct DirectApply {
    kubectl: String,
    kustomize: String,
}

impl DirectApply {
    pub fn new(kubectl: &str, kustomize: &str) -> Self {
        Self {
            kubectl: kubectl.to_string(),
            kustomize: kustomize.to_string(),
        }
    }

    async fn kubectl_apply(
        &self,
        namespace: &str,
        manifests: String,
        dry_run: bool,
    ) -> Result<(bool, PhaseOutput), FleetError> {
        let output = ToolCommand::new(&self.kubectl)
            .args(apply_args(namespace, dry_run))
            .stdin(manifests.into_bytes())
            .run()
            .await?;
        Ok((output.success, PhaseOutput::new(output.stdout, output.stderr)))
    }
}

/// Arguments of `kubectl apply` reading manifests from stdin
pub(crate) fn apply_args(namespace: &str, dry_run: bool) -> Vec<String> {
    let mut args = vec!["apply".to_string()];
    if dry_run {
        args.push("--dry-run=server".to_string());
    }
    if !namespace.is_empty() {
        args.push("-n".to_string());
        args.push(namespace.to_string());
    }
    args.push("-f".to_string());
    args.push("-".to_string());
    args
}

#[async_trait]
impl DeliveryChannel for DirectApply {
    fn kind(&self) -> &'static str {
        "direct"
    }

    async fn dry_run(&self, request: &DeliveryRequest) -> Result<DryRunReport, FleetError> {
        let manifests = match render_manifests(&self.kustomize, request).await? {
            Rendered::Ok(manifests) => manifests,
            Rendered::Failed { error, output } => {
                warn!(
                    "Release {} failed to render for {}: {}",
                    request.release.sequence, request.downstream_id, error
                );
                return Ok(DryRunReport::RenderFailed { error, output });
            }
        };

        debug!(
            "Dry-running release {} against {}",
            request.release.sequence, request.downstream_id
        );
        let (ok, output) = self
            .kubectl_apply(&request.namespace, manifests, true)
            .await?;
        if ok {
            Ok(DryRunReport::Rendered(output))
        } else {
            let error = format!("dry-run rejected: {}", output.stderr.trim());
            Ok(DryRunReport::RenderFailed { error, output })
        }
    }

    async fn apply(&self, request: &DeliveryRequest) -> Result<ApplyReport, FleetError> {
        let manifests = match render_manifests(&self.kustomize, request).await? {
            Rendered::Ok(manifests) => manifests,
            Rendered::Failed { output, .. } => {
                return Ok(ApplyReport {
                    succeeded: false,
                    output,
                    reference: None,
                })
            }
        };

        info!(
            "Applying release {} to {}",
            request.release.sequence, request.downstream_id
        );
        let (succeeded, output) = self
            .kubectl_apply(&request.namespace, manifests, false)
            .await?;
        Ok(ApplyReport {
            succeeded,
            output,
            reference: None,
        })
    }
}
