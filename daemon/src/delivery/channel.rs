//! Delivery channel capability

use std::path::PathBuf;

use async_trait::async_trait;

use crate::delivery::tool::ToolCommand;
use crate::errors::FleetError;
use crate::models::release::Release;

/// Everything a channel needs to deliver one release to one downstream
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub app_slug: String,
    pub downstream_id: String,
    pub namespace: String,
    pub release: Release,

    /// Rendered manifests of the release for this downstream
    pub manifests_dir: PathBuf,
}

/// Captured stdout/stderr of one phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseOutput {
    pub stdout: String,
    pub stderr: String,
}

impl PhaseOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Append another step's output
    pub fn extend(&mut self, stdout: &str, stderr: &str) {
        push_block(&mut self.stdout, stdout);
        push_block(&mut self.stderr, stderr);
    }
}

fn push_block(buf: &mut String, text: &str) {
    let text = text.trim_end();
    if text.is_empty() {
        return;
    }
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(text);
}

/// Result of the dry-run phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DryRunReport {
    /// Safe to apply
    Rendered(PhaseOutput),

    /// Rendering or validation failed; apply must not run
    RenderFailed { error: String, output: PhaseOutput },
}

/// Result of the apply phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub succeeded: bool,
    pub output: PhaseOutput,

    /// Commit or branch produced by a handoff push
    pub reference: Option<String>,
}

/// A way of getting a release onto a downstream.
///
/// `Err` means the channel itself could not run (missing tool, I/O);
/// rejected manifests or a failed apply are reported in the `Ok` value.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Short name recorded on attempts ("direct" / "handoff")
    fn kind(&self) -> &'static str;

    async fn dry_run(&self, request: &DeliveryRequest) -> Result<DryRunReport, FleetError>;

    async fn apply(&self, request: &DeliveryRequest) -> Result<ApplyReport, FleetError>;
}

/// Rendered manifests, or the reason rendering failed
pub(crate) enum Rendered {
    Ok(String),
    Failed { error: String, output: PhaseOutput },
}

/// Render a release's manifests with kustomize.
///
/// Ingestion diagnostics and a missing manifests directory are render
/// failures, as is a non-zero kustomize exit.
pub(crate) async fn render_manifests(
    kustomize: &str,
    request: &DeliveryRequest,
) -> Result<Rendered, FleetError> {
    if let Some(diagnostics) = request.release.render_diagnostics_message() {
        return Ok(Rendered::Failed {
            error: diagnostics,
            output: PhaseOutput::default(),
        });
    }
    if !tokio::fs::try_exists(&request.manifests_dir)
        .await
        .unwrap_or(false)
    {
        return Ok(Rendered::Failed {
            error: format!(
                "rendered manifests not found at {}",
                request.manifests_dir.display()
            ),
            output: PhaseOutput::default(),
        });
    }

    let output = ToolCommand::new(kustomize)
        .arg("build")
        .arg(request.manifests_dir.to_string_lossy())
        .run()
        .await?;

    if output.success {
        Ok(Rendered::Ok(output.stdout))
    } else {
        Ok(Rendered::Failed {
            error: output.stderr.trim().to_string(),
            output: PhaseOutput::new("", output.stderr),
        })
    }
}
