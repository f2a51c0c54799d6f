//! Live resource state

use async_trait::async_trait;
use openapi_client::models::KubeObject;
use tracing::debug;

use crate::delivery::tool::ToolCommand;
use crate::errors::FleetError;
use crate::models::dashboard::{ResourceState, ResourceStatus};
use crate::models::downstream::DownstreamTarget;
use crate::models::release::ResourceRef;

/// Live-cluster resource state query
#[async_trait]
pub trait ResourceStateSource: Send + Sync {
    /// Observed state of each resource on a downstream.
    ///
    /// `Err` means the cluster could not be queried at all.
    async fn resource_states(
        &self,
        downstream: &DownstreamTarget,
        resources: &[ResourceRef],
    ) -> Result<Vec<ResourceState>, FleetError>;
}

/// Reads resource state with `kubectl get -o json`
#[derive(Debug, Clone)]
pub struct KubectlResourceStates {
    kubectl: String,

    /// Select the kubeconfig context named after the downstream id
    use_contexts: bool,
}

impl KubectlResourceStates {
    pub fn new(kubectl: &str) -> Self {
        Self {
            kubectl: kubectl.to_string(),
            use_contexts: false,
        }
    }

    pub fn with_contexts(mut self) -> Self {
        self.use_contexts = true;
        self
    }

    async fn get(
        &self,
        downstream: &DownstreamTarget,
        resource: &ResourceRef,
    ) -> Result<ResourceStatus, FleetError> {
        let mut command = ToolCommand::new(&self.kubectl).args([
            "get",
            resource.kind.as_str(),
            resource.name.as_str(),
            "-o",
            "json",
        ]);
        if !resource.namespace.is_empty() {
            command = command.args(["-n", resource.namespace.as_str()]);
        }
        if self.use_contexts {
            command = command.arg(format!("--context={}", downstream.id));
        }

        let output = command.run().await?;
        if !output.success {
            if output.stderr.contains("NotFound") {
                return Ok(ResourceStatus::Missing);
            }
            return Err(FleetError::CollaboratorError(format!(
                "kubectl get {} on {}: {}",
                resource,
                downstream.id,
                output.stderr.trim()
            )));
        }

        let object: KubeObject = serde_json::from_str(&output.stdout)?;
        let state = state_from_object(&object);
        debug!("{} on {} is {}", resource, downstream.id, state.as_str());
        Ok(state)
    }
}

#[async_trait]
impl ResourceStateSource for KubectlResourceStates {
    async fn resource_states(
        &self,
        downstream: &DownstreamTarget,
        resources: &[ResourceRef],
    ) -> Result<Vec<ResourceState>, FleetError> {
        let lookups = resources.iter().map(|r| self.get(downstream, r));
        let states = futures::future::try_join_all(lookups).await?;
        Ok(resources
            .iter()
            .cloned()
            .zip(states)
            .map(|(resource, state)| ResourceState { resource, state })
            .collect())
    }
}

/// Readiness of replicated workloads
fn replica_state(desired: i64, ready: i64, updated: i64, rolling: bool) -> ResourceStatus {
    if rolling || updated < desired {
        ResourceStatus::Updating
    } else if ready >= desired {
        ResourceStatus::Ready
    } else if ready == 0 {
        ResourceStatus::Unavailable
    } else {
        ResourceStatus::Degraded
    }
}

/// Derive the observed state of an object from its status
pub fn state_from_object(object: &KubeObject) -> ResourceStatus {
    let status = &object.status;
    let rolling = match (object.metadata.generation, status.observed_generation) {
        (Some(generation), Some(observed)) => observed < generation,
        _ => false,
    };
    let has_ingress = status
        .load_balancer
        .as_ref()
        .map_or(false, |lb| !lb.ingress.is_empty());

    match object.kind.to_lowercase().as_str() {
        "deployment" | "statefulset" => {
            let desired = object.spec.replicas.unwrap_or(1);
            replica_state(
                desired,
                status.ready_replicas.unwrap_or(0),
                status.updated_replicas.unwrap_or(0),
                rolling,
            )
        }
        "daemonset" => replica_state(
            status.desired_number_scheduled.unwrap_or(0),
            status.number_ready.unwrap_or(0),
            status.updated_number_scheduled.unwrap_or(0),
            rolling,
        ),
        "service" => match object.spec.service_type.as_deref() {
            Some("LoadBalancer") if !has_ingress => ResourceStatus::Updating,
            _ => ResourceStatus::Ready,
        },
        "ingress" => {
            if has_ingress {
                ResourceStatus::Ready
            } else {
                ResourceStatus::Updating
            }
        }
        "persistentvolumeclaim" => match status.phase.as_deref() {
            Some("Bound") => ResourceStatus::Ready,
            Some("Pending") => ResourceStatus::Updating,
            Some("Lost") => ResourceStatus::Unavailable,
            _ => ResourceStatus::Unknown,
        },
        _ => ResourceStatus::Unknown,
    }
}
