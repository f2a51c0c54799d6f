//! Dashboard aggregation

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::warn;

use crate::errors::FleetError;
use crate::models::dashboard::{
    AppStatus, DashboardSnapshot, DownstreamVersionView, ResourceState, ResourceStatus,
};
use crate::catalog::releases::ReleaseCatalog;
use crate::models::release::ResourceRef;
use crate::registry::downstreams::{DownstreamRegistry, DownstreamState};
use crate::status::metrics::MetricsSource;
use crate::status::resources::ResourceStateSource;

/// Builds read-only dashboard snapshots.
///
/// Collaborator failures degrade the snapshot (unknown resource states, no
/// metrics) instead of failing it.
pub struct StatusAggregator {
    registry: Arc<DownstreamRegistry>,
    resources: Arc<dyn ResourceStateSource>,
    metrics: Option<Arc<dyn MetricsSource>>,
    prometheus_address: Option<String>,
}

impl StatusAggregator {
    pub fn new(registry: Arc<DownstreamRegistry>, resources: Arc<dyn ResourceStateSource>) -> Self {
        Self {
            registry,
            resources,
            metrics: None,
            prometheus_address: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSource>, address: Option<String>) -> Self {
        self.metrics = Some(metrics);
        self.prometheus_address = address;
        self
    }

    pub async fn snapshot(
        &self,
        app_id: &str,
        cluster_id: Option<&str>,
    ) -> Result<DashboardSnapshot, FleetError> {
        let catalog = self.registry.catalog();
        if catalog.app_id() != app_id {
            return Err(FleetError::NotFound(format!("application {}", app_id)));
        }

        let downstreams: Vec<Arc<DownstreamState>> = match cluster_id {
            Some(id) => vec![self.registry.snapshot(id)?],
            None => self.registry.list(),
        };

        let statuses = join_all(
            downstreams
                .iter()
                .map(|state| self.app_status(app_id, state)),
        )
        .await;

        let charts = match &self.metrics {
            Some(metrics) => match metrics.charts(app_id, cluster_id).await {
                Ok(charts) => charts,
                Err(e) => {
                    warn!("Metrics unavailable for {}: {}", app_id, e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(DashboardSnapshot {
            app_id: app_id.to_string(),
            generated_at: Utc::now(),
            state: ResourceStatus::rollup(statuses.iter().map(|s| &s.state)),
            downstreams: downstreams
                .iter()
                .map(|s| version_view(catalog, s))
                .collect(),
            app_statuses: statuses,
            metrics: charts,
            prometheus_address: self.prometheus_address.clone(),
        })
    }

    /// Resource states of the downstream's current release
    async fn app_status(&self, app_id: &str, state: &DownstreamState) -> AppStatus {
        let informers: Vec<ResourceRef> = state
            .timeline
            .current()
            .and_then(|sequence| self.registry.catalog().get(sequence).ok())
            .map(|release| release.status_informers)
            .unwrap_or_default();

        let (resource_states, live) = if informers.is_empty() {
            (Vec::new(), true)
        } else {
            match self.resources.resource_states(&state.target, &informers).await {
                Ok(observed) => (align(&informers, observed), true),
                Err(e) => {
                    warn!(
                        "Live resource state unavailable for {}: {}",
                        state.id(),
                        e
                    );
                    (unknown_states(&informers), false)
                }
            }
        };

        AppStatus {
            app_id: app_id.to_string(),
            downstream_id: state.id().to_string(),
            updated_at: Utc::now(),
            state: ResourceStatus::rollup(resource_states.iter().map(|r| &r.state)),
            resource_states,
            live,
        }
    }
}

fn unknown_states(informers: &[ResourceRef]) -> Vec<ResourceState> {
    informers
        .iter()
        .map(|resource| ResourceState {
            resource: resource.clone(),
            state: ResourceStatus::Unknown,
        })
        .collect()
}

/// One entry per informer, in informer order; unreported resources are unknown
fn align(informers: &[ResourceRef], observed: Vec<ResourceState>) -> Vec<ResourceState> {
    informers
        .iter()
        .map(|resource| ResourceState {
            resource: resource.clone(),
            state: observed
                .iter()
                .find(|o| &o.resource == resource)
                .map(|o| o.state)
                .unwrap_or(ResourceStatus::Unknown),
        })
        .collect()
}

fn version_view(catalog: &ReleaseCatalog, state: &DownstreamState) -> DownstreamVersionView {
    let pending = state.timeline.pending();
    let latest_attempt = state.attempts().last().cloned();
    let current = state.timeline.current();
    let current_release = current.and_then(|sequence| catalog.get(sequence).ok());
    DownstreamVersionView {
        downstream_id: state.id().to_string(),
        title: state.target.title.clone(),
        connectivity: state.target.connectivity,
        delivery_mode: state.target.delivery.name().to_string(),
        handoff_connected: state.target.delivery.handoff().map(|h| h.is_connected()),
        current,
        current_deployed_at: current.and_then(|sequence| state.deployed_at(sequence)),
        links: current_release
            .as_ref()
            .map(|release| release.realized_links())
            .unwrap_or_default(),
        allow_rollback: current_release.is_some_and(|release| release.allow_rollback),
        pending_gates: pending.iter().map(|&s| (s, state.gate(s))).collect(),
        pending,
        past: state.timeline.past(),
        latest_attempt,
    }
}
