//! Preflight orchestration against the registry

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::errors::FleetError;
use crate::gate::preflight::{GateEvent, GateState, PreflightReport};
use crate::gate::runner::{PreflightRequest, PreflightRunner};
use crate::registry::downstreams::DownstreamRegistry;
use crate::storage::layout::StorageLayout;

/// Drives gate transitions. The runner is invoked outside the downstream
/// lock; only `Start` and `Finish` are applied under it.
pub struct PreflightService {
    app_slug: String,
    registry: Arc<DownstreamRegistry>,
    runner: Arc<dyn PreflightRunner>,
    layout: StorageLayout,
}

impl PreflightService {
    pub fn new(
        app_slug: &str,
        registry: Arc<DownstreamRegistry>,
        runner: Arc<dyn PreflightRunner>,
        layout: StorageLayout,
    ) -> Self {
        Self {
            app_slug: app_slug.to_string(),
            registry,
            runner,
            layout,
        }
    }

    /// Current gate state of a pair
    pub fn state(&self, downstream_id: &str, sequence: i64) -> Result<GateState, FleetError> {
        Ok(self.registry.snapshot(downstream_id)?.gate(sequence))
    }

    /// Run validation for a pair and record the result
    pub async fn run(&self, downstream_id: &str, sequence: i64) -> Result<GateState, FleetError> {
        self.registry
            .update(downstream_id, |state| {
                state.apply_gate_event(sequence, GateEvent::Start)
            })
            .await?;

        let request = PreflightRequest {
            app_slug: self.app_slug.clone(),
            downstream_id: downstream_id.to_string(),
            sequence,
            manifests_dir: self
                .layout
                .rendered_release_dir(&self.app_slug, downstream_id, sequence)
                .path()
                .to_path_buf(),
        };

        // Owned by the runtime so the gate never stays `Running` when the
        // caller goes away
        let registry = Arc::clone(&self.registry);
        let runner = Arc::clone(&self.runner);
        let finished = tokio::spawn(async move {
            let report = match runner.run(&request).await {
                Ok(report) => report,
                Err(e) => {
                    error!(
                        "Preflight runner failed for release {} on {}: {}",
                        request.sequence, request.downstream_id, e
                    );
                    PreflightReport {
                        passed: false,
                        checks: vec![],
                        detail: e.to_string(),
                    }
                }
            };
            registry
                .update(&request.downstream_id, |state| {
                    state.apply_gate_event(request.sequence, GateEvent::Finish(report))
                })
                .await
        })
        .await
        .map_err(|e| {
            FleetError::Internal(format!(
                "preflight run for release {} on {} did not finish: {}",
                sequence, downstream_id, e
            ))
        })?;

        match finished {
            Ok(state) => {
                info!(
                    "Preflights for release {} on {}: {}",
                    sequence,
                    downstream_id,
                    state.name()
                );
                Ok(state)
            }
            Err(FleetError::InvalidGateTransition { .. }) => {
                // bypassed while the run was in flight; the bypass stands
                let state = self.state(downstream_id, sequence)?;
                warn!(
                    "Discarding preflight result for release {} on {}: gate is {}",
                    sequence, downstream_id, state
                );
                Ok(state)
            }
            Err(e) => Err(e),
        }
    }

    /// Skip validation for a pair. Permanent.
    pub async fn bypass(
        &self,
        downstream_id: &str,
        sequence: i64,
        operator: &str,
    ) -> Result<GateState, FleetError> {
        let state = self
            .registry
            .update(downstream_id, |state| {
                state.apply_gate_event(
                    sequence,
                    GateEvent::Bypass {
                        operator: operator.to_string(),
                    },
                )
            })
            .await?;
        warn!(
            "Preflights bypassed for release {} on {} by {}",
            sequence, downstream_id, operator
        );
        Ok(state)
    }
}
