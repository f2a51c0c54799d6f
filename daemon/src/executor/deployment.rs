//! Deployment executor

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::delivery::channel::{DeliveryChannel, DeliveryRequest, DryRunReport};
use crate::delivery::selector::{select_channel, ChannelProvider};
use crate::errors::FleetError;
use crate::gate::preflight::GateState;
use crate::models::attempt::{DeliveryOutcome, DeploymentAttempt, DeploymentOutput, GateOutcome};
use crate::models::downstream::DeliveryMode;
use crate::registry::downstreams::{DownstreamRegistry, DownstreamState};
use crate::registry::timeline::Partition;
use crate::storage::layout::StorageLayout;

/// How an execute call got past (or stopped at) its admission checks
enum Admission {
    Blocked {
        attempt: DeploymentAttempt,
        gate: GateState,
    },
    Started {
        attempt: DeploymentAttempt,
        channel: Arc<dyn DeliveryChannel>,
        namespace: String,
    },
}

/// What the channel produced, before cancellation is taken into account
struct Delivered {
    outcome: DeliveryOutcome,
    output: DeploymentOutput,
    error: Option<String>,

    /// Result of a push to the handoff repository, when one was attempted
    handoff_result: Option<(bool, String)>,
}

impl Delivered {
    fn failed(outcome: DeliveryOutcome, output: DeploymentOutput, error: String) -> Self {
        Self {
            outcome,
            output,
            error: Some(error),
            handoff_result: None,
        }
    }
}

/// Runs dry-run then apply for one (downstream, sequence) pair.
///
/// The downstream lock is held only to admit the attempt and to record its
/// outcome; the channel itself runs unlocked. Channel work on one downstream
/// is serialized, since handoff attempts share a working copy and the order
/// in which attempts finish decides which release ends up current.
pub struct DeploymentExecutor {
    app_slug: String,
    registry: Arc<DownstreamRegistry>,
    channels: Arc<dyn ChannelProvider>,
    layout: StorageLayout,
    delivery_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// An admitted attempt, ready to run detached from its caller
struct AttemptRun {
    registry: Arc<DownstreamRegistry>,
    channel: Arc<dyn DeliveryChannel>,
    request: DeliveryRequest,
    attempt_id: String,
    deadline: Option<Duration>,
    delivery_lock: Arc<tokio::sync::Mutex<()>>,
}

impl DeploymentExecutor {
    pub fn new(
        app_slug: &str,
        registry: Arc<DownstreamRegistry>,
        channels: Arc<dyn ChannelProvider>,
        layout: StorageLayout,
    ) -> Self {
        Self {
            app_slug: app_slug.to_string(),
            registry,
            channels,
            layout,
            delivery_locks: Mutex::new(HashMap::new()),
        }
    }

    fn delivery_lock(&self, downstream_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.delivery_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(downstream_id.to_string()).or_default().clone()
    }

    pub fn registry(&self) -> &Arc<DownstreamRegistry> {
        &self.registry
    }

    /// Deploy a pending release to a downstream.
    ///
    /// Returns the finished attempt, whatever its outcome. Errors are
    /// reserved for requests that never started delivering: a blocked gate
    /// (the blocked attempt is still recorded), a non-pending sequence, an
    /// unreachable handoff repository or another attempt in flight.
    pub async fn execute(
        &self,
        downstream_id: &str,
        sequence: i64,
        deadline: Option<Duration>,
    ) -> Result<DeploymentAttempt, FleetError> {
        let release = self.registry.catalog().get(sequence)?;
        let channels = Arc::clone(&self.channels);

        let admission = self
            .registry
            .update(downstream_id, |state| admit(state, sequence, channels.as_ref()))
            .await?;

        let (attempt, channel, namespace) = match admission {
            Admission::Blocked { attempt, gate } => {
                warn!(
                    "Deployment of release {} to {} blocked by preflight gate ({})",
                    sequence, downstream_id, gate
                );
                return Err(FleetError::GateBlocked {
                    downstream: downstream_id.to_string(),
                    sequence,
                    state: gate,
                    attempt_id: attempt.id,
                });
            }
            Admission::Started {
                attempt,
                channel,
                namespace,
            } => (attempt, channel, namespace),
        };

        info!(
            "Attempt {} started: release {} to {} via {}",
            attempt.id,
            sequence,
            downstream_id,
            channel.kind()
        );

        let request = DeliveryRequest {
            app_slug: self.app_slug.clone(),
            downstream_id: downstream_id.to_string(),
            namespace,
            manifests_dir: self
                .layout
                .rendered_release_dir(&self.app_slug, downstream_id, sequence)
                .path()
                .to_path_buf(),
            release,
        };

        let run = AttemptRun {
            registry: Arc::clone(&self.registry),
            channel,
            request,
            attempt_id: attempt.id.clone(),
            deadline,
            delivery_lock: self.delivery_lock(downstream_id),
        };

        // Owned by the runtime: a caller that goes away still gets its
        // attempt finalized
        let finished = tokio::spawn(run.run()).await.map_err(|e| {
            FleetError::Internal(format!("attempt {} did not finish: {}", attempt.id, e))
        })??;

        match finished.outcome {
            DeliveryOutcome::Succeeded => info!(
                "Attempt {} succeeded: release {} is current on {}",
                finished.id, sequence, downstream_id
            ),
            DeliveryOutcome::Cancelled => warn!(
                "Attempt {} finished after cancellation; release {} stays pending on {}",
                finished.id, sequence, downstream_id
            ),
            outcome => error!(
                "Attempt {} for release {} on {} ended {:?}: {}",
                finished.id,
                sequence,
                downstream_id,
                outcome,
                finished.error.as_deref().unwrap_or("")
            ),
        }
        Ok(finished)
    }

    /// Mark an in-flight attempt cancelled.
    ///
    /// The apply already issued keeps running; the attempt is finalized as
    /// `Cancelled` when it returns and the release is never promoted.
    pub async fn cancel_attempt(
        &self,
        downstream_id: &str,
        attempt_id: &str,
    ) -> Result<DeploymentAttempt, FleetError> {
        let attempt = self
            .registry
            .update(downstream_id, |state| {
                let downstream = state.id().to_string();
                let attempt = state.attempt_mut(attempt_id).ok_or_else(|| {
                    FleetError::NotFound(format!("attempt {} on {}", attempt_id, downstream))
                })?;
                if !attempt.is_pending() {
                    return Err(FleetError::AttemptFinished {
                        downstream,
                        attempt_id: attempt_id.to_string(),
                    });
                }
                attempt.cancel_requested = true;
                Ok(attempt.clone())
            })
            .await?;
        warn!("Attempt {} on {} marked cancelled", attempt_id, downstream_id);
        Ok(attempt)
    }

    /// Attempts on a downstream, oldest first, optionally for one sequence
    pub fn list_attempts(
        &self,
        downstream_id: &str,
        sequence: Option<i64>,
    ) -> Result<Vec<DeploymentAttempt>, FleetError> {
        let state = self.registry.snapshot(downstream_id)?;
        Ok(state
            .attempts()
            .iter()
            .filter(|a| sequence.map_or(true, |s| a.sequence == s))
            .cloned()
            .collect())
    }

    /// Output captured by the latest attempt for a pair
    pub fn downstream_output(
        &self,
        downstream_id: &str,
        sequence: i64,
    ) -> Result<DeploymentOutput, FleetError> {
        let state = self.registry.snapshot(downstream_id)?;
        state
            .latest_attempt(sequence)
            .map(|a| a.output.clone())
            .ok_or_else(|| {
                FleetError::NotFound(format!(
                    "no deployment attempt for release {} on {}",
                    sequence, downstream_id
                ))
            })
    }
}

impl AttemptRun {
    /// Deliver, then record the outcome. The delivery lock is held until the
    /// outcome is recorded so attempts on one downstream finish in the order
    /// they delivered.
    async fn run(self) -> Result<DeploymentAttempt, FleetError> {
        let downstream_id = self.request.downstream_id.clone();
        let kind = self.channel.kind();

        let serialized = async {
            let guard = Arc::clone(&self.delivery_lock).lock_owned().await;
            let delivered = if self.cancel_requested() {
                Delivered::failed(
                    DeliveryOutcome::Cancelled,
                    DeploymentOutput::default(),
                    "cancelled before delivery started".to_string(),
                )
            } else {
                deliver(self.channel.as_ref(), &self.request).await
            };
            (guard, delivered)
        };

        let (guard, delivered) = match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, serialized).await {
                Ok((guard, delivered)) => (Some(guard), delivered),
                Err(_) => (
                    None,
                    Delivered::failed(
                        DeliveryOutcome::TimedOut,
                        DeploymentOutput::default(),
                        format!("deadline of {:?} elapsed before delivery finished", deadline),
                    ),
                ),
            },
            None => {
                let (guard, delivered) = serialized.await;
                (Some(guard), delivered)
            }
        };

        let attempt_id = self.attempt_id;
        let finished = self
            .registry
            .update(&downstream_id, |state| {
                finalize(state, &attempt_id, kind, delivered)
            })
            .await;
        drop(guard);
        finished
    }

    fn cancel_requested(&self) -> bool {
        self.registry
            .snapshot(&self.request.downstream_id)
            .ok()
            .and_then(|state| {
                state
                    .attempt(&self.attempt_id)
                    .map(|attempt| attempt.cancel_requested)
            })
            .unwrap_or(false)
    }
}

/// Admission checks, run under the downstream lock
fn admit(
    state: &mut DownstreamState,
    sequence: i64,
    channels: &dyn ChannelProvider,
) -> Result<Admission, FleetError> {
    if state.timeline.partition_of(sequence) != Some(Partition::Pending) {
        return Err(FleetError::NotPending {
            downstream: state.id().to_string(),
            sequence,
        });
    }

    let gate = state.gate(sequence);
    if !gate.allows_deploy() {
        let attempt = DeploymentAttempt::new(
            state.id(),
            sequence,
            state.next_ordinal(sequence),
            GateOutcome::Blocked,
            "",
        );
        state.push_attempt(attempt.clone());
        return Ok(Admission::Blocked { attempt, gate });
    }

    if let Some(pending) = state.pending_attempt(sequence) {
        return Err(FleetError::AttemptInProgress {
            downstream: state.id().to_string(),
            sequence,
            attempt_id: pending.id.clone(),
        });
    }

    let channel = select_channel(&state.target, channels)?;
    let attempt = DeploymentAttempt::new(
        state.id(),
        sequence,
        state.next_ordinal(sequence),
        gate.outcome(),
        channel.kind(),
    );
    state.push_attempt(attempt.clone());
    Ok(Admission::Started {
        attempt,
        channel,
        namespace: state.target.namespace.clone(),
    })
}

/// Dry-run, then apply. Never touches the registry.
async fn deliver(channel: &dyn DeliveryChannel, request: &DeliveryRequest) -> Delivered {
    let mut output = DeploymentOutput::default();

    match channel.dry_run(request).await {
        Ok(DryRunReport::Rendered(dry)) => {
            output.dryrun_stdout = dry.stdout;
            output.dryrun_stderr = dry.stderr;
        }
        Ok(DryRunReport::RenderFailed { error, output: dry }) => {
            output.dryrun_stdout = dry.stdout;
            output.dryrun_stderr = dry.stderr;
            output.render_error = Some(error.clone());
            return Delivered::failed(DeliveryOutcome::RenderFailed, output, error);
        }
        Err(e) => {
            let error = format!("dry-run could not run: {}", e);
            output.render_error = Some(error.clone());
            return Delivered::failed(DeliveryOutcome::RenderFailed, output, error);
        }
    }

    debug!(
        "Dry-run of release {} on {} passed",
        request.release.sequence, request.downstream_id
    );

    match channel.apply(request).await {
        Ok(report) => {
            output.apply_stdout = report.output.stdout;
            output.apply_stderr = report.output.stderr;
            let handoff_result = (channel.kind() == "handoff").then(|| {
                let message = match (&report.reference, report.succeeded) {
                    (Some(reference), true) => format!("pushed {}", reference),
                    (None, true) => "pushed".to_string(),
                    (_, false) => last_line(&output.apply_stderr),
                };
                (report.succeeded, message)
            });
            if report.succeeded {
                Delivered {
                    outcome: DeliveryOutcome::Succeeded,
                    output,
                    error: None,
                    handoff_result,
                }
            } else {
                let error = format!("apply failed: {}", last_line(&output.apply_stderr));
                Delivered {
                    handoff_result,
                    ..Delivered::failed(DeliveryOutcome::ApplyFailed, output, error)
                }
            }
        }
        Err(e) => Delivered::failed(
            DeliveryOutcome::ApplyFailed,
            output,
            format!("apply could not run: {}", e),
        ),
    }
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Record the outcome under the downstream lock, promoting on success
fn finalize(
    state: &mut DownstreamState,
    attempt_id: &str,
    channel_kind: &str,
    delivered: Delivered,
) -> Result<DeploymentAttempt, FleetError> {
    let downstream = state.id().to_string();
    let (sequence, cancelled) = state
        .attempt(attempt_id)
        .map(|a| (a.sequence, a.cancel_requested))
        .ok_or_else(|| FleetError::NotFound(format!("attempt {} on {}", attempt_id, downstream)))?;

    let mut outcome = if cancelled {
        DeliveryOutcome::Cancelled
    } else {
        delivered.outcome
    };
    let mut error = delivered.error;

    if outcome == DeliveryOutcome::Succeeded {
        if let Err(e) = state.promote_release(sequence) {
            outcome = DeliveryOutcome::ApplyFailed;
            error = Some(format!("applied but could not promote: {}", e));
        }
    }

    if channel_kind == "handoff" {
        if let (Some((succeeded, message)), DeliveryMode::Handoff(config)) =
            (delivered.handoff_result, &mut state.target.delivery)
        {
            config.record_result(succeeded, message);
        }
    }

    let attempt = state
        .attempt_mut(attempt_id)
        .ok_or_else(|| FleetError::NotFound(format!("attempt {} on {}", attempt_id, downstream)))?;
    attempt.outcome = outcome;
    attempt.output = delivered.output;
    attempt.error = error;
    attempt.finished_at = Some(chrono::Utc::now());
    Ok(attempt.clone())
}
