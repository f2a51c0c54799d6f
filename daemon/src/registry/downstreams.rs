//! Downstream registry

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::catalog::releases::ReleaseCatalog;
use crate::errors::FleetError;
use crate::gate::preflight::{GateEvent, GateState, PreflightGate};
use crate::models::attempt::DeploymentAttempt;
use crate::models::downstream::{Connectivity, DeliveryMode, DownstreamTarget};
use crate::registry::timeline::{Partition, TimelineError, VersionTimeline};

/// Everything known about one downstream.
///
/// Published as an immutable `Arc` snapshot; writers work on a clone.
#[derive(Debug, Clone)]
pub struct DownstreamState {
    pub target: DownstreamTarget,
    pub timeline: VersionTimeline,
    gates: BTreeMap<i64, PreflightGate>,
    attempts: Vec<DeploymentAttempt>,

    /// When each sequence last became current
    deployed_at: BTreeMap<i64, DateTime<Utc>>,
}

impl DownstreamState {
    fn new(target: DownstreamTarget) -> Self {
        Self {
            target,
            timeline: VersionTimeline::new(),
            gates: BTreeMap::new(),
            attempts: Vec::new(),
            deployed_at: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.target.id
    }

    /// Gate state for a sequence; untouched gates are `NotRun`
    pub fn gate(&self, sequence: i64) -> GateState {
        self.gates
            .get(&sequence)
            .map(|g| g.state().clone())
            .unwrap_or(GateState::NotRun)
    }

    /// When a sequence last became current on this downstream
    pub fn deployed_at(&self, sequence: i64) -> Option<DateTime<Utc>> {
        self.deployed_at.get(&sequence).copied()
    }

    /// Audit trail, oldest first
    pub fn attempts(&self) -> &[DeploymentAttempt] {
        &self.attempts
    }

    pub fn attempt(&self, attempt_id: &str) -> Option<&DeploymentAttempt> {
        self.attempts.iter().find(|a| a.id == attempt_id)
    }

    /// Most recent attempt for a sequence
    pub fn latest_attempt(&self, sequence: i64) -> Option<&DeploymentAttempt> {
        self.attempts.iter().rev().find(|a| a.sequence == sequence)
    }

    /// In-flight attempt for a sequence
    pub fn pending_attempt(&self, sequence: i64) -> Option<&DeploymentAttempt> {
        self.attempts
            .iter()
            .find(|a| a.sequence == sequence && a.is_pending())
    }

    /// Any in-flight attempt on this downstream
    pub fn any_pending_attempt(&self) -> Option<&DeploymentAttempt> {
        self.attempts.iter().find(|a| a.is_pending())
    }

    /// Ordinal the next attempt for a sequence gets
    pub fn next_ordinal(&self, sequence: i64) -> u32 {
        self.attempts.iter().filter(|a| a.sequence == sequence).count() as u32 + 1
    }

    pub(crate) fn push_attempt(&mut self, attempt: DeploymentAttempt) {
        self.attempts.push(attempt);
    }

    pub(crate) fn attempt_mut(&mut self, attempt_id: &str) -> Option<&mut DeploymentAttempt> {
        self.attempts.iter_mut().find(|a| a.id == attempt_id)
    }

    pub(crate) fn mark_pending(&mut self, sequence: i64) -> Result<(), FleetError> {
        self.timeline
            .mark_pending(sequence)
            .map_err(|e| self.timeline_error(e, sequence))
    }

    /// Promote without the in-flight attempt check; the executor calls this
    /// while finalizing its own attempt.
    pub(crate) fn promote_release(&mut self, sequence: i64) -> Result<Option<i64>, FleetError> {
        let demoted = self
            .timeline
            .promote(sequence)
            .map_err(|e| self.timeline_error(e, sequence))?;
        self.deployed_at.insert(sequence, Utc::now());
        Ok(demoted)
    }

    pub(crate) fn rollback_release(&mut self, sequence: i64) -> Result<Option<i64>, FleetError> {
        let demoted = self
            .timeline
            .rollback(sequence)
            .map_err(|e| self.timeline_error(e, sequence))?;
        self.deployed_at.insert(sequence, Utc::now());
        Ok(demoted)
    }

    /// Feed an event to the gate of a tracked sequence
    pub(crate) fn apply_gate_event(
        &mut self,
        sequence: i64,
        event: GateEvent,
    ) -> Result<GateState, FleetError> {
        if !self.timeline.contains(sequence) {
            return Err(FleetError::UnknownSequence {
                downstream: self.target.id.clone(),
                sequence,
            });
        }
        let gate = self.gates.entry(sequence).or_default();
        gate.process(event)
            .map_err(|detail| FleetError::InvalidGateTransition {
                downstream: self.target.id.clone(),
                sequence,
                detail,
            })?;
        Ok(gate.state().clone())
    }

    fn timeline_error(&self, err: TimelineError, sequence: i64) -> FleetError {
        let downstream = self.target.id.clone();
        match err {
            TimelineError::AlreadyTracked => FleetError::AlreadyTracked { downstream, sequence },
            TimelineError::NotPending => FleetError::NotPending { downstream, sequence },
            TimelineError::NotPast => FleetError::NotPast { downstream, sequence },
        }
    }
}

/// One lockable unit per downstream
struct DownstreamCell {
    /// Single-writer lock; held only for state transitions
    writer: Mutex<()>,

    /// Last published snapshot
    published: RwLock<Arc<DownstreamState>>,

    /// Set once detached; later writers must not touch the cell
    retired: AtomicBool,
}

impl DownstreamCell {
    fn new(state: DownstreamState) -> Self {
        Self {
            writer: Mutex::new(()),
            published: RwLock::new(Arc::new(state)),
            retired: AtomicBool::new(false),
        }
    }

    fn load(&self) -> Arc<DownstreamState> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn publish(&self, state: DownstreamState) {
        let mut published = self.published.write().unwrap_or_else(|e| e.into_inner());
        *published = Arc::new(state);
    }
}

/// The set of downstreams an application is deployed to.
///
/// Each downstream is independent: writers on different downstreams never
/// contend, and readers only clone an `Arc` so they never see a half-applied
/// transition.
pub struct DownstreamRegistry {
    catalog: Arc<ReleaseCatalog>,
    cells: RwLock<HashMap<String, Arc<DownstreamCell>>>,
}

impl DownstreamRegistry {
    pub fn new(catalog: Arc<ReleaseCatalog>) -> Self {
        Self {
            catalog,
            cells: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<ReleaseCatalog> {
        &self.catalog
    }

    fn cell(&self, downstream_id: &str) -> Result<Arc<DownstreamCell>, FleetError> {
        let cells = self.cells.read().unwrap_or_else(|e| e.into_inner());
        cells
            .get(downstream_id)
            .cloned()
            .ok_or_else(|| FleetError::UnknownDownstream(downstream_id.to_string()))
    }

    /// Run a transition under the downstream's writer lock.
    ///
    /// The closure works on a private copy; the copy is published only when
    /// the closure succeeds, so a failed transition leaves nothing behind.
    pub async fn update<T, F>(&self, downstream_id: &str, f: F) -> Result<T, FleetError>
    where
        F: FnOnce(&mut DownstreamState) -> Result<T, FleetError>,
    {
        let cell = self.cell(downstream_id)?;
        let _guard = cell.writer.lock().await;
        if cell.retired.load(Ordering::SeqCst) {
            return Err(FleetError::UnknownDownstream(downstream_id.to_string()));
        }

        let mut draft = DownstreamState::clone(&cell.load());
        let result = f(&mut draft)?;
        cell.publish(draft);
        Ok(result)
    }

    /// Consistent snapshot of one downstream
    pub fn snapshot(&self, downstream_id: &str) -> Result<Arc<DownstreamState>, FleetError> {
        Ok(self.cell(downstream_id)?.load())
    }

    /// Snapshots of every downstream, ordered by id
    pub fn list(&self) -> Vec<Arc<DownstreamState>> {
        let cells: Vec<Arc<DownstreamCell>> = {
            let cells = self.cells.read().unwrap_or_else(|e| e.into_inner());
            cells.values().cloned().collect()
        };
        let mut states: Vec<Arc<DownstreamState>> = cells.iter().map(|c| c.load()).collect();
        states.sort_by(|a, b| a.id().cmp(b.id()));
        states
    }

    pub fn ids(&self) -> Vec<String> {
        let cells = self.cells.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = cells.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Attach a downstream, optionally staging existing releases as pending
    pub fn attach(&self, target: DownstreamTarget, seed_pending: &[i64]) -> Result<(), FleetError> {
        let mut state = DownstreamState::new(target);
        for &sequence in seed_pending {
            if !self.catalog.contains(sequence) {
                return Err(FleetError::UnknownSequence {
                    downstream: state.target.id.clone(),
                    sequence,
                });
            }
            state.mark_pending(sequence)?;
        }

        let mut cells = self.cells.write().unwrap_or_else(|e| e.into_inner());
        if cells.contains_key(&state.target.id) {
            return Err(FleetError::DownstreamExists(state.target.id.clone()));
        }
        info!(
            "Attached downstream {} ({}) with {} pending release(s)",
            state.target.id,
            state.target.title,
            seed_pending.len()
        );
        cells.insert(state.target.id.clone(), Arc::new(DownstreamCell::new(state)));
        Ok(())
    }

    /// Detach a downstream; refused while one of its attempts is in flight
    pub async fn detach(&self, downstream_id: &str) -> Result<Arc<DownstreamState>, FleetError> {
        let cell = self.cell(downstream_id)?;
        let _guard = cell.writer.lock().await;
        if cell.retired.load(Ordering::SeqCst) {
            return Err(FleetError::UnknownDownstream(downstream_id.to_string()));
        }

        let state = cell.load();
        if let Some(attempt) = state.any_pending_attempt() {
            return Err(FleetError::AttemptInProgress {
                downstream: downstream_id.to_string(),
                sequence: attempt.sequence,
                attempt_id: attempt.id.clone(),
            });
        }

        cell.retired.store(true, Ordering::SeqCst);
        let mut cells = self.cells.write().unwrap_or_else(|e| e.into_inner());
        cells.remove(downstream_id);
        info!("Detached downstream {}", downstream_id);
        Ok(state)
    }

    /// Stage a release as pending on a downstream
    pub async fn mark_pending(&self, downstream_id: &str, sequence: i64) -> Result<(), FleetError> {
        if !self.catalog.contains(sequence) {
            return Err(FleetError::UnknownSequence {
                downstream: downstream_id.to_string(),
                sequence,
            });
        }
        self.update(downstream_id, |state| state.mark_pending(sequence))
            .await?;
        debug!("Downstream {}: release {} pending", downstream_id, sequence);
        Ok(())
    }

    /// Make a pending release current; the prior current becomes past
    pub async fn promote(&self, downstream_id: &str, sequence: i64) -> Result<(), FleetError> {
        let demoted = self
            .update(downstream_id, |state| {
                if let Some(attempt) = state.pending_attempt(sequence) {
                    return Err(FleetError::AttemptInProgress {
                        downstream: state.target.id.clone(),
                        sequence,
                        attempt_id: attempt.id.clone(),
                    });
                }
                state.promote_release(sequence)
            })
            .await?;
        info!(
            "Downstream {}: release {} is current (previous: {:?})",
            downstream_id, sequence, demoted
        );
        Ok(())
    }

    /// Re-designate a past release as current.
    ///
    /// Only allowed when the current release permits rolling back from it.
    pub async fn rollback(&self, downstream_id: &str, sequence: i64) -> Result<(), FleetError> {
        let catalog = Arc::clone(&self.catalog);
        let demoted = self
            .update(downstream_id, |state| {
                let current = state.timeline.current();
                if let (Some(Partition::Past), Some(current)) =
                    (state.timeline.partition_of(sequence), current)
                {
                    let allowed = catalog
                        .get(current)
                        .map(|release| release.allow_rollback)
                        .unwrap_or(false);
                    if !allowed {
                        return Err(FleetError::RollbackNotAllowed {
                            downstream: state.target.id.clone(),
                            sequence: current,
                        });
                    }
                }
                state.rollback_release(sequence)
            })
            .await?;
        warn!(
            "Downstream {}: rolled back to release {} (demoted: {:?})",
            downstream_id, sequence, demoted
        );
        Ok(())
    }

    /// Switch delivery mode; refused while any attempt is pending
    pub async fn set_delivery_mode(
        &self,
        downstream_id: &str,
        mode: DeliveryMode,
    ) -> Result<(), FleetError> {
        let name = mode.name();
        self.update(downstream_id, move |state| {
            if let Some(attempt) = state.any_pending_attempt() {
                return Err(FleetError::ModeSwitchConflict {
                    downstream: state.target.id.clone(),
                    attempt_id: attempt.id.clone(),
                });
            }
            state.target.delivery = mode;
            Ok(())
        })
        .await?;
        info!("Downstream {}: delivery mode set to {}", downstream_id, name);
        Ok(())
    }

    /// Record cluster reachability
    pub async fn set_connectivity(
        &self,
        downstream_id: &str,
        connectivity: Connectivity,
    ) -> Result<(), FleetError> {
        self.update(downstream_id, |state| {
            state.target.connectivity = connectivity;
            Ok(())
        })
        .await
    }

    /// Record the outcome of a push/pull against the handoff repository.
    ///
    /// A no-op for direct downstreams.
    pub async fn record_handoff_result(
        &self,
        downstream_id: &str,
        succeeded: bool,
        message: &str,
    ) -> Result<(), FleetError> {
        self.update(downstream_id, |state| {
            if let DeliveryMode::Handoff(config) = &mut state.target.delivery {
                config.record_result(succeeded, message);
            }
            Ok(())
        })
        .await
    }
}
