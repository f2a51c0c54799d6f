//! Deployment attempt models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Gate decision recorded on an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateOutcome {
    Passed,
    Bypassed,
    Blocked,
}

/// Delivery result recorded on an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Refused before delivery started (gate blocked)
    NotAttempted,

    /// Dry-run/apply in flight
    Pending,

    /// Applied; the release is now current
    Succeeded,

    /// Dry-run reported a render error; apply never ran
    RenderFailed,

    /// Apply ran and failed
    ApplyFailed,

    /// The caller's deadline elapsed first
    TimedOut,

    /// Cancelled by the operator; never promoted
    Cancelled,
}

impl DeliveryOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, DeliveryOutcome::Pending)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DeliveryOutcome::RenderFailed | DeliveryOutcome::ApplyFailed | DeliveryOutcome::TimedOut
        )
    }
}

/// Output captured from both delivery phases
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutput {
    pub dryrun_stdout: String,
    pub dryrun_stderr: String,
    pub apply_stdout: String,
    pub apply_stderr: String,

    /// Set when the attempt never reached apply
    pub render_error: Option<String>,
}

/// One deployment request for a (release, downstream) pair.
///
/// Attempts form an append-only audit trail keyed by
/// (downstream, sequence, ordinal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    /// Unique attempt id
    pub id: String,

    pub downstream_id: String,

    pub sequence: i64,

    /// 1-based position among attempts for the same (downstream, sequence)
    pub ordinal: u32,

    /// Delivery channel used ("direct" / "handoff"), empty when blocked
    pub channel: String,

    pub requested_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,

    pub gate: GateOutcome,

    pub outcome: DeliveryOutcome,

    pub output: DeploymentOutput,

    /// Operator asked to cancel while the attempt was pending
    pub cancel_requested: bool,

    /// Failure detail for operator inspection
    pub error: Option<String>,
}

impl DeploymentAttempt {
    pub fn new(
        downstream_id: &str,
        sequence: i64,
        ordinal: u32,
        gate: GateOutcome,
        channel: &str,
    ) -> Self {
        let outcome = match gate {
            GateOutcome::Blocked => DeliveryOutcome::NotAttempted,
            _ => DeliveryOutcome::Pending,
        };
        let now = Utc::now();
        Self {
            id: crate::utils::generate_uuid(),
            downstream_id: downstream_id.to_string(),
            sequence,
            ordinal,
            channel: channel.to_string(),
            requested_at: now,
            finished_at: if outcome.is_pending() { None } else { Some(now) },
            gate,
            outcome,
            output: DeploymentOutput::default(),
            cancel_requested: false,
            error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.outcome.is_pending()
    }
}
