//! Finite state machine for the preflight gate of one (release, downstream) pair

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::attempt::GateOutcome;

/// Outcome of a single preflight check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Pass,
    Warn,
    Fail,
}

/// A single preflight check result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub title: String,
    pub outcome: CheckOutcome,
    #[serde(default)]
    pub message: String,
}

/// Result returned by a preflight validation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub passed: bool,
    #[serde(default)]
    pub checks: Vec<PreflightCheck>,

    /// Free-form diagnostic detail from the runner
    #[serde(default)]
    pub detail: String,
}

/// Gate state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum GateState {
    /// Validation has not been requested
    NotRun,

    /// Validation in progress
    Running { started_at: DateTime<Utc> },

    /// Validation passed; deployable
    Passed {
        report: PreflightReport,
        finished_at: DateTime<Utc>,
    },

    /// Validation failed; only a bypass can unblock
    Failed {
        report: PreflightReport,
        finished_at: DateTime<Utc>,
    },

    /// Operator skipped validation; permanent for this pair
    Bypassed {
        operator: String,
        at: DateTime<Utc>,
    },
}

impl GateState {
    pub fn name(&self) -> &'static str {
        match self {
            GateState::NotRun => "not_run",
            GateState::Running { .. } => "running",
            GateState::Passed { .. } => "passed",
            GateState::Failed { .. } => "failed",
            GateState::Bypassed { .. } => "bypassed",
        }
    }

    /// Deployment may proceed only from here
    pub fn allows_deploy(&self) -> bool {
        matches!(self, GateState::Passed { .. } | GateState::Bypassed { .. })
    }

    /// No further transition is accepted
    pub fn is_terminal(&self) -> bool {
        self.allows_deploy()
    }

    /// Outcome to record on a deployment attempt
    pub fn outcome(&self) -> GateOutcome {
        match self {
            GateState::Passed { .. } => GateOutcome::Passed,
            GateState::Bypassed { .. } => GateOutcome::Bypassed,
            _ => GateOutcome::Blocked,
        }
    }
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Gate event
#[derive(Debug, Clone)]
pub enum GateEvent {
    /// Validation requested
    Start,

    /// Validation finished; the report decides pass or fail
    Finish(PreflightReport),

    /// Operator bypass
    Bypass { operator: String },
}

/// Preflight gate FSM.
///
/// `NotRun -> Running -> {Passed, Failed}`, plus `Bypass` from `NotRun`,
/// `Running` or `Failed`. `Passed` and `Bypassed` accept nothing further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightGate {
    state: GateState,
}

impl PreflightGate {
    /// Create a gate that has not run
    pub fn new() -> Self {
        Self {
            state: GateState::NotRun,
        }
    }

    /// Get current state
    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: GateEvent) -> Result<(), String> {
        let new_state = match (&self.state, event) {
            (GateState::NotRun, GateEvent::Start) => GateState::Running {
                started_at: Utc::now(),
            },

            (GateState::Running { .. }, GateEvent::Finish(report)) => {
                let finished_at = Utc::now();
                if report.passed {
                    GateState::Passed { report, finished_at }
                } else {
                    GateState::Failed { report, finished_at }
                }
            }

            (
                GateState::NotRun | GateState::Running { .. } | GateState::Failed { .. },
                GateEvent::Bypass { operator },
            ) => GateState::Bypassed {
                operator,
                at: Utc::now(),
            },

            (state, event) => {
                return Err(format!("{} -> {:?}", state.name(), event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for PreflightGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(passed: bool) -> PreflightReport {
        PreflightReport {
            passed,
            checks: vec![],
            detail: String::new(),
        }
    }

    #[test]
    fn test_gate_pass_flow() {
        let mut gate = PreflightGate::new();
        assert!(!gate.state().allows_deploy());

        gate.process(GateEvent::Start).unwrap();
        assert_eq!(gate.state().name(), "running");

        gate.process(GateEvent::Finish(report(true))).unwrap();
        assert!(gate.state().allows_deploy());
        assert_eq!(gate.state().outcome(), GateOutcome::Passed);
    }

    #[test]
    fn test_gate_never_returns_to_not_run() {
        let mut gate = PreflightGate::new();
        gate.process(GateEvent::Start).unwrap();
        gate.process(GateEvent::Finish(report(true))).unwrap();

        assert!(gate.process(GateEvent::Start).is_err());
        assert!(gate
            .process(GateEvent::Bypass {
                operator: "ops".to_string()
            })
            .is_err());
        assert_eq!(gate.state().name(), "passed");
    }

    #[test]
    fn test_failed_gate_can_only_be_bypassed() {
        let mut gate = PreflightGate::new();
        gate.process(GateEvent::Start).unwrap();
        gate.process(GateEvent::Finish(report(false))).unwrap();
        assert_eq!(gate.state().outcome(), GateOutcome::Blocked);

        assert!(gate.process(GateEvent::Start).is_err());
        gate.process(GateEvent::Bypass {
            operator: "ops".to_string(),
        })
        .unwrap();
        assert!(gate.state().allows_deploy());
    }

    #[test]
    fn test_bypass_is_permanent() {
        let mut gate = PreflightGate::new();
        gate.process(GateEvent::Bypass {
            operator: "ops".to_string(),
        })
        .unwrap();

        assert!(gate.process(GateEvent::Start).is_err());
        assert!(gate.process(GateEvent::Finish(report(true))).is_err());
        assert_eq!(gate.state().outcome(), GateOutcome::Bypassed);
    }

    #[test]
    fn test_finish_requires_running() {
        let mut gate = PreflightGate::new();
        assert!(gate.process(GateEvent::Finish(report(true))).is_err());
        assert_eq!(gate.state(), &GateState::NotRun);
    }
}
