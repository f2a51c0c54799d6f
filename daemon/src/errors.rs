//! Error types for fleetdeck

use thiserror::Error;

use crate::gate::preflight::GateState;

/// Coarse failure category, used by callers to decide who acts next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; the caller must correct it
    Validation,
    /// Recoverable by running validation or bypassing the gate
    GateBlocked,
    /// Delivery preconditions not met; nothing is retried
    Delivery,
    /// Lifecycle violation in the install pipeline
    Install,
    /// Infrastructure or collaborator failure
    Internal,
}

/// Main error type for fleetdeck
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    // -- release catalog -------------------------------------------------
    #[error("Release {sequence} already exists for app {app_id}")]
    DuplicateSequence { app_id: String, sequence: i64 },

    #[error("Release sequence out of order for app {app_id}: expected {expected}, got {got}")]
    OutOfOrder {
        app_id: String,
        expected: i64,
        got: i64,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    // -- downstream registry ---------------------------------------------
    #[error("Unknown downstream: {0}")]
    UnknownDownstream(String),

    #[error("Downstream already attached: {0}")]
    DownstreamExists(String),

    #[error("Downstream {downstream}: release {sequence} does not exist")]
    UnknownSequence { downstream: String, sequence: i64 },

    #[error("Downstream {downstream}: release {sequence} is already tracked")]
    AlreadyTracked { downstream: String, sequence: i64 },

    #[error("Downstream {downstream}: release {sequence} is not pending")]
    NotPending { downstream: String, sequence: i64 },

    #[error("Downstream {downstream}: release {sequence} is not a past version")]
    NotPast { downstream: String, sequence: i64 },

    #[error("Downstream {downstream}: release {sequence} does not allow rollback")]
    RollbackNotAllowed { downstream: String, sequence: i64 },

    // -- preflight gate --------------------------------------------------
    #[error("Downstream {downstream}: release {sequence} blocked by preflight gate in state {state} (attempt {attempt_id})")]
    GateBlocked {
        downstream: String,
        sequence: i64,
        state: GateState,
        attempt_id: String,
    },

    #[error("Downstream {downstream}: release {sequence}: invalid preflight transition: {detail}")]
    InvalidGateTransition {
        downstream: String,
        sequence: i64,
        detail: String,
    },

    // -- delivery --------------------------------------------------------
    #[error("Downstream {downstream}: external handoff repository is unreachable")]
    HandoffUnreachable { downstream: String },

    #[error("Downstream {downstream}: cannot switch delivery mode while attempt {attempt_id} is pending")]
    ModeSwitchConflict {
        downstream: String,
        attempt_id: String,
    },

    #[error("Downstream {downstream}: attempt {attempt_id} for release {sequence} is still in progress")]
    AttemptInProgress {
        downstream: String,
        sequence: i64,
        attempt_id: String,
    },

    #[error("Downstream {downstream}: attempt {attempt_id} has already finished")]
    AttemptFinished {
        downstream: String,
        attempt_id: String,
    },

    // -- install pipeline ------------------------------------------------
    #[error("Invalid install transition: {0}")]
    InvalidInstallTransition(String),

    #[error("An install is already in progress")]
    InstallAlreadyActive,

    #[error("The application has already been installed")]
    InstallCompleted,

    // -- ambient ---------------------------------------------------------
    #[error("Command error: {0}")]
    CommandError(String),

    #[error("Collaborator error: {0}")]
    CollaboratorError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::DuplicateSequence { .. }
            | FleetError::OutOfOrder { .. }
            | FleetError::NotFound(_)
            | FleetError::BadRequest(_)
            | FleetError::UnknownDownstream(_)
            | FleetError::DownstreamExists(_)
            | FleetError::UnknownSequence { .. }
            | FleetError::AlreadyTracked { .. }
            | FleetError::NotPending { .. }
            | FleetError::NotPast { .. }
            | FleetError::RollbackNotAllowed { .. }
            | FleetError::InvalidGateTransition { .. } => ErrorKind::Validation,

            FleetError::GateBlocked { .. } => ErrorKind::GateBlocked,

            FleetError::HandoffUnreachable { .. }
            | FleetError::ModeSwitchConflict { .. }
            | FleetError::AttemptInProgress { .. }
            | FleetError::AttemptFinished { .. } => ErrorKind::Delivery,

            FleetError::InvalidInstallTransition(_)
            | FleetError::InstallAlreadyActive
            | FleetError::InstallCompleted => ErrorKind::Install,

            _ => ErrorKind::Internal,
        }
    }
}

impl From<anyhow::Error> for FleetError {
    fn from(err: anyhow::Error) -> Self {
        FleetError::Internal(err.to_string())
    }
}
