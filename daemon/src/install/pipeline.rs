//! Install pipeline tracking for online and airgap installs

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::errors::FleetError;

/// Install variant, fixed when the install starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallVariant {
    Online,
    Airgap,
}

/// Coarse pipeline status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    Preparing,

    /// Airgap only
    RewritingImages,

    Installing,
    Installed,
    Failed,
}

impl InstallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallStatus::Installed | InstallStatus::Failed)
    }
}

/// Image-rewrite sub-status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRewriteState {
    pub status: RewriteStatus,
    pub message: String,
}

/// Process-wide install progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallPipelineState {
    pub variant: InstallVariant,
    pub status: InstallStatus,

    /// Human-readable current stage
    pub message: String,

    /// Present for airgap installs only
    pub image_rewrite: Option<ImageRewriteState>,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Install event
#[derive(Debug, Clone)]
pub enum InstallEvent {
    /// Update the message of the current stage
    Progress(String),

    /// Airgap: Preparing -> RewritingImages
    BeginImageRewrite(String),

    /// Airgap: rewrite sub-stage progress
    ImageRewriteProgress(String),

    /// Airgap: rewrite sub-stage done
    ImageRewriteCompleted(String),

    /// Airgap: rewrite sub-stage failed; fails the pipeline
    ImageRewriteFailed(String),

    /// Preparing (online) or RewritingImages (airgap) -> Installing
    BeginInstall(String),

    /// Installing -> Installed
    Installed(String),

    /// Any non-terminal status -> Failed
    Fail(String),
}

impl InstallPipelineState {
    fn new(variant: InstallVariant, message: &str) -> Self {
        let now = Utc::now();
        Self {
            variant,
            status: InstallStatus::Preparing,
            message: message.to_string(),
            image_rewrite: match variant {
                InstallVariant::Online => None,
                InstallVariant::Airgap => Some(ImageRewriteState {
                    status: RewriteStatus::Pending,
                    message: String::new(),
                }),
            },
            started_at: now,
            updated_at: now,
        }
    }

    fn rewrite_status(&self) -> Option<RewriteStatus> {
        self.image_rewrite.as_ref().map(|r| r.status)
    }

    fn set_rewrite(&mut self, status: RewriteStatus, message: String) {
        self.image_rewrite = Some(ImageRewriteState { status, message });
    }

    /// Process an event. Transitions only move forward.
    pub fn process(&mut self, event: InstallEvent) -> Result<(), String> {
        use InstallStatus::*;
        use InstallVariant::*;

        let rewrite = self.rewrite_status();
        match (self.variant, self.status, rewrite, event) {
            (_, status, _, InstallEvent::Progress(message)) if !status.is_terminal() => {
                self.message = message;
            }

            (Airgap, Preparing, _, InstallEvent::BeginImageRewrite(message)) => {
                self.status = RewritingImages;
                self.set_rewrite(RewriteStatus::Pending, String::new());
                self.message = message;
            }

            (
                Airgap,
                RewritingImages,
                Some(RewriteStatus::Pending | RewriteStatus::InProgress),
                InstallEvent::ImageRewriteProgress(message),
            ) => {
                self.set_rewrite(RewriteStatus::InProgress, message);
            }

            (
                Airgap,
                RewritingImages,
                Some(RewriteStatus::Pending | RewriteStatus::InProgress),
                InstallEvent::ImageRewriteCompleted(message),
            ) => {
                self.set_rewrite(RewriteStatus::Completed, message);
            }

            (
                Airgap,
                RewritingImages,
                Some(RewriteStatus::Pending | RewriteStatus::InProgress),
                InstallEvent::ImageRewriteFailed(message),
            ) => {
                self.set_rewrite(RewriteStatus::Failed, message.clone());
                self.status = Failed;
                self.message = message;
            }

            (Online, Preparing, _, InstallEvent::BeginInstall(message))
            | (
                Airgap,
                RewritingImages,
                Some(RewriteStatus::Completed),
                InstallEvent::BeginInstall(message),
            ) => {
                self.status = Installing;
                self.message = message;
            }

            (_, Installing, _, InstallEvent::Installed(message)) => {
                self.status = Installed;
                self.message = message;
            }

            (_, status, _, InstallEvent::Fail(message)) if !status.is_terminal() => {
                if status == RewritingImages && rewrite != Some(RewriteStatus::Completed) {
                    self.set_rewrite(RewriteStatus::Failed, message.clone());
                }
                self.status = Failed;
                self.message = message;
            }

            (variant, status, rewrite, event) => {
                return Err(format!(
                    "{:?} install in {:?} (image rewrite {:?}) cannot accept {:?}",
                    variant, status, rewrite, event
                ));
            }
        }

        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Holds the single install pipeline of this application instance
#[derive(Debug, Default)]
pub struct InstallTracker {
    state: RwLock<Option<InstallPipelineState>>,
}

impl InstallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an install.
    ///
    /// Refused while another install is running or once the application
    /// has been installed; a failed install may be retried.
    pub fn start(
        &self,
        variant: InstallVariant,
        message: &str,
    ) -> Result<InstallPipelineState, FleetError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match state.as_ref().map(|s| s.status) {
            Some(InstallStatus::Installed) => return Err(FleetError::InstallCompleted),
            Some(status) if !status.is_terminal() => return Err(FleetError::InstallAlreadyActive),
            _ => {}
        }

        let fresh = InstallPipelineState::new(variant, message);
        info!("Started {:?} install: {}", variant, message);
        *state = Some(fresh.clone());
        Ok(fresh)
    }

    /// Apply an event to the running install
    pub fn advance(&self, event: InstallEvent) -> Result<InstallPipelineState, FleetError> {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        let current = guard
            .as_mut()
            .ok_or_else(|| FleetError::InvalidInstallTransition("no install has started".to_string()))?;

        let mut draft = current.clone();
        draft
            .process(event)
            .map_err(FleetError::InvalidInstallTransition)?;

        if draft.status == InstallStatus::Failed {
            error!("Install failed: {}", draft.message);
        } else if draft.status != current.status {
            info!("Install {:?}: {}", draft.status, draft.message);
        }
        *current = draft.clone();
        Ok(draft)
    }

    /// Current install state, if an install has started
    pub fn state(&self) -> Option<InstallPipelineState> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
