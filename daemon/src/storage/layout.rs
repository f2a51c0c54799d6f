//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout used by fleetdeck
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Root of rendered release output
    pub fn rendered_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("rendered"))
    }

    /// Rendered manifests of one release for one downstream
    pub fn rendered_release_dir(&self, app_slug: &str, downstream_id: &str, sequence: i64) -> Dir {
        Dir::new(
            self.base_dir
                .join("rendered")
                .join(app_slug)
                .join(downstream_id)
                .join(sequence.to_string()),
        )
    }

    /// Root of version-control working copies
    pub fn handoff_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("handoff"))
    }

    /// Working copy of one downstream's handoff repository
    pub fn handoff_worktree(&self, downstream_id: &str) -> Dir {
        Dir::new(self.base_dir.join("handoff").join(downstream_id))
    }

    /// Deploy key file for one downstream's handoff repository
    pub fn handoff_key_file(&self, downstream_id: &str) -> File {
        File::new(self.base_dir.join("keys").join(format!("{}.key", downstream_id)))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::FleetError> {
        self.rendered_dir().create().await?;
        self.handoff_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/fleetdeck");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fleetdeck");

        Self::new(base_dir)
    }
}
