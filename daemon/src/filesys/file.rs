//! File operations

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::FleetError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    pub async fn read_string(&self) -> Result<String, FleetError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, FleetError> {
        let contents = self.read_string().await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Replace the file contents, creating parent directories.
    ///
    /// Written to a sibling temp file first so readers never see a partial
    /// manifest.
    pub async fn write_string(&self, contents: &str) -> Result<(), FleetError> {
        self.write_with_mode(contents, None).await
    }

    /// Like `write_string` but readable by the owner only (0o600 on Unix)
    pub async fn write_private(&self, contents: &str) -> Result<(), FleetError> {
        self.write_with_mode(contents, Some(0o600)).await
    }

    async fn write_with_mode(&self, contents: &str, mode: Option<u32>) -> Result<(), FleetError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut open = fs::OpenOptions::new();
        open.write(true).create(true).truncate(true);
        apply_mode(&mut open, mode);

        let mut file = open.open(&temp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[cfg(unix)]
fn apply_mode(open: &mut fs::OpenOptions, mode: Option<u32>) {
    if let Some(mode) = mode {
        open.mode(mode);
    }
}

#[cfg(not(unix))]
fn apply_mode(_open: &mut fs::OpenOptions, _mode: Option<u32>) {}
