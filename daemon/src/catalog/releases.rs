//! Append-only release catalog

use std::sync::RwLock;

use tracing::{debug, info};

use crate::errors::FleetError;
use crate::models::release::Release;

/// Append-only store of one application's releases.
///
/// Sequences are gapless: the first release fixes the base sequence (any
/// non-negative value) and every later release must be exactly one greater
/// than the current maximum. The check
/// and the append happen under the same write guard, so concurrent ingestions
/// serialize on sequence assignment.
pub struct ReleaseCatalog {
    app_id: String,
    releases: RwLock<Vec<Release>>,
}

impl ReleaseCatalog {
    /// Create an empty catalog for an application
    pub fn new(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            releases: RwLock::new(Vec::new()),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Append a release, returning its sequence
    pub fn ingest(&self, release: Release) -> Result<i64, FleetError> {
        let mut releases = self.releases.write().unwrap_or_else(|e| e.into_inner());

        let sequence = release.sequence;
        if let (Some(first), Some(last)) = (releases.first(), releases.last()) {
            if (first.sequence..=last.sequence).contains(&sequence) {
                return Err(FleetError::DuplicateSequence {
                    app_id: self.app_id.clone(),
                    sequence,
                });
            }
        }

        let expected = match releases.last() {
            Some(last) => last.sequence.checked_add(1).ok_or_else(|| {
                FleetError::BadRequest(format!(
                    "release sequence space of app {} is exhausted",
                    self.app_id
                ))
            })?,
            None => sequence.max(0),
        };
        if sequence != expected {
            return Err(FleetError::OutOfOrder {
                app_id: self.app_id.clone(),
                expected,
                got: sequence,
            });
        }

        info!(
            "Ingested release {} ({}) for app {}",
            sequence, release.source, self.app_id
        );
        releases.push(release);
        Ok(sequence)
    }

    /// Get a release by sequence
    pub fn get(&self, sequence: i64) -> Result<Release, FleetError> {
        let releases = self.releases.read().unwrap_or_else(|e| e.into_inner());
        Self::index_of(&releases, sequence)
            .and_then(|idx| releases.get(idx))
            .cloned()
            .ok_or_else(|| {
                FleetError::NotFound(format!("release {} of app {}", sequence, self.app_id))
            })
    }

    /// Whether a sequence has been ingested
    pub fn contains(&self, sequence: i64) -> bool {
        let releases = self.releases.read().unwrap_or_else(|e| e.into_inner());
        Self::index_of(&releases, sequence).is_some()
    }

    fn index_of(releases: &[Release], sequence: i64) -> Option<usize> {
        let first = releases.first()?.sequence;
        let idx = usize::try_from(sequence.checked_sub(first)?).ok()?;
        (idx < releases.len()).then_some(idx)
    }

    /// Releases with a sequence strictly greater than `sequence`, in order.
    ///
    /// Pass -1 to list everything.
    pub fn list_since(&self, sequence: i64) -> Vec<Release> {
        let releases = self.releases.read().unwrap_or_else(|e| e.into_inner());
        debug!("Listing releases of app {} after {}", self.app_id, sequence);
        releases
            .iter()
            .filter(|r| r.sequence > sequence)
            .cloned()
            .collect()
    }

    /// Highest ingested sequence
    pub fn latest_sequence(&self) -> Option<i64> {
        let releases = self.releases.read().unwrap_or_else(|e| e.into_inner());
        releases.last().map(|r| r.sequence)
    }

    /// Sequence the next ingestion must carry
    pub fn next_sequence(&self) -> i64 {
        self.latest_sequence().map(|s| s.saturating_add(1)).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        let releases = self.releases.read().unwrap_or_else(|e| e.into_inner());
        releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
