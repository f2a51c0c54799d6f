//! Release ingestion worker

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::errors::FleetError;
use crate::models::release::Release;
use crate::registry::downstreams::DownstreamRegistry;

/// Ingester worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Capacity of the release channel
    pub queue_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self { queue_depth: 64 }
    }
}

/// Ingest a release, then stage it as pending on every attached downstream.
///
/// Failing to stage on one downstream is logged and does not undo the
/// ingest or affect the others.
pub async fn ingest_release(
    registry: &DownstreamRegistry,
    release: Release,
) -> Result<i64, FleetError> {
    let sequence = registry.catalog().ingest(release)?;

    for downstream_id in registry.ids() {
        if let Err(e) = registry.mark_pending(&downstream_id, sequence).await {
            warn!(
                "Release {} not staged on {}: {}",
                sequence, downstream_id, e
            );
        }
    }
    Ok(sequence)
}

/// Run the ingester worker until the channel closes or shutdown is signalled
pub async fn run(
    registry: &DownstreamRegistry,
    mut releases: mpsc::Receiver<Release>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Ingester worker starting...");

    loop {
        let release = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Ingester worker shutting down...");
                return;
            }
            release = releases.recv() => match release {
                Some(release) => release,
                None => {
                    info!("Release source closed, ingester worker exiting...");
                    return;
                }
            },
        };

        let proposed = release.sequence;
        match ingest_release(registry, release).await {
            Ok(sequence) => info!("Ingested release {}", sequence),
            Err(e) => error!("Rejected release {}: {}", proposed, e),
        }
    }
}
