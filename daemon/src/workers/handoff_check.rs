//! Handoff repository connectivity check

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::delivery::handoff::check_remote;
use crate::registry::downstreams::DownstreamRegistry;
use crate::storage::layout::StorageLayout;

/// Check worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Interval between checks
    pub interval: Duration,

    /// Initial delay before the first check
    pub initial_delay: Duration,

    /// git executable
    pub git: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(5),
            git: "git".to_string(),
        }
    }
}

/// Check every handoff downstream once and record the outcome
pub async fn check_all(options: &Options, registry: &DownstreamRegistry, layout: &StorageLayout) {
    for state in registry.list() {
        let Some(config) = state.target.delivery.handoff() else {
            continue;
        };

        let (succeeded, message) = match check_remote(&options.git, layout, state.id(), config).await {
            Ok(output) if output.success => (true, "repository reachable".to_string()),
            Ok(output) => (false, output.stderr.trim().to_string()),
            Err(e) => (false, e.to_string()),
        };

        if succeeded != config.is_connected() {
            if succeeded {
                info!("Handoff repository for {} is reachable again", state.id());
            } else {
                warn!("Handoff repository for {} is unreachable: {}", state.id(), message);
            }
        }

        if let Err(e) = registry
            .record_handoff_result(state.id(), succeeded, &message)
            .await
        {
            debug!("Could not record check result for {}: {}", state.id(), e);
        }
    }
}

/// Run the check worker
pub async fn run<S, F>(
    options: &Options,
    registry: &DownstreamRegistry,
    layout: &StorageLayout,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Handoff check worker starting...");

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Handoff check worker shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        debug!("Probing handoff repositories...");
        check_all(options, registry, layout).await;

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Handoff check worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
