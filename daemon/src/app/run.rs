//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{AppState, Collaborators};
use crate::errors::FleetError;
use crate::models::release::Release;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{handoff_check, ingester};

/// Run the fleetdeck daemon until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), FleetError> {
    info!("Initializing fleetdeck...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start fleetdeck: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, FleetError> {
    options.layout.setup().await?;

    let collaborators = Collaborators::system(options)?;
    let (app_state, release_rx) = AppState::init(options, collaborators);
    let app_state = Arc::new(app_state);
    shutdown_manager.with_app_state(app_state.clone())?;

    init_ingester_worker(
        app_state.clone(),
        release_rx,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_handoff_check_worker(
        options,
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.enable_socket_server {
        init_socket_server(
            options,
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(app_state)
}

fn init_ingester_worker(
    app_state: Arc<AppState>,
    release_rx: mpsc::Receiver<Release>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), FleetError> {
    info!("Initializing ingester worker...");

    let registry = app_state.registry.clone();
    let ingester_handle = tokio::spawn(async move {
        ingester::run(
            registry.as_ref(),
            release_rx,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_ingester_worker_handle(ingester_handle)
}

fn init_handoff_check_worker(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), FleetError> {
    info!("Initializing handoff check worker...");

    let check_options = options.handoff_check.clone();
    let layout = options.layout.clone();
    let registry = app_state.registry.clone();

    let check_handle = tokio::spawn(async move {
        handoff_check::run(
            &check_options,
            registry.as_ref(),
            &layout,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_handoff_check_worker_handle(check_handle)
}

async fn init_socket_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), FleetError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(app_state);
    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_socket_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    socket_server_handle: Option<JoinHandle<Result<(), FleetError>>>,
    ingester_worker_handle: Option<JoinHandle<()>>,
    handoff_check_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            socket_server_handle: None,
            ingester_worker_handle: None,
            handoff_check_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), FleetError> {
        if self.app_state.is_some() {
            return Err(FleetError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_ingester_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), FleetError> {
        if self.ingester_worker_handle.is_some() {
            return Err(FleetError::ShutdownError("ingester_handle already set".to_string()));
        }
        self.ingester_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_handoff_check_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), FleetError> {
        if self.handoff_check_worker_handle.is_some() {
            return Err(FleetError::ShutdownError(
                "handoff_check_handle already set".to_string(),
            ));
        }
        self.handoff_check_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_socket_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), FleetError>>,
    ) -> Result<(), FleetError> {
        if self.socket_server_handle.is_some() {
            return Err(FleetError::ShutdownError("server_handle already set".to_string()));
        }
        self.socket_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), FleetError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), FleetError> {
        info!("Shutting down fleetdeck...");

        // 1. Socket server, so no new requests arrive
        if let Some(handle) = self.socket_server_handle.take() {
            handle.await.map_err(|e| FleetError::ShutdownError(e.to_string()))??;
        }

        // 2. Handoff check worker
        if let Some(handle) = self.handoff_check_worker_handle.take() {
            handle.await.map_err(|e| FleetError::ShutdownError(e.to_string()))?;
        }

        // 3. Ingester worker
        if let Some(handle) = self.ingester_worker_handle.take() {
            handle.await.map_err(|e| FleetError::ShutdownError(e.to_string()))?;
        }

        // 4. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
