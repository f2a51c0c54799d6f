//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::FleetError;
use crate::server::handlers::{
    attach_downstream_handler, bypass_preflight_handler, cancel_attempt_handler,
    dashboard_handler, deploy_handler, detach_downstream_handler, get_downstream_handler,
    get_preflight_handler, health_handler, ingest_release_handler, install_event_handler,
    install_status_handler, list_attempts_handler, list_downstreams_handler, output_handler,
    rollback_handler, run_preflight_handler, set_delivery_mode_handler, start_install_handler,
    version_handler,
};
use crate::server::state::ServerState;

/// Routes served by the daemon
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Releases
        .route("/releases", post(ingest_release_handler))
        // Downstreams
        .route(
            "/downstreams",
            get(list_downstreams_handler).post(attach_downstream_handler),
        )
        .route(
            "/downstreams/{id}",
            get(get_downstream_handler).delete(detach_downstream_handler),
        )
        .route("/downstreams/{id}/delivery", put(set_delivery_mode_handler))
        .route("/downstreams/{id}/attempts", get(list_attempts_handler))
        .route(
            "/downstreams/{id}/attempts/{attempt_id}/cancel",
            post(cancel_attempt_handler),
        )
        // Versions on a downstream
        .route(
            "/downstreams/{id}/versions/{sequence}/preflight",
            get(get_preflight_handler).post(run_preflight_handler),
        )
        .route(
            "/downstreams/{id}/versions/{sequence}/preflight/bypass",
            post(bypass_preflight_handler),
        )
        .route(
            "/downstreams/{id}/versions/{sequence}/deploy",
            post(deploy_handler),
        )
        .route(
            "/downstreams/{id}/versions/{sequence}/rollback",
            post(rollback_handler),
        )
        .route(
            "/downstreams/{id}/versions/{sequence}/output",
            get(output_handler),
        )
        // Dashboard
        .route("/apps/{app_id}/dashboard", get(dashboard_handler))
        // Install
        .route("/install/status", get(install_status_handler))
        .route("/install/start", post(start_install_handler))
        .route("/install/events", post(install_event_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), FleetError>>, FleetError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| FleetError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| FleetError::ServerError(e.to_string()))
    });

    Ok(handle)
}
