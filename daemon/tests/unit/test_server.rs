//! HTTP surface

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use fleetdeck::server::serve::router;
use fleetdeck::server::state::ServerState;

use crate::common::{harness, FakeChannel};

fn app() -> Router {
    let h = harness(FakeChannel::succeeding());
    router(Arc::new(ServerState::new(h.app)))
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(body) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let router = app();
    let (status, body) = call(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "fleetdeck");
}

#[tokio::test]
async fn test_deploy_flow_over_http() {
    let router = app();

    let (status, body) = call(
        &router,
        Method::POST,
        "/releases",
        Some(json!({"sequence": 1, "source": "Upstream Update", "versionLabel": "1.0.1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sequence"], 1);

    let (status, body) = call(
        &router,
        Method::POST,
        "/downstreams",
        Some(json!({"id": "cluster-x", "title": "Cluster X", "seedPending": [1]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["pendingVersions"][0]["preflightState"], "not_run");

    let (status, body) = call(
        &router,
        Method::POST,
        "/downstreams/cluster-x/versions/1/deploy",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "gate_blocked");
    assert!(body["details"]["attemptId"].is_string());

    let (status, body) = call(
        &router,
        Method::POST,
        "/downstreams/cluster-x/versions/1/preflight/bypass",
        Some(json!({"operator": "ops@acme"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "bypassed");
    assert_eq!(body["bypassedBy"], "ops@acme");

    let (status, body) = call(
        &router,
        Method::POST,
        "/downstreams/cluster-x/versions/1/deploy",
        Some(json!({"timeoutSecs": 30})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "succeeded");
    assert_eq!(body["ordinal"], 2);

    let (status, body) = call(&router, Method::GET, "/downstreams/cluster-x", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currentVersion"]["sequence"], 1);
    assert_eq!(body["currentVersion"]["lastOutcome"], "succeeded");

    let (status, body) = call(&router, Method::GET, "/apps/app-1/dashboard", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["downstreams"][0]["currentSequence"], 1);
}

#[tokio::test]
async fn test_error_statuses() {
    let router = app();

    let (status, body) = call(&router, Method::GET, "/downstreams/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "validation");

    call(
        &router,
        Method::POST,
        "/releases",
        Some(json!({"sequence": 4, "source": "Upstream Update"})),
    )
    .await;
    let (status, body) = call(
        &router,
        Method::POST,
        "/releases",
        Some(json!({"sequence": 6, "source": "Upstream Update"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let (status, body) = call(
        &router,
        Method::POST,
        "/install/events",
        Some(json!({"event": "installed"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "install");

    let (status, body) = call(&router, Method::GET, "/install/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["installStatus"], "not_started");
}
