//! Dashboard snapshots over fake resource and metrics sources

use std::sync::Arc;

use fleetdeck::app::state::{AppState, Collaborators};
use fleetdeck::errors::FleetError;
use fleetdeck::models::dashboard::ResourceStatus;
use fleetdeck::models::downstream::DownstreamTarget;
use fleetdeck::models::release::{AppLink, ApplicationPort, ResourceRef};

use crate::common::{
    options, release, FailingMetrics, FakeChannel, FakeChannels, FakeResources, FakeRunner,
};

fn app(reachable: bool) -> AppState {
    let collaborators = Collaborators {
        channels: Arc::new(FakeChannels(Arc::new(FakeChannel::succeeding()))),
        preflight: Arc::new(FakeRunner::passing()),
        resources: Arc::new(FakeResources { reachable }),
        metrics: Some(Arc::new(FailingMetrics)),
        prometheus_address: Some("http://prometheus:9090".to_string()),
    };
    AppState::init(&options(), collaborators).0
}

async fn deployed_with_informers(app: &AppState) {
    let mut first = release(1);
    first.status_informers = vec![
        ResourceRef::new("deployment", "web", "default"),
        ResourceRef::new("service", "web", "default"),
    ];
    app.ingest(first).await.unwrap();
    app.attach(DownstreamTarget::new("cluster-x", "Cluster X"), &[1])
        .unwrap();
    app.attach(DownstreamTarget::new("cluster-y", "Cluster Y"), &[])
        .unwrap();
    app.promote("cluster-x", 1).await.unwrap();
}

#[tokio::test]
async fn test_snapshot_reports_live_states() {
    let app = app(true);
    deployed_with_informers(&app).await;

    let snapshot = app.snapshot("app-1", None).await.unwrap();
    assert_eq!(snapshot.downstreams.len(), 2);
    assert_eq!(snapshot.downstreams[0].current, Some(1));

    let x = &snapshot.app_statuses[0];
    assert_eq!(x.downstream_id, "cluster-x");
    assert!(x.live);
    assert_eq!(x.state, ResourceStatus::Ready);
    assert_eq!(x.resource_states.len(), 2);

    // metrics failures degrade to no charts
    assert!(snapshot.metrics.is_empty());
    assert_eq!(
        snapshot.prometheus_address.as_deref(),
        Some("http://prometheus:9090")
    );
}

#[tokio::test]
async fn test_unreachable_cluster_reports_unknown() {
    let app = app(false);
    deployed_with_informers(&app).await;

    let snapshot = app.snapshot("app-1", Some("cluster-x")).await.unwrap();
    assert_eq!(snapshot.downstreams.len(), 1);

    let status = &snapshot.app_statuses[0];
    assert!(!status.live);
    assert!(status
        .resource_states
        .iter()
        .all(|r| r.state == ResourceStatus::Unknown));
    assert_eq!(snapshot.state, ResourceStatus::Unknown);
}

#[tokio::test]
async fn test_snapshot_scope_errors() {
    let app = app(true);
    deployed_with_informers(&app).await;

    let err = app.snapshot("other-app", None).await.unwrap_err();
    assert!(matches!(err, FleetError::NotFound(_)));

    let err = app.snapshot("app-1", Some("cluster-z")).await.unwrap_err();
    assert!(matches!(err, FleetError::UnknownDownstream(_)));
}

#[tokio::test]
async fn test_snapshot_shows_links_and_deploy_time_of_current_release() {
    let app = app(true);
    let mut first = release(1);
    first.allow_rollback = true;
    first.links = vec![AppLink {
        title: "Open Sentry".to_string(),
        url: "http://sentry".to_string(),
    }];
    first.application_ports = vec![ApplicationPort {
        service_name: "sentry".to_string(),
        service_port: 9000,
        local_port: 8888,
        application_url: "http://sentry".to_string(),
    }];
    app.ingest(first).await.unwrap();
    app.attach(DownstreamTarget::new("cluster-x", "Cluster X"), &[1])
        .unwrap();

    let snapshot = app.snapshot("app-1", Some("cluster-x")).await.unwrap();
    let view = &snapshot.downstreams[0];
    assert!(view.links.is_empty());
    assert!(view.current_deployed_at.is_none());
    assert!(!view.allow_rollback);

    app.promote("cluster-x", 1).await.unwrap();
    let snapshot = app.snapshot("app-1", Some("cluster-x")).await.unwrap();
    let view = &snapshot.downstreams[0];
    assert_eq!(view.links.len(), 1);
    assert_eq!(view.links[0].title, "Open Sentry");
    assert_eq!(view.links[0].uri, "http://localhost:8888");
    assert!(view.current_deployed_at.is_some());
    assert!(view.allow_rollback);
}
