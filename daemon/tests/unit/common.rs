//! Test doubles for the collaborators fleetdeck talks to

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use fleetdeck::app::options::AppOptions;
use fleetdeck::app::state::{AppState, Collaborators};
use fleetdeck::delivery::channel::{
    ApplyReport, DeliveryChannel, DeliveryRequest, DryRunReport, PhaseOutput,
};
use fleetdeck::delivery::selector::ChannelProvider;
use fleetdeck::errors::FleetError;
use fleetdeck::gate::preflight::PreflightReport;
use fleetdeck::gate::runner::{PreflightRequest, PreflightRunner};
use fleetdeck::models::dashboard::{MetricChart, ResourceState, ResourceStatus};
use fleetdeck::models::downstream::{DownstreamTarget, ExternalHandoffConfig};
use fleetdeck::models::release::{Release, ResourceRef};
use fleetdeck::status::metrics::MetricsSource;
use fleetdeck::status::resources::ResourceStateSource;
use fleetdeck::storage::layout::StorageLayout;

/// Channel whose phases are scripted by the test
pub struct FakeChannel {
    pub kind: &'static str,
    pub render_error: Option<String>,
    pub apply_ok: bool,

    /// When set, apply waits for a notification before returning
    pub hold: Option<Arc<Notify>>,

    /// Signalled when apply starts
    pub entered: Arc<Notify>,

    pub applies: AtomicUsize,
}

impl FakeChannel {
    pub fn succeeding() -> Self {
        Self {
            kind: "direct",
            render_error: None,
            apply_ok: true,
            hold: None,
            entered: Arc::new(Notify::new()),
            applies: AtomicUsize::new(0),
        }
    }

    pub fn render_failing(error: &str) -> Self {
        Self {
            render_error: Some(error.to_string()),
            ..Self::succeeding()
        }
    }

    pub fn apply_failing() -> Self {
        Self {
            apply_ok: false,
            ..Self::succeeding()
        }
    }

    pub fn held(hold: Arc<Notify>) -> Self {
        Self {
            hold: Some(hold),
            ..Self::succeeding()
        }
    }

    pub fn applies(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryChannel for FakeChannel {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn dry_run(&self, _request: &DeliveryRequest) -> Result<DryRunReport, FleetError> {
        Ok(match &self.render_error {
            Some(error) => DryRunReport::RenderFailed {
                error: error.clone(),
                output: PhaseOutput::new("", error.clone()),
            },
            None => DryRunReport::Rendered(PhaseOutput::new("configured (dry run)", "")),
        })
    }

    async fn apply(&self, _request: &DeliveryRequest) -> Result<ApplyReport, FleetError> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        Ok(ApplyReport {
            succeeded: self.apply_ok,
            output: PhaseOutput::new(
                if self.apply_ok { "deployment.apps/web configured" } else { "" },
                if self.apply_ok { "" } else { "error: admission webhook denied" },
            ),
            reference: None,
        })
    }
}

/// Hands out the same fake channel for every downstream and mode
pub struct FakeChannels(pub Arc<FakeChannel>);

impl ChannelProvider for FakeChannels {
    fn direct(&self, _target: &DownstreamTarget) -> Arc<dyn DeliveryChannel> {
        self.0.clone()
    }

    fn handoff(
        &self,
        _target: &DownstreamTarget,
        _config: &ExternalHandoffConfig,
    ) -> Arc<dyn DeliveryChannel> {
        self.0.clone()
    }
}

/// Preflight runner with a fixed verdict
pub struct FakeRunner {
    pub passed: bool,
    pub hold: Option<Arc<Notify>>,
    pub entered: Arc<Notify>,
}

impl FakeRunner {
    pub fn passing() -> Self {
        Self {
            passed: true,
            hold: None,
            entered: Arc::new(Notify::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            passed: false,
            ..Self::passing()
        }
    }
}

#[async_trait]
impl PreflightRunner for FakeRunner {
    async fn run(&self, _request: &PreflightRequest) -> Result<PreflightReport, FleetError> {
        self.entered.notify_one();
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        Ok(PreflightReport {
            passed: self.passed,
            checks: vec![],
            detail: if self.passed {
                String::new()
            } else {
                "no default storage class".to_string()
            },
        })
    }
}

/// Reports every resource ready, or fails every query
pub struct FakeResources {
    pub reachable: bool,
}

#[async_trait]
impl ResourceStateSource for FakeResources {
    async fn resource_states(
        &self,
        downstream: &DownstreamTarget,
        resources: &[ResourceRef],
    ) -> Result<Vec<ResourceState>, FleetError> {
        if !self.reachable {
            return Err(FleetError::CollaboratorError(format!(
                "cluster {} unreachable",
                downstream.id
            )));
        }
        Ok(resources
            .iter()
            .map(|r| ResourceState {
                resource: r.clone(),
                state: ResourceStatus::Ready,
            })
            .collect())
    }
}

pub struct FailingMetrics;

#[async_trait]
impl MetricsSource for FailingMetrics {
    async fn charts(
        &self,
        _app_id: &str,
        _cluster_id: Option<&str>,
    ) -> Result<Vec<MetricChart>, FleetError> {
        Err(FleetError::CollaboratorError("prometheus down".to_string()))
    }
}

pub struct Harness {
    pub app: Arc<AppState>,
    pub channel: Arc<FakeChannel>,
}

pub fn options() -> AppOptions {
    AppOptions {
        app_id: "app-1".to_string(),
        app_slug: "sentry".to_string(),
        layout: StorageLayout::new("/nonexistent/fleetdeck"),
        ..Default::default()
    }
}

pub fn harness_with(channel: FakeChannel, runner: FakeRunner, resources: FakeResources) -> Harness {
    let channel = Arc::new(channel);
    let collaborators = Collaborators {
        channels: Arc::new(FakeChannels(channel.clone())),
        preflight: Arc::new(runner),
        resources: Arc::new(resources),
        metrics: None,
        prometheus_address: None,
    };
    let (app, _release_rx) = AppState::init(&options(), collaborators);
    Harness {
        app: Arc::new(app),
        channel,
    }
}

pub fn harness(channel: FakeChannel) -> Harness {
    harness_with(
        channel,
        FakeRunner::passing(),
        FakeResources { reachable: true },
    )
}

pub fn release(sequence: i64) -> Release {
    let mut release = Release::new(sequence, "Upstream Update");
    release.version_label = format!("1.0.{}", sequence);
    release
}

/// Downstream `cluster-x` with `sequence` ingested and pending
pub async fn attached_with_pending(h: &Harness, sequence: i64) {
    h.app.ingest(release(sequence)).await.unwrap();
    h.app
        .attach(DownstreamTarget::new("cluster-x", "Cluster X"), &[sequence])
        .unwrap();
}

/// Partitions are disjoint, current has at most one element, and together
/// they cover every tracked sequence
pub fn assert_partitions_consistent(h: &Harness, downstream_id: &str) {
    let state = h.app.downstream(downstream_id).unwrap();
    let current: Vec<i64> = state.timeline.current().into_iter().collect();
    let pending = state.timeline.pending();
    let past = state.timeline.past();

    let mut all: Vec<i64> = current
        .iter()
        .chain(pending.iter())
        .chain(past.iter())
        .copied()
        .collect();
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), total, "partitions overlap");

    let mut tracked = state.timeline.tracked();
    tracked.sort();
    assert_eq!(all, tracked);
}

/// Wait until no attempt on the downstream is in flight
pub async fn settle(h: &Harness, downstream_id: &str) {
    for _ in 0..200 {
        let state = h.app.downstream(downstream_id).unwrap();
        if state.any_pending_attempt().is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("attempts on {} never finished", downstream_id);
}
