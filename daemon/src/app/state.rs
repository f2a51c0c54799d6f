//! Application state and the operations exposed to collaborators

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::app::options::AppOptions;
use crate::catalog::releases::ReleaseCatalog;
use crate::delivery::selector::{ChannelProvider, SystemChannels};
use crate::errors::FleetError;
use crate::executor::deployment::DeploymentExecutor;
use crate::gate::preflight::GateState;
use crate::gate::runner::{CommandPreflightRunner, PreflightRunner, UnconfiguredPreflightRunner};
use crate::gate::service::PreflightService;
use crate::install::pipeline::{InstallEvent, InstallPipelineState, InstallTracker, InstallVariant};
use crate::models::attempt::{DeploymentAttempt, DeploymentOutput};
use crate::models::dashboard::DashboardSnapshot;
use crate::models::downstream::{DeliveryMode, DownstreamTarget};
use crate::models::release::Release;
use crate::registry::downstreams::{DownstreamRegistry, DownstreamState};
use crate::status::aggregator::StatusAggregator;
use crate::status::metrics::{MetricsSource, PrometheusMetrics};
use crate::status::resources::{KubectlResourceStates, ResourceStateSource};
use crate::workers::ingester::ingest_release;

/// Collaborators the core talks to
pub struct Collaborators {
    pub channels: Arc<dyn ChannelProvider>,
    pub preflight: Arc<dyn PreflightRunner>,
    pub resources: Arc<dyn ResourceStateSource>,
    pub metrics: Option<Arc<dyn MetricsSource>>,
    pub prometheus_address: Option<String>,
}

impl Collaborators {
    /// Collaborators backed by local tools and the configured Prometheus
    pub fn system(options: &AppOptions) -> Result<Self, FleetError> {
        let preflight: Arc<dyn PreflightRunner> = match options.preflight_command.as_deref() {
            Some([program, args @ ..]) => {
                Arc::new(CommandPreflightRunner::new(program, args.to_vec()))
            }
            _ => Arc::new(UnconfiguredPreflightRunner),
        };

        let mut resources = KubectlResourceStates::new(&options.tools.kubectl);
        if options.kube_contexts {
            resources = resources.with_contexts();
        }

        let metrics: Option<Arc<dyn MetricsSource>> = match &options.prometheus_address {
            Some(address) => Some(Arc::new(PrometheusMetrics::new(address)?)),
            None => None,
        };

        Ok(Self {
            channels: Arc::new(SystemChannels::new(
                options.tools.clone(),
                options.layout.clone(),
            )),
            preflight,
            resources: Arc::new(resources),
            metrics,
            prometheus_address: options.prometheus_address.clone(),
        })
    }
}

/// Main application state
pub struct AppState {
    pub app_id: String,
    pub catalog: Arc<ReleaseCatalog>,
    pub registry: Arc<DownstreamRegistry>,
    pub preflight: Arc<PreflightService>,
    pub executor: Arc<DeploymentExecutor>,
    pub install: Arc<InstallTracker>,
    pub status: Arc<StatusAggregator>,

    /// Feeds the ingester worker
    pub release_tx: mpsc::Sender<Release>,

    default_deploy_timeout: Option<Duration>,
}

impl AppState {
    /// Wire the components together.
    ///
    /// Returns the receiving end of the release channel for the ingester.
    pub fn init(
        options: &AppOptions,
        collaborators: Collaborators,
    ) -> (Self, mpsc::Receiver<Release>) {
        info!("Initializing application state for {}...", options.app_slug);

        let catalog = Arc::new(ReleaseCatalog::new(&options.app_id));
        let registry = Arc::new(DownstreamRegistry::new(catalog.clone()));

        let preflight = Arc::new(PreflightService::new(
            &options.app_slug,
            registry.clone(),
            collaborators.preflight,
            options.layout.clone(),
        ));

        let executor = Arc::new(DeploymentExecutor::new(
            &options.app_slug,
            registry.clone(),
            collaborators.channels,
            options.layout.clone(),
        ));

        let mut status = StatusAggregator::new(registry.clone(), collaborators.resources);
        if let Some(metrics) = collaborators.metrics {
            status = status.with_metrics(metrics, collaborators.prometheus_address);
        }

        let (release_tx, release_rx) = mpsc::channel(options.ingester.queue_depth);

        let state = Self {
            app_id: options.app_id.clone(),
            catalog,
            registry,
            preflight,
            executor,
            install: Arc::new(InstallTracker::new()),
            status: Arc::new(status),
            release_tx,
            default_deploy_timeout: options.default_deploy_timeout,
        };
        (state, release_rx)
    }

    // -- catalog and registry ---------------------------------------------

    /// Ingest a release synchronously and stage it on every downstream
    pub async fn ingest(&self, release: Release) -> Result<i64, FleetError> {
        ingest_release(&self.registry, release).await
    }

    pub fn attach(&self, target: DownstreamTarget, seed_pending: &[i64]) -> Result<(), FleetError> {
        self.registry.attach(target, seed_pending)
    }

    pub async fn detach(&self, downstream_id: &str) -> Result<(), FleetError> {
        self.registry.detach(downstream_id).await.map(|_| ())
    }

    /// Consistent per-downstream snapshots, ordered by id
    pub fn list_downstream_partitions(&self) -> Vec<Arc<DownstreamState>> {
        self.registry.list()
    }

    pub fn downstream(&self, downstream_id: &str) -> Result<Arc<DownstreamState>, FleetError> {
        self.registry.snapshot(downstream_id)
    }

    /// Promote a pending release without delivering it
    pub async fn promote(&self, downstream_id: &str, sequence: i64) -> Result<(), FleetError> {
        self.registry.promote(downstream_id, sequence).await
    }

    pub async fn rollback(&self, downstream_id: &str, sequence: i64) -> Result<(), FleetError> {
        self.registry.rollback(downstream_id, sequence).await
    }

    pub async fn set_delivery_mode(
        &self,
        downstream_id: &str,
        mode: DeliveryMode,
    ) -> Result<(), FleetError> {
        self.registry.set_delivery_mode(downstream_id, mode).await
    }

    // -- gate and deployment ----------------------------------------------

    pub async fn request_preflight(
        &self,
        downstream_id: &str,
        sequence: i64,
    ) -> Result<GateState, FleetError> {
        self.preflight.run(downstream_id, sequence).await
    }

    pub async fn request_bypass(
        &self,
        downstream_id: &str,
        sequence: i64,
        operator: &str,
    ) -> Result<GateState, FleetError> {
        self.preflight.bypass(downstream_id, sequence, operator).await
    }

    /// Deploy a pending release; `deadline` falls back to the configured default
    pub async fn request_deployment(
        &self,
        downstream_id: &str,
        sequence: i64,
        deadline: Option<Duration>,
    ) -> Result<DeploymentAttempt, FleetError> {
        self.executor
            .execute(downstream_id, sequence, deadline.or(self.default_deploy_timeout))
            .await
    }

    pub async fn cancel_attempt(
        &self,
        downstream_id: &str,
        attempt_id: &str,
    ) -> Result<DeploymentAttempt, FleetError> {
        self.executor.cancel_attempt(downstream_id, attempt_id).await
    }

    pub fn list_attempts(
        &self,
        downstream_id: &str,
        sequence: Option<i64>,
    ) -> Result<Vec<DeploymentAttempt>, FleetError> {
        self.executor.list_attempts(downstream_id, sequence)
    }

    pub fn downstream_output(
        &self,
        downstream_id: &str,
        sequence: i64,
    ) -> Result<DeploymentOutput, FleetError> {
        self.executor.downstream_output(downstream_id, sequence)
    }

    // -- status and install -----------------------------------------------

    pub async fn snapshot(
        &self,
        app_id: &str,
        cluster_id: Option<&str>,
    ) -> Result<DashboardSnapshot, FleetError> {
        self.status.snapshot(app_id, cluster_id).await
    }

    pub fn install_pipeline_state(&self) -> Option<InstallPipelineState> {
        self.install.state()
    }

    pub fn start_install(
        &self,
        variant: InstallVariant,
        message: &str,
    ) -> Result<InstallPipelineState, FleetError> {
        self.install.start(variant, message)
    }

    pub fn advance_install(&self, event: InstallEvent) -> Result<InstallPipelineState, FleetError> {
        self.install.advance(event)
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), FleetError> {
        info!("Shutting down application state...");
        let in_flight: usize = self
            .registry
            .list()
            .iter()
            .filter(|s| s.any_pending_attempt().is_some())
            .count();
        if in_flight > 0 {
            tracing::warn!(
                "{} downstream(s) still have a deployment in flight; their outcome will not be recorded",
                in_flight
            );
        }
        Ok(())
    }
}
