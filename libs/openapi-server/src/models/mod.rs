//! fleetdeck API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error category: validation, gate_blocked, delivery, install, internal
    pub error: String,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

// -- releases and downstreams ---------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlError {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInformer {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppLinkSpec {
    /// Shown as the link title
    pub description: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationPortSpec {
    pub service_name: String,
    pub service_port: u16,
    pub local_port: u16,
    pub application_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub title: String,
    pub uri: String,
}

/// A release pushed by the ingestion source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReleaseRequest {
    pub sequence: i64,
    #[serde(default)]
    pub version_label: String,
    pub source: String,
    #[serde(default)]
    pub release_notes: Option<String>,
    #[serde(default)]
    pub yaml_errors: Vec<YamlError>,
    #[serde(default)]
    pub status_informers: Vec<StatusInformer>,
    #[serde(default)]
    pub links: Vec<AppLinkSpec>,
    #[serde(default)]
    pub application_ports: Vec<ApplicationPortSpec>,
    #[serde(default)]
    pub allow_rollback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReleaseResponse {
    pub sequence: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachDownstreamRequest {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub namespace: String,

    /// Existing releases to stage as pending
    #[serde(default)]
    pub seed_pending: Vec<i64>,
}

/// Version-control handoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffSettings {
    pub provider: String,
    pub uri: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub path: String,
    pub branch: String,

    /// "single" or "split"
    #[serde(default)]
    pub format: Option<String>,

    /// "commit" or "branch"
    #[serde(default)]
    pub action: Option<String>,

    /// Private SSH key; write-only
    #[serde(default, skip_serializing)]
    pub deploy_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryModeRequest {
    /// "direct" or "handoff"
    pub mode: String,

    #[serde(default)]
    pub handoff: Option<HandoffSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub sequence: i64,
    pub version_label: String,
    pub source: String,
    pub release_notes: Option<String>,
    pub created_at: DateTime<Utc>,

    /// When the version last became current on this downstream
    pub deployed_at: Option<DateTime<Utc>>,

    /// Preflight gate state for this downstream
    pub preflight_state: String,

    /// Outcome of the most recent deployment attempt, if any
    pub last_outcome: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsStatus {
    pub provider: String,
    pub uri: String,
    pub branch: String,
    pub path: String,
    pub format: String,
    pub action: String,
    pub is_connected: bool,
    pub last_result: Option<String>,
}

/// Partition listing of one downstream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamPartitions {
    pub downstream_id: String,
    pub title: String,
    pub connectivity: String,
    pub delivery_mode: String,
    pub gitops: Option<GitOpsStatus>,
    pub current_version: Option<VersionSummary>,
    pub pending_versions: Vec<VersionSummary>,
    pub past_versions: Vec<VersionSummary>,
}

// -- gate and deployment --------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightCheckResult {
    pub title: String,
    pub outcome: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightStateResponse {
    pub downstream_id: String,
    pub sequence: i64,
    pub state: String,
    pub checks: Vec<PreflightCheckResult>,
    pub detail: Option<String>,
    pub bypassed_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BypassRequest {
    pub operator: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    /// Caller deadline for dry-run + apply
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamOutput {
    pub dryrun_stdout: String,
    pub dryrun_stderr: String,
    pub apply_stdout: String,
    pub apply_stderr: String,
    pub render_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentAttemptResponse {
    pub id: String,
    pub downstream_id: String,
    pub sequence: i64,
    pub ordinal: u32,
    pub channel: String,
    pub gate: String,
    pub outcome: String,
    pub requested_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub error: Option<String>,
    pub output: DownstreamOutput,
}

// -- dashboard ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStateEntry {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatusEntry {
    pub app_id: String,
    pub downstream_id: String,
    pub updated_at: DateTime<Utc>,
    pub state: String,
    pub live: bool,
    pub resource_states: Vec<ResourceStateEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricLabelEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPointEntry {
    pub timestamp: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeriesEntry {
    pub legend_template: String,
    pub metric: Vec<MetricLabelEntry>,
    pub data: Vec<MetricPointEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricChartEntry {
    pub title: String,
    pub tick_format: String,
    pub tick_template: String,
    pub series: Vec<MetricSeriesEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamVersionEntry {
    pub downstream_id: String,
    pub title: String,
    pub connectivity: String,
    pub delivery_mode: String,
    pub handoff_connected: Option<bool>,
    pub current_sequence: Option<i64>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub links: Vec<Link>,
    pub allow_rollback: bool,
    pub pending_sequences: Vec<i64>,
    pub past_sequences: Vec<i64>,
    pub latest_attempt: Option<DeploymentAttemptResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub app_id: String,
    pub generated_at: DateTime<Utc>,
    pub state: String,
    pub downstreams: Vec<DownstreamVersionEntry>,
    pub app_status: Vec<AppStatusEntry>,
    pub metrics: Vec<MetricChartEntry>,
    pub prometheus_address: Option<String>,
}

// -- install --------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRewriteStatus {
    pub status: String,
    pub current_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallStatusResponse {
    pub variant: Option<String>,
    pub install_status: String,
    pub current_message: String,
    pub image_rewrite: Option<ImageRewriteStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInstallRequest {
    /// "online" or "airgap"
    pub variant: String,
    #[serde(default)]
    pub message: String,
}

/// Progress report from the installer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallEventRequest {
    /// progress, begin_image_rewrite, image_rewrite_progress,
    /// image_rewrite_completed, image_rewrite_failed, begin_install,
    /// installed or fail
    pub event: String,
    #[serde(default)]
    pub message: String,
}
