//! Dashboard snapshot models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gate::preflight::GateState;
use crate::models::attempt::DeploymentAttempt;
use crate::models::downstream::Connectivity;
use crate::models::release::{RealizedLink, ResourceRef};

/// Observed state of a single resource, or of the whole application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Ready,
    Updating,
    Degraded,
    Unavailable,
    Missing,
    Unknown,
}

impl ResourceStatus {
    /// Higher is worse
    fn severity(&self) -> u8 {
        match self {
            ResourceStatus::Ready => 0,
            ResourceStatus::Updating => 1,
            ResourceStatus::Unknown => 2,
            ResourceStatus::Degraded => 3,
            ResourceStatus::Unavailable => 4,
            ResourceStatus::Missing => 5,
        }
    }

    /// Worst-of rollup; an empty set is unknown
    pub fn rollup<'a>(states: impl IntoIterator<Item = &'a ResourceStatus>) -> ResourceStatus {
        states
            .into_iter()
            .copied()
            .max_by_key(|s| s.severity())
            .unwrap_or(ResourceStatus::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Ready => "ready",
            ResourceStatus::Updating => "updating",
            ResourceStatus::Degraded => "degraded",
            ResourceStatus::Unavailable => "unavailable",
            ResourceStatus::Missing => "missing",
            ResourceStatus::Unknown => "unknown",
        }
    }
}

/// Live state of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    pub resource: ResourceRef,
    pub state: ResourceStatus,
}

/// Application status on one downstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStatus {
    pub app_id: String,
    pub downstream_id: String,
    pub updated_at: DateTime<Utc>,
    pub state: ResourceStatus,
    pub resource_states: Vec<ResourceState>,

    /// False when the live query failed and states are placeholders
    pub live: bool,
}

/// A single (timestamp, value) sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: f64,
    pub value: f64,
}

/// A label pair identifying a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricLabel {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub legend_template: String,
    pub metric: Vec<MetricLabel>,
    pub data: Vec<MetricPoint>,
}

/// One dashboard graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricChart {
    pub title: String,
    pub tick_format: String,
    pub tick_template: String,
    pub series: Vec<MetricSeries>,
}

/// Version/deployment view of one downstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamVersionView {
    pub downstream_id: String,
    pub title: String,
    pub connectivity: Connectivity,
    pub delivery_mode: String,
    pub handoff_connected: Option<bool>,
    pub current: Option<i64>,

    /// When the current release became current
    pub current_deployed_at: Option<DateTime<Utc>>,

    /// Links of the current release
    pub links: Vec<RealizedLink>,

    /// Whether the current release permits rolling back from it
    pub allow_rollback: bool,

    pub pending: Vec<i64>,
    pub past: Vec<i64>,

    /// Gate state of every pending release, in pending order
    pub pending_gates: Vec<(i64, GateState)>,

    pub latest_attempt: Option<DeploymentAttempt>,
}

/// Consolidated, read-only dashboard view.
///
/// Always recomputed; never authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub app_id: String,
    pub generated_at: DateTime<Utc>,

    /// Worst-of rollup across the downstreams in scope
    pub state: ResourceStatus,

    pub downstreams: Vec<DownstreamVersionView>,
    pub app_statuses: Vec<AppStatus>,
    pub metrics: Vec<MetricChart>,
    pub prometheus_address: Option<String>,
}
