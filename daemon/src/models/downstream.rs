//! Downstream target models

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Reachability of a downstream cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Connected,
    Unreachable,
}

/// Layout of rendered output inside the handoff repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffFormat {
    /// One multi-document file per application
    #[default]
    Single,

    /// One file per rendered document
    Split,
}

/// What a handoff push does with the rendered output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffAction {
    /// Commit straight onto the configured branch
    #[default]
    Commit,

    /// Commit onto a per-release branch for review
    Branch,
}

/// Outcome of the most recent push or pull against the handoff repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffResult {
    pub succeeded: bool,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Version-control handoff configuration owned by a downstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalHandoffConfig {
    /// Provider name, e.g. "github" or "gitlab"
    pub provider: String,

    /// Clone URI of the repository
    pub uri: String,

    /// Hostname of the provider, used for display only
    #[serde(default)]
    pub hostname: String,

    /// Directory inside the repository that receives rendered output
    #[serde(default)]
    pub path: String,

    /// Target branch
    pub branch: String,

    #[serde(default)]
    pub format: HandoffFormat,

    #[serde(default)]
    pub action: HandoffAction,

    /// SSH deploy key; never serialized
    #[serde(skip)]
    pub deploy_key: Option<Arc<SecretString>>,

    /// Last push/pull outcome
    #[serde(default)]
    pub last_result: Option<HandoffResult>,
}

impl ExternalHandoffConfig {
    pub fn new(provider: &str, uri: &str, branch: &str) -> Self {
        Self {
            provider: provider.to_string(),
            uri: uri.to_string(),
            hostname: String::new(),
            path: String::new(),
            branch: branch.to_string(),
            format: HandoffFormat::default(),
            action: HandoffAction::default(),
            deploy_key: None,
            last_result: None,
        }
    }

    /// Connectivity derived from the last push/pull result.
    ///
    /// A repository that has never been contacted is considered connected.
    pub fn connectivity(&self) -> Connectivity {
        match &self.last_result {
            Some(result) if !result.succeeded => Connectivity::Unreachable,
            _ => Connectivity::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity() == Connectivity::Connected
    }

    /// Record the outcome of a push or pull
    pub fn record_result(&mut self, succeeded: bool, message: impl Into<String>) {
        self.last_result = Some(HandoffResult {
            succeeded,
            message: message.into(),
            at: Utc::now(),
        });
    }
}

/// How releases reach a downstream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Dry-run and apply straight against the cluster
    Direct,

    /// Push rendered output to a version-control repository
    Handoff(ExternalHandoffConfig),
}

impl DeliveryMode {
    pub fn name(&self) -> &'static str {
        match self {
            DeliveryMode::Direct => "direct",
            DeliveryMode::Handoff(_) => "handoff",
        }
    }

    pub fn handoff(&self) -> Option<&ExternalHandoffConfig> {
        match self {
            DeliveryMode::Handoff(config) => Some(config),
            DeliveryMode::Direct => None,
        }
    }
}

impl Default for DeliveryMode {
    fn default() -> Self {
        DeliveryMode::Direct
    }
}

/// Identity and delivery settings of a downstream cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamTarget {
    /// Stable downstream (cluster) id
    pub id: String,

    /// Human title
    pub title: String,

    /// Namespace releases are applied into
    #[serde(default)]
    pub namespace: String,

    /// Cluster reachability as last reported
    pub connectivity: Connectivity,

    #[serde(default)]
    pub delivery: DeliveryMode,
}

impl DownstreamTarget {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            namespace: String::new(),
            connectivity: Connectivity::Connected,
            delivery: DeliveryMode::Direct,
        }
    }

    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }
}
