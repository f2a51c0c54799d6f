//! Release models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single path+error diagnostic raised while parsing or rendering a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderDiagnostic {
    /// Path of the offending file inside the release
    pub path: String,

    /// Parser or renderer message
    pub error: String,
}

/// Reference to a cluster resource that defines application readiness
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource kind, e.g. "deployment"
    pub kind: String,

    /// Resource name
    pub name: String,

    /// Namespace, empty for cluster-scoped resources
    #[serde(default)]
    pub namespace: String,
}

impl ResourceRef {
    pub fn new(kind: &str, name: &str, namespace: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
        }
    }
}

/// A link the application advertises, e.g. its admin console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLink {
    pub title: String,
    pub url: String,
}

/// A service port forwarded to localhost for a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPort {
    pub service_name: String,
    pub service_port: u16,
    pub local_port: u16,

    /// Link URL this port serves
    pub application_url: String,
}

/// A link with forwarded URLs rewritten to their local port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealizedLink {
    pub title: String,
    pub uri: String,
}

/// An immutable application release.
///
/// Created once by the ingestion source and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    /// Position in the application's history (gapless, starting at 0)
    pub sequence: i64,

    /// Human-readable version label
    #[serde(default)]
    pub version_label: String,

    /// Where the release came from, e.g. "Online Install" or "Airgap Upload"
    pub source: String,

    /// Optional release notes
    #[serde(default)]
    pub release_notes: Option<String>,

    /// Parse/render diagnostics attached at ingestion
    #[serde(default)]
    pub yaml_errors: Vec<RenderDiagnostic>,

    /// Resources whose live state makes up the application status
    #[serde(default)]
    pub status_informers: Vec<ResourceRef>,

    /// Links declared by the application
    #[serde(default)]
    pub links: Vec<AppLink>,

    /// Ports forwarded for some of the links
    #[serde(default)]
    pub application_ports: Vec<ApplicationPort>,

    /// Whether a downstream running this release may roll back from it
    #[serde(default)]
    pub allow_rollback: bool,

    /// Ingestion timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Release {
    /// Create a release with no notes, diagnostics or informers
    pub fn new(sequence: i64, source: &str) -> Self {
        Self {
            sequence,
            version_label: String::new(),
            source: source.to_string(),
            release_notes: None,
            yaml_errors: Vec::new(),
            status_informers: Vec::new(),
            links: Vec::new(),
            application_ports: Vec::new(),
            allow_rollback: false,
            created_at: Utc::now(),
        }
    }

    /// Whether the release carried parse/render diagnostics when ingested
    pub fn has_render_diagnostics(&self) -> bool {
        !self.yaml_errors.is_empty()
    }

    /// Links as users reach them: a link served by a forwarded port points
    /// at `http://localhost:<port>` instead of its declared URL
    pub fn realized_links(&self) -> Vec<RealizedLink> {
        self.links
            .iter()
            .map(|link| {
                let uri = self
                    .application_ports
                    .iter()
                    .rfind(|port| port.application_url == link.url)
                    .map(|port| format!("http://localhost:{}", port.local_port))
                    .unwrap_or_else(|| link.url.clone());
                RealizedLink {
                    title: link.title.clone(),
                    uri,
                }
            })
            .collect()
    }

    /// Diagnostics flattened into a single message
    pub fn render_diagnostics_message(&self) -> Option<String> {
        if self.yaml_errors.is_empty() {
            return None;
        }
        Some(
            self.yaml_errors
                .iter()
                .map(|d| format!("{}: {}", d.path, d.error))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}
