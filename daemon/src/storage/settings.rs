//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// fleetdeck settings, read from `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Application id
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Application slug
    #[serde(default = "default_app_id")]
    pub app_slug: String,

    /// Local HTTP server
    #[serde(default)]
    pub server: ServerSettings,

    /// External tools
    #[serde(default)]
    pub tools: ToolSettings,

    /// Prometheus base address for dashboard metrics
    #[serde(default)]
    pub prometheus_address: Option<String>,

    /// Interval between handoff repository connectivity checks
    #[serde(default = "default_check_interval")]
    pub handoff_check_interval_secs: u64,

    /// Deadline for dry-run + apply; unset means none
    #[serde(default)]
    pub deploy_timeout_secs: Option<u64>,

    /// Preflight command; unset means every preflight run fails closed
    #[serde(default)]
    pub preflight_command: Option<Vec<String>>,

    /// Select the kubeconfig context named after each downstream
    #[serde(default)]
    pub kube_contexts: bool,

    /// Serve the local HTTP API
    #[serde(default = "default_true")]
    pub enable_socket_server: bool,
}

fn default_true() -> bool {
    true
}

fn default_app_id() -> String {
    "default".to_string()
}

fn default_check_interval() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            app_id: default_app_id(),
            app_slug: default_app_id(),
            server: ServerSettings::default(),
            tools: ToolSettings::default(),
            prometheus_address: None,
            handoff_check_interval_secs: default_check_interval(),
            deploy_timeout_secs: None,
            preflight_command: None,
            kube_contexts: false,
            enable_socket_server: true,
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8800
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Paths of the external tools fleetdeck shells out to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_kubectl")]
    pub kubectl: String,

    #[serde(default = "default_kustomize")]
    pub kustomize: String,

    #[serde(default = "default_git")]
    pub git: String,
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_kustomize() -> String {
    "kustomize".to_string()
}

fn default_git() -> String {
    "git".to_string()
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            kustomize: default_kustomize(),
            git: default_git(),
        }
    }
}
