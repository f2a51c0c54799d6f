//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::{Settings, ToolSettings};
use crate::workers::{handoff_check, ingester};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Application this daemon manages
    pub app_id: String,
    pub app_slug: String,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// External tools
    pub tools: ToolSettings,

    /// Preflight command and arguments; `None` fails every run closed
    pub preflight_command: Option<Vec<String>>,

    /// Deadline applied when a deployment request does not carry one
    pub default_deploy_timeout: Option<Duration>,

    /// Prometheus base address for dashboard metrics
    pub prometheus_address: Option<String>,

    /// Select the kubeconfig context named after each downstream
    pub kube_contexts: bool,

    /// Enable local HTTP server
    pub enable_socket_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Ingester worker options
    pub ingester: ingester::Options,

    /// Handoff check worker options
    pub handoff_check: handoff_check::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            app_id: "default".to_string(),
            app_slug: "default".to_string(),
            layout: StorageLayout::default(),
            tools: ToolSettings::default(),
            preflight_command: None,
            default_deploy_timeout: None,
            prometheus_address: None,
            kube_contexts: false,
            enable_socket_server: true,
            server: ServerOptions::default(),
            ingester: ingester::Options::default(),
            handoff_check: handoff_check::Options::default(),
        }
    }
}

impl AppOptions {
    /// Runtime options from the settings file
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            app_id: settings.app_id.clone(),
            app_slug: settings.app_slug.clone(),
            layout,
            tools: settings.tools.clone(),
            preflight_command: settings.preflight_command.clone(),
            default_deploy_timeout: settings.deploy_timeout_secs.map(Duration::from_secs),
            prometheus_address: settings.prometheus_address.clone(),
            kube_contexts: settings.kube_contexts,
            enable_socket_server: settings.enable_socket_server,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            handoff_check: handoff_check::Options {
                interval: Duration::from_secs(settings.handoff_check_interval_secs),
                git: settings.tools.git.clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8800,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let settings: Settings = serde_json::from_str(
            r#"{"app_id": "app-1", "app_slug": "sentry", "deploy_timeout_secs": 600,
                "handoff_check_interval_secs": 15, "tools": {"git": "/usr/bin/git"}}"#,
        )
        .unwrap();
        let options = AppOptions::from_settings(&settings, StorageLayout::new("/data"));

        assert_eq!(options.app_slug, "sentry");
        assert_eq!(options.default_deploy_timeout, Some(Duration::from_secs(600)));
        assert_eq!(options.handoff_check.interval, Duration::from_secs(15));
        assert_eq!(options.handoff_check.git, "/usr/bin/git");
        assert_eq!(options.server.port, 8800);
        assert!(options.enable_socket_server);
    }
}
