//! Preflight validation runners

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::delivery::tool::ToolCommand;
use crate::errors::FleetError;
use crate::gate::preflight::{CheckOutcome, PreflightCheck, PreflightReport};

/// What a preflight run validates
#[derive(Debug, Clone)]
pub struct PreflightRequest {
    pub app_slug: String,
    pub downstream_id: String,
    pub sequence: i64,

    /// Rendered manifests of the release
    pub manifests_dir: PathBuf,
}

/// Validates a release against a target environment
#[async_trait]
pub trait PreflightRunner: Send + Sync {
    async fn run(&self, request: &PreflightRequest) -> Result<PreflightReport, FleetError>;
}

/// Runs an external command with the manifests directory as last argument.
///
/// Exit status 0 passes unless the command printed a JSON array of checks
/// containing a failure. Stderr becomes the report detail.
pub struct CommandPreflightRunner {
    program: String,
    args: Vec<String>,
}

impl CommandPreflightRunner {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
        }
    }
}

#[async_trait]
impl PreflightRunner for CommandPreflightRunner {
    async fn run(&self, request: &PreflightRequest) -> Result<PreflightReport, FleetError> {
        info!(
            "Running preflights for release {} on {}",
            request.sequence, request.downstream_id
        );
        debug!("Preflight command: {} {:?}", self.program, self.args);

        let output = ToolCommand::new(&self.program)
            .args(self.args.iter().cloned())
            .arg(request.manifests_dir.to_string_lossy())
            .env("FLEETDECK_APP", request.app_slug.clone())
            .env("FLEETDECK_DOWNSTREAM", request.downstream_id.clone())
            .env("FLEETDECK_SEQUENCE", request.sequence.to_string())
            .run()
            .await?;

        Ok(report_from_output(
            output.success,
            &output.stdout,
            output.stderr.trim().to_string(),
        ))
    }
}

/// Used when no preflight command is configured: every run fails closed,
/// leaving bypass as the only way through the gate
pub struct UnconfiguredPreflightRunner;

#[async_trait]
impl PreflightRunner for UnconfiguredPreflightRunner {
    async fn run(&self, request: &PreflightRequest) -> Result<PreflightReport, FleetError> {
        warn!(
            "No preflight command configured; release {} on {} cannot pass validation",
            request.sequence, request.downstream_id
        );
        Err(FleetError::ConfigError(
            "no preflight command configured".to_string(),
        ))
    }
}

fn report_from_output(exit_ok: bool, stdout: &str, detail: String) -> PreflightReport {
    let checks: Vec<PreflightCheck> = serde_json::from_str(stdout.trim()).unwrap_or_default();
    let any_failed = checks.iter().any(|c| c.outcome == CheckOutcome::Fail);
    PreflightReport {
        passed: exit_ok && !any_failed,
        checks,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_uses_exit_status_without_checks() {
        let report = report_from_output(true, "not json", String::new());
        assert!(report.passed);
        assert!(report.checks.is_empty());

        let report = report_from_output(false, "", "boom".to_string());
        assert!(!report.passed);
        assert_eq!(report.detail, "boom");
    }

    #[test]
    fn test_failed_check_fails_report() {
        let stdout = r#"[
            {"title": "Kubernetes version", "outcome": "pass"},
            {"title": "Storage class", "outcome": "fail", "message": "no default storage class"}
        ]"#;
        let report = report_from_output(true, stdout, String::new());
        assert!(!report.passed);
        assert_eq!(report.checks.len(), 2);
        assert_eq!(report.checks[1].message, "no default storage class");
    }
}
