//! Mapping between core types and API models

use std::sync::Arc;

use openapi_server::models::{
    AppStatusEntry, DashboardResponse, DeploymentAttemptResponse, DownstreamOutput,
    DownstreamPartitions, DownstreamVersionEntry, GitOpsStatus, HandoffSettings,
    ImageRewriteStatus, InstallStatusResponse, Link, MetricChartEntry, MetricLabelEntry,
    MetricPointEntry, MetricSeriesEntry, PreflightCheckResult, PreflightStateResponse,
    ResourceStateEntry, VersionSummary,
};
use secrecy::SecretString;

use crate::catalog::releases::ReleaseCatalog;
use crate::errors::FleetError;
use crate::gate::preflight::GateState;
use crate::install::pipeline::{InstallEvent, InstallPipelineState, InstallVariant};
use crate::models::attempt::{DeliveryOutcome, DeploymentAttempt, DeploymentOutput, GateOutcome};
use crate::models::dashboard::{AppStatus, DashboardSnapshot, DownstreamVersionView, MetricChart};
use crate::models::downstream::{
    Connectivity, DeliveryMode, ExternalHandoffConfig, HandoffAction, HandoffFormat,
};
use crate::registry::downstreams::DownstreamState;

fn connectivity_name(connectivity: Connectivity) -> &'static str {
    match connectivity {
        Connectivity::Connected => "connected",
        Connectivity::Unreachable => "unreachable",
    }
}

fn gate_outcome_name(gate: GateOutcome) -> &'static str {
    match gate {
        GateOutcome::Passed => "passed",
        GateOutcome::Bypassed => "bypassed",
        GateOutcome::Blocked => "blocked",
    }
}

pub fn delivery_outcome_name(outcome: DeliveryOutcome) -> &'static str {
    match outcome {
        DeliveryOutcome::NotAttempted => "not_attempted",
        DeliveryOutcome::Pending => "pending",
        DeliveryOutcome::Succeeded => "succeeded",
        DeliveryOutcome::RenderFailed => "render_failed",
        DeliveryOutcome::ApplyFailed => "apply_failed",
        DeliveryOutcome::TimedOut => "timed_out",
        DeliveryOutcome::Cancelled => "cancelled",
    }
}

// -- partitions -----------------------------------------------------------

fn version_summary(
    catalog: &ReleaseCatalog,
    state: &DownstreamState,
    sequence: i64,
) -> Option<VersionSummary> {
    // Releases are never removed from the catalog, so a miss means a race
    // with attach seeding and the entry is simply skipped
    let release = catalog.get(sequence).ok()?;
    Some(VersionSummary {
        sequence,
        version_label: release.version_label,
        source: release.source,
        release_notes: release.release_notes,
        created_at: release.created_at,
        deployed_at: state.deployed_at(sequence),
        preflight_state: state.gate(sequence).name().to_string(),
        last_outcome: state
            .latest_attempt(sequence)
            .map(|a| delivery_outcome_name(a.outcome).to_string()),
    })
}

fn gitops_status(config: &ExternalHandoffConfig) -> GitOpsStatus {
    GitOpsStatus {
        provider: config.provider.clone(),
        uri: config.uri.clone(),
        branch: config.branch.clone(),
        path: config.path.clone(),
        format: match config.format {
            HandoffFormat::Single => "single".to_string(),
            HandoffFormat::Split => "split".to_string(),
        },
        action: match config.action {
            HandoffAction::Commit => "commit".to_string(),
            HandoffAction::Branch => "branch".to_string(),
        },
        is_connected: config.is_connected(),
        last_result: config.last_result.as_ref().map(|r| r.message.clone()),
    }
}

pub fn partitions(catalog: &ReleaseCatalog, state: &Arc<DownstreamState>) -> DownstreamPartitions {
    let summarize = |sequences: Vec<i64>| -> Vec<VersionSummary> {
        sequences
            .into_iter()
            .filter_map(|s| version_summary(catalog, state, s))
            .collect()
    };

    DownstreamPartitions {
        downstream_id: state.target.id.clone(),
        title: state.target.title.clone(),
        connectivity: connectivity_name(state.target.connectivity).to_string(),
        delivery_mode: state.target.delivery.name().to_string(),
        gitops: state.target.delivery.handoff().map(gitops_status),
        current_version: state
            .timeline
            .current()
            .and_then(|s| version_summary(catalog, state, s)),
        pending_versions: summarize(state.timeline.pending()),
        past_versions: summarize(state.timeline.past()),
    }
}

pub fn delivery_mode(
    mode: &str,
    handoff: Option<HandoffSettings>,
) -> Result<DeliveryMode, FleetError> {
    match mode {
        "direct" => Ok(DeliveryMode::Direct),
        "handoff" => {
            let settings = handoff.ok_or_else(|| {
                FleetError::BadRequest("handoff mode requires handoff settings".to_string())
            })?;
            let mut config =
                ExternalHandoffConfig::new(&settings.provider, &settings.uri, &settings.branch);
            config.hostname = settings.hostname;
            config.path = settings.path;
            config.format = match settings.format.as_deref() {
                None | Some("single") => HandoffFormat::Single,
                Some("split") => HandoffFormat::Split,
                Some(other) => {
                    return Err(FleetError::BadRequest(format!(
                        "unknown handoff format: {}",
                        other
                    )))
                }
            };
            config.action = match settings.action.as_deref() {
                None | Some("commit") => HandoffAction::Commit,
                Some("branch") => HandoffAction::Branch,
                Some(other) => {
                    return Err(FleetError::BadRequest(format!(
                        "unknown handoff action: {}",
                        other
                    )))
                }
            };
            config.deploy_key = settings
                .deploy_key
                .map(|key| Arc::new(SecretString::from(key)));
            Ok(DeliveryMode::Handoff(config))
        }
        other => Err(FleetError::BadRequest(format!(
            "unknown delivery mode: {}",
            other
        ))),
    }
}

// -- gate and attempts ----------------------------------------------------

pub fn preflight_state(downstream_id: &str, sequence: i64, state: &GateState) -> PreflightStateResponse {
    let (checks, detail, bypassed_by) = match state {
        GateState::Passed { report, .. } | GateState::Failed { report, .. } => (
            report
                .checks
                .iter()
                .map(|c| PreflightCheckResult {
                    title: c.title.clone(),
                    outcome: snake_name(&c.outcome),
                    message: c.message.clone(),
                })
                .collect(),
            Some(report.detail.clone()).filter(|d| !d.is_empty()),
            None,
        ),
        GateState::Bypassed { operator, .. } => (Vec::new(), None, Some(operator.clone())),
        GateState::NotRun | GateState::Running { .. } => (Vec::new(), None, None),
    };

    PreflightStateResponse {
        downstream_id: downstream_id.to_string(),
        sequence,
        state: state.name().to_string(),
        checks,
        detail,
        bypassed_by,
    }
}

pub fn output(output: &DeploymentOutput) -> DownstreamOutput {
    DownstreamOutput {
        dryrun_stdout: output.dryrun_stdout.clone(),
        dryrun_stderr: output.dryrun_stderr.clone(),
        apply_stdout: output.apply_stdout.clone(),
        apply_stderr: output.apply_stderr.clone(),
        render_error: output.render_error.clone(),
    }
}

pub fn attempt(attempt: &DeploymentAttempt) -> DeploymentAttemptResponse {
    DeploymentAttemptResponse {
        id: attempt.id.clone(),
        downstream_id: attempt.downstream_id.clone(),
        sequence: attempt.sequence,
        ordinal: attempt.ordinal,
        channel: attempt.channel.clone(),
        gate: gate_outcome_name(attempt.gate).to_string(),
        outcome: delivery_outcome_name(attempt.outcome).to_string(),
        requested_at: attempt.requested_at,
        finished_at: attempt.finished_at,
        cancel_requested: attempt.cancel_requested,
        error: attempt.error.clone(),
        output: output(&attempt.output),
    }
}

// -- dashboard ------------------------------------------------------------

fn app_status(status: &AppStatus) -> AppStatusEntry {
    AppStatusEntry {
        app_id: status.app_id.clone(),
        downstream_id: status.downstream_id.clone(),
        updated_at: status.updated_at,
        state: status.state.as_str().to_string(),
        live: status.live,
        resource_states: status
            .resource_states
            .iter()
            .map(|r| ResourceStateEntry {
                kind: r.resource.kind.clone(),
                name: r.resource.name.clone(),
                namespace: r.resource.namespace.clone(),
                state: r.state.as_str().to_string(),
            })
            .collect(),
    }
}

fn chart(chart: &MetricChart) -> MetricChartEntry {
    MetricChartEntry {
        title: chart.title.clone(),
        tick_format: chart.tick_format.clone(),
        tick_template: chart.tick_template.clone(),
        series: chart
            .series
            .iter()
            .map(|s| MetricSeriesEntry {
                legend_template: s.legend_template.clone(),
                metric: s
                    .metric
                    .iter()
                    .map(|l| MetricLabelEntry {
                        name: l.name.clone(),
                        value: l.value.clone(),
                    })
                    .collect(),
                data: s
                    .data
                    .iter()
                    .map(|p| MetricPointEntry {
                        timestamp: p.timestamp,
                        value: p.value,
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn version_entry(view: &DownstreamVersionView) -> DownstreamVersionEntry {
    DownstreamVersionEntry {
        downstream_id: view.downstream_id.clone(),
        title: view.title.clone(),
        connectivity: connectivity_name(view.connectivity).to_string(),
        delivery_mode: view.delivery_mode.clone(),
        handoff_connected: view.handoff_connected,
        current_sequence: view.current,
        deployed_at: view.current_deployed_at,
        links: view
            .links
            .iter()
            .map(|l| Link {
                title: l.title.clone(),
                uri: l.uri.clone(),
            })
            .collect(),
        allow_rollback: view.allow_rollback,
        pending_sequences: view.pending.clone(),
        past_sequences: view.past.clone(),
        latest_attempt: view.latest_attempt.as_ref().map(attempt),
    }
}

pub fn dashboard(snapshot: &DashboardSnapshot) -> DashboardResponse {
    DashboardResponse {
        app_id: snapshot.app_id.clone(),
        generated_at: snapshot.generated_at,
        state: snapshot.state.as_str().to_string(),
        downstreams: snapshot.downstreams.iter().map(version_entry).collect(),
        app_status: snapshot.app_statuses.iter().map(app_status).collect(),
        metrics: snapshot.metrics.iter().map(chart).collect(),
        prometheus_address: snapshot.prometheus_address.clone(),
    }
}

// -- install --------------------------------------------------------------

fn snake_name<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

pub fn install_status(state: Option<&InstallPipelineState>) -> InstallStatusResponse {
    match state {
        None => InstallStatusResponse {
            variant: None,
            install_status: "not_started".to_string(),
            current_message: String::new(),
            image_rewrite: None,
        },
        Some(state) => InstallStatusResponse {
            variant: Some(snake_name(&state.variant)),
            install_status: snake_name(&state.status),
            current_message: state.message.clone(),
            image_rewrite: state.image_rewrite.as_ref().map(|r| ImageRewriteStatus {
                status: snake_name(&r.status),
                current_message: r.message.clone(),
            }),
        },
    }
}

pub fn install_variant(variant: &str) -> Result<InstallVariant, FleetError> {
    match variant {
        "online" => Ok(InstallVariant::Online),
        "airgap" => Ok(InstallVariant::Airgap),
        other => Err(FleetError::BadRequest(format!(
            "unknown install variant: {}",
            other
        ))),
    }
}

pub fn install_event(event: &str, message: String) -> Result<InstallEvent, FleetError> {
    Ok(match event {
        "progress" => InstallEvent::Progress(message),
        "begin_image_rewrite" => InstallEvent::BeginImageRewrite(message),
        "image_rewrite_progress" => InstallEvent::ImageRewriteProgress(message),
        "image_rewrite_completed" => InstallEvent::ImageRewriteCompleted(message),
        "image_rewrite_failed" => InstallEvent::ImageRewriteFailed(message),
        "begin_install" => InstallEvent::BeginInstall(message),
        "installed" => InstallEvent::Installed(message),
        "fail" => InstallEvent::Fail(message),
        other => {
            return Err(FleetError::BadRequest(format!(
                "unknown install event: {}",
                other
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::pipeline::InstallTracker;

    #[test]
    fn test_handoff_mode_parses_settings() {
        let settings = HandoffSettings {
            provider: "github".to_string(),
            uri: "git@github.com:acme/deploy.git".to_string(),
            hostname: String::new(),
            path: "apps".to_string(),
            branch: "main".to_string(),
            format: Some("split".to_string()),
            action: None,
            deploy_key: Some("key".to_string()),
        };
        let mode = delivery_mode("handoff", Some(settings)).unwrap();
        let config = mode.handoff().unwrap();
        assert_eq!(config.format, HandoffFormat::Split);
        assert_eq!(config.action, HandoffAction::Commit);
        assert!(config.deploy_key.is_some());

        assert!(delivery_mode("handoff", None).is_err());
        assert!(delivery_mode("carrier-pigeon", None).is_err());
    }

    #[test]
    fn test_install_status_names() {
        assert_eq!(install_status(None).install_status, "not_started");

        let tracker = InstallTracker::new();
        tracker.start(InstallVariant::Airgap, "preparing").unwrap();
        tracker
            .advance(install_event("begin_image_rewrite", "rewriting".to_string()).unwrap())
            .unwrap();
        let response = install_status(tracker.state().as_ref());
        assert_eq!(response.variant.as_deref(), Some("airgap"));
        assert_eq!(response.install_status, "rewriting_images");
        assert_eq!(
            response.image_rewrite.map(|r| r.status).as_deref(),
            Some("pending")
        );
    }
}
