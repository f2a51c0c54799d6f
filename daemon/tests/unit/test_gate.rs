//! Preflight gating of deployments

use std::sync::Arc;

use tokio::sync::Notify;

use fleetdeck::errors::FleetError;
use fleetdeck::gate::preflight::GateState;
use fleetdeck::models::attempt::{DeliveryOutcome, GateOutcome};

use crate::common::{attached_with_pending, harness_with, FakeChannel, FakeResources, FakeRunner};

fn blocked_state(err: FleetError) -> GateState {
    match err {
        FleetError::GateBlocked { state, .. } => state,
        other => panic!("expected GateBlocked, got {other}"),
    }
}

#[tokio::test]
async fn test_running_gate_blocks_then_bypass_wins() {
    let hold = Arc::new(Notify::new());
    let runner = FakeRunner {
        hold: Some(hold.clone()),
        ..FakeRunner::passing()
    };
    let entered = runner.entered.clone();
    let h = harness_with(FakeChannel::succeeding(), runner, FakeResources { reachable: true });
    attached_with_pending(&h, 1).await;

    let preflight = {
        let app = h.app.clone();
        tokio::spawn(async move { app.request_preflight("cluster-x", 1).await })
    };
    entered.notified().await;

    let err = h.app.request_deployment("cluster-x", 1, None).await.unwrap_err();
    assert!(matches!(blocked_state(err), GateState::Running { .. }));

    // bypass while the run is in flight; the late result is discarded
    let gate = h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();
    assert!(matches!(gate, GateState::Bypassed { .. }));

    hold.notify_one();
    let gate = preflight.await.unwrap().unwrap();
    assert!(matches!(gate, GateState::Bypassed { .. }));

    let attempt = h.app.request_deployment("cluster-x", 1, None).await.unwrap();
    assert_eq!(attempt.gate, GateOutcome::Bypassed);
    assert_eq!(attempt.outcome, DeliveryOutcome::Succeeded);
}

#[tokio::test]
async fn test_failed_gate_blocks_until_bypassed() {
    let h = harness_with(
        FakeChannel::succeeding(),
        FakeRunner::failing(),
        FakeResources { reachable: true },
    );
    attached_with_pending(&h, 1).await;

    let gate = h.app.request_preflight("cluster-x", 1).await.unwrap();
    let GateState::Failed { report, .. } = &gate else {
        panic!("expected Failed, got {gate}");
    };
    assert_eq!(report.detail, "no default storage class");

    let err = h.app.request_deployment("cluster-x", 1, None).await.unwrap_err();
    assert!(matches!(blocked_state(err), GateState::Failed { .. }));

    // a failed gate cannot be re-run, only bypassed
    let err = h.app.request_preflight("cluster-x", 1).await.unwrap_err();
    assert!(matches!(err, FleetError::InvalidGateTransition { .. }));

    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();
    let attempt = h.app.request_deployment("cluster-x", 1, None).await.unwrap();
    assert_eq!(attempt.outcome, DeliveryOutcome::Succeeded);

    // blocked attempt + successful one
    let attempts = h.app.list_attempts("cluster-x", Some(1)).unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].ordinal, 2);
}

#[tokio::test]
async fn test_passed_gate_is_final() {
    let h = harness_with(
        FakeChannel::succeeding(),
        FakeRunner::passing(),
        FakeResources { reachable: true },
    );
    attached_with_pending(&h, 1).await;

    h.app.request_preflight("cluster-x", 1).await.unwrap();

    let err = h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap_err();
    assert!(matches!(err, FleetError::InvalidGateTransition { .. }));
    let err = h.app.request_preflight("cluster-x", 1).await.unwrap_err();
    assert!(matches!(err, FleetError::InvalidGateTransition { .. }));

    let state = h.app.preflight.state("cluster-x", 1).unwrap();
    assert!(matches!(state, GateState::Passed { .. }));
}

#[tokio::test]
async fn test_gate_on_untracked_sequence_rejected() {
    let h = harness_with(
        FakeChannel::succeeding(),
        FakeRunner::passing(),
        FakeResources { reachable: true },
    );
    attached_with_pending(&h, 1).await;

    let err = h.app.request_bypass("cluster-x", 9, "ops@acme").await.unwrap_err();
    assert!(matches!(err, FleetError::UnknownSequence { sequence: 9, .. }));
}
