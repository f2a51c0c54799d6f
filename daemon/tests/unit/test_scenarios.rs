//! End-to-end delivery scenarios against fake collaborators

use futures::future::join_all;

use fleetdeck::errors::{ErrorKind, FleetError};
use fleetdeck::gate::preflight::GateState;
use fleetdeck::models::attempt::{DeliveryOutcome, GateOutcome};
use fleetdeck::models::downstream::{DeliveryMode, ExternalHandoffConfig};

use crate::common::{
    assert_partitions_consistent, attached_with_pending, harness, release, FakeChannel,
};

#[tokio::test]
async fn test_bypassed_release_becomes_current() {
    let h = harness(FakeChannel::succeeding());
    attached_with_pending(&h, 1).await;

    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();
    let attempt = h.app.request_deployment("cluster-x", 1, None).await.unwrap();

    assert_eq!(attempt.outcome, DeliveryOutcome::Succeeded);
    assert_eq!(attempt.gate, GateOutcome::Bypassed);
    assert_eq!(attempt.ordinal, 1);
    assert!(attempt.finished_at.is_some());

    let state = h.app.downstream("cluster-x").unwrap();
    assert_eq!(state.timeline.current(), Some(1));
    assert!(state.timeline.past().is_empty());
    assert!(state.timeline.pending().is_empty());
    assert_partitions_consistent(&h, "cluster-x");
}

#[tokio::test]
async fn test_new_release_demotes_previous_current() {
    let h = harness(FakeChannel::succeeding());
    attached_with_pending(&h, 1).await;
    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();
    h.app.request_deployment("cluster-x", 1, None).await.unwrap();

    // ingest stages the release on every attached downstream
    h.app.ingest(release(2)).await.unwrap();
    assert_eq!(h.app.downstream("cluster-x").unwrap().timeline.pending(), vec![2]);

    let gate = h.app.request_preflight("cluster-x", 2).await.unwrap();
    assert!(matches!(gate, GateState::Passed { .. }));

    let attempt = h.app.request_deployment("cluster-x", 2, None).await.unwrap();
    assert_eq!(attempt.outcome, DeliveryOutcome::Succeeded);
    assert_eq!(attempt.gate, GateOutcome::Passed);

    let state = h.app.downstream("cluster-x").unwrap();
    assert_eq!(state.timeline.current(), Some(2));
    assert_eq!(state.timeline.past(), vec![1]);
    assert_partitions_consistent(&h, "cluster-x");
}

#[tokio::test]
async fn test_ungated_release_is_blocked() {
    let h = harness(FakeChannel::succeeding());
    attached_with_pending(&h, 3).await;

    let err = h
        .app
        .request_deployment("cluster-x", 3, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GateBlocked);
    let FleetError::GateBlocked {
        state, attempt_id, ..
    } = err
    else {
        panic!("expected GateBlocked");
    };
    assert_eq!(state, GateState::NotRun);

    let snapshot = h.app.downstream("cluster-x").unwrap();
    assert_eq!(snapshot.timeline.current(), None);
    assert_eq!(snapshot.timeline.pending(), vec![3]);

    // the blocked request is on the audit trail, never as a success
    let attempts = h.app.list_attempts("cluster-x", Some(3)).unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].id, attempt_id);
    assert_eq!(attempts[0].gate, GateOutcome::Blocked);
    assert_eq!(attempts[0].outcome, DeliveryOutcome::NotAttempted);
    assert_eq!(h.channel.applies(), 0);
}

#[tokio::test]
async fn test_render_failure_leaves_release_pending() {
    let h = harness(FakeChannel::render_failing(
        "accumulating resources: missing kustomization.yaml",
    ));
    attached_with_pending(&h, 1).await;
    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();

    let attempt = h.app.request_deployment("cluster-x", 1, None).await.unwrap();
    assert_eq!(attempt.outcome, DeliveryOutcome::RenderFailed);
    assert_eq!(
        attempt.output.render_error.as_deref(),
        Some("accumulating resources: missing kustomization.yaml")
    );
    assert_eq!(h.channel.applies(), 0);

    let state = h.app.downstream("cluster-x").unwrap();
    assert_eq!(state.timeline.current(), None);
    assert_eq!(state.timeline.pending(), vec![1]);

    let output = h.app.downstream_output("cluster-x", 1).unwrap();
    assert!(output.render_error.is_some());
}

#[tokio::test]
async fn test_apply_failure_never_advances_current() {
    let h = harness(FakeChannel::apply_failing());
    attached_with_pending(&h, 1).await;
    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();

    let attempt = h.app.request_deployment("cluster-x", 1, None).await.unwrap();
    assert_eq!(attempt.outcome, DeliveryOutcome::ApplyFailed);
    assert_eq!(
        attempt.output.apply_stderr,
        "error: admission webhook denied"
    );

    // retry is a new attempt with the next ordinal
    let retry = h.app.request_deployment("cluster-x", 1, None).await.unwrap();
    assert_eq!(retry.ordinal, 2);
    assert_eq!(h.app.downstream("cluster-x").unwrap().timeline.current(), None);
}

#[tokio::test]
async fn test_duplicate_and_out_of_order_ingest_rejected() {
    let h = harness(FakeChannel::succeeding());
    h.app.ingest(release(1)).await.unwrap();

    let err = h.app.ingest(release(1)).await.unwrap_err();
    assert!(matches!(err, FleetError::DuplicateSequence { sequence: 1, .. }));

    let err = h.app.ingest(release(3)).await.unwrap_err();
    assert!(matches!(err, FleetError::OutOfOrder { expected: 2, got: 3, .. }));
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(h.app.catalog.latest_sequence(), Some(1));
}

#[tokio::test]
async fn test_rollback_restores_past_release() {
    let h = harness(FakeChannel::succeeding());
    attached_with_pending(&h, 1).await;
    h.app.promote("cluster-x", 1).await.unwrap();
    let mut second = release(2);
    second.allow_rollback = true;
    h.app.ingest(second).await.unwrap();
    h.app.promote("cluster-x", 2).await.unwrap();

    h.app.rollback("cluster-x", 1).await.unwrap();
    let state = h.app.downstream("cluster-x").unwrap();
    assert_eq!(state.timeline.current(), Some(1));
    assert!(state.deployed_at(1).is_some());
    assert_partitions_consistent(&h, "cluster-x");

    let err = h.app.rollback("cluster-x", 1).await.unwrap_err();
    assert!(matches!(err, FleetError::NotPast { .. }));
}

#[tokio::test]
async fn test_rollback_refused_when_current_release_forbids_it() {
    let h = harness(FakeChannel::succeeding());
    attached_with_pending(&h, 1).await;
    h.app.promote("cluster-x", 1).await.unwrap();
    h.app.ingest(release(2)).await.unwrap();
    h.app.promote("cluster-x", 2).await.unwrap();

    let err = h.app.rollback("cluster-x", 1).await.unwrap_err();
    assert!(matches!(err, FleetError::RollbackNotAllowed { sequence: 2, .. }));
    assert_eq!(err.kind(), ErrorKind::Validation);

    let state = h.app.downstream("cluster-x").unwrap();
    assert_eq!(state.timeline.current(), Some(2));
    assert_eq!(state.timeline.past(), vec![1]);
}

#[tokio::test]
async fn test_concurrent_ingest_stays_gapless() {
    let h = harness(FakeChannel::succeeding());
    h.app.ingest(release(0)).await.unwrap();

    // every sequence 1..=5 is offered by four racing sources
    let results = join_all((0..20).map(|i| {
        let app = h.app.clone();
        let sequence = 1 + (i % 5);
        tokio::spawn(async move { (sequence, app.ingest(release(sequence)).await) })
    }))
    .await;

    let mut winners: Vec<i64> = Vec::new();
    for result in results {
        let (sequence, outcome) = result.unwrap();
        match outcome {
            Ok(ingested) => {
                assert_eq!(ingested, sequence);
                winners.push(sequence);
            }
            Err(err) => assert!(matches!(
                err,
                FleetError::DuplicateSequence { .. } | FleetError::OutOfOrder { .. }
            )),
        }
    }

    // no sequence was accepted twice and the accepted ones form a prefix
    winners.sort();
    let accepted = winners.len() as i64;
    assert!(accepted >= 1);
    assert_eq!(winners, (1..=accepted).collect::<Vec<_>>());
    assert_eq!(h.app.catalog.latest_sequence(), Some(accepted));
    for sequence in 0..=accepted {
        assert_eq!(h.app.catalog.get(sequence).unwrap().sequence, sequence);
    }
}

#[tokio::test]
async fn test_unreachable_handoff_refuses_delivery() {
    let h = harness(FakeChannel::succeeding());
    attached_with_pending(&h, 1).await;
    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();

    let mut config = ExternalHandoffConfig::new("github", "git@github.com:acme/deploy.git", "main");
    config.record_result(false, "Permission denied (publickey)");
    h.app
        .set_delivery_mode("cluster-x", DeliveryMode::Handoff(config))
        .await
        .unwrap();

    let err = h
        .app
        .request_deployment("cluster-x", 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::HandoffUnreachable { .. }));
    assert_eq!(err.kind(), ErrorKind::Delivery);
    assert_eq!(h.channel.applies(), 0);
}

#[tokio::test]
async fn test_deploying_non_pending_release_fails() {
    let h = harness(FakeChannel::succeeding());
    attached_with_pending(&h, 1).await;
    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();
    h.app.request_deployment("cluster-x", 1, None).await.unwrap();

    let err = h
        .app
        .request_deployment("cluster-x", 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::NotPending { sequence: 1, .. }));
}
