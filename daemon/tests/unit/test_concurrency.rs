//! In-flight attempts: exclusivity, cancellation, deadlines

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Notify;

use fleetdeck::errors::FleetError;
use fleetdeck::gate::preflight::GateState;
use fleetdeck::models::attempt::DeliveryOutcome;
use fleetdeck::models::downstream::{DeliveryMode, DownstreamTarget, ExternalHandoffConfig};

use crate::common::{
    attached_with_pending, harness, harness_with, release, settle, FakeChannel, FakeResources,
    FakeRunner,
};

#[tokio::test]
async fn test_concurrent_execute_admits_one_attempt() {
    let hold = Arc::new(Notify::new());
    let h = harness(FakeChannel::held(hold.clone()));
    attached_with_pending(&h, 1).await;
    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();

    let first = {
        let app = h.app.clone();
        tokio::spawn(async move { app.request_deployment("cluster-x", 1, None).await })
    };
    h.channel.entered.notified().await;

    let rivals = join_all((0..8).map(|_| {
        let app = h.app.clone();
        tokio::spawn(async move { app.request_deployment("cluster-x", 1, None).await })
    }))
    .await;
    for rival in rivals {
        let err = rival.unwrap().unwrap_err();
        assert!(matches!(err, FleetError::AttemptInProgress { sequence: 1, .. }));
    }

    let state = h.app.downstream("cluster-x").unwrap();
    let pending = state.attempts().iter().filter(|a| a.is_pending()).count();
    assert_eq!(pending, 1);

    hold.notify_one();
    let attempt = first.await.unwrap().unwrap();
    assert_eq!(attempt.outcome, DeliveryOutcome::Succeeded);
    assert_eq!(h.channel.applies(), 1);
}

#[tokio::test]
async fn test_mode_switch_refused_while_attempt_pending() {
    let hold = Arc::new(Notify::new());
    let h = harness(FakeChannel::held(hold.clone()));
    attached_with_pending(&h, 1).await;
    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();

    let deploy = {
        let app = h.app.clone();
        tokio::spawn(async move { app.request_deployment("cluster-x", 1, None).await })
    };
    h.channel.entered.notified().await;

    let handoff = ExternalHandoffConfig::new("github", "git@github.com:acme/deploy.git", "main");
    let err = h
        .app
        .set_delivery_mode("cluster-x", DeliveryMode::Handoff(handoff))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::ModeSwitchConflict { .. }));

    let err = h.app.detach("cluster-x").await.unwrap_err();
    assert!(matches!(err, FleetError::AttemptInProgress { .. }));

    hold.notify_one();
    deploy.await.unwrap().unwrap();

    // mode is untouched and switchable again
    let state = h.app.downstream("cluster-x").unwrap();
    assert_eq!(state.target.delivery.name(), "direct");
    h.app
        .set_delivery_mode("cluster-x", DeliveryMode::Direct)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_other_downstreams_progress_during_apply() {
    let hold = Arc::new(Notify::new());
    let h = harness(FakeChannel::held(hold.clone()));
    attached_with_pending(&h, 1).await;
    h.app
        .attach(DownstreamTarget::new("cluster-y", "Cluster Y"), &[1])
        .unwrap();
    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();

    let deploy = {
        let app = h.app.clone();
        tokio::spawn(async move { app.request_deployment("cluster-x", 1, None).await })
    };
    h.channel.entered.notified().await;

    // cluster-x's lock is not held across the apply
    h.app.request_bypass("cluster-y", 1, "ops@acme").await.unwrap();
    h.app.promote("cluster-y", 1).await.unwrap();
    assert_eq!(h.app.downstream("cluster-y").unwrap().timeline.current(), Some(1));

    hold.notify_one();
    deploy.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancelled_attempt_is_not_promoted() {
    let hold = Arc::new(Notify::new());
    let h = harness(FakeChannel::held(hold.clone()));
    attached_with_pending(&h, 1).await;
    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();

    let deploy = {
        let app = h.app.clone();
        tokio::spawn(async move { app.request_deployment("cluster-x", 1, None).await })
    };
    h.channel.entered.notified().await;

    let pending = h.app.list_attempts("cluster-x", Some(1)).unwrap();
    let cancelled = h.app.cancel_attempt("cluster-x", &pending[0].id).await.unwrap();
    assert!(cancelled.cancel_requested);

    hold.notify_one();
    let attempt = deploy.await.unwrap().unwrap();
    assert_eq!(attempt.outcome, DeliveryOutcome::Cancelled);

    let state = h.app.downstream("cluster-x").unwrap();
    assert_eq!(state.timeline.current(), None);
    assert_eq!(state.timeline.pending(), vec![1]);

    let err = h
        .app
        .cancel_attempt("cluster-x", &attempt.id)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::AttemptFinished { .. }));

    let err = h.app.cancel_attempt("cluster-x", "no-such-attempt").await.unwrap_err();
    assert!(matches!(err, FleetError::NotFound(_)));
}

#[tokio::test]
async fn test_deadline_times_out_attempt() {
    // never released
    let hold = Arc::new(Notify::new());
    let h = harness(FakeChannel::held(hold));
    attached_with_pending(&h, 1).await;
    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();

    let attempt = h
        .app
        .request_deployment("cluster-x", 1, Some(Duration::from_millis(50)))
        .await
        .unwrap();
    assert_eq!(attempt.outcome, DeliveryOutcome::TimedOut);
    assert!(attempt.error.is_some());

    let state = h.app.downstream("cluster-x").unwrap();
    assert_eq!(state.timeline.current(), None);
    assert!(state.any_pending_attempt().is_none());
}

#[tokio::test]
async fn test_dropped_caller_still_finalizes_attempt() {
    let hold = Arc::new(Notify::new());
    let h = harness(FakeChannel::held(hold.clone()));
    attached_with_pending(&h, 1).await;
    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();

    let deploy = {
        let app = h.app.clone();
        tokio::spawn(async move { app.request_deployment("cluster-x", 1, None).await })
    };
    h.channel.entered.notified().await;
    deploy.abort();
    assert!(deploy.await.unwrap_err().is_cancelled());

    let pending = h.app.list_attempts("cluster-x", Some(1)).unwrap();
    h.app.cancel_attempt("cluster-x", &pending[0].id).await.unwrap();
    hold.notify_one();
    settle(&h, "cluster-x").await;

    let attempts = h.app.list_attempts("cluster-x", Some(1)).unwrap();
    assert_eq!(attempts[0].outcome, DeliveryOutcome::Cancelled);
    assert!(attempts[0].finished_at.is_some());
    assert_eq!(h.app.downstream("cluster-x").unwrap().timeline.pending(), vec![1]);

    // the pair is free again
    hold.notify_one();
    let retry = h.app.request_deployment("cluster-x", 1, None).await.unwrap();
    assert_eq!(retry.ordinal, 2);
    assert_eq!(retry.outcome, DeliveryOutcome::Succeeded);
    assert_eq!(h.app.downstream("cluster-x").unwrap().timeline.current(), Some(1));
}

#[tokio::test]
async fn test_dropped_preflight_caller_still_records_result() {
    let hold = Arc::new(Notify::new());
    let runner = FakeRunner {
        hold: Some(hold.clone()),
        ..FakeRunner::passing()
    };
    let entered = runner.entered.clone();
    let h = harness_with(
        FakeChannel::succeeding(),
        runner,
        FakeResources { reachable: true },
    );
    attached_with_pending(&h, 1).await;

    let run = {
        let app = h.app.clone();
        tokio::spawn(async move { app.request_preflight("cluster-x", 1).await })
    };
    entered.notified().await;
    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());
    hold.notify_one();

    let mut gate = GateState::NotRun;
    for _ in 0..200 {
        gate = h.app.downstream("cluster-x").unwrap().gate(1);
        if !matches!(gate, GateState::Running { .. }) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(matches!(gate, GateState::Passed { .. }));

    let attempt = h.app.request_deployment("cluster-x", 1, None).await.unwrap();
    assert_eq!(attempt.outcome, DeliveryOutcome::Succeeded);
}

#[tokio::test]
async fn test_deliveries_on_one_downstream_run_one_at_a_time() {
    let hold = Arc::new(Notify::new());
    let h = harness(FakeChannel::held(hold.clone()));
    attached_with_pending(&h, 1).await;
    h.app.ingest(release(2)).await.unwrap();
    h.app.request_bypass("cluster-x", 1, "ops@acme").await.unwrap();
    h.app.request_bypass("cluster-x", 2, "ops@acme").await.unwrap();

    let older = {
        let app = h.app.clone();
        tokio::spawn(async move { app.request_deployment("cluster-x", 1, None).await })
    };
    h.channel.entered.notified().await;

    let newer = {
        let app = h.app.clone();
        tokio::spawn(async move { app.request_deployment("cluster-x", 2, None).await })
    };

    // admitted, but waiting for the first delivery to finish
    for _ in 0..200 {
        if h.app.list_attempts("cluster-x", Some(2)).unwrap().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.channel.applies(), 1);
    assert!(h.app.list_attempts("cluster-x", Some(2)).unwrap()[0].is_pending());

    hold.notify_one();
    let first = older.await.unwrap().unwrap();
    assert_eq!(first.outcome, DeliveryOutcome::Succeeded);
    assert_eq!(h.app.downstream("cluster-x").unwrap().timeline.current(), Some(1));

    h.channel.entered.notified().await;
    assert_eq!(h.channel.applies(), 2);
    hold.notify_one();
    let second = newer.await.unwrap().unwrap();
    assert_eq!(second.outcome, DeliveryOutcome::Succeeded);

    let state = h.app.downstream("cluster-x").unwrap();
    assert_eq!(state.timeline.current(), Some(2));
    assert_eq!(state.timeline.past(), vec![1]);
}
