//! Install pipeline lifecycle through the application facade

use fleetdeck::errors::{ErrorKind, FleetError};
use fleetdeck::install::pipeline::{InstallEvent, InstallStatus, InstallVariant, RewriteStatus};

use crate::common::{harness, FakeChannel};

#[tokio::test]
async fn test_airgap_install_runs_image_rewrite_first() {
    let h = harness(FakeChannel::succeeding());
    assert!(h.app.install_pipeline_state().is_none());

    h.app
        .start_install(InstallVariant::Airgap, "Preparing airgap bundle")
        .unwrap();

    // installing before the rewrite finished is refused
    let err = h
        .app
        .advance_install(InstallEvent::BeginInstall("installing".to_string()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Install);

    h.app
        .advance_install(InstallEvent::BeginImageRewrite("Pushing images".to_string()))
        .unwrap();
    h.app
        .advance_install(InstallEvent::ImageRewriteProgress("12/40 images".to_string()))
        .unwrap();
    let state = h
        .app
        .advance_install(InstallEvent::ImageRewriteCompleted("40/40 images".to_string()))
        .unwrap();
    assert_eq!(
        state.image_rewrite.as_ref().map(|r| r.status),
        Some(RewriteStatus::Completed)
    );

    h.app
        .advance_install(InstallEvent::BeginInstall("Applying manifests".to_string()))
        .unwrap();
    let state = h
        .app
        .advance_install(InstallEvent::Installed("Ready".to_string()))
        .unwrap();
    assert_eq!(state.status, InstallStatus::Installed);

    let err = h
        .app
        .start_install(InstallVariant::Online, "again")
        .unwrap_err();
    assert!(matches!(err, FleetError::InstallCompleted));
}

#[tokio::test]
async fn test_second_install_refused_while_active() {
    let h = harness(FakeChannel::succeeding());
    h.app.start_install(InstallVariant::Online, "Preparing").unwrap();

    let err = h
        .app
        .start_install(InstallVariant::Online, "Preparing")
        .unwrap_err();
    assert!(matches!(err, FleetError::InstallAlreadyActive));

    let state = h
        .app
        .advance_install(InstallEvent::Fail("registry unreachable".to_string()))
        .unwrap();
    assert_eq!(state.status, InstallStatus::Failed);
    assert_eq!(state.message, "registry unreachable");

    // a failed install may be started over
    let state = h.app.start_install(InstallVariant::Online, "Retrying").unwrap();
    assert_eq!(state.status, InstallStatus::Preparing);
}
