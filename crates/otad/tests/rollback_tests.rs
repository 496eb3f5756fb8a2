//! Automatic and operator rollbacks.

mod common;

use common::{calls, version, Harness};
use ota_shared::{EventKind, Outcome, Phase};
use otad::UpdateRequest;

#[test]
fn test_broken_image_rolls_back_to_committed_version() {
    let h = Harness::new(
        version(1, "image-a", &[]),
        vec![version(1, "image-a", &[]), version(2, "image-b", &[])],
    )
    .with_world(|w| {
        w.broken_images.insert("image-b".to_string());
    });

    let outcome = h.agent.update(&h.config, &UpdateRequest::latest());
    assert_eq!(outcome, Outcome::InstallRollbackOk);

    let device = h.device();
    assert_eq!(device.current.id, 1);
    assert!(device.is_failed(2));
    assert!(h.agent.pending().unwrap().is_none());
    assert_eq!(
        h.take_calls_of("install"),
        calls(&[
            ("install-pre", ""),
            ("install-post", "FAILED"),
            ("install-pre", ""),
            ("install-post", "OK"),
        ])
    );

    // Most recent first: the fallback, then the attempted target
    let updates = h.updates();
    assert_eq!(updates.len(), 2);
    assert_ne!(updates[0].correlation_id, updates[1].correlation_id);
    assert_eq!(updates[0].version_id, 1);
    assert_eq!(updates[0].completed(), Some(true));
    assert_eq!(updates[1].version_id, 2);
    assert_eq!(updates[1].completed(), Some(false));
    assert!(updates[1].has(EventKind::DownloadCompleted));
}

#[test]
fn test_failed_version_is_not_retried_implicitly() {
    let h = Harness::new(
        version(1, "image-a", &[]),
        vec![version(1, "image-a", &[]), version(2, "image-b", &[])],
    )
    .with_world(|w| {
        w.broken_images.insert("image-b".to_string());
    });
    h.agent.update(&h.config, &UpdateRequest::latest());

    assert_eq!(h.agent.check(&h.config), Outcome::Ok);
    assert_eq!(
        h.agent.update(&h.config, &UpdateRequest::latest()),
        Outcome::Ok
    );
    assert_eq!(h.updates().len(), 2);
}

#[test]
fn test_app_failure_before_reboot_rolls_back_apps_only() {
    let h = Harness::new(
        version(3, "image-b", &["x"]),
        vec![version(4, "image-b", &["x", "y"])],
    )
    .with_world(|w| {
        w.failing_apps.insert("y".to_string());
    });

    assert_eq!(
        h.agent.update(&h.config, &UpdateRequest::latest()),
        Outcome::InstallRollbackOk
    );
    assert_eq!(h.device().current.id, 3);
    assert_eq!(h.running(), vec!["x"]);
    assert!(h.world.lock().unwrap().image_calls.is_empty());
}

#[test]
fn test_app_failure_after_reboot_needs_second_reboot() {
    let h = Harness::new(
        version(3, "image-b", &["x"]),
        vec![version(3, "image-b", &["x"]), version(5, "image-c", &["x", "y"])],
    )
    .with_world(|w| {
        w.failing_apps.insert("y".to_string());
    });

    assert_eq!(
        h.agent.update(&h.config, &UpdateRequest::latest()),
        Outcome::InstallNeedsReboot
    );
    h.take_calls();
    h.reboot();

    assert_eq!(
        h.agent.finalize(&h.config),
        Outcome::InstallRollbackNeedsReboot
    );
    assert_eq!(
        h.take_calls(),
        calls(&[
            ("install-final-pre", ""),
            ("install-post", "FAILED"),
            ("install-pre", ""),
            ("install-post", "NEEDS_COMPLETION"),
        ])
    );
    let record = h.agent.pending().unwrap().unwrap();
    assert_eq!(record.phase, Phase::RolledBackPendingReboot);
    assert!(record.is_rollback);
    assert_eq!(record.rollback_from, Some(5));
    assert_eq!(record.target.id, 3);
    assert!(h.agent.reboot_pending());
    assert_eq!(h.device().current.id, 3);
    assert!(h.device().is_failed(5));

    // Still waiting
    assert_eq!(
        h.agent.finalize(&h.config),
        Outcome::InstallRollbackNeedsReboot
    );

    h.reboot();
    assert_eq!(h.booted(), "image-b");
    assert_eq!(h.agent.finalize(&h.config), Outcome::InstallRollbackOk);
    assert!(h.agent.pending().unwrap().is_none());
    assert_eq!(h.running(), vec!["x"]);
    assert_eq!(h.agent.finalize(&h.config), Outcome::InstallRollbackOk);

    let updates = h.updates();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].version_id, 3);
    assert_eq!(
        updates[0].kinds(),
        vec![
            (EventKind::InstallationStarted, None),
            (EventKind::InstallationApplied, None),
            (EventKind::InstallationCompleted, Some(true)),
        ]
    );
    assert_eq!(updates[1].version_id, 5);
    assert_eq!(updates[1].completed(), Some(false));
}

#[test]
fn test_app_failure_after_reboot_on_same_image() {
    // Shared image: no reboot on the way in, none on the way out
    let h = Harness::new(
        version(4, "image-c", &["x"]),
        vec![version(5, "image-c", &["x", "y"])],
    )
    .with_world(|w| {
        w.failing_apps.insert("y".to_string());
    });

    assert_eq!(
        h.agent.update(&h.config, &UpdateRequest::latest()),
        Outcome::InstallRollbackOk
    );
    assert!(!h.agent.reboot_pending());
}

#[test]
fn test_bootloader_fallback_rolls_back_apps() {
    let h = Harness::new(
        version(3, "image-b", &["x"]),
        vec![version(5, "image-c", &["x"])],
    )
    .with_world(|w| w.bootloader_rollback = true);

    assert_eq!(
        h.agent.update(&h.config, &UpdateRequest::latest()),
        Outcome::InstallNeedsReboot
    );
    h.reboot();
    assert_eq!(h.booted(), "image-b");

    assert_eq!(h.agent.finalize(&h.config), Outcome::InstallRollbackOk);
    let device = h.device();
    assert_eq!(device.current.id, 3);
    assert!(device.is_failed(5));
    assert_eq!(h.updates()[1].completed(), Some(false));
}

#[test]
fn test_rollback_failure_is_terminal() {
    let h = Harness::new(
        version(3, "image-b", &["x"]),
        vec![version(4, "image-b", &["x", "y"])],
    )
    .with_world(|w| {
        w.failing_apps.insert("x".to_string());
    });

    assert_eq!(
        h.agent.update(&h.config, &UpdateRequest::latest()),
        Outcome::InstallRollbackFailed
    );
    assert!(h.agent.pending().unwrap().is_none());
    assert_eq!(h.device().current.id, 3);
    assert_eq!(
        h.take_calls_of("install"),
        calls(&[
            ("install-pre", ""),
            ("install-post", "FAILED"),
            ("install-pre", ""),
            ("install-post", "FAILED"),
        ])
    );
}

#[test]
fn test_operator_rollback_to_previous_version() {
    let h = Harness::new(
        version(3, "image-b", &["x"]),
        vec![version(3, "image-b", &["x"]), version(4, "image-b", &["x", "y"])],
    );
    assert_eq!(h.agent.rollback(&h.config), Outcome::RollbackTargetNotFound);

    assert_eq!(
        h.agent.update(&h.config, &UpdateRequest::latest()),
        Outcome::Ok
    );
    h.take_calls();

    assert_eq!(h.agent.rollback(&h.config), Outcome::Ok);
    let device = h.device();
    assert_eq!(device.current.id, 3);
    assert!(device.is_failed(4));
    assert_eq!(h.running(), vec!["x"]);
    assert_eq!(
        h.take_calls(),
        calls(&[
            ("download-pre", ""),
            ("download-post", "OK"),
            ("install-pre", ""),
            ("install-post", "OK"),
        ])
    );

    // 4 is known-bad now and 3 is current
    assert_eq!(h.agent.check(&h.config), Outcome::Ok);
}

#[test]
fn test_operator_rollback_across_reboot() {
    let h = Harness::new(
        version(3, "image-b", &["x"]),
        vec![version(3, "image-b", &["x"]), version(5, "image-c", &["x"])],
    );
    assert_eq!(
        h.agent.update(&h.config, &UpdateRequest::latest()),
        Outcome::InstallNeedsReboot
    );
    h.reboot();
    assert_eq!(h.agent.finalize(&h.config), Outcome::Ok);
    assert_eq!(h.device().current.id, 5);
    h.take_calls();

    // Going back to 3 means booting image-b again
    assert_eq!(h.agent.rollback(&h.config), Outcome::InstallNeedsReboot);
    let record = h.agent.pending().unwrap().unwrap();
    assert!(record.is_rollback);
    assert!(record.operator_requested);
    assert_eq!(
        h.agent.finalize(&h.config),
        Outcome::InstallNeedsReboot
    );

    h.reboot();
    assert_eq!(h.booted(), "image-b");
    assert_eq!(h.agent.finalize(&h.config), Outcome::Ok);
    assert!(h.agent.pending().unwrap().is_none());
    let device = h.device();
    assert_eq!(device.current.id, 3);
    assert!(device.is_failed(5));
    assert_eq!(h.running(), vec!["x"]);
    assert_eq!(h.agent.finalize(&h.config), Outcome::Ok);
    assert_eq!(h.agent.check(&h.config), Outcome::Ok);
}

#[test]
fn test_operator_rollback_abandons_pending_install() {
    let h = Harness::new(
        version(3, "image-b", &["x"]),
        vec![version(5, "image-c", &["x"])],
    );
    assert_eq!(
        h.agent.update(&h.config, &UpdateRequest::latest()),
        Outcome::InstallNeedsReboot
    );
    h.take_calls();

    assert_eq!(h.agent.rollback(&h.config), Outcome::Ok);
    assert!(h.agent.pending().unwrap().is_none());
    assert!(h.device().is_failed(5));
    assert_eq!(h.device().current.id, 3);
    // Re-deploying the booted image cancels the staged one
    assert_eq!(h.world.lock().unwrap().deployed, None);
    assert_eq!(
        h.take_calls(),
        calls(&[
            ("install-post", "FAILED"),
            ("install-pre", ""),
            ("install-post", "OK"),
        ])
    );

    h.reboot();
    assert_eq!(h.booted(), "image-b");
}
