//! Resuming records left behind by an interrupted process.

mod common;

use common::{calls, version, Harness};
use ota_shared::{EventKind, InstallationRecord, Outcome};
use otad::UpdateRequest;

#[test]
fn test_resume_interrupted_install() {
    let h = Harness::new(
        version(3, "image-b", &["x"]),
        vec![version(4, "image-b", &["x", "y"])],
    );
    // Process died right after the record was written
    let record = InstallationRecord::begin(version(4, "image-b", &["x", "y"]), "c-1", "Updating from v3 to v4");
    h.agent.ledger().create_record(&record).unwrap();

    assert_eq!(
        h.agent.update(&h.config, &UpdateRequest::latest()),
        Outcome::InstallationInProgress
    );
    assert_eq!(h.agent.finalize(&h.config), Outcome::Ok);
    assert_eq!(
        h.take_calls_of("install"),
        calls(&[("install-final-pre", ""), ("install-post", "OK")])
    );
    assert_eq!(h.device().current.id, 4);
    assert_eq!(h.running(), vec!["x", "y"]);

    let updates = h.updates();
    assert_eq!(updates[0].correlation_id, "c-1");
    assert_eq!(updates[0].completed(), Some(true));
}

#[test]
fn test_resume_interrupted_image_install() {
    let h = Harness::new(
        version(3, "image-b", &[]),
        vec![version(5, "image-c", &[])],
    );
    let record = InstallationRecord::begin(version(5, "image-c", &[]), "c-2", "Updating from v3 to v5")
        .with_reboot(true);
    h.agent.ledger().create_record(&record).unwrap();

    // The deployment is repeated and the reboot requested again
    assert_eq!(h.agent.finalize(&h.config), Outcome::InstallNeedsReboot);
    assert!(h.agent.reboot_pending());
    h.reboot();
    assert_eq!(h.agent.finalize(&h.config), Outcome::Ok);
    assert_eq!(h.device().current.image_hash, "image-c");
}

#[test]
fn test_resume_interrupted_rollback() {
    let h = Harness::new(version(3, "image-b", &["x"]), vec![]);
    let record = InstallationRecord::rollback(
        version(3, "image-b", &["x"]),
        "c-3",
        4,
        "Rolling back from v4 to v3",
    );
    h.agent.ledger().create_record(&record).unwrap();

    assert_eq!(h.agent.finalize(&h.config), Outcome::InstallRollbackOk);
    assert!(h.agent.pending().unwrap().is_none());
    assert_eq!(h.agent.finalize(&h.config), Outcome::InstallRollbackOk);
}

#[test]
fn test_commit_survives_receipt_write_failure() {
    let h = Harness::new(
        version(3, "image-b", &["x"]),
        vec![version(5, "image-c", &["x"])],
    );
    assert_eq!(
        h.agent.update(&h.config, &UpdateRequest::latest()),
        Outcome::InstallNeedsReboot
    );
    h.reboot();
    h.take_calls();

    // The receipt cannot be written while its temp path is a directory
    let blocker = h.dir.path().join("finalized.json.tmp");
    std::fs::create_dir(&blocker).unwrap();
    assert_eq!(h.agent.finalize(&h.config), Outcome::UnknownError);

    // The version is committed and reported even though housekeeping failed
    assert_eq!(h.device().current.id, 5);
    assert_eq!(
        h.take_calls_of("install"),
        calls(&[("install-final-pre", ""), ("install-post", "OK")])
    );
    assert_eq!(h.updates()[0].completed(), Some(true));
    assert!(h.agent.pending().unwrap().is_some());

    // The leftover record is finished by the next finalize
    std::fs::remove_dir(&blocker).unwrap();
    assert_eq!(h.agent.finalize(&h.config), Outcome::Ok);
    assert!(h.agent.pending().unwrap().is_none());
    assert_eq!(h.device().current.id, 5);
    assert_eq!(h.agent.finalize(&h.config), Outcome::Ok);

    let updates = h.updates();
    assert_eq!(updates.len(), 1);
    let completed = updates[0]
        .events
        .iter()
        .filter(|e| e.kind == EventKind::InstallationCompleted)
        .count();
    assert_eq!(completed, 1);
}

#[test]
fn test_events_are_not_duplicated_on_resume() {
    let h = Harness::new(
        version(3, "image-b", &[]),
        vec![version(5, "image-c", &[])],
    );
    h.agent.update(&h.config, &UpdateRequest::latest());

    // Reboot never happened but the flag got lost: resume repeats the apply
    h.world.lock().unwrap().reboot_flag = false;
    let mut record = h.agent.pending().unwrap().unwrap();
    record.advance(ota_shared::Phase::Installing);
    h.agent.ledger().save_record(&record).unwrap();

    assert_eq!(h.agent.finalize(&h.config), Outcome::InstallNeedsReboot);
    let updates = h.updates();
    assert_eq!(updates.len(), 1);
    let applied = updates[0]
        .events
        .iter()
        .filter(|e| e.kind == EventKind::InstallationApplied)
        .count();
    assert_eq!(applied, 1);
}

#[test]
fn test_status_reflects_pending_record() {
    let h = Harness::new(
        version(3, "image-b", &["x"]),
        vec![version(5, "image-c", &["x"])],
    );
    let idle = h.agent.status(&h.config).unwrap();
    assert!(idle.is_idle());
    assert_eq!(idle.current_id, 3);
    assert!(!idle.reboot_required);

    h.agent.update(&h.config, &UpdateRequest::latest());
    let status = h.agent.status(&h.config).unwrap();
    let pending = status.pending.unwrap();
    assert_eq!(pending.version_id, 5);
    assert!(pending.requires_reboot);
    assert!(status.reboot_required);

    h.reboot();
    h.agent.finalize(&h.config);
    let done = h.agent.status(&h.config).unwrap();
    assert!(done.is_idle());
    assert_eq!(done.current_id, 5);
    assert_eq!(done.last_finalize.map(|r| r.outcome), Some(Outcome::Ok));
}

#[test]
fn test_list_marks_versions() {
    let h = Harness::new(
        version(3, "image-b", &["x"]),
        vec![
            version(5, "image-c", &["x"]),
            version(3, "image-b", &["x"]),
            version(4, "image-b", &["x"]),
        ],
    );
    h.world.lock().unwrap().broken_images.insert("image-c".to_string());
    h.agent.update(&h.config, &UpdateRequest::version(5));

    let (outcome, entries) = h.agent.list(&h.config).unwrap();
    assert_eq!(outcome, Outcome::CheckinUpdateNewVersion);
    let ids: Vec<_> = entries.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![3, 4, 5]);
    assert!(entries[0].current);
    assert!(entries[1].selected);
    assert_eq!(entries[1].reason.as_deref(), Some("Updating from v3 to v4"));
    assert!(entries[2].failed);
    assert!(!entries[2].selected);
    assert_eq!(entries[0].apps[0].running, Some(true));
    assert_eq!(entries[1].apps[0].running, None);
}
