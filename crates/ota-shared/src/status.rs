//! Status and listing snapshots rendered by `otactl status` / `otactl list`.

use serde::{Deserialize, Serialize};

use crate::record::{FinalizeReceipt, InstallationRecord, Phase};
use crate::version::{AppSet, Version, VersionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStatus {
    pub name: String,
    pub digest: String,
    /// Selected by the configured shortlist
    pub on: bool,
    /// Currently running per device state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingStatus {
    pub version_id: VersionId,
    pub version_name: String,
    pub phase: Phase,
    pub requires_reboot: bool,
    pub is_rollback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_from: Option<VersionId>,
    pub correlation_id: String,
    pub reason: String,
}

impl From<&InstallationRecord> for PendingStatus {
    fn from(record: &InstallationRecord) -> Self {
        Self {
            version_id: record.target.id,
            version_name: record.target.name.clone(),
            phase: record.phase,
            requires_reboot: record.requires_reboot,
            is_rollback: record.is_rollback,
            rollback_from: record.rollback_from,
            correlation_id: record.correlation_id.clone(),
            reason: record.reason.clone(),
        }
    }
}

/// Device status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub tag: String,
    pub current_id: VersionId,
    pub current_name: String,
    pub image_hash: String,
    pub apps: Vec<AppStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingStatus>,
    pub reboot_required: bool,
    pub failed_versions: Vec<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_finalize: Option<FinalizeReceipt>,
}

impl StatusReport {
    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }
}

/// One catalog version as seen from this device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListEntry {
    pub id: VersionId,
    pub name: String,
    pub image_hash: String,
    pub current: bool,
    pub newer: bool,
    pub failed: bool,
    /// Would be installed by `update`
    pub selected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub apps: Vec<AppStatus>,
}

/// App listing for `version` with shortlist selection and optional running flags
pub fn app_statuses(
    version: &Version,
    shortlist: Option<&[String]>,
    running: Option<&AppSet>,
) -> Vec<AppStatus> {
    let selected = version.apps.shortlisted(shortlist);
    version
        .apps
        .iter()
        .map(|app| AppStatus {
            name: app.name.clone(),
            digest: app.digest.clone(),
            on: selected.contains(&app.name),
            running: running.map(|r| r.get(&app.name) == Some(app)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::App;

    #[test]
    fn test_app_statuses_flags() {
        let v = Version::new(2, "b").with_apps(vec![App::new("x", "1"), App::new("y", "2")]);
        let running: AppSet = vec![App::new("x", "1"), App::new("y", "old")].into_iter().collect();
        let shortlist = vec!["x".to_string()];
        let statuses = app_statuses(&v, Some(&shortlist), Some(&running));
        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].on);
        assert_eq!(statuses[0].running, Some(true));
        assert!(!statuses[1].on);
        assert_eq!(statuses[1].running, Some(false));
    }

    #[test]
    fn test_pending_from_record() {
        let record = InstallationRecord::rollback(Version::new(3, "b"), "c9", 5, "Rolling back");
        let pending = PendingStatus::from(&record);
        assert_eq!(pending.phase, Phase::RollingBack);
        assert_eq!(pending.rollback_from, Some(5));
    }
}
