//! Outcome codes returned to automation.
//!
//! The integers are an external contract: scripts branch on them, so a
//! value never changes meaning once shipped.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum Outcome {
    Ok = 0,
    UnknownError = 1,
    CheckinOkCached = 3,
    CheckinFailure = 4,
    OkNeedsRebootForBootFw = 5,
    CheckinNoMatchingTargets = 6,
    CheckinNoTargetContent = 8,
    InstallAppsNeedFinalization = 10,
    CheckinSecurityError = 11,
    CheckinExpiredMetadata = 12,
    CheckinMetadataFetchFailure = 13,
    CheckinMetadataNotFound = 14,
    CheckinInvalidBundleMetadata = 15,
    CheckinUpdateNewVersion = 16,
    CheckinUpdateSyncApps = 17,
    CheckinUpdateRollback = 18,
    TargetNotFound = 20,
    RollbackTargetNotFound = 21,
    InstallationInProgress = 30,
    NoPendingInstallation = 40,
    DownloadFailure = 50,
    DownloadFailureNoSpace = 60,
    DownloadFailureVerificationFailed = 70,
    InstallAlreadyInstalled = 75,
    InstallTargetPullFailure = 80,
    InstallNeedsRebootForBootFw = 90,
    InstallOfflineRollbackOk = 99,
    InstallNeedsReboot = 100,
    InstallDowngradeAttempt = 102,
    InstallRollbackOk = 110,
    InstallRollbackNeedsReboot = 120,
    InstallRollbackFailed = 130,
}

impl Outcome {
    pub const ALL: [Outcome; 32] = [
        Outcome::Ok,
        Outcome::UnknownError,
        Outcome::CheckinOkCached,
        Outcome::CheckinFailure,
        Outcome::OkNeedsRebootForBootFw,
        Outcome::CheckinNoMatchingTargets,
        Outcome::CheckinNoTargetContent,
        Outcome::InstallAppsNeedFinalization,
        Outcome::CheckinSecurityError,
        Outcome::CheckinExpiredMetadata,
        Outcome::CheckinMetadataFetchFailure,
        Outcome::CheckinMetadataNotFound,
        Outcome::CheckinInvalidBundleMetadata,
        Outcome::CheckinUpdateNewVersion,
        Outcome::CheckinUpdateSyncApps,
        Outcome::CheckinUpdateRollback,
        Outcome::TargetNotFound,
        Outcome::RollbackTargetNotFound,
        Outcome::InstallationInProgress,
        Outcome::NoPendingInstallation,
        Outcome::DownloadFailure,
        Outcome::DownloadFailureNoSpace,
        Outcome::DownloadFailureVerificationFailed,
        Outcome::InstallAlreadyInstalled,
        Outcome::InstallTargetPullFailure,
        Outcome::InstallNeedsRebootForBootFw,
        Outcome::InstallOfflineRollbackOk,
        Outcome::InstallNeedsReboot,
        Outcome::InstallDowngradeAttempt,
        Outcome::InstallRollbackOk,
        Outcome::InstallRollbackNeedsReboot,
        Outcome::InstallRollbackFailed,
    ];

    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|o| o.code() == code)
    }

    /// Whether automation should treat the operation as having succeeded.
    /// Reboot and finalization requests count as success: the caller has
    /// a well defined next step.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Outcome::Ok
                | Outcome::CheckinOkCached
                | Outcome::CheckinUpdateNewVersion
                | Outcome::CheckinUpdateSyncApps
                | Outcome::CheckinUpdateRollback
                | Outcome::OkNeedsRebootForBootFw
                | Outcome::InstallNeedsReboot
                | Outcome::InstallAppsNeedFinalization
        )
    }

    /// A device reboot is the next required step.
    pub fn needs_reboot(&self) -> bool {
        matches!(
            self,
            Outcome::InstallNeedsReboot
                | Outcome::InstallRollbackNeedsReboot
                | Outcome::OkNeedsRebootForBootFw
                | Outcome::InstallNeedsRebootForBootFw
        )
    }

    pub fn is_rollback(&self) -> bool {
        matches!(
            self,
            Outcome::InstallRollbackOk
                | Outcome::InstallRollbackNeedsReboot
                | Outcome::InstallRollbackFailed
                | Outcome::InstallOfflineRollbackOk
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Outcome::Ok => "Operation succeeded",
            Outcome::UnknownError => "Unknown error",
            Outcome::CheckinOkCached => "Catalog refresh failed, previously stored metadata is still valid",
            Outcome::CheckinFailure => "Failed to refresh the version catalog",
            Outcome::OkNeedsRebootForBootFw => "Reboot to finish the boot firmware update",
            Outcome::CheckinNoMatchingTargets => "No versions published for the configured tag",
            Outcome::CheckinNoTargetContent => "Version content is missing from the bundle",
            Outcome::InstallAppsNeedFinalization => "Run `otactl run` to finalize the installation",
            Outcome::CheckinSecurityError => "Version metadata failed verification",
            Outcome::CheckinExpiredMetadata => "Version metadata has expired",
            Outcome::CheckinMetadataFetchFailure => "Unable to fetch version metadata",
            Outcome::CheckinMetadataNotFound => "Version metadata not found in the source directory",
            Outcome::CheckinInvalidBundleMetadata => "Version bundle metadata is invalid",
            Outcome::CheckinUpdateNewVersion => "Update available: new version",
            Outcome::CheckinUpdateSyncApps => "Update available: apps need synchronization",
            Outcome::CheckinUpdateRollback => "Update available: rollback",
            Outcome::TargetNotFound => "Requested version not found",
            Outcome::RollbackTargetNotFound => "No committed version to roll back to",
            Outcome::InstallationInProgress => {
                "An installation is pending; finalize or roll it back first"
            }
            Outcome::NoPendingInstallation => "No pending installation to finalize",
            Outcome::DownloadFailure => "Unable to download the version content",
            Outcome::DownloadFailureNoSpace => "Not enough free space to download the version",
            Outcome::DownloadFailureVerificationFailed => "Downloaded content failed verification",
            Outcome::InstallAlreadyInstalled => "Requested version is already installed",
            Outcome::InstallTargetPullFailure => "Version content is not staged; pull it first",
            Outcome::InstallNeedsRebootForBootFw => "Reboot to finish the previous boot firmware update first",
            Outcome::InstallOfflineRollbackOk => "Offline installation failed, rollback performed",
            Outcome::InstallNeedsReboot => "Reboot to finalize the installation",
            Outcome::InstallDowngradeAttempt => "Refusing to install an older version without --force",
            Outcome::InstallRollbackOk => "Installation failed, rollback performed",
            Outcome::InstallRollbackNeedsReboot => {
                "Installation failed, rollback started and needs a reboot to finish"
            }
            Outcome::InstallRollbackFailed => {
                "Installation failed and the rollback did not succeed; operator action required"
            }
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let mut codes: Vec<i32> = Outcome::ALL.iter().map(|o| o.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), Outcome::ALL.len());
    }

    #[test]
    fn test_from_code_inverts_code() {
        for outcome in Outcome::ALL {
            assert_eq!(Outcome::from_code(outcome.code()), Some(outcome));
        }
        assert_eq!(Outcome::from_code(2), None);
        assert_eq!(Outcome::from_code(-1), None);
    }

    #[test]
    fn test_stable_values() {
        assert_eq!(Outcome::Ok.code(), 0);
        assert_eq!(Outcome::InstallAppsNeedFinalization.code(), 10);
        assert_eq!(Outcome::InstallNeedsReboot.code(), 100);
        assert_eq!(Outcome::InstallRollbackOk.code(), 110);
        assert_eq!(Outcome::InstallRollbackNeedsReboot.code(), 120);
        assert_eq!(Outcome::InstallRollbackFailed.code(), 130);
    }

    #[test]
    fn test_rollbacks_are_not_success() {
        assert!(Outcome::InstallNeedsReboot.is_success());
        assert!(Outcome::InstallAppsNeedFinalization.is_success());
        assert!(!Outcome::InstallRollbackOk.is_success());
        assert!(Outcome::InstallRollbackNeedsReboot.needs_reboot());
        assert!(Outcome::InstallRollbackNeedsReboot.is_rollback());
    }

    #[test]
    fn test_serde_uses_names() {
        let json = serde_json::to_string(&Outcome::InstallRollbackNeedsReboot).unwrap();
        assert_eq!(json, "\"install_rollback_needs_reboot\"");
    }
}
