//! Rollback policy.
//!
//! Single level: the fallback is always the last committed version. The
//! only decision is whether getting back to it needs a base image
//! deployment and therefore a reboot.

use ota_shared::{DeviceState, Version, VersionId};

/// Where the failed attempt broke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Base image deployment was rejected
    ImageApply,
    /// Apps failed while the committed image was still running
    AppsBeforeReboot,
    /// Apps failed after rebooting into the target image
    AppsAfterReboot,
    /// Device came back up on the previous image instead of the target
    BootFallback,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::ImageApply => "image_apply",
            FailureStage::AppsBeforeReboot => "apps_before_reboot",
            FailureStage::AppsAfterReboot => "apps_after_reboot",
            FailureStage::BootFallback => "boot_fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RollbackPlan {
    pub fallback: Version,
    pub failed: VersionId,
    pub stage: FailureStage,
    /// Fallback image must be deployed, which needs a reboot unless the
    /// deployer can activate it live
    pub requires_reboot: bool,
    pub reason: String,
}

/// Plan the rollback after `failed` broke at `stage`.
///
/// `running_image` is the image the device is executing right now. Before
/// the reboot boundary that is still the committed image, so reverting is
/// an app-only operation. After it, the failed target's image is running
/// and the fallback image differs exactly when the two versions' images do.
pub fn plan(
    failed: &Version,
    last_committed: &Version,
    stage: FailureStage,
    running_image: &str,
) -> RollbackPlan {
    let requires_reboot = match stage {
        FailureStage::AppsAfterReboot => !failed.same_image(last_committed),
        FailureStage::ImageApply | FailureStage::AppsBeforeReboot | FailureStage::BootFallback => {
            last_committed.image_hash != running_image
        }
    };

    RollbackPlan {
        fallback: last_committed.clone(),
        failed: failed.id,
        stage,
        requires_reboot,
        reason: rollback_reason(failed, last_committed),
    }
}

/// Operator-requested rollback of the committed version itself.
pub fn operator_fallback(device: &DeviceState) -> Option<&Version> {
    device.rollback_candidate()
}

pub fn rollback_reason(from: &Version, to: &Version) -> String {
    format!("Rolling back from {} to {}", from.name, to.name)
}
