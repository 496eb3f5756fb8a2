//! Target selection: which catalog version an operation acts on.

use ota_shared::{DeviceState, Outcome, Version, VersionId};
use tracing::debug;

use crate::config::{AgentConfig, InstallMode};
use crate::policy::rollback_reason;

/// Operator request shared by pull, install and update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateRequest {
    /// Explicit version; `None` means the latest for the tag
    pub version: Option<VersionId>,
    /// Allow installing an older version
    pub force: bool,
    /// Overrides the configured install mode
    pub install_mode: Option<InstallMode>,
}

impl UpdateRequest {
    pub fn latest() -> Self {
        Self::default()
    }

    pub fn version(id: VersionId) -> Self {
        Self {
            version: Some(id),
            ..Self::default()
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_mode(mut self, mode: InstallMode) -> Self {
        self.install_mode = Some(mode);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    NoUpdate,
    NewVersion { target: Version, reason: String },
    /// Same version, running apps differ from the desired set
    SyncApps { target: Version, reason: String },
    /// The committed version is known-bad and an older good one exists
    Rollback { target: Version, reason: String },
    AlreadyInstalled(Version),
    NotFound(VersionId),
    Downgrade(Version),
    NoVersions,
}

impl Selection {
    /// Outcome reported by `check`
    pub fn check_outcome(&self) -> Outcome {
        match self {
            Selection::NoUpdate | Selection::AlreadyInstalled(_) => Outcome::Ok,
            Selection::NewVersion { .. } => Outcome::CheckinUpdateNewVersion,
            Selection::SyncApps { .. } => Outcome::CheckinUpdateSyncApps,
            Selection::Rollback { .. } => Outcome::CheckinUpdateRollback,
            Selection::NotFound(_) => Outcome::TargetNotFound,
            Selection::Downgrade(_) => Outcome::InstallDowngradeAttempt,
            Selection::NoVersions => Outcome::CheckinNoMatchingTargets,
        }
    }

    /// Version to act on with its reason, or the outcome ending the operation.
    pub fn into_target(self) -> Result<(Version, String), Outcome> {
        match self {
            Selection::NewVersion { target, reason }
            | Selection::SyncApps { target, reason }
            | Selection::Rollback { target, reason } => Ok((target, reason)),
            Selection::NoUpdate => Err(Outcome::Ok),
            Selection::AlreadyInstalled(_) => Err(Outcome::InstallAlreadyInstalled),
            Selection::NotFound(_) => Err(Outcome::TargetNotFound),
            Selection::Downgrade(_) => Err(Outcome::InstallDowngradeAttempt),
            Selection::NoVersions => Err(Outcome::CheckinNoMatchingTargets),
        }
    }
}

pub fn select(
    versions: &[Version],
    request: &UpdateRequest,
    device: &DeviceState,
    config: &AgentConfig,
) -> Selection {
    if versions.is_empty() {
        return Selection::NoVersions;
    }
    let current = &device.current;
    let explicit = request.version.is_some();

    let candidate = match request.version {
        Some(id) => match versions.iter().find(|v| v.id == id) {
            Some(v) => v,
            None => return Selection::NotFound(id),
        },
        // Known-bad versions are only installed on explicit request
        None => match versions
            .iter()
            .filter(|v| !device.is_failed(v.id))
            .max_by_key(|v| v.id)
        {
            Some(v) => v,
            None => return sync_or_idle(versions, device, config, false),
        },
    };

    if candidate.id == current.id {
        return sync_or_idle(versions, device, config, explicit);
    }

    if candidate.id < current.id {
        if !explicit && device.is_failed(current.id) {
            return Selection::Rollback {
                reason: rollback_reason(current, candidate),
                target: candidate.clone(),
            };
        }
        let allowed = if explicit {
            request.force
        } else {
            config.agent.auto_downgrade
        };
        if !allowed {
            if explicit {
                return Selection::Downgrade(candidate.clone());
            }
            debug!(
                "Latest {} is older than {} and auto downgrade is off",
                candidate, current
            );
            return sync_or_idle(versions, device, config, false);
        }
    }

    Selection::NewVersion {
        reason: format!("Updating from {} to {}", current.name, candidate.name),
        target: candidate.clone(),
    }
}

fn sync_or_idle(
    versions: &[Version],
    device: &DeviceState,
    config: &AgentConfig,
    explicit: bool,
) -> Selection {
    let target = versions
        .iter()
        .find(|v| v.id == device.current.id)
        .cloned()
        .unwrap_or_else(|| device.current.clone());

    if device.running_apps != config.desired_apps(&target) {
        return Selection::SyncApps {
            reason: "Syncing active version apps".to_string(),
            target,
        };
    }
    if explicit {
        Selection::AlreadyInstalled(target)
    } else {
        Selection::NoUpdate
    }
}
