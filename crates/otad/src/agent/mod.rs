//! Installation state machine.
//!
//! ```text
//! Idle -> Checked -> Downloaded -> Installing
//!     Installing -> InstallAppliedPendingReboot    base image changed
//!     Installing -> AppsPendingFinalization        apps deferred to `run`
//!     Installing -> Committed                      apps applied
//! (reboot)
//!     InstallAppliedPendingReboot -> Finalizing -> Committed | RollingBack
//!     RollingBack -> RolledBackPendingReboot | RolledBackCommitted
//! ```
//!
//! Each transition writes the ledger first, then emits lifecycle events,
//! then runs callbacks. Device state changes only on commit. Any record
//! left in the ledger is resumed by `finalize`.

mod finalize;
mod install;
mod rollback;

use ota_shared::callback::{CallbackMessage, CallbackResult};
use ota_shared::status::{app_statuses, ListEntry, PendingStatus, StatusReport};
use ota_shared::{
    new_correlation_id, DeviceState, InstallationRecord, Ledger, OtaError, Outcome,
    StagedDownload, Version,
};
use tracing::{debug, error, info, warn};

use crate::callbacks::CallbackDispatcher;
use crate::collab::Collaborators;
use crate::config::AgentConfig;
use crate::emitter::EventEmitter;
use crate::select::{select, Selection, UpdateRequest};

use install::Attempt;

/// Which entry point is driving the current transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Install,
    Finalize,
}

/// Result of consulting the catalog
enum Checkin {
    Selected {
        device: DeviceState,
        selection: Selection,
    },
    Failed(Outcome),
}

pub struct UpdateAgent {
    parts: Collaborators,
    ledger: Ledger,
    events: EventEmitter,
    callbacks: CallbackDispatcher,
}

impl UpdateAgent {
    pub fn new(
        parts: Collaborators,
        ledger: Ledger,
        events: EventEmitter,
        callbacks: CallbackDispatcher,
    ) -> Self {
        Self {
            parts,
            ledger,
            events,
            callbacks,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Compare the latest catalog version for the tag with the device.
    /// Never touches the installation record.
    pub fn check(&self, config: &AgentConfig) -> Outcome {
        self.settle("check", self.try_check(config))
    }

    /// Download and stage content without installing it.
    pub fn pull(&self, config: &AgentConfig, request: &UpdateRequest) -> Outcome {
        self.settle("pull", self.try_pull(config, request))
    }

    /// Install previously pulled content.
    pub fn install(&self, config: &AgentConfig, request: &UpdateRequest) -> Outcome {
        self.settle("install", self.try_install(config, request))
    }

    /// Check, pull and install under one correlation id.
    pub fn update(&self, config: &AgentConfig, request: &UpdateRequest) -> Outcome {
        self.settle("update", self.try_update(config, request))
    }

    /// Resume the pending installation after a reboot or deferral.
    pub fn finalize(&self, config: &AgentConfig) -> Outcome {
        self.settle("finalize", self.try_finalize(config))
    }

    /// Operator-requested rollback.
    pub fn rollback(&self, config: &AgentConfig) -> Outcome {
        self.settle("rollback", self.try_rollback(config))
    }

    pub fn pending(&self) -> Result<Option<InstallationRecord>, OtaError> {
        self.ledger.load_record()
    }

    pub fn reboot_pending(&self) -> bool {
        self.parts.reboot.reboot_pending()
    }

    pub fn status(&self, config: &AgentConfig) -> Result<StatusReport, OtaError> {
        let device = self.device()?;
        let record = self.ledger.load_record()?;

        Ok(StatusReport {
            tag: config.agent.tag.clone(),
            current_id: device.current.id,
            current_name: device.current.name.clone(),
            image_hash: device.current.image_hash.clone(),
            apps: app_statuses(
                &device.current,
                config.shortlist(),
                Some(&device.running_apps),
            ),
            pending: record.as_ref().map(PendingStatus::from),
            reboot_required: self.parts.reboot.reboot_pending(),
            failed_versions: device.failed.iter().copied().collect(),
            last_finalize: self.ledger.load_receipt()?,
        })
    }

    /// Catalog versions for the tag as seen from this device.
    pub fn list(&self, config: &AgentConfig) -> Result<(Outcome, Vec<ListEntry>), OtaError> {
        let device = self.device()?;
        let mut versions = match self.parts.catalog.list_versions(&config.agent.tag) {
            Ok(versions) => versions,
            Err(e) => {
                warn!("Cannot list versions for tag {}: {}", config.agent.tag, e);
                return Ok((e.outcome(), Vec::new()));
            }
        };
        versions.sort_by_key(|v| v.id);

        let selection = select(&versions, &UpdateRequest::latest(), &device, config);
        let (selected_id, reason) = match &selection {
            Selection::NewVersion { target, reason }
            | Selection::SyncApps { target, reason }
            | Selection::Rollback { target, reason } => (Some(target.id), Some(reason.clone())),
            _ => (None, None),
        };

        let entries = versions
            .iter()
            .map(|v| {
                let current = v.id == device.current.id;
                let selected = Some(v.id) == selected_id;
                ListEntry {
                    id: v.id,
                    name: v.name.clone(),
                    image_hash: v.image_hash.clone(),
                    current,
                    newer: v.id > device.current.id,
                    failed: device.is_failed(v.id),
                    selected,
                    reason: if selected { reason.clone() } else { None },
                    apps: app_statuses(
                        v,
                        config.shortlist(),
                        if current { Some(&device.running_apps) } else { None },
                    ),
                }
            })
            .collect();

        Ok((selection.check_outcome(), entries))
    }

    fn try_check(&self, config: &AgentConfig) -> Result<Outcome, OtaError> {
        match self.checkin(config, &UpdateRequest::latest(), true)? {
            Checkin::Failed(outcome) => Ok(outcome),
            Checkin::Selected { selection, .. } => {
                match &selection {
                    Selection::NewVersion { target, reason }
                    | Selection::SyncApps { target, reason }
                    | Selection::Rollback { target, reason } => {
                        info!("Update available: {} ({})", target, reason)
                    }
                    _ => debug!("No update available"),
                }
                Ok(selection.check_outcome())
            }
        }
    }

    fn try_pull(&self, config: &AgentConfig, request: &UpdateRequest) -> Result<Outcome, OtaError> {
        if let Some(outcome) = self.refuse_if_pending()? {
            return Ok(outcome);
        }
        let (device, selection) = match self.checkin(config, request, false)? {
            Checkin::Failed(outcome) => return Ok(outcome),
            Checkin::Selected { device, selection } => (device, selection),
        };
        let (target, reason) = match selection.into_target() {
            Ok(target) => target,
            Err(outcome) => return Ok(outcome),
        };

        let correlation_id = new_correlation_id();
        let staged_view = config.effective_version(&target);
        if let Some(failure) = self.download(&device, &staged_view, &correlation_id, &reason) {
            return Ok(failure);
        }
        self.ledger
            .save_staged(&StagedDownload::new(target.id, &correlation_id))?;
        info!("Pulled {}", target);
        Ok(Outcome::Ok)
    }

    fn try_install(&self, config: &AgentConfig, request: &UpdateRequest) -> Result<Outcome, OtaError> {
        if let Some(outcome) = self.refuse_if_pending()? {
            return Ok(outcome);
        }
        let (device, selection) = match self.checkin(config, request, false)? {
            Checkin::Failed(outcome) => return Ok(outcome),
            Checkin::Selected { device, selection } => (device, selection),
        };
        let (target, reason) = match selection.into_target() {
            Ok(target) => target,
            Err(outcome) => return Ok(outcome),
        };

        if !self.parts.fetcher.is_staged(&config.effective_version(&target)) {
            warn!("{} is not staged; pull it first", target);
            return Ok(Outcome::InstallTargetPullFailure);
        }

        // Continue the operation started by the matching pull
        let correlation_id = match self.ledger.load_staged()? {
            Some(staged) if staged.version_id == target.id => staged.correlation_id,
            _ => new_correlation_id(),
        };

        let attempt = Attempt {
            target,
            correlation_id,
            reason,
            mode: request.install_mode.unwrap_or(config.agent.install_mode),
            rollback_from: None,
        };
        self.install_target(config, device, attempt)
    }

    fn try_update(&self, config: &AgentConfig, request: &UpdateRequest) -> Result<Outcome, OtaError> {
        if let Some(outcome) = self.refuse_if_pending()? {
            return Ok(outcome);
        }
        let (device, selection) = match self.checkin(config, request, true)? {
            Checkin::Failed(outcome) => return Ok(outcome),
            Checkin::Selected { device, selection } => (device, selection),
        };
        let (target, reason) = match selection.into_target() {
            Ok(target) => target,
            Err(outcome) => return Ok(outcome),
        };

        let correlation_id = new_correlation_id();
        let staged_view = config.effective_version(&target);
        if let Some(failure) = self.download(&device, &staged_view, &correlation_id, &reason) {
            return Ok(failure);
        }

        let attempt = Attempt {
            target,
            correlation_id,
            reason,
            mode: request.install_mode.unwrap_or(config.agent.install_mode),
            rollback_from: None,
        };
        self.install_target(config, device, attempt)
    }

    /// Consult the catalog; with `announce` the check-for-update callbacks run.
    fn checkin(
        &self,
        config: &AgentConfig,
        request: &UpdateRequest,
        announce: bool,
    ) -> Result<Checkin, OtaError> {
        let device = self.device()?;
        if announce {
            self.callbacks
                .pre(CallbackMessage::CheckForUpdatePre, &device.current, None, "");
        }

        let versions = match self.parts.catalog.list_versions(&config.agent.tag) {
            Ok(versions) => versions,
            Err(e) => {
                warn!("Catalog check for tag {} failed: {}", config.agent.tag, e);
                if announce {
                    self.callbacks.post(
                        CallbackMessage::CheckForUpdatePost,
                        CallbackResult::Failed,
                        &device.current,
                        None,
                        "",
                    );
                }
                return Ok(Checkin::Failed(e.outcome()));
            }
        };

        let selection = select(&versions, request, &device, config);
        if announce {
            let result = match &selection {
                Selection::NoVersions | Selection::NotFound(_) => CallbackResult::Failed,
                _ => CallbackResult::Ok,
            };
            self.callbacks.post(
                CallbackMessage::CheckForUpdatePost,
                result,
                &device.current,
                None,
                "",
            );
        }
        Ok(Checkin::Selected { device, selection })
    }

    /// Stage content for `version`. Returns the failure outcome, if any.
    fn download(
        &self,
        device: &DeviceState,
        version: &Version,
        correlation_id: &str,
        reason: &str,
    ) -> Option<Outcome> {
        info!("Downloading {}", version);
        self.callbacks
            .pre(CallbackMessage::DownloadPre, &device.current, Some(version), reason);
        self.events.download_started(correlation_id, version);

        match self.parts.fetcher.fetch(version) {
            Ok(()) => {
                self.events
                    .download_completed(correlation_id, version, true, None);
                self.callbacks.post(
                    CallbackMessage::DownloadPost,
                    CallbackResult::Ok,
                    &device.current,
                    Some(version),
                    reason,
                );
                None
            }
            Err(e) => {
                error!("Download of {} failed: {}", version, e);
                let details = e.to_string();
                self.events
                    .download_completed(correlation_id, version, false, Some(&details));
                self.callbacks.post(
                    CallbackMessage::DownloadPost,
                    CallbackResult::Failed,
                    &device.current,
                    Some(version),
                    reason,
                );
                Some(e.outcome())
            }
        }
    }

    fn refuse_if_pending(&self) -> Result<Option<Outcome>, OtaError> {
        Ok(self.ledger.load_record()?.map(|record| {
            warn!(
                "Installation of {} is pending in phase {}",
                record.target, record.phase
            );
            Outcome::InstallationInProgress
        }))
    }

    fn device(&self) -> Result<DeviceState, OtaError> {
        match self.ledger.load_device()? {
            Some(state) => Ok(state),
            None => {
                let booted = self.parts.images.booted_image().unwrap_or_default();
                debug!("No device state yet, starting from booted image {}", booted);
                Ok(DeviceState::initial(&booted))
            }
        }
    }

    /// Image the device is executing, falling back to the committed one
    fn running_image(&self, device: &DeviceState) -> String {
        self.parts
            .images
            .booted_image()
            .unwrap_or_else(|| device.image_hash().to_string())
    }

    fn settle(&self, operation: &str, result: Result<Outcome, OtaError>) -> Outcome {
        match result {
            Ok(outcome) => {
                if outcome.is_success() {
                    info!("{}: {}", operation, outcome);
                } else {
                    warn!("{}: {}", operation, outcome);
                }
                outcome
            }
            Err(e) => {
                error!("{} aborted [{}]: {}", operation, e.code(), e);
                Outcome::UnknownError
            }
        }
    }
}
