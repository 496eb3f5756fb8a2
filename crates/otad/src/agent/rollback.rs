use ota_shared::callback::{CallbackMessage, CallbackResult};
use ota_shared::{new_correlation_id, DeviceState, InstallationRecord, OtaError, Outcome};
use tracing::{error, info, warn};

use super::install::{summarize, Attempt};
use super::{Flow, UpdateAgent};
use crate::collab::{AppApply, ImageApply};
use crate::config::{AgentConfig, InstallMode};
use crate::policy::{self, rollback_reason};

impl UpdateAgent {
    /// Announce a persisted rollback record and drive it.
    pub(super) fn start_rollback(
        &self,
        config: &AgentConfig,
        device: DeviceState,
        record: InstallationRecord,
        flow: Flow,
    ) -> Result<Outcome, OtaError> {
        self.callbacks.pre(
            CallbackMessage::InstallPre,
            &device.current,
            Some(&record.target),
            &record.reason,
        );
        self.events
            .installation_started(&record.correlation_id, &record.target);
        self.continue_rollback(config, device, record, flow)
    }

    /// Revert to the record's target. Also resumes a record left in
    /// `RollingBack`.
    pub(super) fn continue_rollback(
        &self,
        config: &AgentConfig,
        device: DeviceState,
        record: InstallationRecord,
        flow: Flow,
    ) -> Result<Outcome, OtaError> {
        if record.requires_reboot {
            match self.parts.images.apply_image(&record.target.image_hash) {
                ImageApply::NeedsReboot => {
                    return self.await_reboot(&device, record);
                }
                ImageApply::Failed(reason) => {
                    return self.rollback_failed(&device, record, &reason, flow);
                }
                ImageApply::Ok => {}
            }
        }

        let desired = config.desired_apps(&record.target);
        match self.parts.apps.apply_apps(&desired, config.agent.prune) {
            AppApply::Ok => {
                info!("Rolled back to {}", record.target);
                self.commit(device, record, desired, flow)
            }
            AppApply::Failed(failures) => {
                let reason = summarize(&failures);
                self.rollback_failed(&device, record, &reason, flow)
            }
        }
    }

    /// The fallback itself could not be reached. The device is left as is
    /// and the slot is released.
    pub(super) fn rollback_failed(
        &self,
        device: &DeviceState,
        record: InstallationRecord,
        reason: &str,
        flow: Flow,
    ) -> Result<Outcome, OtaError> {
        error!("Rollback to {} failed: {}", record.target, reason);
        let released = self.release(&record, Outcome::InstallRollbackFailed, flow);

        self.events.installation_completed(
            &record.correlation_id,
            &record.target,
            false,
            Some(reason),
        );
        self.callbacks.post(
            CallbackMessage::InstallPost,
            CallbackResult::Failed,
            &device.current,
            Some(&record.target),
            &record.reason,
        );
        released.map(|()| Outcome::InstallRollbackFailed)
    }

    pub(super) fn try_rollback(&self, config: &AgentConfig) -> Result<Outcome, OtaError> {
        let mut device = self.device()?;

        if let Some(pending) = self.ledger.load_record()? {
            if pending.is_rollback {
                warn!("Rollback to {} is already in progress", pending.target);
                return Ok(Outcome::InstallationInProgress);
            }
            return self.abandon_pending(config, device, pending);
        }

        let fallback = match policy::operator_fallback(&device) {
            Some(version) => version.clone(),
            None => {
                warn!("No earlier good version to roll back to from {}", device.current);
                return Ok(Outcome::RollbackTargetNotFound);
            }
        };

        let from = device.current.clone();
        device.mark_failed(from.id);
        self.ledger.save_device(&device)?;

        let reason = rollback_reason(&from, &fallback);
        let correlation_id = new_correlation_id();
        let staged_view = config.effective_version(&fallback);
        if let Some(failure) = self.download(&device, &staged_view, &correlation_id, &reason) {
            return Ok(failure);
        }

        let attempt = Attempt {
            target: fallback,
            correlation_id,
            reason,
            mode: InstallMode::All,
            rollback_from: Some(from.id),
        };
        self.install_target(config, device, attempt)
    }

    /// Drop a pending install in favour of the committed version.
    fn abandon_pending(
        &self,
        config: &AgentConfig,
        mut device: DeviceState,
        pending: InstallationRecord,
    ) -> Result<Outcome, OtaError> {
        device.mark_failed(pending.target.id);
        let running_image = self.running_image(&device);
        let requires_reboot =
            pending.requires_reboot || device.image_hash() != running_image;
        let reason = rollback_reason(&pending.target, &device.current);
        info!("Abandoning {} in phase {}: {}", pending.target, pending.phase, reason);

        let rollback = InstallationRecord::rollback(
            device.current.clone(),
            &new_correlation_id(),
            pending.target.id,
            &reason,
        )
        .with_reboot(requires_reboot)
        .by_operator();
        self.ledger.save_device(&device)?;
        self.ledger.save_record(&rollback)?;

        self.events.installation_completed(
            &pending.correlation_id,
            &pending.target,
            false,
            Some("rolled back by operator"),
        );
        self.callbacks.post(
            CallbackMessage::InstallPost,
            CallbackResult::Failed,
            &device.current,
            Some(&pending.target),
            &pending.reason,
        );

        self.start_rollback(config, device, rollback, Flow::Install)
    }
}
