//! Install, commit and failure handling.

use ota_shared::callback::{CallbackMessage, CallbackResult};
use ota_shared::{
    new_correlation_id, AppSet, DeviceState, FinalizeReceipt, InstallationRecord, OtaError,
    Outcome, Phase, Version, VersionId,
};
use tracing::{error, info, warn};

use super::{Flow, UpdateAgent};
use crate::collab::{AppApply, AppFailure, ImageApply};
use crate::config::{AgentConfig, InstallMode};
use crate::policy::{self, FailureStage};

/// One install attempt before it is written to the ledger
pub(super) struct Attempt {
    pub target: Version,
    pub correlation_id: String,
    pub reason: String,
    pub mode: InstallMode,
    /// Set when the attempt is itself a rollback
    pub rollback_from: Option<VersionId>,
}

pub(super) fn summarize(failures: &[AppFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.app, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl UpdateAgent {
    /// Occupy the ledger slot for `attempt` and run it.
    pub(super) fn install_target(
        &self,
        config: &AgentConfig,
        device: DeviceState,
        attempt: Attempt,
    ) -> Result<Outcome, OtaError> {
        let requires_reboot = !attempt.target.same_image(&device.current);
        let mut record = InstallationRecord::begin(
            attempt.target,
            &attempt.correlation_id,
            &attempt.reason,
        )
        .with_reboot(requires_reboot)
        .with_deferred_apps(attempt.mode == InstallMode::DelayAppInstall);
        // Automatic rollbacks never go through here
        record.is_rollback = attempt.rollback_from.is_some();
        record.operator_requested = record.is_rollback;
        record.rollback_from = attempt.rollback_from;

        self.ledger.create_record(&record)?;
        info!("Installing {}: {}", record.target, record.reason);
        self.callbacks.pre(
            CallbackMessage::InstallPre,
            &device.current,
            Some(&record.target),
            &record.reason,
        );
        self.events
            .installation_started(&record.correlation_id, &record.target);

        self.drive_install(config, device, record, Flow::Install)
    }

    /// Everything after `Installing` was recorded. Also the resume path for
    /// a record interrupted in `Installing`.
    pub(super) fn drive_install(
        &self,
        config: &AgentConfig,
        device: DeviceState,
        mut record: InstallationRecord,
        flow: Flow,
    ) -> Result<Outcome, OtaError> {
        if record.requires_reboot {
            match self.parts.images.apply_image(&record.target.image_hash) {
                ImageApply::Failed(reason) => {
                    error!(
                        "Base image {} of {} was rejected: {}",
                        record.target.image_hash, record.target, reason
                    );
                    return self.abort(config, device, record, FailureStage::ImageApply, &reason, flow);
                }
                ImageApply::NeedsReboot => {
                    return self.await_reboot(&device, record);
                }
                ImageApply::Ok => {
                    info!("Base image {} is active without reboot", record.target.image_hash);
                }
            }
        }

        if record.defer_apps && flow == Flow::Install {
            record.advance(Phase::AppsPendingFinalization);
            self.ledger.save_record(&record)?;
            info!("Apps of {} deferred until finalize", record.target);
            self.callbacks.post(
                CallbackMessage::InstallPost,
                CallbackResult::NeedsCompletion,
                &device.current,
                Some(&record.target),
                &record.reason,
            );
            return Ok(Outcome::InstallAppsNeedFinalization);
        }

        let stage = if record.requires_reboot {
            FailureStage::AppsAfterReboot
        } else {
            FailureStage::AppsBeforeReboot
        };
        self.apply_apps(config, device, record, stage, flow)
    }

    /// Persist the reboot-pending phase, then announce it and raise the flag.
    pub(super) fn await_reboot(
        &self,
        device: &DeviceState,
        mut record: InstallationRecord,
    ) -> Result<Outcome, OtaError> {
        let phase = if record.is_rollback {
            Phase::RolledBackPendingReboot
        } else {
            Phase::InstallAppliedPendingReboot
        };
        record.advance(phase);
        record.requires_reboot = true;
        self.ledger.save_record(&record)?;

        self.events
            .installation_applied(&record.correlation_id, &record.target);
        self.callbacks.post(
            CallbackMessage::InstallPost,
            CallbackResult::NeedsCompletion,
            &device.current,
            Some(&record.target),
            &record.reason,
        );
        if let Err(e) = self.parts.reboot.request_reboot() {
            warn!("Cannot raise reboot flag: {}", e);
        }
        info!("{} deployed, reboot required ({})", record.target, phase);
        Ok(record.reboot_outcome())
    }

    pub(super) fn apply_apps(
        &self,
        config: &AgentConfig,
        device: DeviceState,
        record: InstallationRecord,
        stage: FailureStage,
        flow: Flow,
    ) -> Result<Outcome, OtaError> {
        let desired = config.desired_apps(&record.target);
        match self.parts.apps.apply_apps(&desired, config.agent.prune) {
            AppApply::Ok => self.commit(device, record, desired, flow),
            AppApply::Failed(failures) => {
                for failure in &failures {
                    error!(
                        "App {} of {} failed to start: {}",
                        failure.app, record.target, failure.reason
                    );
                }
                let reason = summarize(&failures);
                self.abort(config, device, record, stage, &reason, flow)
            }
        }
    }

    /// Make the record's target current and release the slot.
    ///
    /// Once the device file is written the commit stands: completion is
    /// reported even if releasing the slot fails, and a record left behind
    /// is resumed by the next finalize.
    pub(super) fn commit(
        &self,
        mut device: DeviceState,
        record: InstallationRecord,
        running: AppSet,
        flow: Flow,
    ) -> Result<Outcome, OtaError> {
        let outcome = record.committed_outcome();
        let previous = device.current.clone();
        device.commit(record.target.clone(), running);
        self.ledger.save_device(&device)?;
        let released = self.release(&record, outcome, flow);

        self.events
            .installation_completed(&record.correlation_id, &record.target, true, None);
        self.callbacks.post(
            CallbackMessage::InstallPost,
            CallbackResult::Ok,
            &device.current,
            Some(&record.target),
            &record.reason,
        );
        info!("Committed {} (previously {})", record.target, previous);
        released.map(|()| outcome)
    }

    /// Store the finalize receipt, then free the slot. The receipt goes
    /// first so a repeated finalize always finds one of the two.
    pub(super) fn release(
        &self,
        record: &InstallationRecord,
        outcome: Outcome,
        flow: Flow,
    ) -> Result<(), OtaError> {
        if flow == Flow::Finalize {
            self.ledger
                .save_receipt(&FinalizeReceipt::new(record, outcome))?;
        }
        self.ledger.clear_record()
    }

    /// Close a failed attempt and hand over to the rollback policy.
    pub(super) fn abort(
        &self,
        config: &AgentConfig,
        mut device: DeviceState,
        record: InstallationRecord,
        stage: FailureStage,
        reason: &str,
        flow: Flow,
    ) -> Result<Outcome, OtaError> {
        if record.is_rollback {
            return self.rollback_failed(&device, record, reason, flow);
        }

        device.mark_failed(record.target.id);
        let running_image = match stage {
            FailureStage::AppsAfterReboot => record.target.image_hash.clone(),
            _ => self.running_image(&device),
        };
        let plan = policy::plan(&record.target, &device.current, stage, &running_image);
        warn!(
            "{} failed during {}: {}; rolling back to {}{}",
            record.target,
            stage.as_str(),
            reason,
            plan.fallback,
            if plan.requires_reboot { " (image revert)" } else { "" }
        );

        let rollback = InstallationRecord::rollback(
            plan.fallback,
            &new_correlation_id(),
            plan.failed,
            &plan.reason,
        )
        .with_reboot(plan.requires_reboot);
        self.ledger.save_device(&device)?;
        self.ledger.save_record(&rollback)?;

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

        self.start_rollback(config, device, rollback, flow)
    }
}
