use ota_shared::callback::CallbackMessage;
use ota_shared::{DeviceState, InstallationRecord, OtaError, Outcome, Phase};
use tracing::{info, warn};

use super::{Flow, UpdateAgent};
use crate::config::AgentConfig;
use crate::policy::FailureStage;

impl UpdateAgent {
    pub(super) fn try_finalize(&self, config: &AgentConfig) -> Result<Outcome, OtaError> {
        let record = match self.ledger.load_record()? {
            Some(record) => record,
            None => {
                // Repeat finalize reports what the last one concluded
                return Ok(match self.ledger.load_receipt()? {
                    Some(receipt) => {
                        info!(
                            "Nothing pending; last finalize of #{} ended with {}",
                            receipt.version_id, receipt.outcome
                        );
                        receipt.outcome
                    }
                    None => Outcome::NoPendingInstallation,
                });
            }
        };

        if !record.phase.is_resumable() {
            warn!(
                "Discarding record for {} in phase {}",
                record.target, record.phase
            );
            self.ledger.clear_record()?;
            return Ok(Outcome::NoPendingInstallation);
        }

        if record.phase.awaits_reboot() && self.parts.reboot.reboot_pending() {
            info!("{} is waiting for a reboot", record.target);
            return Ok(record.reboot_outcome());
        }

        let device = self.device()?;
        info!("Finalizing {} from phase {}", record.target, record.phase);
        self.callbacks.pre(
            CallbackMessage::InstallFinalPre,
            &device.current,
            Some(&record.target),
            &record.reason,
        );

        match record.phase {
            Phase::Installing => self.drive_install(config, device, record, Flow::Finalize),
            Phase::RollingBack => self.continue_rollback(config, device, record, Flow::Finalize),
            _ => self.confirm_and_apply(config, device, record),
        }
    }

    /// Confirm the device runs the record's image, then apply its apps.
    fn confirm_and_apply(
        &self,
        config: &AgentConfig,
        device: DeviceState,
        mut record: InstallationRecord,
    ) -> Result<Outcome, OtaError> {
        if record.requires_reboot {
            match self.parts.images.booted_image() {
                Some(booted) if booted != record.target.image_hash => {
                    return self.boot_fallback(config, device, record, &booted);
                }
                Some(_) => {}
                None => warn!(
                    "Cannot determine booted image, assuming {}",
                    record.target.image_hash
                ),
            }
        }

        record.advance(Phase::Finalizing);
        self.ledger.save_record(&record)?;

        let stage = if record.requires_reboot {
            FailureStage::AppsAfterReboot
        } else {
            FailureStage::AppsBeforeReboot
        };
        self.apply_apps(config, device, record, stage, Flow::Finalize)
    }

    /// The bootloader brought back a different image than the one deployed.
    fn boot_fallback(
        &self,
        config: &AgentConfig,
        device: DeviceState,
        record: InstallationRecord,
        booted: &str,
    ) -> Result<Outcome, OtaError> {
        let reason = format!(
            "booted image {} instead of {}",
            booted, record.target.image_hash
        );
        warn!("{}: {}", record.target, reason);
        if record.is_rollback {
            return self.rollback_failed(&device, record, &reason, Flow::Finalize);
        }
        self.abort(config, device, record, FailureStage::BootFallback, &reason, Flow::Finalize)
    }
}
