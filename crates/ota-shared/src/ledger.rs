//! Persistence ledger for the update agent.
//!
//! Holds the device state, the single-slot installation record, the
//! staged-download marker and the last finalize receipt, one JSON file
//! each. Every write goes to a temp file that is synced and renamed over
//! the target, so a crash leaves either the old or the new content.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::device::DeviceState;
use crate::error::OtaError;
use crate::record::{FinalizeReceipt, InstallationRecord, StagedDownload};

const DEVICE_FILE: &str = "device.json";
const RECORD_FILE: &str = "installation.json";
const STAGED_FILE: &str = "staged.json";
const RECEIPT_FILE: &str = "finalized.json";

#[derive(Debug, Clone)]
pub struct Ledger {
    dir: PathBuf,
}

impl Ledger {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn load_device(&self) -> Result<Option<DeviceState>, OtaError> {
        self.read_json(DEVICE_FILE)
    }

    pub fn save_device(&self, state: &DeviceState) -> Result<(), OtaError> {
        self.write_json(DEVICE_FILE, state)
    }

    pub fn load_record(&self) -> Result<Option<InstallationRecord>, OtaError> {
        self.read_json(RECORD_FILE)
    }

    /// Occupy the installation slot. Fails if another installation is in flight.
    /// A new installation invalidates the staged marker and the last receipt.
    pub fn create_record(&self, record: &InstallationRecord) -> Result<(), OtaError> {
        if let Some(existing) = self.load_record()? {
            return Err(OtaError::Ledger(format!(
                "installation of {} already in progress (phase {})",
                existing.target, existing.phase
            )));
        }
        self.write_json(RECORD_FILE, record)?;
        self.remove(STAGED_FILE)?;
        self.remove(RECEIPT_FILE)
    }

    /// Replace the record in the slot. Terminal phases are never stored.
    pub fn save_record(&self, record: &InstallationRecord) -> Result<(), OtaError> {
        if record.phase.is_terminal() {
            return Err(OtaError::Ledger(format!(
                "refusing to persist terminal phase {}",
                record.phase
            )));
        }
        self.write_json(RECORD_FILE, record)
    }

    pub fn clear_record(&self) -> Result<(), OtaError> {
        self.remove(RECORD_FILE)
    }

    pub fn load_staged(&self) -> Result<Option<StagedDownload>, OtaError> {
        self.read_json(STAGED_FILE)
    }

    pub fn save_staged(&self, staged: &StagedDownload) -> Result<(), OtaError> {
        self.write_json(STAGED_FILE, staged)
    }

    pub fn load_receipt(&self) -> Result<Option<FinalizeReceipt>, OtaError> {
        self.read_json(RECEIPT_FILE)
    }

    pub fn save_receipt(&self, receipt: &FinalizeReceipt) -> Result<(), OtaError> {
        self.write_json(RECEIPT_FILE, receipt)
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, OtaError> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| OtaError::Corrupt {
                path,
                reason: e.to_string(),
            })
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), OtaError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let temp_path = self.dir.join(format!("{}.tmp", name));

        let content = serde_json::to_string_pretty(value)?;
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &path)?;

        // Persist the rename itself
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), OtaError> {
        match fs::remove_file(self.dir.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
