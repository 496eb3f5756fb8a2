//! Shared types for the otad update agent.
//!
//! Data model (versions, device state, installation record), the outcome
//! codes handed back to automation, the persistence ledger and the
//! lifecycle event log. Used by both `otad` and `otactl`.

pub mod callback;
pub mod device;
pub mod error;
pub mod events;
pub mod ledger;
pub mod outcome;
pub mod record;
pub mod status;
pub mod version;

pub use device::DeviceState;
pub use error::OtaError;
pub use events::{EventKind, EventLog, LifecycleEvent, UpdateSummary};
pub use ledger::Ledger;
pub use outcome::Outcome;
pub use record::{FinalizeReceipt, InstallationRecord, Phase, StagedDownload};
pub use version::{App, AppSet, Version, VersionId};

/// Default state directory for the ledger and event log
pub const STATE_DIR: &str = "/var/lib/otad";

/// Allocate a fresh correlation id for one logical operation.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
