//! Installation record: the single in-flight installation slot.
//!
//! The record is written before any externally visible side effect of a
//! phase, so a crash or reboot always leaves enough behind to resume the
//! exact phase that was in progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::outcome::Outcome;
use crate::version::{Version, VersionId};

/// Phase of the installation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Checked,
    Downloaded,
    Installing,
    InstallAppliedPendingReboot,
    AppsPendingFinalization,
    Finalizing,
    RollingBack,
    RolledBackPendingReboot,
    Committed,
    RolledBackCommitted,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Checked => "checked",
            Phase::Downloaded => "downloaded",
            Phase::Installing => "installing",
            Phase::InstallAppliedPendingReboot => "install_applied_pending_reboot",
            Phase::AppsPendingFinalization => "apps_pending_finalization",
            Phase::Finalizing => "finalizing",
            Phase::RollingBack => "rolling_back",
            Phase::RolledBackPendingReboot => "rolled_back_pending_reboot",
            Phase::Committed => "committed",
            Phase::RolledBackCommitted => "rolled_back_committed",
        }
    }

    /// Terminal phases never stay in the ledger.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Committed | Phase::RolledBackCommitted)
    }

    pub fn awaits_reboot(&self) -> bool {
        matches!(
            self,
            Phase::InstallAppliedPendingReboot | Phase::RolledBackPendingReboot
        )
    }

    /// Phases a persisted record may be resumed from.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Phase::Installing
                | Phase::InstallAppliedPendingReboot
                | Phase::AppsPendingFinalization
                | Phase::Finalizing
                | Phase::RollingBack
                | Phase::RolledBackPendingReboot
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted in-flight installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationRecord {
    pub target: Version,
    pub phase: Phase,
    /// Target base image differs from what was running when the attempt began
    pub requires_reboot: bool,
    pub correlation_id: String,
    #[serde(default)]
    pub is_rollback: bool,
    /// Version being superseded when this record is a rollback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_from: Option<VersionId>,
    /// Rollback asked for by the operator rather than forced by a failure
    #[serde(default)]
    pub operator_requested: bool,
    /// App application is deferred to finalize
    #[serde(default)]
    pub defer_apps: bool,
    #[serde(default)]
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstallationRecord {
    /// Record for a regular install attempt, starting in `Installing`.
    pub fn begin(target: Version, correlation_id: &str, reason: &str) -> Self {
        let now = Utc::now();
        Self {
            target,
            phase: Phase::Installing,
            requires_reboot: false,
            correlation_id: correlation_id.to_string(),
            is_rollback: false,
            rollback_from: None,
            operator_requested: false,
            defer_apps: false,
            reason: reason.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record for a rollback to `fallback`, starting in `RollingBack`.
    pub fn rollback(fallback: Version, correlation_id: &str, from: VersionId, reason: &str) -> Self {
        let mut record = Self::begin(fallback, correlation_id, reason);
        record.phase = Phase::RollingBack;
        record.is_rollback = true;
        record.rollback_from = Some(from);
        record
    }

    pub fn with_reboot(mut self, requires_reboot: bool) -> Self {
        self.requires_reboot = requires_reboot;
        self
    }

    pub fn with_deferred_apps(mut self, defer: bool) -> Self {
        self.defer_apps = defer;
        self
    }

    pub fn by_operator(mut self) -> Self {
        self.operator_requested = true;
        self
    }

    /// Outcome once the target is committed. An operator rollback that
    /// lands reads like a regular install of the fallback.
    pub fn committed_outcome(&self) -> Outcome {
        if self.is_rollback && !self.operator_requested {
            Outcome::InstallRollbackOk
        } else {
            Outcome::Ok
        }
    }

    /// Outcome while the target waits for a reboot
    pub fn reboot_outcome(&self) -> Outcome {
        if self.is_rollback && !self.operator_requested {
            Outcome::InstallRollbackNeedsReboot
        } else {
            Outcome::InstallNeedsReboot
        }
    }

    pub fn advance(&mut self, phase: Phase) {
        self.phase = phase;
        self.updated_at = Utc::now();
    }
}

/// Content staged by a `pull`, remembered so a later install continues
/// the same correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedDownload {
    pub version_id: VersionId,
    pub correlation_id: String,
    pub staged_at: DateTime<Utc>,
}

impl StagedDownload {
    pub fn new(version_id: VersionId, correlation_id: &str) -> Self {
        Self {
            version_id,
            correlation_id: correlation_id.to_string(),
            staged_at: Utc::now(),
        }
    }
}

/// Result of the last finalize that reached a terminal phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeReceipt {
    pub version_id: VersionId,
    pub correlation_id: String,
    pub outcome: Outcome,
    pub finished_at: DateTime<Utc>,
}

impl FinalizeReceipt {
    pub fn new(record: &InstallationRecord, outcome: Outcome) -> Self {
        Self {
            version_id: record.target.id,
            correlation_id: record.correlation_id.clone(),
            outcome,
            finished_at: Utc::now(),
        }
    }
}
