//! Device state: what is actually committed and running.
//!
//! Only a successful finalize moves `current`; mid-flight install steps
//! never touch it. The failed set and history are bookkeeping used for
//! target selection and operator rollback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::version::{AppSet, Version, VersionId};

/// Committed versions kept for operator rollback
const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Last committed version
    pub current: Version,
    /// Apps the runtime was last told to run
    pub running_apps: AppSet,
    /// Previously committed versions, oldest first
    #[serde(default)]
    pub history: Vec<Version>,
    /// Versions known to be bad on this device
    #[serde(default)]
    pub failed: BTreeSet<VersionId>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceState {
    pub fn new(current: Version, running_apps: AppSet) -> Self {
        Self {
            current,
            running_apps,
            history: Vec::new(),
            failed: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// State of a device that was never updated by the agent.
    pub fn initial(image_hash: &str) -> Self {
        Self::new(Version::initial(image_hash), AppSet::new())
    }

    pub fn image_hash(&self) -> &str {
        &self.current.image_hash
    }

    /// Make `version` current. A different previous version moves to history.
    pub fn commit(&mut self, version: Version, running_apps: AppSet) {
        if version.id != self.current.id {
            let previous = std::mem::replace(&mut self.current, version);
            self.history.retain(|v| v.id != previous.id && v.id != self.current.id);
            self.history.push(previous);
            if self.history.len() > HISTORY_LIMIT {
                let excess = self.history.len() - HISTORY_LIMIT;
                self.history.drain(..excess);
            }
        } else {
            self.current = version;
        }
        self.failed.remove(&self.current.id);
        self.running_apps = running_apps;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, id: VersionId) {
        self.failed.insert(id);
        self.updated_at = Utc::now();
    }

    pub fn is_failed(&self, id: VersionId) -> bool {
        self.failed.contains(&id)
    }

    /// Most recent committed predecessor that is not known-bad.
    pub fn rollback_candidate(&self) -> Option<&Version> {
        self.history
            .iter()
            .rev()
            .find(|v| v.id != self.current.id && !self.is_failed(v.id))
    }
}
