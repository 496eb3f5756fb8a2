//! Lifecycle event emitter.
//!
//! Wraps the event log and guarantees that a (correlation id, kind) pair
//! is recorded at most once, including across process restarts. Telemetry
//! problems are logged and never change the outcome of an operation.

use ota_shared::{EventKind, EventLog, LifecycleEvent, UpdateSummary, Version};
use tracing::{debug, warn};

pub struct EventEmitter {
    log: EventLog,
}

impl EventEmitter {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Recorded operations, most recent first
    pub fn updates(&self) -> Vec<UpdateSummary> {
        self.log.updates().unwrap_or_else(|e| {
            warn!("Cannot read event log {}: {}", self.log.path().display(), e);
            Vec::new()
        })
    }

    /// Returns whether the event was recorded
    pub fn emit(
        &self,
        correlation_id: &str,
        version: &Version,
        kind: EventKind,
        success: Option<bool>,
        details: Option<&str>,
    ) -> bool {
        match self.log.has(correlation_id, kind) {
            Ok(true) => {
                debug!(
                    "Event {} already recorded for {}, skipping",
                    kind.as_str(),
                    correlation_id
                );
                return false;
            }
            Ok(false) => {}
            Err(e) => warn!("Cannot read event log: {}", e),
        }

        let mut event = LifecycleEvent::new(correlation_id, version, kind);
        if let Some(ok) = success {
            event = event.succeeded(ok);
        }
        if let Some(details) = details {
            event = event.with_details(details);
        }

        match self.log.append(&event) {
            Ok(()) => {
                debug!("Event {} for {} ({})", kind.as_str(), version, correlation_id);
                true
            }
            Err(e) => {
                warn!("Failed to record event {}: {}", kind.as_str(), e);
                false
            }
        }
    }

    pub fn download_started(&self, correlation_id: &str, version: &Version) {
        self.emit(correlation_id, version, EventKind::DownloadStarted, None, None);
    }

    pub fn download_completed(&self, correlation_id: &str, version: &Version, success: bool, details: Option<&str>) {
        self.emit(
            correlation_id,
            version,
            EventKind::DownloadCompleted,
            Some(success),
            details,
        );
    }

    pub fn installation_started(&self, correlation_id: &str, version: &Version) {
        self.emit(correlation_id, version, EventKind::InstallationStarted, None, None);
    }

    /// Only when a reboot boundary is crossed
    pub fn installation_applied(&self, correlation_id: &str, version: &Version) {
        self.emit(correlation_id, version, EventKind::InstallationApplied, None, None);
    }

    pub fn installation_completed(&self, correlation_id: &str, version: &Version, success: bool, details: Option<&str>) {
        self.emit(
            correlation_id,
            version,
            EventKind::InstallationCompleted,
            Some(success),
            details,
        );
    }
}
