//! Lifecycle event log consumed by the telemetry uploader.
//!
//! Append-only JSONL store with rotation. Events are grouped by
//! correlation id; one group is one logical operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::OtaError;
use crate::version::{Version, VersionId};

pub const EVENT_LOG_FILE: &str = "events.jsonl";

/// Default number of events kept before rotation
pub const DEFAULT_MAX_EVENTS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DownloadStarted,
    DownloadCompleted,
    InstallationStarted,
    InstallationApplied,
    InstallationCompleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DownloadStarted => "download_started",
            EventKind::DownloadCompleted => "download_completed",
            EventKind::InstallationStarted => "installation_started",
            EventKind::InstallationApplied => "installation_applied",
            EventKind::InstallationCompleted => "installation_completed",
        }
    }
}

/// Single lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub correlation_id: String,
    pub version_id: VersionId,
    pub version_name: String,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(correlation_id: &str, version: &Version, kind: EventKind) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            version_id: version.id,
            version_name: version.name.clone(),
            kind,
            success: None,
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn succeeded(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_details(mut self, details: &str) -> Self {
        self.details = Some(details.to_string());
        self
    }
}

/// All events of one correlation id, in emission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub correlation_id: String,
    pub version_id: VersionId,
    pub events: Vec<LifecycleEvent>,
}

impl UpdateSummary {
    pub fn kinds(&self) -> Vec<(EventKind, Option<bool>)> {
        self.events.iter().map(|e| (e.kind, e.success)).collect()
    }

    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }

    /// Result of the installation, if it completed
    pub fn completed(&self) -> Option<bool> {
        self.events
            .iter()
            .find(|e| e.kind == EventKind::InstallationCompleted)
            .and_then(|e| e.success)
    }
}

/// Event log store with rotation
pub struct EventLog {
    path: PathBuf,
    max_entries: usize,
}

impl EventLog {
    pub fn new(path: impl AsRef<Path>, max_entries: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_entries,
        }
    }

    /// Log stored under a state directory
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(EVENT_LOG_FILE), DEFAULT_MAX_EVENTS)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &LifecycleEvent) -> Result<(), OtaError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let line = serde_json::to_string(event)?;
        writeln!(file, "{}", line)?;
        file.sync_data()?;

        self.maybe_rotate()
    }

    /// Read all events; unparseable lines are skipped
    pub fn read_all(&self) -> Result<Vec<LifecycleEvent>, OtaError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(event) = serde_json::from_str::<LifecycleEvent>(&line) {
                events.push(event);
            }
        }
        Ok(events)
    }

    pub fn has(&self, correlation_id: &str, kind: EventKind) -> Result<bool, OtaError> {
        Ok(self
            .read_all()?
            .iter()
            .any(|e| e.correlation_id == correlation_id && e.kind == kind))
    }

    /// Events grouped by correlation id, most recently started first.
    pub fn updates(&self) -> Result<Vec<UpdateSummary>, OtaError> {
        let mut groups: Vec<UpdateSummary> = Vec::new();
        for event in self.read_all()? {
            match groups
                .iter_mut()
                .find(|g| g.correlation_id == event.correlation_id)
            {
                Some(group) => group.events.push(event),
                None => groups.push(UpdateSummary {
                    correlation_id: event.correlation_id.clone(),
                    version_id: event.version_id,
                    events: vec![event],
                }),
            }
        }
        groups.reverse();
        Ok(groups)
    }

    fn maybe_rotate(&self) -> Result<(), OtaError> {
        let events = self.read_all()?;
        if events.len() <= self.max_entries {
            return Ok(());
        }

        let keep_count = self.max_entries * 3 / 4;
        let to_keep = &events[events.len() - keep_count..];

        let temp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&temp_path)?;
            for event in to_keep {
                writeln!(file, "{}", serde_json::to_string(event)?)?;
            }
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}
