//! Operator callback vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallbackMessage {
    #[serde(rename = "check-for-update-pre")]
    CheckForUpdatePre,
    #[serde(rename = "check-for-update-post")]
    CheckForUpdatePost,
    #[serde(rename = "download-pre")]
    DownloadPre,
    #[serde(rename = "download-post")]
    DownloadPost,
    #[serde(rename = "install-pre")]
    InstallPre,
    #[serde(rename = "install-post")]
    InstallPost,
    /// Emitted instead of install-pre when a pending installation is resumed
    #[serde(rename = "install-final-pre")]
    InstallFinalPre,
}

impl CallbackMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackMessage::CheckForUpdatePre => "check-for-update-pre",
            CallbackMessage::CheckForUpdatePost => "check-for-update-post",
            CallbackMessage::DownloadPre => "download-pre",
            CallbackMessage::DownloadPost => "download-post",
            CallbackMessage::InstallPre => "install-pre",
            CallbackMessage::InstallPost => "install-post",
            CallbackMessage::InstallFinalPre => "install-final-pre",
        }
    }

    pub fn is_post(&self) -> bool {
        matches!(
            self,
            CallbackMessage::CheckForUpdatePost
                | CallbackMessage::DownloadPost
                | CallbackMessage::InstallPost
        )
    }
}

impl fmt::Display for CallbackMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackResult {
    Ok,
    Failed,
    NeedsCompletion,
}

impl CallbackResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackResult::Ok => "OK",
            CallbackResult::Failed => "FAILED",
            CallbackResult::NeedsCompletion => "NEEDS_COMPLETION",
        }
    }
}

impl fmt::Display for CallbackResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One callback invocation with its identifying metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEvent {
    pub message: CallbackMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CallbackResult>,
    pub current_id: u64,
    pub current_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_target: Option<String>,
    #[serde(default)]
    pub reason: String,
}

impl CallbackEvent {
    pub fn new(message: CallbackMessage, current: &Version) -> Self {
        Self {
            message,
            result: None,
            current_id: current.id,
            current_name: current.name.clone(),
            install_target: None,
            reason: String::new(),
        }
    }

    pub fn with_result(mut self, result: CallbackResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_target(mut self, target: Option<&Version>) -> Self {
        self.install_target = target.map(|t| t.name.clone());
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = reason.to_string();
        self
    }

    /// Result as handed to hooks; pre callbacks carry an empty string
    pub fn result_str(&self) -> &'static str {
        self.result.map(|r| r.as_str()).unwrap_or("")
    }

    /// Environment passed to an external callback program
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("MESSAGE", self.message.as_str().to_string()),
            ("CURRENT_TARGET", self.current_id.to_string()),
            ("CURRENT_TARGET_NAME", self.current_name.clone()),
            (
                "INSTALL_TARGET_NAME",
                self.install_target.clone().unwrap_or_default(),
            ),
            ("RESULT", self.result_str().to_string()),
            ("REASON", self.reason.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_names() {
        assert_eq!(CallbackMessage::InstallFinalPre.as_str(), "install-final-pre");
        assert_eq!(
            serde_json::to_string(&CallbackMessage::CheckForUpdatePost).unwrap(),
            "\"check-for-update-post\""
        );
        assert!(CallbackMessage::InstallPost.is_post());
        assert!(!CallbackMessage::InstallFinalPre.is_post());
    }

    #[test]
    fn test_env_for_pre_has_empty_result() {
        let current = Version::new(3, "b").with_name("gw-3");
        let target = Version::new(4, "b").with_name("gw-4");
        let event = CallbackEvent::new(CallbackMessage::InstallPre, &current)
            .with_target(Some(&target))
            .with_reason("Updating from gw-3 to gw-4");
        let env = event.env();
        assert!(env.contains(&("RESULT", String::new())));
        assert!(env.contains(&("INSTALL_TARGET_NAME", "gw-4".to_string())));
        assert!(env.contains(&("CURRENT_TARGET", "3".to_string())));
    }

    #[test]
    fn test_env_for_post_carries_result() {
        let current = Version::new(3, "b");
        let event = CallbackEvent::new(CallbackMessage::InstallPost, &current)
            .with_result(CallbackResult::NeedsCompletion);
        assert_eq!(event.result_str(), "NEEDS_COMPLETION");
    }
}
