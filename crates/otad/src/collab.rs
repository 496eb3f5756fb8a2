//! Interfaces to the agent's external collaborators.
//!
//! The state machine only talks to the outside world through these
//! traits. Implementations must be idempotent: the agent re-invokes them
//! when resuming a phase that was interrupted.

use ota_shared::{AppSet, Outcome, Version};
use std::io;
use thiserror::Error;

/// Catalog and metadata errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("unable to fetch version metadata: {0}")]
    MetadataFetchFailure(String),

    #[error("version metadata not found: {0}")]
    MetadataNotFound(String),

    #[error("version metadata expired: {0}")]
    ExpiredMetadata(String),

    #[error("version metadata failed verification: {0}")]
    SecurityError(String),

    #[error("invalid bundle metadata: {0}")]
    InvalidBundleMetadata(String),
}

impl CatalogError {
    pub fn outcome(&self) -> Outcome {
        match self {
            CatalogError::MetadataFetchFailure(_) => Outcome::CheckinMetadataFetchFailure,
            CatalogError::MetadataNotFound(_) => Outcome::CheckinMetadataNotFound,
            CatalogError::ExpiredMetadata(_) => Outcome::CheckinExpiredMetadata,
            CatalogError::SecurityError(_) => Outcome::CheckinSecurityError,
            CatalogError::InvalidBundleMetadata(_) => Outcome::CheckinInvalidBundleMetadata,
        }
    }
}

/// Content download errors; all are retryable and leave no state behind
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("content unavailable: {0}")]
    Unavailable(String),

    #[error("content verification failed: {0}")]
    VerificationFailed(String),

    #[error("not enough space to stage content: {0}")]
    NoSpace(String),
}

impl FetchError {
    pub fn outcome(&self) -> Outcome {
        match self {
            FetchError::Unavailable(_) => Outcome::DownloadFailure,
            FetchError::VerificationFailed(_) => Outcome::DownloadFailureVerificationFailed,
            FetchError::NoSpace(_) => Outcome::DownloadFailureNoSpace,
        }
    }
}

/// Result of deploying a base image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageApply {
    /// Image is active now, no reboot needed
    Ok,
    /// Image is deployed and becomes active on the next boot
    NeedsReboot,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppFailure {
    pub app: String,
    pub reason: String,
}

impl AppFailure {
    pub fn new(app: &str, reason: &str) -> Self {
        Self {
            app: app.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result of applying an app set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppApply {
    Ok,
    Failed(Vec<AppFailure>),
}

/// Source of verified, available versions
pub trait Catalog: Send + Sync {
    /// Versions published for `tag`, in any order
    fn list_versions(&self, tag: &str) -> Result<Vec<Version>, CatalogError>;
}

/// Downloads and stages version content
pub trait ContentFetcher: Send + Sync {
    /// Stage the base image and every app of `version`
    fn fetch(&self, version: &Version) -> Result<(), FetchError>;

    /// Everything `version` needs is already staged
    fn is_staged(&self, version: &Version) -> bool;
}

/// Immutable-filesystem deployment engine
pub trait ImageDeployer: Send + Sync {
    fn apply_image(&self, hash: &str) -> ImageApply;

    /// Hash of the image the device actually booted
    fn booted_image(&self) -> Option<String>;
}

/// Container runtime
pub trait AppRuntime: Send + Sync {
    /// Make `apps` the running set; with `prune`, stop and remove anything else
    fn apply_apps(&self, apps: &AppSet, prune: bool) -> AppApply;
}

/// Reboot request flag, observed rather than acted upon by the agent
pub trait RebootSignal: Send + Sync {
    fn request_reboot(&self) -> io::Result<()>;

    /// A requested reboot has not happened yet
    fn reboot_pending(&self) -> bool;
}

/// Everything the agent needs from the outside
pub struct Collaborators {
    pub catalog: Box<dyn Catalog>,
    pub fetcher: Box<dyn ContentFetcher>,
    pub images: Box<dyn ImageDeployer>,
    pub apps: Box<dyn AppRuntime>,
    pub reboot: Box<dyn RebootSignal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_error_outcomes() {
        assert_eq!(
            CatalogError::SecurityError("sig".into()).outcome(),
            Outcome::CheckinSecurityError
        );
        assert_eq!(
            CatalogError::ExpiredMetadata("2020".into()).outcome().code(),
            12
        );
        assert_eq!(
            CatalogError::MetadataNotFound("x".into()).outcome().code(),
            14
        );
    }

    #[test]
    fn test_fetch_error_outcomes() {
        assert_eq!(
            FetchError::Unavailable("404".into()).outcome(),
            Outcome::DownloadFailure
        );
        assert_eq!(FetchError::NoSpace("/".into()).outcome().code(), 60);
        assert_eq!(
            FetchError::VerificationFailed("sha".into()).outcome().code(),
            70
        );
    }
}
