//! Error types for the persistence layer.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OtaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt state file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl OtaError {
    pub fn code(&self) -> i32 {
        match self {
            OtaError::Io(_) => -32006,
            OtaError::Json(_) => -32700,
            OtaError::Corrupt { .. } => -32007,
            OtaError::Ledger(_) => -32004,
        }
    }
}
