//! Error types for Sentinela
//!
//! Per-file validation failures are not errors: they route the file to the
//! bad partition and land in the validation report. Everything here aborts
//! a run (batch-fatal) or surfaces a store/promotion problem to the caller.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A raw file could not be parsed at all. A corrupt input invalidates
    /// the batch count used by later stages, so the whole run aborts.
    #[error("Unreadable raw file {path}: {reason}")]
    UnreadableFile { path: PathBuf, reason: String },

    #[error("Inbox {0} contains no raw files")]
    EmptyInbox(PathBuf),

    #[error("No elbow found on the inertia curve (k = 1..{max_k})")]
    NoElbow { max_k: usize },

    #[error("Batch run aborted: {0}")]
    BatchFatal(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error("Promotion left slot {slot} inconsistent: {reason}")]
    PromotionInconsistency { slot: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
