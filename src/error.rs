//! Error types for the tiersnap library
//!
//! All fatal conditions in a backup run map to a variant here. The taxonomy
//! follows the run lifecycle: configuration is validated first, then the
//! per-root lock is taken, then the external transfer tool runs, then the
//! retention engine consults snapshot timestamps. None of these are retried
//! automatically; the operator is expected to intervene.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the tiersnap library
pub type Result<T> = std::result::Result<T, SnapError>;

/// Main error type for all tiersnap operations
#[derive(Debug, Error)]
pub enum SnapError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization of reports
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or conflicting backup-root configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another run already holds the backup root's lock
    #[error("Backup root already in use: {root:?}")]
    Lock {
        /// Root whose lock could not be acquired
        root: PathBuf,
    },

    /// External transfer tool failure (nonzero exit, missing binary,
    /// unparsable version string)
    #[error("Transfer tool error: {0}")]
    Tool(String),

    /// Missing or unparseable completion timestamp on a snapshot that is
    /// needed for a promotion decision
    #[error("Timestamp error on {path:?}: {reason}")]
    Timestamp {
        /// Snapshot directory the attribute was read from
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SnapError {
    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        SnapError::Config(msg.into())
    }

    /// Create a transfer-tool error with a custom message
    pub fn tool(msg: impl Into<String>) -> Self {
        SnapError::Tool(msg.into())
    }

    /// Create a timestamp error for a snapshot directory
    pub fn timestamp(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SnapError::Timestamp {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SnapError::Internal(msg.into())
    }

    /// Check if this error was raised before any filesystem mutation
    ///
    /// Configuration and lock failures abort a run before anything in the
    /// backup root has been touched.
    pub fn is_pre_mutation(&self) -> bool {
        matches!(self, SnapError::Config(_) | SnapError::Lock { .. })
    }

    /// Process exit code for this error
    ///
    /// Runtime failures (validation, lock contention, tool errors,
    /// filesystem errors) all exit with `2`. Usage errors exit with `1`
    /// and are produced by argument parsing, not by this type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}
