//! Error types for syncsweep
//!
//! Errors fall into two groups. Fatal errors abort the current run, trigger a
//! notification and make the binary exit with a non-zero status: an unreadable
//! source root ([`SweepError::Scan`]), an unreadable state snapshot
//! ([`SweepError::CorruptState`]) and unavailable endpoints
//! ([`SweepError::EndpointNotReady`]). Per-path transfer failures
//! ([`SweepError::TransferFailure`]) are recovered locally: the failed path is
//! simply not confirmed and gets selected again by the next run.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the syncsweep library
pub type Result<T> = std::result::Result<T, SweepError>;

/// Main error type for all syncsweep operations
#[derive(Debug, Error)]
pub enum SweepError {
    /// The source root could not be walked
    #[error("Scan of {path:?} failed: {reason}")]
    Scan {
        /// Root that was being scanned
        path: PathBuf,
        /// Why the root is unreadable
        reason: String,
    },

    /// The persisted snapshot exists but cannot be parsed
    #[error("Corrupt state snapshot {path:?}: {reason}")]
    CorruptState {
        /// Location of the snapshot
        path: PathBuf,
        /// What made the snapshot unreadable
        reason: String,
    },

    /// A single path could not be transferred
    #[error("Transfer of {path:?} failed: {reason}")]
    TransferFailure {
        /// Relative path of the failed item
        path: PathBuf,
        /// Reason reported by the transfer collaborator
        reason: String,
    },

    /// One or more endpoints are unavailable
    #[error("Endpoint not ready: {}", endpoints.join(", "))]
    EndpointNotReady {
        /// Identifiers of every endpoint that failed its readiness check
        endpoints: Vec<String>,
    },

    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Path that cannot be addressed relative to the source root
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath {
        /// Offending path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// Path conversion error
    #[error("Path conversion error: {0:?}")]
    PathConversion(std::ffi::OsString),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Pattern parsing error
    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(String),

    /// Timestamp that could not be parsed
    #[error("Invalid time '{0}': expected RFC 3339 or 'YYYY-mm-dd HH:MM[:SS]'")]
    InvalidTime(String),

    /// Notification could not be delivered
    #[error("Notification error: {0}")]
    Notification(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::error::DecodeError> for SweepError {
    fn from(err: bincode::error::DecodeError) -> Self {
        SweepError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for SweepError {
    fn from(err: bincode::error::EncodeError) -> Self {
        SweepError::Bincode(err.to_string())
    }
}

impl From<globset::Error> for SweepError {
    fn from(err: globset::Error) -> Self {
        SweepError::InvalidPattern(err.to_string())
    }
}

impl SweepError {
    /// Create a scan error for a root
    pub fn scan(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SweepError::Scan {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a corrupt state error for a snapshot
    pub fn corrupt_state(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SweepError::CorruptState {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SweepError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SweepError::Internal(msg.into())
    }

    /// Check if this error must abort the run
    ///
    /// Everything except a per-path transfer failure is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SweepError::TransferFailure { .. })
    }

    /// Check if this error indicates unreadable persisted state
    pub fn is_corruption(&self) -> bool {
        matches!(self, SweepError::CorruptState { .. })
    }

    /// Short name of the phase that failed, used in failure reports
    pub fn operation(&self) -> &'static str {
        match self {
            SweepError::Scan { .. } | SweepError::WalkDir(_) => "scan",
            SweepError::CorruptState { .. } | SweepError::Bincode(_) => "load-state",
            SweepError::TransferFailure { .. } => "transfer",
            SweepError::EndpointNotReady { .. } => "endpoint-check",
            SweepError::InvalidConfiguration(_)
            | SweepError::InvalidPattern(_)
            | SweepError::Json(_) => "configuration",
            SweepError::InvalidPath { .. }
            | SweepError::PathConversion(_)
            | SweepError::InvalidTime(_) => "input",
            SweepError::Notification(_) => "notify",
            SweepError::Io(_) | SweepError::Internal(_) => "internal",
        }
    }

    /// Path the error refers to, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            SweepError::Scan { path, .. }
            | SweepError::CorruptState { path, .. }
            | SweepError::TransferFailure { path, .. }
            | SweepError::InvalidPath { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SweepError::CorruptState { path, reason } => {
                format!(
                    "State snapshot {:?} is unreadable ({}). Refusing to continue, since an empty \
                     history would re-transfer everything. Restore the file from a backup or run \
                     'syncsweep reset-state' to discard history deliberately.",
                    path, reason
                )
            }
            SweepError::Scan { path, reason } => {
                format!(
                    "Cannot read source root {:?} ({}). Check that it exists and is readable.",
                    path, reason
                )
            }
            SweepError::EndpointNotReady { endpoints } => {
                format!(
                    "Endpoint(s) {} not ready. Nothing was changed; the next run will retry.",
                    endpoints.join(", ")
                )
            }
            _ => self.to_string(),
        }
    }
}
