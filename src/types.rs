//! Core data types shared across syncsweep
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **File System State**: [`EntryKind`], [`ScanEntry`] - what the scanner observed
//! - **Transfer Selection**: [`TransferItem`], [`TransferRecord`], [`DiffStats`] - what a run sends
//! - **Operations**: [`TransferRunReport`], [`DeleteReport`] - results of the operator commands
//! - **Progress**: [`ProgressInfo`], [`ProgressCallback`] - reporting during long transfers
//!
//! ## Examples
//!
//! ```rust
//! use syncsweep::types::{DiffStats, EntryKind};
//!
//! let stats = DiffStats { new: 2, modified: 1, unchanged: 7 };
//! assert_eq!(stats.selected(), 3);
//! assert_eq!(stats.scanned(), 10);
//! assert!(EntryKind::EmptyDirectory.is_directory());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Kind of a transferable entity
///
/// Non-empty directories are never entities of their own; the destination
/// creates parent directories on demand.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    /// Regular file (symbolic links and special files are treated as files)
    File,
    /// Directory with no contents
    EmptyDirectory,
}

impl EntryKind {
    /// Whether the entity is a directory on disk
    pub fn is_directory(self) -> bool {
        matches!(self, EntryKind::EmptyDirectory)
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::EmptyDirectory => write!(f, "empty-directory"),
        }
    }
}

/// One entity observed by the directory scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Path relative to the scanned root
    pub path: PathBuf,
    /// File or empty directory
    pub kind: EntryKind,
    /// Filesystem-reported last modification time
    pub modified: DateTime<Utc>,
}

/// One path selected for transfer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferItem {
    /// Path relative to the source root
    pub relative_path: PathBuf,
    /// Absolute path on the source endpoint
    pub absolute_path: PathBuf,
    /// File or empty directory
    pub kind: EntryKind,
    /// Modification time seen when the item was selected
    pub modified: DateTime<Utc>,
}

/// Ordered set of paths due for transfer in one run
///
/// Preserves scan order so batching downstream is reproducible. Not persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferRecord {
    /// Items in depth-first scan order
    pub items: Vec<TransferItem>,
}

impl TransferRecord {
    /// Whether nothing needs transferring
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of selected items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Relative paths in record order
    pub fn relative_paths(&self) -> Vec<PathBuf> {
        self.items.iter().map(|i| i.relative_path.clone()).collect()
    }
}

/// Statistics about one diff pass
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffStats {
    /// Paths with no recorded transfer
    pub new: usize,
    /// Paths modified after their recorded transfer
    pub modified: usize,
    /// Paths already current
    pub unchanged: usize,
}

impl DiffStats {
    /// Number of paths selected for transfer
    pub fn selected(&self) -> usize {
        self.new + self.modified
    }

    /// Number of entities the diff looked at
    pub fn scanned(&self) -> usize {
        self.new + self.modified + self.unchanged
    }
}

/// A path that failed to transfer, with the collaborator's reason
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedPath {
    /// Path relative to the source root
    pub path: PathBuf,
    /// Reason reported by the transfer collaborator
    pub reason: String,
}

/// Result of a `run-transfer` invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRunReport {
    /// Identifier of this run
    pub run_id: String,
    /// Transfer label submitted to the collaborator (empty when nothing was sent)
    pub label: String,
    /// Diff statistics
    pub stats: DiffStats,
    /// Number of paths selected
    pub selected: usize,
    /// Paths confirmed as transferred
    pub confirmed: Vec<PathBuf>,
    /// Paths that failed and will be retried next run
    pub failed: Vec<FailedPath>,
    /// Time recorded as `lastTransferred` for confirmed paths
    pub as_of: DateTime<Utc>,
    /// Bytes copied by the collaborator
    pub bytes_transferred: u64,
    /// Wall clock duration in milliseconds
    pub duration_ms: u64,
}

impl TransferRunReport {
    /// Whether every selected path made it
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of a `run-delete` invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteReport {
    /// Source files removed
    pub files_deleted: usize,
    /// Tracked empty directories removed
    pub directories_deleted: usize,
    /// Trie entries dropped because the source object no longer exists
    pub forgotten: usize,
    /// Timestamped directories left in place because they are not empty
    pub skipped: Vec<PathBuf>,
    /// Directories removed by the indiscriminate empty-directory pass
    pub directories_pruned: usize,
    /// Per-path errors (path, message); the pass continues past them
    pub errors: Vec<FailedPath>,
    /// Wall clock duration in milliseconds
    pub duration_ms: u64,
}

impl DeleteReport {
    /// Total number of filesystem objects removed
    pub fn total_removed(&self) -> usize {
        self.files_deleted + self.directories_deleted + self.directories_pruned
    }
}

/// Progress callback type
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Phase being performed ("scanning", "transferring", ...)
    pub operation: String,
    /// Item just handled
    pub current_item: Option<String>,
    /// Items handled so far
    pub processed: usize,
    /// Total items (if known)
    pub total: Option<usize>,
}

impl ProgressInfo {
    /// Get progress as a percentage (0-100)
    pub fn percentage(&self) -> Option<f32> {
        match self.total {
            Some(total) if total > 0 => Some((self.processed as f32 / total as f32) * 100.0),
            _ => None,
        }
    }
}
