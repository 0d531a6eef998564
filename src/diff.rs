//! Change detection against recorded transfer history
//!
//! The diff compares every scanned entity with the trie and selects those that
//! were never transferred or were modified after their last confirmed
//! transfer:
//!
//! | trie status          | scanned mtime   | decision        |
//! |----------------------|-----------------|-----------------|
//! | absent / structural  | any             | new: select     |
//! | pending              | any             | new: select     |
//! | transferred at `t`   | `> t`           | modified: select|
//! | transferred at `t`   | `<= t`          | unchanged: skip |
//!
//! Equal timestamps count as "not newer", favoring fewer re-transfers.
//!
//! New paths are inserted into the trie (without a timestamp) as they are
//! selected. A crash before confirmation keeps them untimestamped, so the next
//! run selects them again.

use crate::trie::{PathStatus, PathTrie};
use crate::types::{DiffStats, ScanEntry, TransferItem, TransferRecord};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, trace, warn};

/// What the diff decided for one scanned entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Never transferred
    New,
    /// Modified after its last confirmed transfer
    Modified,
    /// Already current
    Unchanged,
}

impl Decision {
    /// Classify a scanned modification time against a trie status
    pub fn classify(status: PathStatus, modified: DateTime<Utc>) -> Self {
        match status {
            PathStatus::Absent | PathStatus::Structural | PathStatus::Pending => Decision::New,
            PathStatus::Transferred(last) if modified > last => Decision::Modified,
            PathStatus::Transferred(_) => Decision::Unchanged,
        }
    }

    /// Whether the entity goes into the transfer record
    pub fn is_selected(self) -> bool {
        !matches!(self, Decision::Unchanged)
    }
}

/// Output of one diff pass
#[derive(Debug, Clone, Default)]
pub struct DiffOutcome {
    /// Paths due for transfer, in scan order
    pub record: TransferRecord,
    /// Counts per decision
    pub stats: DiffStats,
}

/// Compares scanner output against the trie
#[derive(Debug, Clone)]
pub struct DiffEngine {
    /// Absolute source root, used to build absolute item paths
    source_root: PathBuf,
}

impl DiffEngine {
    /// Create a diff engine for a source root
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
        }
    }

    /// Select the scanned entities due for transfer
    ///
    /// New entities are registered in `trie` without a timestamp. Entities
    /// whose paths cannot be tracked (e.g. non UTF-8 names) are skipped with a
    /// warning.
    pub fn diff<I>(&self, trie: &mut PathTrie, scan: I) -> DiffOutcome
    where
        I: IntoIterator<Item = ScanEntry>,
    {
        let mut outcome = DiffOutcome::default();

        for entry in scan {
            let decision = Decision::classify(trie.status(&entry.path), entry.modified);
            match decision {
                Decision::New => {
                    if let Err(e) = trie.insert(&entry.path, entry.kind) {
                        warn!("Cannot track {:?}: {}", entry.path, e);
                        continue;
                    }
                    outcome.stats.new += 1;
                }
                Decision::Modified => {
                    // Keep the recorded kind in step with what is on disk.
                    if let Err(e) = trie.insert(&entry.path, entry.kind) {
                        warn!("Cannot track {:?}: {}", entry.path, e);
                        continue;
                    }
                    outcome.stats.modified += 1;
                }
                Decision::Unchanged => {
                    outcome.stats.unchanged += 1;
                    continue;
                }
            }

            trace!("Selected {:?} ({:?})", entry.path, decision);
            outcome.record.items.push(TransferItem {
                absolute_path: self.source_root.join(&entry.path),
                relative_path: entry.path,
                kind: entry.kind,
                modified: entry.modified,
            });
        }

        debug!(
            "Diff selected {} of {} entities ({} new, {} modified)",
            outcome.stats.selected(),
            outcome.stats.scanned(),
            outcome.stats.new,
            outcome.stats.modified
        );
        outcome
    }
}
