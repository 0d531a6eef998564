//! Post-transfer reconciliation
//!
//! The reconciler owns the two state transitions that happen after the diff:
//!
//! - **Confirmation** advances `lastTransferred` for the paths the transfer
//!   collaborator reported as successful, then saves the snapshot. Failed
//!   paths are never passed in, so they keep their previous timestamp and are
//!   selected again by the next diff.
//! - **Deletion** removes source objects whose transfer has been confirmed,
//!   stops tracking them, and finally removes every empty directory below the
//!   source root whether or not it was ever tracked.
//!
//! Deletion does not look at modification times. A file changed after its
//! transfer was confirmed but before the delete pass is deleted anyway.

use crate::error::{Result, SweepError};
use crate::state::StateStore;
use crate::trie::PathTrie;
use crate::types::{DeleteReport, FailedPath};
use crate::utils;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// Applies transfer confirmations, deletions and operator overrides to a trie
#[derive(Debug, Clone)]
pub struct Reconciler {
    source_root: PathBuf,
}

impl Reconciler {
    /// Create a reconciler for a source root
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
        }
    }

    /// Source root the reconciler operates on
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Record `as_of` as the last transfer time of each path, then save
    ///
    /// Only pass paths the collaborator confirmed. The snapshot is saved even
    /// when `paths` is empty so paths registered by the diff are persisted.
    /// Returns the number of paths confirmed.
    pub fn confirm_transferred(
        &self,
        store: &StateStore,
        trie: &mut PathTrie,
        paths: &[PathBuf],
        as_of: DateTime<Utc>,
    ) -> Result<usize> {
        for path in paths {
            trie.set_timestamp(path, as_of)?;
            trace!("Confirmed {:?} as of {}", path, as_of);
        }
        store.save(trie)?;
        debug!("Confirmed {} paths as of {}", paths.len(), as_of);
        Ok(paths.len())
    }

    /// Delete confirmed source objects and prune empty directories
    ///
    /// Timestamped paths are handled deepest first:
    /// - a file is removed and forgotten
    /// - a directory is removed and forgotten only if it is empty; otherwise it
    ///   is skipped and stays tracked
    /// - a path that no longer exists is forgotten
    ///
    /// Per-path I/O errors are collected in the report and leave the path
    /// tracked. The trie is not saved; the caller does that.
    pub fn delete_transferred(&self, trie: &mut PathTrie) -> Result<DeleteReport> {
        let mut report = DeleteReport::default();

        // Preorder puts parents before children; reversed, children come first.
        let confirmed: Vec<PathBuf> = trie
            .walk()
            .filter(|entry| entry.last_transferred.is_some())
            .map(|entry| entry.path)
            .collect();

        for relative in confirmed.into_iter().rev() {
            let absolute = self.source_root.join(&relative);
            let metadata = match fs::symlink_metadata(&absolute) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    trie.remove(&relative);
                    report.forgotten += 1;
                    debug!("{:?} is already gone; forgetting it", relative);
                    continue;
                }
                Err(e) => {
                    warn!("Cannot inspect {:?}: {}", absolute, e);
                    report.errors.push(FailedPath {
                        path: relative,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if metadata.is_dir() {
                match utils::remove_dir_if_empty(&absolute) {
                    Ok(true) => {
                        trie.remove(&relative);
                        report.directories_deleted += 1;
                    }
                    Ok(false) => {
                        warn!("Keeping {:?}: directory is not empty", relative);
                        report.skipped.push(relative);
                    }
                    Err(e) => {
                        warn!("Failed to delete directory {:?}: {}", absolute, e);
                        report.errors.push(FailedPath {
                            path: relative,
                            reason: e.to_string(),
                        });
                    }
                }
            } else {
                match fs::remove_file(&absolute) {
                    Ok(()) => {
                        trace!("Deleted {:?}", absolute);
                        trie.remove(&relative);
                        report.files_deleted += 1;
                    }
                    Err(e) => {
                        warn!("Failed to delete {:?}: {}", absolute, e);
                        report.errors.push(FailedPath {
                            path: relative,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        report.directories_pruned = self.prune_empty_directories()?;

        info!(
            "Deleted {} files and {} directories, pruned {} empty directories",
            report.files_deleted, report.directories_deleted, report.directories_pruned
        );
        Ok(report)
    }

    /// Stop tracking never-confirmed entries whose source object is gone
    ///
    /// Returns the number of entries forgotten.
    pub fn forget_vanished(&self, trie: &mut PathTrie) -> usize {
        let vanished: Vec<PathBuf> = trie
            .walk()
            .filter(|entry| entry.last_transferred.is_none())
            .map(|entry| entry.path)
            .filter(|path| {
                matches!(
                    fs::symlink_metadata(self.source_root.join(path)),
                    Err(ref e) if e.kind() == ErrorKind::NotFound
                )
            })
            .collect();

        for path in &vanished {
            trie.remove(path);
            trace!("Forgot vanished {:?}", path);
        }
        if !vanished.is_empty() {
            debug!("Forgot {} vanished untransferred paths", vanished.len());
        }
        vanished.len()
    }

    /// Remove every empty directory below the source root
    ///
    /// Applies to directories the trie never tracked. The root is kept.
    pub fn prune_empty_directories(&self) -> Result<usize> {
        if !self.source_root.is_dir() {
            return Err(SweepError::scan(&self.source_root, "not a directory"));
        }
        utils::prune_empty_directories(&self.source_root)
    }

    /// Operator override of `lastTransferred`
    ///
    /// With `recursive`, every tracked entity at or below `path` is stamped
    /// (an empty path means the whole trie). Otherwise only `path` itself is.
    /// Untracked paths are registered first. A time in the future excludes
    /// the paths from upcoming diffs; a time in the past forces re-transfer of
    /// anything modified since. Returns the number of entities stamped.
    pub fn set_timestamp_override(
        &self,
        trie: &mut PathTrie,
        path: &Path,
        time: DateTime<Utc>,
        recursive: bool,
    ) -> Result<usize> {
        let stamped = if recursive {
            trie.set_timestamp_recursive(path, time)?
        } else {
            trie.set_timestamp(path, time)?;
            1
        };
        info!("Set last transfer time of {} paths under {:?} to {}", stamped, path, time);
        Ok(stamped)
    }
}
