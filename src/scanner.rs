//! Directory scanning
//!
//! Walks the live source tree depth-first with siblings sorted by name and
//! yields one [`ScanEntry`] per regular file and per empty directory.
//! Non-empty directories are never entities of their own: the destination
//! creates parent directories on demand, so only their contents are listed.
//!
//! ## Policies
//!
//! - Symbolic links are not followed by default and are reported as files
//!   carrying the link's own modification time. Special files (sockets,
//!   FIFOs, devices) are reported as files too.
//! - Entries matching an ignore pattern are skipped; an ignored directory
//!   is skipped with everything below it. A directory whose only contents are
//!   ignored still counts as non-empty.
//! - An unreadable root aborts the scan with [`SweepError::Scan`]. Entries
//!   below the root that cannot be read are logged and skipped.
//!
//! ## Example
//!
//! ```rust,no_run
//! use syncsweep::scanner::DirectoryScanner;
//!
//! # fn main() -> syncsweep::Result<()> {
//! let scanner = DirectoryScanner::new("/data/outbox")
//!     .with_ignore_patterns(&["*.partial".to_string()])?;
//! for entry in scanner.scan()? {
//!     println!("{} {:?} {}", entry.kind, entry.path, entry.modified);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SweepError};
use crate::types::{EntryKind, ScanEntry};
use crate::utils;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Scanner for one source root
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    /// Root directory to walk
    root: PathBuf,
    /// Compiled ignore patterns, matched against root-relative paths
    ignore: GlobSet,
    /// Whether to follow symbolic links during traversal
    follow_symlinks: bool,
    /// Absolute paths that are never reported (e.g. the state snapshot)
    excluded: Vec<PathBuf>,
}

impl DirectoryScanner {
    /// Create a scanner with no ignore patterns that does not follow symlinks
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ignore: GlobSet::empty(),
            follow_symlinks: false,
            excluded: Vec::new(),
        }
    }

    /// Set glob patterns for entries to skip
    ///
    /// Patterns are matched against paths relative to the root; a trailing
    /// `/` is ignored, so `target/` and `target` are equivalent.
    pub fn with_ignore_patterns(mut self, patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let trimmed = pattern.trim_end_matches('/');
            if trimmed.is_empty() {
                continue;
            }
            builder.add(Glob::new(trimmed)?);
        }
        self.ignore = builder.build()?;
        Ok(self)
    }

    /// Set symbolic link following behavior
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Never report this absolute path
    ///
    /// `.` and `..` components are resolved before comparing.
    pub fn with_excluded_path(mut self, path: impl AsRef<Path>) -> Self {
        self.excluded.push(utils::normalize_lexically(path.as_ref()));
        self
    }

    /// Root directory being scanned
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a lazy depth-first scan
    ///
    /// # Errors
    ///
    /// - [`SweepError::Scan`] if the root is missing, not a directory or unreadable
    pub fn scan(&self) -> Result<Scan<'_>> {
        self.check_root()?;

        debug!("Scanning {:?}", self.root);
        let walker = WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter();
        Ok(Scan {
            scanner: self,
            walker,
        })
    }

    /// Verify the root exists, is a directory and can be listed
    pub fn check_root(&self) -> Result<()> {
        let metadata = fs::metadata(&self.root).map_err(|e| SweepError::scan(&self.root, e))?;
        if !metadata.is_dir() {
            return Err(SweepError::scan(&self.root, "not a directory"));
        }
        fs::read_dir(&self.root).map_err(|e| SweepError::scan(&self.root, e))?;
        Ok(())
    }

    /// Scan eagerly into a vector
    pub fn scan_all(&self) -> Result<Vec<ScanEntry>> {
        Ok(self.scan()?.collect())
    }

    fn is_ignored(&self, relative: &Path) -> bool {
        !self.ignore.is_empty() && self.ignore.is_match(relative)
    }

    fn is_excluded(&self, absolute: &Path) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        let absolute = utils::normalize_lexically(absolute);
        self.excluded.iter().any(|p| *p == absolute)
    }
}

/// Lazy iterator over scanned entities
///
/// Re-run [`DirectoryScanner::scan`] to start over.
pub struct Scan<'a> {
    scanner: &'a DirectoryScanner,
    walker: walkdir::IntoIter,
}

impl std::fmt::Debug for Scan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scan")
            .field("root", &self.scanner.root)
            .finish()
    }
}

impl Iterator for Scan<'_> {
    type Item = ScanEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Walk error: {}", e);
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            let is_dir = entry.file_type().is_dir();
            let relative = match entry.path().strip_prefix(&self.scanner.root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => {
                    warn!("Entry {:?} escaped the scan root", entry.path());
                    continue;
                }
            };

            if self.scanner.is_excluded(entry.path()) || self.scanner.is_ignored(&relative) {
                trace!("Ignoring {:?}", relative);
                if is_dir {
                    self.walker.skip_current_dir();
                }
                continue;
            }

            let kind = if is_dir {
                match fs::read_dir(entry.path()).map(|mut contents| contents.next().is_none()) {
                    Ok(true) => EntryKind::EmptyDirectory,
                    Ok(false) => continue,
                    Err(e) => {
                        warn!("Cannot list {:?}: {}", entry.path(), e);
                        continue;
                    }
                }
            } else {
                EntryKind::File
            };

            let modified = match entry.metadata().map_err(SweepError::from).and_then(|m| {
                m.modified().map_err(SweepError::from)
            }) {
                Ok(time) => DateTime::<Utc>::from(time),
                Err(e) => {
                    warn!("Cannot read modification time of {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            return Some(ScanEntry {
                path: relative,
                kind,
                modified,
            });
        }
    }
}
