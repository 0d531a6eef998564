//! Utility functions for syncsweep
//!
//! ## Categories of Utilities
//!
//! ### File Operations
//! - Atomic file writing (temp file in the target directory, then rename)
//! - File content hashing (SHA-256)
//! - Empty directory removal and recursive pruning
//!
//! ### Path Manipulation
//! - Converting absolute paths below a root into relative paths
//!
//! ### Formatting and Parsing
//! - Human-readable byte sizes
//! - Operator-supplied timestamps
//! - Transfer labels

use crate::error::{Result, SweepError};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{trace, warn};
use walkdir::WalkDir;

/// Compute the SHA-256 hash of a file's content as lowercase hex
///
/// Streams the file through an 8KB buffer.
pub fn hash_file_content(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Atomic file write (write to temp file then rename)
///
/// The temporary file is created in the target's directory so the final
/// rename never crosses filesystems. Content is flushed to disk before the
/// rename, so a crash leaves either the previous file or the new one.
/// Missing parent directories are created.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut temp = NamedTempFile::new_in(&dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| SweepError::Io(e.error))?;

    trace!("Atomically wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

/// Remove directory if empty
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Remove every empty directory below `root`, deepest first
///
/// Directories that become empty once their empty children are gone are
/// removed as well. The root itself is kept. Symbolic links are not
/// followed. Entries that cannot be read or removed are logged and skipped.
/// Returns the number of directories removed.
pub fn prune_empty_directories(root: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry while pruning: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        match remove_dir_if_empty(entry.path()) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!("Failed to prune {:?}: {}", entry.path(), e),
        }
    }
    Ok(removed)
}

/// Make a path relative to a base path
///
/// Tries a lexical strip first so symbolic links in the path are preserved,
/// then falls back to comparing canonical forms.
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| SweepError::invalid_path(path, format!("not inside {:?}", base)))
}

/// Resolve `.` and `..` components without touching the filesystem
///
/// A `..` at the start of a relative path is kept.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Parse an operator-supplied time
///
/// Accepts RFC 3339 (`2024-03-01T12:00:00Z`) or local wall-clock time in
/// `YYYY-mm-dd HH:MM[:SS]` form.
pub fn parse_time(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(input) {
        return Ok(time.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|t| t.with_timezone(&Utc))
                .ok_or_else(|| SweepError::InvalidTime(input.to_string()));
        }
    }

    Err(SweepError::InvalidTime(input.to_string()))
}

/// Label for a transfer submitted at `time`, e.g. `AUTO_2024-03-01_1200`
pub fn transfer_label(time: DateTime<Utc>) -> String {
    format!("AUTO_{}", time.format("%Y-%m-%d_%H%M"))
}
