//! Durable persistence for the path trie
//!
//! One snapshot file per source root holds the serialized [`PathTrie`]. A
//! missing snapshot is a valid state meaning "no prior history"; a snapshot
//! that exists but cannot be read or parsed is a fatal [`SweepError::CorruptState`],
//! never silently replaced by an empty trie.
//!
//! ## Snapshot format
//!
//! ```text
//! offset  size  content
//! 0       4     magic "SSWP"
//! 4       1     format version
//! 5       ..    lz4 block (uncompressed size prepended) of the bincode
//!               encoding of StateSnapshot { format_version, source_root,
//!               saved_at, trie }
//! ```
//!
//! Saves go through a temporary file in the snapshot's directory followed by
//! a rename, so a crash during `save` leaves either the old or the new
//! snapshot on disk.
//!
//! Only one process may write a given snapshot at a time. The store does no
//! locking of its own; deployments must not overlap runs.

use crate::error::{Result, SweepError};
use crate::trie::PathTrie;
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MAGIC: &[u8; 4] = b"SSWP";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1;
/// Upper bound on the decompressed snapshot size
const MAX_DECODED_BYTES: usize = 1 << 30;

/// Decoded snapshot contents
#[derive(Debug, Clone, Deserialize)]
pub struct StateSnapshot {
    /// Version of the snapshot layout
    pub format_version: u32,
    /// Source root the trie is relative to
    pub source_root: PathBuf,
    /// When the snapshot was written
    pub saved_at: DateTime<Utc>,
    /// The persisted trie
    pub trie: PathTrie,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    format_version: u32,
    source_root: &'a Path,
    saved_at: DateTime<Utc>,
    trie: &'a PathTrie,
}

/// Snapshot-backed store for a [`PathTrie`]
#[derive(Debug, Clone)]
pub struct StateStore {
    /// Snapshot location
    path: PathBuf,
    /// Source root recorded alongside the trie
    source_root: PathBuf,
}

impl StateStore {
    /// Create a store for the snapshot at `path` tracking `source_root`
    pub fn new(path: impl Into<PathBuf>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            source_root: source_root.into(),
        }
    }

    /// Snapshot location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a snapshot is present on disk
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the trie, or an empty trie if no snapshot exists
    ///
    /// # Errors
    ///
    /// - [`SweepError::CorruptState`] if the snapshot exists but cannot be read
    ///   or parsed
    pub fn load(&self) -> Result<PathTrie> {
        match self.load_snapshot()? {
            Some(snapshot) => Ok(snapshot.trie),
            None => {
                info!("No state snapshot at {:?}; starting with empty history", self.path);
                Ok(PathTrie::new())
            }
        }
    }

    /// Load the full snapshot including its metadata
    pub fn load_snapshot(&self) -> Result<Option<StateSnapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.corrupt(format!("cannot read snapshot: {}", e))),
        };

        let snapshot = self.decode(&bytes)?;
        if snapshot.source_root != self.source_root {
            warn!(
                "Snapshot {:?} was written for {:?} but is being used for {:?}",
                self.path, snapshot.source_root, self.source_root
            );
        }
        debug!(
            "Loaded {} tracked paths from {:?} (saved {})",
            snapshot.trie.path_count(),
            self.path,
            snapshot.saved_at
        );
        Ok(Some(snapshot))
    }

    /// Serialize and atomically replace the snapshot
    pub fn save(&self, trie: &PathTrie) -> Result<()> {
        let snapshot = SnapshotRef {
            format_version: u32::from(FORMAT_VERSION),
            source_root: &self.source_root,
            saved_at: Utc::now(),
            trie,
        };
        let encoded = bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())?;
        let compressed = lz4_flex::compress_prepend_size(&encoded);

        let mut bytes = Vec::with_capacity(HEADER_LEN + compressed.len());
        bytes.extend_from_slice(MAGIC);
        bytes.push(FORMAT_VERSION);
        bytes.extend_from_slice(&compressed);

        utils::atomic_write(&self.path, &bytes)?;
        debug!(
            "Saved {} tracked paths to {:?} ({})",
            trie.path_count(),
            self.path,
            utils::format_bytes(bytes.len() as u64)
        );
        Ok(())
    }

    /// Delete the snapshot, forgetting all history
    ///
    /// Returns `true` if a snapshot was removed.
    pub fn reset(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Removed state snapshot {:?}", self.path);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SweepError::Io(e)),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<StateSnapshot> {
        if bytes.len() < HEADER_LEN {
            return Err(self.corrupt(format!("truncated to {} bytes", bytes.len())));
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(self.corrupt("not a syncsweep state snapshot"));
        }
        let version = bytes[MAGIC.len()];
        if version != FORMAT_VERSION {
            return Err(self.corrupt(format!("unsupported format version {}", version)));
        }

        let body = &bytes[HEADER_LEN..];
        let Some(prefix) = body.get(..4) else {
            return Err(self.corrupt("missing decompressed size"));
        };
        let claimed = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        // LZ4 cannot expand input by more than a factor of 255.
        let ceiling = (body.len() - 4).saturating_mul(255).saturating_add(16);
        if claimed > ceiling.min(MAX_DECODED_BYTES) {
            return Err(self.corrupt(format!(
                "implausible decompressed size {} for {} compressed bytes",
                claimed,
                body.len() - 4
            )));
        }

        let encoded = lz4_flex::decompress_size_prepended(body)
            .map_err(|e| self.corrupt(format!("decompression failed: {}", e)))?;
        let (snapshot, consumed): (StateSnapshot, usize) = bincode::serde::decode_from_slice(
            &encoded,
            bincode::config::standard().with_limit::<MAX_DECODED_BYTES>(),
        )
        .map_err(|e| self.corrupt(format!("decoding failed: {}", e)))?;
        if consumed != encoded.len() {
            return Err(self.corrupt(format!(
                "{} trailing bytes after snapshot",
                encoded.len() - consumed
            )));
        }

        let recounted = snapshot.trie.recount();
        if recounted != snapshot.trie.path_count() {
            return Err(self.corrupt(format!(
                "path count mismatch: header says {}, trie holds {}",
                snapshot.trie.path_count(),
                recounted
            )));
        }
        Ok(snapshot)
    }

    fn corrupt(&self, reason: impl ToString) -> SweepError {
        SweepError::corrupt_state(&self.path, reason)
    }
}
