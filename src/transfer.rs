//! Transfer collaborator contract
//!
//! The engine decides *what* to send; a [`Transferrer`] moves the bytes. The
//! contract every implementation must honor:
//!
//! - each listed item is copied from the source endpoint to the same relative
//!   path on the destination, creating missing parent directories
//! - the copy is integrity checked before it is reported as successful
//! - outcomes are reported per path, in request order
//! - destination objects not in the request are left alone, and nothing is
//!   ever removed from the source
//!
//! [`LocalTransferrer`] implements the contract between two local
//! directories, which also covers mounted network filesystems.

use crate::error::{Result, SweepError};
use crate::types::{FailedPath, ProgressCallback, ProgressInfo, TransferItem, TransferRecord};
use crate::utils;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// A named storage location taking part in a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Identifier used in logs and failure reports
    pub id: String,
    /// Root directory of the endpoint
    pub root: PathBuf,
}

impl Endpoint {
    /// Create an endpoint
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
        }
    }
}

/// One submission to the collaborator
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Run identifier
    pub run_id: String,
    /// Human readable label, `AUTO_<YYYY-mm-dd_HHMM>`
    pub label: String,
    /// Where the items are read from
    pub source: Endpoint,
    /// Where the items are written to
    pub destination: Endpoint,
    /// Items in scan order
    pub items: Vec<TransferItem>,
}

impl TransferRequest {
    /// Build a request for a transfer record submitted at `submitted_at`
    pub fn new(
        record: TransferRecord,
        source: Endpoint,
        destination: Endpoint,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            label: utils::transfer_label(submitted_at),
            source,
            destination,
            items: record.items,
        }
    }
}

/// Outcome for a single path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferOutcome {
    /// Copied and verified
    Succeeded {
        /// Bytes written to the destination
        bytes: u64,
    },
    /// Not copied; the path will be selected again by the next run
    Failed {
        /// Why the copy failed
        reason: String,
    },
}

/// A path and what happened to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathOutcome {
    /// Path relative to the source root
    pub path: PathBuf,
    /// Result of the copy
    pub outcome: TransferOutcome,
}

/// Per-path results of one transfer, in request order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferReport {
    /// Label of the request
    pub label: String,
    /// One outcome per requested item
    pub outcomes: Vec<PathOutcome>,
}

impl TransferReport {
    /// Paths that were copied successfully
    pub fn succeeded(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, TransferOutcome::Succeeded { .. }))
            .map(|o| o.path.clone())
            .collect()
    }

    /// Paths that failed, with reasons
    pub fn failed(&self) -> Vec<FailedPath> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.outcome {
                TransferOutcome::Failed { reason } => Some(FailedPath {
                    path: o.path.clone(),
                    reason: reason.clone(),
                }),
                TransferOutcome::Succeeded { .. } => None,
            })
            .collect()
    }

    /// Total bytes copied
    pub fn bytes_transferred(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match o.outcome {
                TransferOutcome::Succeeded { bytes } => bytes,
                TransferOutcome::Failed { .. } => 0,
            })
            .sum()
    }
}

/// Shared cancellation flag for a long-running transfer
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Moves the bytes for a transfer request
pub trait Transferrer: Send + Sync {
    /// Whether the endpoint can take part in a transfer right now
    fn endpoint_ready(&self, endpoint: &Endpoint) -> Result<bool>;

    /// Copy every item, reporting one outcome per item in request order
    ///
    /// Returns an error only when the request as a whole cannot be attempted.
    /// Individual failures belong in the report.
    fn transfer(&self, request: &TransferRequest, cancel: &CancelFlag) -> Result<TransferReport>;
}

impl<T: Transferrer + ?Sized> Transferrer for Arc<T> {
    fn endpoint_ready(&self, endpoint: &Endpoint) -> Result<bool> {
        (**self).endpoint_ready(endpoint)
    }

    fn transfer(&self, request: &TransferRequest, cancel: &CancelFlag) -> Result<TransferReport> {
        (**self).transfer(request, cancel)
    }
}

/// Copies between two local directories with SHA-256 verification
pub struct LocalTransferrer {
    workers: usize,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for LocalTransferrer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransferrer")
            .field("workers", &self.workers)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for LocalTransferrer {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl LocalTransferrer {
    /// Create a transferrer copying with `workers` threads
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            progress: None,
        }
    }

    /// Report each finished item to `callback`
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    fn report_progress(&self, item: &TransferItem, processed: usize, total: usize) {
        if let Some(ref callback) = self.progress {
            callback(ProgressInfo {
                operation: "transferring".to_string(),
                current_item: Some(item.relative_path.to_string_lossy().to_string()),
                processed,
                total: Some(total),
            });
        }
    }
}

impl Transferrer for LocalTransferrer {
    fn endpoint_ready(&self, endpoint: &Endpoint) -> Result<bool> {
        match fs::read_dir(&endpoint.root) {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!("Endpoint {} at {:?} not ready: {}", endpoint.id, endpoint.root, e);
                Ok(false)
            }
        }
    }

    fn transfer(&self, request: &TransferRequest, cancel: &CancelFlag) -> Result<TransferReport> {
        info!(
            "Transfer {} ({}): {} items from {} to {}",
            request.label,
            request.run_id,
            request.items.len(),
            request.source.id,
            request.destination.id
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| SweepError::internal(format!("failed to start transfer workers: {}", e)))?;

        let total = request.items.len();
        let processed = AtomicUsize::new(0);
        let destination = &request.destination.root;

        let outcomes: Vec<PathOutcome> = pool.install(|| {
            request
                .items
                .par_iter()
                .map(|item| {
                    let outcome = if cancel.is_cancelled() {
                        TransferOutcome::Failed {
                            reason: "cancelled".to_string(),
                        }
                    } else {
                        match copy_item(item, destination) {
                            Ok(bytes) => {
                                trace!("Copied {:?} ({} bytes)", item.relative_path, bytes);
                                TransferOutcome::Succeeded { bytes }
                            }
                            Err(e) => {
                                warn!("Transfer of {:?} failed: {}", item.relative_path, e);
                                TransferOutcome::Failed {
                                    reason: e.to_string(),
                                }
                            }
                        }
                    };
                    let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    self.report_progress(item, done, total);
                    PathOutcome {
                        path: item.relative_path.clone(),
                        outcome,
                    }
                })
                .collect()
        });

        let report = TransferReport {
            label: request.label.clone(),
            outcomes,
        };
        debug!(
            "Transfer {} finished: {} succeeded, {} failed, {}",
            request.label,
            report.succeeded().len(),
            report.failed().len(),
            utils::format_bytes(report.bytes_transferred())
        );
        Ok(report)
    }
}

/// Copy one item below `destination_root`, returning the bytes written
///
/// A symbolic link whose target is a regular file is copied by content. Any
/// other link (to a directory, or dangling) is recreated as a link with the
/// same target, so the delete pass removes only the link.
fn copy_item(item: &TransferItem, destination_root: &Path) -> Result<u64> {
    let target = destination_root.join(&item.relative_path);
    if item.kind.is_directory() {
        fs::create_dir_all(&target)?;
        return Ok(0);
    }

    let parent = target
        .parent()
        .ok_or_else(|| SweepError::invalid_path(&target, "no parent directory"))?;
    fs::create_dir_all(parent)?;

    let is_link = fs::symlink_metadata(&item.absolute_path)?.file_type().is_symlink();
    if is_link && !fs::metadata(&item.absolute_path).is_ok_and(|m| m.is_file()) {
        return copy_link(item, parent, &target);
    }
    copy_file(item, parent, &target)
}

fn copy_file(item: &TransferItem, parent: &Path, target: &Path) -> Result<u64> {
    let mut source = File::open(&item.absolute_path)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut bytes = 0u64;
    loop {
        let read = source.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        temp.write_all(&buffer[..read])?;
        bytes += read as u64;
    }
    temp.as_file().sync_all()?;

    let expected = hex::encode(hasher.finalize());
    let written = utils::hash_file_content(temp.path())?;
    if written != expected {
        return Err(SweepError::TransferFailure {
            path: item.relative_path.clone(),
            reason: format!("checksum mismatch: expected {}, wrote {}", expected, written),
        });
    }

    temp.persist(target).map_err(|e| SweepError::Io(e.error))?;
    Ok(bytes)
}

#[cfg(unix)]
fn copy_link(item: &TransferItem, parent: &Path, target: &Path) -> Result<u64> {
    let link_target = fs::read_link(&item.absolute_path)?;
    let temp = parent.join(format!(".syncsweep-link-{}.tmp", Uuid::new_v4()));
    std::os::unix::fs::symlink(&link_target, &temp)?;
    if let Err(e) = fs::rename(&temp, target) {
        let _ = fs::remove_file(&temp);
        return Err(SweepError::TransferFailure {
            path: item.relative_path.clone(),
            reason: format!("cannot place link: {}", e),
        });
    }
    trace!("Recreated link {:?} -> {:?}", target, link_target);
    Ok(0)
}

#[cfg(not(unix))]
fn copy_link(item: &TransferItem, _parent: &Path, _target: &Path) -> Result<u64> {
    Err(SweepError::TransferFailure {
        path: item.relative_path.clone(),
        reason: "links to directories are not supported on this platform".to_string(),
    })
}
