//! Run orchestration for the operator commands
//!
//! A [`Sweeper`] ties one configured source/destination pair to its state
//! snapshot and runs the commands an operator (or a scheduler) invokes:
//!
//! | command        | method                     | saves state |
//! |----------------|----------------------------|-------------|
//! | `run-transfer` | [`Sweeper::run_transfer`]  | on confirm  |
//! | `run-delete`   | [`Sweeper::run_delete`]    | yes         |
//! | `set-time`     | [`Sweeper::set_time`]      | yes         |
//! | `reset-state`  | [`Sweeper::reset_state`]   | deletes it  |
//! | `status`       | [`Sweeper::status`]        | no          |
//! | `list`         | [`Sweeper::tracked`]       | no          |
//! | `check`        | [`Sweeper::check`]         | no          |
//!
//! Runs against the same snapshot must not overlap. Nothing here locks the
//! snapshot; schedule invocations so they cannot run concurrently.
//!
//! ## Example
//!
//! ```rust,no_run
//! use syncsweep::{SweepConfig, SweeperBuilder};
//!
//! # fn main() -> syncsweep::Result<()> {
//! let config = SweepConfig::new("/data/outgoing", "/mnt/archive/outgoing");
//! let sweeper = SweeperBuilder::new().build(config)?;
//!
//! let report = sweeper.run_transfer()?;
//! println!("{} confirmed, {} to retry", report.confirmed.len(), report.failed.len());
//!
//! let deleted = sweeper.run_delete()?;
//! println!("{} objects removed from source", deleted.total_removed());
//! # Ok(())
//! # }
//! ```

use crate::config::SweepConfig;
use crate::diff::{DiffEngine, DiffOutcome};
use crate::error::{Result, SweepError};
use crate::notify::{self, FailureReport, FanoutNotifier, JsonLinesNotifier, LogNotifier, Notifier};
use crate::reconcile::Reconciler;
use crate::scanner::DirectoryScanner;
use crate::state::StateStore;
use crate::transfer::{CancelFlag, Endpoint, LocalTransferrer, TransferRequest, Transferrer};
use crate::trie::{PathTrie, WalkEntry};
use crate::types::{DeleteReport, DiffStats, ProgressCallback, TransferRunReport};
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Summary of the recorded history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepStatus {
    /// Snapshot location
    pub state_path: PathBuf,
    /// When the snapshot was last written, if one exists
    pub saved_at: Option<DateTime<Utc>>,
    /// Entities tracked
    pub tracked: usize,
    /// Entities with a confirmed transfer
    pub transferred: usize,
    /// Entities seen but never confirmed
    pub pending: usize,
}

/// Builder for [`Sweeper`]
#[derive(Default)]
pub struct SweeperBuilder {
    transferrer: Option<Box<dyn Transferrer>>,
    notifier: Option<Box<dyn Notifier>>,
    progress: Option<ProgressCallback>,
    cancel: Option<CancelFlag>,
    skip_validation: bool,
}

impl std::fmt::Debug for SweeperBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweeperBuilder")
            .field("transferrer", &self.transferrer.is_some())
            .field("notifier", &self.notifier.is_some())
            .field("progress", &self.progress.is_some())
            .field("skip_validation", &self.skip_validation)
            .finish()
    }
}

impl SweeperBuilder {
    /// Create a builder using the local transferrer and log notifications
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom transfer collaborator
    pub fn transferrer(mut self, transferrer: impl Transferrer + 'static) -> Self {
        self.transferrer = Some(Box::new(transferrer));
        self
    }

    /// Use a custom notification collaborator
    ///
    /// Replaces the default log (and failure log file) notifiers.
    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Some(Box::new(notifier));
        self
    }

    /// Report transfer progress to `callback`
    ///
    /// Only applies to the default local transferrer.
    pub fn progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Share a cancellation flag with the caller
    pub fn cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Build without [`SweepConfig::validate`]
    ///
    /// For maintenance commands (`reset-state`, `check`) that must work while a
    /// root is unmounted. Runs built this way still check endpoint readiness.
    pub fn unvalidated(mut self) -> Self {
        self.skip_validation = true;
        self
    }

    /// Build a sweeper for `config`
    ///
    /// # Errors
    ///
    /// - [`SweepError::InvalidConfiguration`] if [`SweepConfig::validate`] fails,
    ///   e.g. a missing root or a snapshot placed inside the source root
    pub fn build(self, config: SweepConfig) -> Result<Sweeper> {
        if !self.skip_validation {
            config.validate()?;
        }
        let state_path = std::path::absolute(config.state_path())?;
        let scanner = DirectoryScanner::new(&config.source_root)
            .with_ignore_patterns(&config.ignore_patterns)?
            .with_follow_symlinks(config.follow_symlinks)
            .with_excluded_path(&state_path);

        let transferrer: Box<dyn Transferrer> = match self.transferrer {
            Some(transferrer) => transferrer,
            None => {
                let mut local = LocalTransferrer::new(config.parallel_workers);
                if let Some(progress) = self.progress {
                    local = local.with_progress(progress);
                }
                Box::new(local)
            }
        };

        let notifier: Box<dyn Notifier> = match self.notifier {
            Some(notifier) => notifier,
            None => {
                let mut fanout = FanoutNotifier::new().with(LogNotifier);
                if let Some(ref log) = config.failure_log {
                    fanout = fanout.with(JsonLinesNotifier::new(log));
                }
                Box::new(fanout)
            }
        };

        Ok(Sweeper {
            store: StateStore::new(state_path, &config.source_root),
            diff: DiffEngine::new(&config.source_root),
            reconciler: Reconciler::new(&config.source_root),
            scanner,
            transferrer,
            notifier,
            cancel: self.cancel.unwrap_or_default(),
            config,
        })
    }
}

/// Orchestrates scan, diff, transfer and reconciliation for one source root
pub struct Sweeper {
    config: SweepConfig,
    store: StateStore,
    scanner: DirectoryScanner,
    diff: DiffEngine,
    reconciler: Reconciler,
    transferrer: Box<dyn Transferrer>,
    notifier: Box<dyn Notifier>,
    cancel: CancelFlag,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("source_root", &self.config.source_root)
            .field("destination_root", &self.config.destination_root)
            .field("state_path", &self.store.path())
            .finish()
    }
}

impl Sweeper {
    /// Configuration in use
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Snapshot store in use
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Flag that cancels an in-flight transfer
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Scan, diff, transfer, then confirm what arrived
    ///
    /// Paths that fail to transfer are logged and reported but do not fail the
    /// run; they keep their previous timestamp and are selected again next
    /// time. The transfer time recorded for confirmed paths is the instant
    /// taken just before scanning, so anything modified during the run is
    /// sent again by the next one.
    ///
    /// # Errors
    ///
    /// - [`SweepError::EndpointNotReady`] before anything is read or written
    /// - [`SweepError::CorruptState`] if the snapshot cannot be parsed
    /// - [`SweepError::Scan`] if the source root cannot be read
    ///
    /// In all three cases a failure report is delivered and the snapshot is
    /// left untouched.
    #[instrument(skip(self), fields(source = ?self.config.source_root))]
    pub fn run_transfer(&self) -> Result<TransferRunReport> {
        let run_id = Uuid::new_v4().to_string();
        self.notify_on_failure("run-transfer", &run_id, || self.transfer_once(&run_id))
    }

    fn transfer_once(&self, run_id: &str) -> Result<TransferRunReport> {
        let start = Instant::now();
        self.ensure_endpoints_ready()?;

        let mut trie = self.store.load()?;
        let as_of = Utc::now();
        let DiffOutcome { record, stats } = self.diff.diff(&mut trie, self.scanner.scan()?);

        let mut report = TransferRunReport {
            run_id: run_id.to_string(),
            label: String::new(),
            stats,
            selected: record.len(),
            confirmed: Vec::new(),
            failed: Vec::new(),
            as_of,
            bytes_transferred: 0,
            duration_ms: 0,
        };

        if record.is_empty() {
            info!("Nothing to transfer ({} paths unchanged)", stats.unchanged);
            report.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(report);
        }

        let mut request = TransferRequest::new(record, self.source_endpoint(), self.destination_endpoint(), as_of);
        request.run_id = run_id.to_string();
        report.label = request.label.clone();

        let outcome = self.transferrer.transfer(&request, &self.cancel)?;
        report.confirmed = outcome.succeeded();
        report.failed = outcome.failed();
        report.bytes_transferred = outcome.bytes_transferred();
        for failure in &report.failed {
            warn!("Not confirming {:?}: {}", failure.path, failure.reason);
        }

        self.reconciler
            .confirm_transferred(&self.store, &mut trie, &report.confirmed, as_of)?;

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Transfer {} confirmed {} of {} paths ({}) in {}ms",
            report.label,
            report.confirmed.len(),
            report.selected,
            utils::format_bytes(report.bytes_transferred),
            report.duration_ms
        );
        Ok(report)
    }

    /// Delete confirmed paths from the source and prune empty directories
    ///
    /// Never-confirmed entries whose source object disappeared are forgotten
    /// first. Changes made to a file after its transfer was confirmed are not
    /// detected; such a file is deleted like any other confirmed one.
    #[instrument(skip(self), fields(source = ?self.config.source_root))]
    pub fn run_delete(&self) -> Result<DeleteReport> {
        let run_id = Uuid::new_v4().to_string();
        self.notify_on_failure("run-delete", &run_id, || self.delete_once())
    }

    fn delete_once(&self) -> Result<DeleteReport> {
        let start = Instant::now();
        self.ensure_endpoints_ready()?;
        // A missing source root would otherwise look like every path vanished.
        self.scanner.check_root()?;

        let mut trie = self.store.load()?;
        let forgotten = self.reconciler.forget_vanished(&mut trie);
        let mut report = self.reconciler.delete_transferred(&mut trie)?;
        report.forgotten += forgotten;
        self.store.save(&trie)?;

        report.duration_ms = start.elapsed().as_millis() as u64;
        for error in &report.errors {
            warn!("Could not delete {:?}: {}", error.path, error.reason);
        }
        Ok(report)
    }

    /// Override the recorded transfer time
    ///
    /// `path` may be absolute (inside the source root) or relative to the
    /// source root; `None` addresses the whole tree. Untracked paths found by a
    /// fresh scan are registered first, so the override also covers entities
    /// that appeared since the last run. Directories are overridden
    /// recursively. Returns the number of entities stamped.
    #[instrument(skip(self))]
    pub fn set_time(&self, path: Option<&Path>, time: DateTime<Utc>) -> Result<usize> {
        let run_id = Uuid::new_v4().to_string();
        self.notify_on_failure("set-time", &run_id, || self.set_time_once(path, time))
    }

    fn set_time_once(&self, path: Option<&Path>, time: DateTime<Utc>) -> Result<usize> {
        let relative = match path {
            Some(path) => self.relative_to_source(path)?,
            None => PathBuf::new(),
        };

        let mut trie = self.store.load()?;
        let registered = self.register_untracked(&mut trie)?;
        debug!("Registered {} untracked paths before override", registered);

        let absolute = self.config.source_root.join(&relative);
        let on_disk = absolute.symlink_metadata().ok();
        if on_disk.is_none() && trie.node(&relative).is_none() {
            return Err(SweepError::invalid_path(
                &absolute,
                "neither present in the source nor tracked",
            ));
        }
        let recursive = relative.as_os_str().is_empty() || on_disk.is_some_and(|m| m.is_dir());

        let stamped = self
            .reconciler
            .set_timestamp_override(&mut trie, &relative, time, recursive)?;
        self.store.save(&trie)?;
        Ok(stamped)
    }

    /// Forget all recorded history
    ///
    /// Returns `true` if a snapshot existed.
    #[instrument(skip(self))]
    pub fn reset_state(&self) -> Result<bool> {
        self.store.reset()
    }

    /// Compute what the next `run-transfer` would send, without saving
    pub fn pending(&self) -> Result<DiffOutcome> {
        let mut trie = self.store.load()?;
        Ok(self.diff.diff(&mut trie, self.scanner.scan()?))
    }

    /// Every tracked entity in walk order
    pub fn tracked(&self) -> Result<Vec<WalkEntry>> {
        Ok(self.store.load()?.walk().collect())
    }

    /// Summarize the recorded history
    pub fn status(&self) -> Result<SweepStatus> {
        let snapshot = self.store.load_snapshot()?;
        let (trie, saved_at) = match snapshot {
            Some(snapshot) => (snapshot.trie, Some(snapshot.saved_at)),
            None => (PathTrie::new(), None),
        };
        let transferred = trie
            .walk()
            .filter(|entry| entry.last_transferred.is_some())
            .count();
        Ok(SweepStatus {
            state_path: self.store.path().to_path_buf(),
            saved_at,
            tracked: trie.path_count(),
            transferred,
            pending: trie.path_count() - transferred,
        })
    }

    /// Validate the configuration, the endpoints and the snapshot
    ///
    /// Returns the number of tracked paths.
    pub fn check(&self) -> Result<usize> {
        self.config.validate()?;
        self.ensure_endpoints_ready()?;
        self.scanner.check_root()?;
        Ok(self.store.load()?.path_count())
    }

    /// Diff statistics for the next run (convenience for `status`)
    pub fn pending_stats(&self) -> Result<DiffStats> {
        Ok(self.pending()?.stats)
    }

    fn source_endpoint(&self) -> Endpoint {
        Endpoint::new(&self.config.source_endpoint, &self.config.source_root)
    }

    fn destination_endpoint(&self) -> Endpoint {
        Endpoint::new(&self.config.destination_endpoint, &self.config.destination_root)
    }

    fn endpoint_ids(&self) -> Vec<String> {
        vec![
            self.config.source_endpoint.clone(),
            self.config.destination_endpoint.clone(),
        ]
    }

    fn ensure_endpoints_ready(&self) -> Result<()> {
        let mut not_ready = Vec::new();
        for endpoint in [self.source_endpoint(), self.destination_endpoint()] {
            match self.transferrer.endpoint_ready(&endpoint) {
                Ok(true) => {}
                Ok(false) => not_ready.push(endpoint.id),
                Err(e) => {
                    warn!("Readiness check for {} failed: {}", endpoint.id, e);
                    not_ready.push(endpoint.id);
                }
            }
        }
        if not_ready.is_empty() {
            Ok(())
        } else {
            Err(SweepError::EndpointNotReady { endpoints: not_ready })
        }
    }

    fn relative_to_source(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            utils::make_relative(path, &self.config.source_root)
        } else {
            Ok(path.to_path_buf())
        }
    }

    fn register_untracked(&self, trie: &mut PathTrie) -> Result<usize> {
        let mut registered = 0;
        for entry in self.scanner.scan()? {
            match trie.insert(&entry.path, entry.kind) {
                Ok(true) => registered += 1,
                Ok(false) => {}
                Err(e) => warn!("Cannot track {:?}: {}", entry.path, e),
            }
        }
        Ok(registered)
    }

    /// Run `op`, delivering a failure report if a precondition failed
    fn notify_on_failure<T>(
        &self,
        operation: &str,
        run_id: &str,
        op: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let result = op();
        if let Err(ref e) = result {
            if matches!(
                e,
                SweepError::Scan { .. }
                    | SweepError::CorruptState { .. }
                    | SweepError::EndpointNotReady { .. }
            ) {
                let report = FailureReport::from_error(run_id, operation, e, self.endpoint_ids());
                notify::deliver(self.notifier.as_ref(), &report);
            }
        }
        result
    }
}
