//! Chaos testing for syncsweep
//!
//! Runs against failing collaborators, damaged snapshots, cancelled transfers
//! and sources that change underneath a run. The invariant throughout is that
//! the snapshot only ever moves forward on confirmed transfers.

use ::syncsweep::notify::MemoryNotifier;
use ::syncsweep::transfer::{TransferReport, TransferRequest};
use ::syncsweep::*;
use chrono::{Duration, Utc};
use filetime::{set_file_mtime, FileTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Transferrer whose whole submission fails
#[derive(Debug, Default)]
struct BrokenTransferrer {
    calls: AtomicUsize,
}

impl Transferrer for BrokenTransferrer {
    fn endpoint_ready(&self, _endpoint: &Endpoint) -> Result<bool> {
        Ok(true)
    }

    fn transfer(&self, _request: &TransferRequest, _cancel: &CancelFlag) -> Result<TransferReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SweepError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "transfer service went away",
        )))
    }
}

/// Chaos test fixture
pub struct SweepChaosTest {
    pub temp_dir: TempDir,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub config: SweepConfig,
}

impl SweepChaosTest {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        let dest = temp_dir.path().join("dest");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&dest).unwrap();
        let mut config = SweepConfig::new(&source, &dest);
        config.state_path = Some(temp_dir.path().join("state").join("state.bin"));
        config.parallel_workers = 2;
        Self {
            temp_dir,
            source,
            dest,
            config,
        }
    }

    pub fn sweeper(&self) -> Sweeper {
        SweeperBuilder::new().build(self.config.clone()).unwrap()
    }

    pub fn state_path(&self) -> PathBuf {
        self.config.state_path()
    }

    /// Populate the source with `count` files pinned to an old mtime
    pub fn populate(&self, count: usize) {
        let mtime = FileTime::from_unix_time(1_500_000_000, 0);
        for i in 0..count {
            let path = self.source.join(format!("batch{}", i % 3)).join(format!("f{i}.dat"));
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("content {i}")).unwrap();
            set_file_mtime(&path, mtime).unwrap();
        }
    }

    /// Complete one transfer so a valid snapshot exists
    pub fn establish_snapshot(&self, count: usize) -> Vec<u8> {
        self.populate(count);
        self.sweeper().run_transfer().unwrap();
        fs::read(self.state_path()).unwrap()
    }

    fn assert_corrupt(&self) {
        let err = self.sweeper().store().load().unwrap_err();
        assert!(err.is_corruption(), "expected corruption, got {err}");
    }
}

impl Default for SweepChaosTest {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn test_failed_submission_leaves_snapshot_untouched() {
    let chaos = SweepChaosTest::new();
    let before = chaos.establish_snapshot(3);

    // New work arrives, then the transfer service fails outright
    let mtime = FileTime::from_unix_time(1_500_000_000, 0);
    fs::write(chaos.source.join("late.dat"), b"late").unwrap();
    set_file_mtime(chaos.source.join("late.dat"), mtime).unwrap();

    let broken = Arc::new(BrokenTransferrer::default());
    let sweeper = SweeperBuilder::new()
        .transferrer(Arc::clone(&broken))
        .build(chaos.config.clone())
        .unwrap();
    assert!(sweeper.run_transfer().is_err());
    assert!(sweeper.run_transfer().is_err());
    assert_eq!(broken.calls.load(Ordering::SeqCst), 2);
    assert_eq!(fs::read(chaos.state_path()).unwrap(), before);

    let report = chaos.sweeper().run_transfer().unwrap();
    assert_eq!(report.confirmed, vec![PathBuf::from("late.dat")]);
}

#[test]
fn test_cancelled_transfer_confirms_nothing() {
    let chaos = SweepChaosTest::new();
    chaos.populate(6);

    let cancel = CancelFlag::new();
    cancel.cancel();
    let sweeper = SweeperBuilder::new()
        .cancel_flag(cancel)
        .build(chaos.config.clone())
        .unwrap();

    let report = sweeper.run_transfer().unwrap();
    assert!(report.confirmed.is_empty());
    assert_eq!(report.failed.len(), 6);
    assert!(report.failed.iter().all(|f| f.reason == "cancelled"));
    assert!(fs::read_dir(&chaos.dest).unwrap().next().is_none());

    let trie = sweeper.store().load().unwrap();
    assert!(trie.walk().all(|entry| entry.last_transferred.is_none()));
    assert_eq!(chaos.sweeper().pending().unwrap().record.len(), 6);
}

#[test]
fn test_truncated_snapshot() {
    let chaos = SweepChaosTest::new();
    let bytes = chaos.establish_snapshot(5);

    for len in [0, 3, 5, bytes.len() / 2, bytes.len() - 1] {
        fs::write(chaos.state_path(), &bytes[..len]).unwrap();
        chaos.assert_corrupt();
    }
}

#[test]
fn test_garbage_snapshot() {
    let chaos = SweepChaosTest::new();
    chaos.establish_snapshot(2);
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for len in [1usize, 16, 257, 4096] {
        let mut garbage = vec![0u8; len];
        rng.fill(&mut garbage[..]);
        fs::write(chaos.state_path(), &garbage).unwrap();
        chaos.assert_corrupt();
    }
}

#[test]
fn test_bad_magic_and_version() {
    let chaos = SweepChaosTest::new();
    let bytes = chaos.establish_snapshot(2);

    let mut bad_magic = bytes.clone();
    bad_magic[0] = b'X';
    fs::write(chaos.state_path(), &bad_magic).unwrap();
    chaos.assert_corrupt();

    let mut bad_version = bytes;
    bad_version[4] = 99;
    fs::write(chaos.state_path(), &bad_version).unwrap();
    chaos.assert_corrupt();
}

#[test]
fn test_corrupt_snapshot_notifies_and_blocks_delete() {
    let chaos = SweepChaosTest::new();
    chaos.establish_snapshot(3);
    fs::write(chaos.state_path(), b"SSWP\x01not lz4 at all").unwrap();

    let notifier = Arc::new(MemoryNotifier::new());
    let sweeper = SweeperBuilder::new()
        .notifier(Arc::clone(&notifier))
        .build(chaos.config.clone())
        .unwrap();

    assert!(sweeper.run_delete().is_err());
    // Nothing was deleted from the source
    assert_eq!(DirectoryScanner::new(&chaos.source).scan_all().unwrap().len(), 3);

    let reports = notifier.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].operation, "run-delete");
    assert_eq!(reports[0].phase, "load-state");
}

#[test]
fn test_unreadable_snapshot_notifies_and_blocks_transfer() {
    let chaos = SweepChaosTest::new();
    chaos.populate(2);
    let notifier = Arc::new(MemoryNotifier::new());
    let sweeper = SweeperBuilder::new()
        .notifier(Arc::clone(&notifier))
        .build(chaos.config.clone())
        .unwrap();
    // A directory where the snapshot file should be cannot be read as one.
    fs::create_dir_all(chaos.state_path()).unwrap();

    let err = sweeper.run_transfer().unwrap_err();
    assert!(err.is_corruption(), "unexpected error: {err}");
    assert_eq!(fs::read_dir(&chaos.dest).unwrap().count(), 0);

    let reports = notifier.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].phase, "load-state");
}

#[test]
fn test_modified_after_transfer_is_reselected() {
    let chaos = SweepChaosTest::new();
    chaos.establish_snapshot(3);

    let touched = chaos.source.join("batch1/f1.dat");
    fs::write(&touched, b"rewritten").unwrap();
    let later = Utc::now() + Duration::hours(1);
    set_file_mtime(&touched, FileTime::from_unix_time(later.timestamp(), 0)).unwrap();

    let pending = chaos.sweeper().pending().unwrap();
    assert_eq!(pending.record.relative_paths(), vec![PathBuf::from("batch1/f1.dat")]);
    assert_eq!(pending.stats.modified, 1);
}

#[test]
fn test_source_vanishing_before_delete() {
    let chaos = SweepChaosTest::new();
    chaos.establish_snapshot(4);
    fs::remove_file(chaos.source.join("batch0/f0.dat")).unwrap();

    let report = chaos.sweeper().run_delete().unwrap();
    assert_eq!(report.files_deleted, 3);
    assert_eq!(report.forgotten, 1);
    assert!(report.errors.is_empty());
    assert!(chaos.sweeper().store().load().unwrap().is_empty());
}

#[test]
fn test_missing_source_root_keeps_history() {
    let chaos = SweepChaosTest::new();
    let before = chaos.establish_snapshot(2);
    let sweeper = chaos.sweeper();
    fs::remove_dir_all(&chaos.source).unwrap();

    assert!(sweeper.run_delete().is_err());
    assert_eq!(fs::read(chaos.state_path()).unwrap(), before);
}

#[test]
fn test_stray_temp_files_do_not_affect_load() {
    let chaos = SweepChaosTest::new();
    chaos.establish_snapshot(3);
    let state_dir = chaos.state_path().parent().unwrap().to_path_buf();
    fs::write(state_dir.join(".tmpA1b2C3"), b"half-written snapshot").unwrap();

    let trie = chaos.sweeper().store().load().unwrap();
    assert_eq!(trie.path_count(), 3);
}

#[test]
fn test_file_added_during_run_is_sent_next_time() {
    let chaos = SweepChaosTest::new();
    chaos.populate(2);
    let sweeper = chaos.sweeper();
    let report = sweeper.run_transfer().unwrap();

    // Simulates a file that landed after the scan but with an mtime after as_of
    let late = chaos.source.join("late.dat");
    fs::write(&late, b"late").unwrap();
    let after = report.as_of + Duration::seconds(1);
    set_file_mtime(&late, FileTime::from_unix_time(after.timestamp(), 0)).unwrap();

    let pending = sweeper.pending().unwrap();
    assert_eq!(pending.record.relative_paths(), vec![PathBuf::from("late.dat")]);
    assert!(sweeper.store().load().unwrap().lookup(Path::new("late.dat")).is_none());
}
