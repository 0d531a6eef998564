//! End-to-end scenarios for syncsweep
//!
//! Each test drives real directories through scan, diff, transfer,
//! confirmation and deletion, pinning modification times with `filetime` so
//! the comparisons against recorded transfer times are deterministic.

use ::syncsweep::*;
use chrono::{DateTime, Duration, TimeZone, Utc};
use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Source, destination and state in one temporary directory
pub struct SweepTestHarness {
    pub temp_dir: TempDir,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub config: SweepConfig,
}

impl SweepTestHarness {
    /// Create empty source and destination roots
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

    /// Build a sweeper with default collaborators
    pub fn sweeper(&self) -> Sweeper {
        SweeperBuilder::new().build(self.config.clone()).unwrap()
    }

    /// Store for the configured snapshot
    pub fn store(&self) -> StateStore {
        StateStore::new(self.config.state_path(), &self.source)
    }

    /// Write a file and pin its modification time
    pub fn write_file(&self, relative: &str, content: &[u8], mtime: DateTime<Utc>) {
        let path = self.source.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        set_mtime(&path, mtime);
    }

    /// Create an empty directory and pin its modification time
    pub fn make_dir(&self, relative: &str, mtime: DateTime<Utc>) {
        let path = self.source.join(relative);
        fs::create_dir_all(&path).unwrap();
        set_mtime(&path, mtime);
    }

    /// Scan and diff against `trie` without touching the snapshot
    pub fn diff(&self, trie: &mut PathTrie) -> DiffOutcome {
        let scanner = DirectoryScanner::new(&self.source);
        DiffEngine::new(&self.source).diff(trie, scanner.scan().unwrap())
    }
}

impl Default for SweepTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Pin a path's modification time to a whole second
pub fn set_mtime(path: &Path, time: DateTime<Utc>) {
    set_file_mtime(path, FileTime::from_unix_time(time.timestamp(), 0)).unwrap();
}

/// A fixed instant well in the past
pub fn t1() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap()
}

fn relative_paths(outcome: &DiffOutcome) -> Vec<PathBuf> {
    outcome.record.relative_paths()
}

#[test]
fn test_fresh_run_selects_files_and_empty_directories() {
    let h = SweepTestHarness::new();
    h.write_file("a/b.txt", b"payload", t1());
    h.make_dir("a/c", t1());
    let store = h.store();
    let mut trie = store.load().unwrap();

    let outcome = h.diff(&mut trie);
    assert_eq!(
        relative_paths(&outcome),
        vec![PathBuf::from("a/b.txt"), PathBuf::from("a/c")]
    );

    let t2 = t1() + Duration::hours(1);
    Reconciler::new(&h.source)
        .confirm_transferred(&store, &mut trie, &relative_paths(&outcome), t2)
        .unwrap();

    let reloaded = store.load().unwrap();
    assert_eq!(reloaded.lookup(Path::new("a/b.txt")), Some(t2));
    assert_eq!(reloaded.lookup(Path::new("a/c")), Some(t2));
}

#[test]
fn test_delete_pass_after_confirmation() {
    let h = SweepTestHarness::new();
    h.write_file("a/b.txt", b"payload", t1());
    h.make_dir("a/c", t1());
    let sweeper = h.sweeper();
    sweeper.run_transfer().unwrap();

    let report = sweeper.run_delete().unwrap();
    assert_eq!(report.files_deleted, 1);
    assert_eq!(report.directories_deleted, 1);
    assert_eq!(report.directories_pruned, 1);
    assert!(!h.source.join("a/b.txt").exists());
    assert!(!h.source.join("a/c").exists());
    assert!(!h.source.join("a").exists());
    assert!(h.source.exists());

    // The destination keeps its copies
    assert_eq!(fs::read(h.dest.join("a/b.txt")).unwrap(), b"payload");
    assert!(h.dest.join("a/c").is_dir());
    assert!(h.store().load().unwrap().is_empty());
}

#[test]
fn test_override_excludes_subtree_from_next_diff() {
    let h = SweepTestHarness::new();
    h.write_file("a/b.txt", b"payload", t1());
    h.make_dir("a/c", t1());
    let store = h.store();
    let mut trie = store.load().unwrap();
    let outcome = h.diff(&mut trie);
    let t2 = t1() + Duration::hours(1);
    let reconciler = Reconciler::new(&h.source);
    reconciler
        .confirm_transferred(&store, &mut trie, &relative_paths(&outcome), t2)
        .unwrap();

    let far_future = Utc.with_ymd_and_hms(2200, 1, 1, 0, 0, 0).unwrap();
    reconciler
        .set_timestamp_override(&mut trie, Path::new("a"), far_future, true)
        .unwrap();

    let next = h.diff(&mut trie);
    assert!(next.record.is_empty());
    assert_eq!(next.stats.unchanged, 2);
}

#[test]
fn test_zero_length_snapshot_fails_load() {
    let h = SweepTestHarness::new();
    let state = h.config.state_path();
    fs::create_dir_all(state.parent().unwrap()).unwrap();
    fs::write(&state, b"").unwrap();

    let err = h.store().load().unwrap_err();
    assert!(matches!(err, SweepError::CorruptState { .. }));
    assert!(h.sweeper().run_transfer().is_err());
    assert!(h.sweeper().run_delete().is_err());
}

#[test]
fn test_second_run_is_empty() {
    let h = SweepTestHarness::new();
    h.write_file("x/1.dat", b"1", t1());
    h.write_file("x/y/2.dat", b"2", t1());
    h.make_dir("empty", t1());
    let sweeper = h.sweeper();

    let first = sweeper.run_transfer().unwrap();
    assert_eq!(first.selected, 3);
    let second = sweeper.run_transfer().unwrap();
    assert_eq!(second.selected, 0);
    assert!(second.label.is_empty());
}

#[test]
fn test_modified_path_stays_selected_until_confirmed() {
    let h = SweepTestHarness::new();
    h.write_file("log.txt", b"v1", t1());
    let store = h.store();
    let reconciler = Reconciler::new(&h.source);
    let mut trie = PathTrie::new();

    let first = h.diff(&mut trie);
    let t2 = t1() + Duration::minutes(5);
    reconciler
        .confirm_transferred(&store, &mut trie, &relative_paths(&first), t2)
        .unwrap();

    let t3 = t2 + Duration::minutes(5);
    h.write_file("log.txt", b"v2", t3);
    for _ in 0..3 {
        assert_eq!(relative_paths(&h.diff(&mut trie)), vec![PathBuf::from("log.txt")]);
    }

    reconciler
        .confirm_transferred(&store, &mut trie, &[PathBuf::from("log.txt")], t3)
        .unwrap();
    assert!(h.diff(&mut trie).record.is_empty());
}

#[test]
fn test_equal_timestamp_is_excluded() {
    let h = SweepTestHarness::new();
    h.write_file("same.bin", b"x", t1());
    let mut trie = PathTrie::new();
    trie.set_timestamp(Path::new("same.bin"), t1()).unwrap();

    let outcome = h.diff(&mut trie);
    assert!(outcome.record.is_empty());
    assert_eq!(outcome.stats.unchanged, 1);

    set_mtime(&h.source.join("same.bin"), t1() + Duration::seconds(1));
    assert_eq!(h.diff(&mut trie).record.len(), 1);
}

#[test]
fn test_empty_directory_tracking_follows_contents() {
    let h = SweepTestHarness::new();
    h.make_dir("inbox", t1());
    let mut trie = PathTrie::new();

    let outcome = h.diff(&mut trie);
    assert_eq!(outcome.record.items.len(), 1);
    assert_eq!(outcome.record.items[0].kind, EntryKind::EmptyDirectory);

    h.write_file("inbox/first.txt", b"hi", t1());
    let outcome = h.diff(&mut trie);
    assert_eq!(relative_paths(&outcome), vec![PathBuf::from("inbox/first.txt")]);
}

#[test]
fn test_removing_last_descendant_prunes_structural_chain() {
    let mut trie = PathTrie::new();
    trie.set_timestamp(Path::new("a/b/c/d.txt"), t1()).unwrap();
    trie.set_timestamp(Path::new("a/x.txt"), t1()).unwrap();

    assert!(trie.remove(Path::new("a/b/c/d.txt")));
    assert_eq!(trie.status(Path::new("a/b/c")), PathStatus::Absent);
    assert_eq!(trie.status(Path::new("a/b")), PathStatus::Absent);
    assert_eq!(trie.status(Path::new("a")), PathStatus::Structural);

    assert!(trie.remove(Path::new("a/x.txt")));
    assert!(trie.is_empty());
}

#[test]
fn test_set_time_covers_files_added_since_last_run() {
    let h = SweepTestHarness::new();
    h.write_file("old/2019/a.csv", b"a", t1());
    let sweeper = h.sweeper();
    sweeper.run_transfer().unwrap();

    h.write_file("old/2019/b.csv", b"b", t1());
    h.write_file("new/c.csv", b"c", t1());
    let far_future = Utc.with_ymd_and_hms(2200, 1, 1, 0, 0, 0).unwrap();
    let stamped = sweeper
        .set_time(Some(&h.source.join("old")), far_future)
        .unwrap();
    assert_eq!(stamped, 2);

    let pending = sweeper.pending().unwrap();
    assert_eq!(relative_paths(&pending), vec![PathBuf::from("new/c.csv")]);
}

#[test]
fn test_reset_state_makes_everything_new() {
    let h = SweepTestHarness::new();
    h.write_file("a.txt", b"a", t1());
    h.write_file("b/c.txt", b"c", t1());
    let sweeper = h.sweeper();
    sweeper.run_transfer().unwrap();
    assert!(sweeper.pending().unwrap().record.is_empty());

    assert!(sweeper.reset_state().unwrap());
    assert_eq!(sweeper.pending().unwrap().record.len(), 2);
}

#[test]
fn test_ignore_patterns_and_failure_log() {
    let mut h = SweepTestHarness::new();
    h.config.ignore_patterns = vec!["*.part".to_string(), "scratch".to_string()];
    h.config.failure_log = Some(h.temp_dir.path().join("failures.jsonl"));
    h.write_file("done.dat", b"d", t1());
    h.write_file("upload.part", b"p", t1());
    h.write_file("scratch/tmp.dat", b"s", t1());

    let sweeper = h.sweeper();
    let report = sweeper.run_transfer().unwrap();
    assert_eq!(report.confirmed, vec![PathBuf::from("done.dat")]);
    assert!(!h.dest.join("upload.part").exists());

    fs::remove_dir_all(&h.dest).unwrap();
    assert!(sweeper.run_transfer().is_err());
    let log = fs::read_to_string(h.temp_dir.path().join("failures.jsonl")).unwrap();
    assert!(log.contains("endpoint-check"), "{log}");
}

#[test]
fn test_config_file_drives_a_run() {
    let h = SweepTestHarness::new();
    h.write_file("a.txt", b"a", t1());
    let file = h.temp_dir.path().join("syncsweep.json");
    let mut config = h.config.clone();
    config.state_path = None;
    config.save(&file).unwrap();

    let loaded = SweepConfig::load(&file).unwrap();
    loaded.validate().unwrap();
    assert_eq!(loaded.state_path(), h.temp_dir.path().join(".syncsweep/state.bin"));

    let sweeper = SweeperBuilder::new().build(loaded).unwrap();
    assert_eq!(sweeper.check().unwrap(), 0);
    sweeper.run_transfer().unwrap();
    assert!(h.temp_dir.path().join(".syncsweep/state.bin").exists());
    assert_eq!(sweeper.check().unwrap(), 1);
}
