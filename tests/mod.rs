//! Main test module for syncsweep
//!
//! This module includes all test suites:
//! - Integration tests for end-to-end runs
//! - Chaos tests for failures, corruption and cancellation
//! - Property-based tests for invariants
//! - Edge cases for unusual file names and file types

pub mod integration;
pub mod chaos;

#[cfg(test)]
mod edge_cases {
    use ::syncsweep::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn sweeper_for(temp_dir: &TempDir) -> (Sweeper, PathBuf, PathBuf) {
        let source = temp_dir.path().join("source");
        let dest = temp_dir.path().join("dest");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&dest).unwrap();
        let mut config = SweepConfig::new(&source, &dest);
        config.state_path = Some(temp_dir.path().join("state.bin"));
        let sweeper = SweeperBuilder::new().build(config).unwrap();
        (sweeper, source, dest)
    }

    #[test]
    fn test_empty_source() {
        let temp_dir = TempDir::new().unwrap();
        let (sweeper, _, _) = sweeper_for(&temp_dir);

        let report = sweeper.run_transfer().unwrap();
        assert_eq!(report.selected, 0);
        // Nothing selected, nothing saved
        assert!(!sweeper.store().exists());

        let deleted = sweeper.run_delete().unwrap();
        assert_eq!(deleted.total_removed(), 0);
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let (sweeper, source, dest) = sweeper_for(&temp_dir);

        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "file.multiple.dots.txt",
            "UPPERCASE.TXT",
            "数据.csv",
            "résumé.pdf",
            ".hidden",
        ];
        for name in &special_names {
            fs::write(source.join(name), name.as_bytes()).unwrap();
        }

        let report = sweeper.run_transfer().unwrap();
        assert_eq!(report.confirmed.len(), special_names.len());
        for name in &special_names {
            assert_eq!(fs::read(dest.join(name)).unwrap(), name.as_bytes());
            assert!(sweeper.store().load().unwrap().lookup(Path::new(name)).is_some());
        }
    }

    #[test]
    fn test_deeply_nested_file() {
        let temp_dir = TempDir::new().unwrap();
        let (sweeper, source, dest) = sweeper_for(&temp_dir);

        let relative: PathBuf = (0..30).map(|i| format!("level{i}")).collect();
        fs::create_dir_all(source.join(&relative)).unwrap();
        fs::write(source.join(&relative).join("leaf.txt"), b"deep").unwrap();

        sweeper.run_transfer().unwrap();
        assert!(dest.join(&relative).join("leaf.txt").exists());

        sweeper.run_delete().unwrap();
        assert!(fs::read_dir(&source).unwrap().next().is_none());
    }

    #[test]
    fn test_directory_emptied_between_runs_is_sent_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let (sweeper, source, _) = sweeper_for(&temp_dir);
        fs::create_dir_all(source.join("drop")).unwrap();
        fs::write(source.join("drop/only.txt"), b"x").unwrap();
        sweeper.run_transfer().unwrap();

        fs::remove_file(source.join("drop/only.txt")).unwrap();
        let pending = sweeper.pending().unwrap();
        assert_eq!(pending.record.relative_paths(), vec![PathBuf::from("drop")]);
        assert_eq!(pending.record.items[0].kind, EntryKind::EmptyDirectory);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_is_transferred_as_file() {
        let temp_dir = TempDir::new().unwrap();
        let (sweeper, source, dest) = sweeper_for(&temp_dir);
        fs::write(source.join("target.txt"), b"target").unwrap();
        std::os::unix::fs::symlink(source.join("target.txt"), source.join("link.txt")).unwrap();

        let pending = sweeper.pending().unwrap();
        assert_eq!(pending.record.len(), 2);
        assert!(pending.record.items.iter().all(|i| i.kind == EntryKind::File));

        sweeper.run_transfer().unwrap();
        assert_eq!(fs::read(dest.join("link.txt")).unwrap(), b"target");
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_symlink_is_recreated_and_deleted_as_link() {
        let temp_dir = TempDir::new().unwrap();
        let (sweeper, source, dest) = sweeper_for(&temp_dir);
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("keep.txt"), b"keep").unwrap();
        std::os::unix::fs::symlink(&outside, source.join("link")).unwrap();

        let report = sweeper.run_transfer().unwrap();
        assert_eq!(report.confirmed, vec![PathBuf::from("link")]);
        assert!(report.failed.is_empty());
        let copied = dest.join("link");
        assert!(fs::symlink_metadata(&copied).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&copied).unwrap(), outside);

        assert_eq!(sweeper.run_transfer().unwrap().selected, 0);

        let deleted = sweeper.run_delete().unwrap();
        assert_eq!(deleted.files_deleted, 1);
        assert!(fs::symlink_metadata(source.join("link")).is_err());
        assert_eq!(fs::read(outside.join("keep.txt")).unwrap(), b"keep");
    }
}
