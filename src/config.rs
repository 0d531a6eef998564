//! Run configuration
//!
//! A [`SweepConfig`] is read from a JSON file (`syncsweep.json` by default):
//!
//! ```json
//! {
//!   "source_root": "/data/outgoing",
//!   "destination_root": "/mnt/archive/outgoing",
//!   "source_endpoint": "acquisition-host",
//!   "destination_endpoint": "archive",
//!   "ignore_patterns": ["*.part", ".DS_Store"],
//!   "failure_log": "/var/log/syncsweep/failures.jsonl"
//! }
//! ```
//!
//! Relative `state_path` and `failure_log` values are resolved against the
//! directory holding the config file. Without `state_path`, the snapshot lives
//! in `.syncsweep/state.bin` next to the config file.

use crate::error::{Result, SweepError};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "syncsweep.json";

/// Default snapshot location relative to the config directory
pub const DEFAULT_STATE_PATH: &str = ".syncsweep/state.bin";

/// Settings for one source/destination pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Directory whose contents are swept
    pub source_root: PathBuf,
    /// Directory receiving the copies
    pub destination_root: PathBuf,
    /// Identifier of the source endpoint
    #[serde(default = "default_source_endpoint")]
    pub source_endpoint: String,
    /// Identifier of the destination endpoint
    #[serde(default = "default_destination_endpoint")]
    pub destination_endpoint: String,
    /// Snapshot location
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    /// Glob patterns excluded from scanning
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// Follow symbolic links while scanning
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Copy threads used by the local transferrer
    #[serde(default = "num_cpus::get")]
    pub parallel_workers: usize,
    /// JSON-lines file receiving failure reports
    #[serde(default)]
    pub failure_log: Option<PathBuf>,
}

fn default_source_endpoint() -> String {
    "source".to_string()
}

fn default_destination_endpoint() -> String {
    "destination".to_string()
}

impl SweepConfig {
    /// Configuration with defaults for everything but the two roots
    pub fn new(source_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            source_endpoint: default_source_endpoint(),
            destination_endpoint: default_destination_endpoint(),
            state_path: None,
            ignore_patterns: Vec::new(),
            follow_symlinks: false,
            parallel_workers: num_cpus::get(),
            failure_log: None,
        }
    }

    /// Read a config file, resolving relative paths against its directory
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            SweepError::InvalidConfiguration(format!("cannot read {:?}: {}", path, e))
        })?;
        let mut config: SweepConfig = serde_json::from_str(&text)?;

        let base = match path.parent() {
            Some(parent) if parent.is_absolute() => parent.to_path_buf(),
            Some(parent) => std::env::current_dir()?.join(parent),
            None => std::env::current_dir()?,
        };
        let state = config
            .state_path
            .take()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH));
        config.state_path = Some(resolve(&base, state));
        config.failure_log = config.failure_log.take().map(|log| resolve(&base, log));

        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Write the config as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        utils::atomic_write(path, json.as_bytes())
    }

    /// Snapshot location, falling back to the default relative path
    pub fn state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH))
    }

    /// Check the configuration before any run touches state
    ///
    /// Every problem found is reported in a single
    /// [`SweepError::InvalidConfiguration`].
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        for (name, root) in [
            ("source_root", &self.source_root),
            ("destination_root", &self.destination_root),
        ] {
            if !root.is_absolute() {
                problems.push(format!("{} {:?} is not an absolute path", name, root));
            } else if !root.is_dir() {
                problems.push(format!("{} {:?} is not an existing directory", name, root));
            }
        }

        if is_within(&self.destination_root, &self.source_root) {
            problems.push(format!(
                "destination_root {:?} lies inside source_root",
                self.destination_root
            ));
        }
        let state = self.state_path();
        if is_within(&state, &self.source_root) {
            problems.push(format!("state_path {:?} lies inside source_root", state));
        }

        if self.parallel_workers == 0 {
            problems.push("parallel_workers must be at least 1".to_string());
        }
        for pattern in &self.ignore_patterns {
            if let Err(e) = globset::Glob::new(pattern) {
                problems.push(format!("ignore pattern {:?}: {}", pattern, e));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SweepError::InvalidConfiguration(problems.join("; ")))
        }
    }
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Whether `path` equals or lies below `root`, comparing canonical forms
/// where they exist
fn is_within(path: &Path, root: &Path) -> bool {
    let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let path = utils::normalize_lexically(&path);
    if path.starts_with(utils::normalize_lexically(root)) {
        return true;
    }
    let Ok(root) = root.canonicalize() else {
        return false;
    };
    // The path itself may not exist yet; canonicalize its nearest ancestor.
    let mut probe = path;
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = probe.canonicalize() {
            let full = rest.iter().rev().fold(canonical, |acc: PathBuf, part| acc.join(part));
            return full.starts_with(&root);
        }
        match (probe.file_name().map(|n| n.to_os_string()), probe.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name);
                probe = parent.to_path_buf();
            }
            _ => return false,
        }
    }
}
