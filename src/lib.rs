//! # Syncsweep - incremental transfer and cleanup of a source tree
//!
//! Syncsweep finds the files in a source directory that were added or
//! modified since they were last transferred to a destination, hands exactly
//! those to a transfer collaborator, and once the transfer is confirmed,
//! deletes them from the source together with any directories left empty.
//!
//! It is meant to run unattended and repeatedly, e.g. from cron. Each run works
//! from a fresh scan of the filesystem and a persisted record of earlier
//! transfers.
//!
//! ## Architecture
//!
//! ```text
//! DirectoryScanner ──► DiffEngine ──► Transferrer ──► Reconciler ──► StateStore
//!                          ▲                                            │
//!                          └──────────────── PathTrie ◄─────────────────┘
//! ```
//!
//! - **PathTrie**: prefix tree of "last transferred" timestamps keyed by path
//!   components
//! - **StateStore**: atomic snapshot persistence of the trie between runs
//! - **DirectoryScanner**: depth-first walk yielding files and empty directories
//! - **DiffEngine**: selects entities that are new or modified since their last
//!   confirmed transfer
//! - **Reconciler**: confirms transfers, deletes confirmed sources, prunes
//!   empty directories and applies operator overrides
//! - **Sweeper**: runs the operator commands end to end
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use syncsweep::{SweepConfig, SweeperBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SweepConfig::load("syncsweep.json".as_ref())?;
//! config.validate()?;
//! let sweeper = SweeperBuilder::new().build(config)?;
//!
//! // Send everything new or modified
//! let report = sweeper.run_transfer()?;
//! println!("Confirmed {} of {} paths", report.confirmed.len(), report.selected);
//!
//! // Later, once the destination copy is trusted
//! let deleted = sweeper.run_delete()?;
//! println!("Removed {} objects", deleted.total_removed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery guarantees
//!
//! Delivery is at least once. A path is only timestamped after the transfer
//! collaborator reports it as copied, so a run that crashes, or a path that
//! fails, leaves the path selected for the next run. Destination writes
//! overwrite, so a repeated transfer is harmless.
//!
//! Transfer and deletion are separate commands. Deletion trusts the recorded
//! timestamps and does not re-check files modified after their transfer was
//! confirmed.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] with [`SweepError`]. An unreadable
//! source root, an unreadable snapshot and unavailable endpoints are fatal: a
//! failure report is sent to the configured [`notify::Notifier`] and the state
//! snapshot is left untouched. Per-path transfer failures only delay those
//! paths until the next run.
//!
//! ## Module Organization
//!
//! - [`trie`]: the path trie
//! - [`state`]: snapshot persistence
//! - [`scanner`]: source tree walking
//! - [`diff`]: change detection
//! - [`reconcile`]: confirmation, deletion and overrides
//! - [`transfer`]: transfer collaborator contract and local implementation
//! - [`notify`]: failure reports and their delivery
//! - [`config`]: configuration file
//! - [`sweeper`]: operator commands
//! - [`types`]: shared data types
//! - [`error`]: error types and handling

// Public API modules
pub mod config;
pub mod diff;
pub mod error;
pub mod notify;
pub mod reconcile;
pub mod scanner;
pub mod state;
pub mod sweeper;
pub mod transfer;
pub mod trie;
pub mod types;

// Internal modules (not part of public API)
mod utils;

// Re-export main types for convenience
pub use config::SweepConfig;
pub use diff::{DiffEngine, DiffOutcome};
pub use error::{Result, SweepError};
pub use reconcile::Reconciler;
pub use scanner::DirectoryScanner;
pub use state::StateStore;
pub use sweeper::{SweepStatus, Sweeper, SweeperBuilder};
pub use transfer::{CancelFlag, Endpoint, LocalTransferrer, Transferrer};
pub use trie::{PathStatus, PathTrie};
pub use types::*;
pub use utils::{format_bytes, parse_time, transfer_label};
