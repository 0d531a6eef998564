//! Prefix tree of last-transfer timestamps
//!
//! `PathTrie` records, for every entity under the source root, when it was last
//! confirmed as transferred. Paths are split into components and stored as a
//! chain of [`PathNode`]s, so files in the same directory share their prefix.
//!
//! ## Node states
//!
//! ```text
//! root
//! └── a                  structural (no kind, no timestamp)
//!     ├── b.txt          entity, transferred at T2
//!     └── c              entity (empty directory), pending
//! ```
//!
//! - **Structural** nodes exist only to hold descendants and never carry a timestamp.
//! - **Pending** nodes are entities that have been observed but never confirmed.
//! - **Transferred** nodes carry the time of their last confirmed transfer.
//!
//! Structural nodes live exactly as long as they have descendants: removing the
//! last entity below a chain of structural nodes removes the whole chain.
//!
//! ## Example
//!
//! ```rust
//! use syncsweep::trie::{PathStatus, PathTrie};
//! use syncsweep::types::EntryKind;
//! use chrono::Utc;
//! use std::path::Path;
//!
//! # fn main() -> syncsweep::Result<()> {
//! let mut trie = PathTrie::new();
//! trie.insert(Path::new("a/b.txt"), EntryKind::File)?;
//! assert_eq!(trie.status(Path::new("a/b.txt")), PathStatus::Pending);
//! assert_eq!(trie.status(Path::new("a")), PathStatus::Structural);
//!
//! let now = Utc::now();
//! trie.set_timestamp(Path::new("a/b.txt"), now)?;
//! assert_eq!(trie.lookup(Path::new("a/b.txt")), Some(now));
//!
//! trie.remove(Path::new("a/b.txt"));
//! assert!(trie.is_empty());
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SweepError};
use crate::types::EntryKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// One path component in the trie
///
/// The component name is the key under which the node is stored in its
/// parent's children map, which keeps sibling names unique.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathNode {
    /// Entity kind; `None` for purely structural nodes
    kind: Option<EntryKind>,
    /// Time of the last confirmed transfer
    last_transferred: Option<DateTime<Utc>>,
    /// Children keyed by component name, ordered for deterministic walks
    children: BTreeMap<String, PathNode>,
}

impl PathNode {
    /// Entity kind, or `None` if the node is structural
    pub fn kind(&self) -> Option<EntryKind> {
        self.kind
    }

    /// Time of the last confirmed transfer
    pub fn last_transferred(&self) -> Option<DateTime<Utc>> {
        self.last_transferred
    }

    /// Whether the node was recorded as an entity of its own
    pub fn is_entity(&self) -> bool {
        self.kind.is_some()
    }

    fn is_dangling(&self) -> bool {
        self.kind.is_none() && self.children.is_empty()
    }

    fn count_entities(&self) -> usize {
        let own = usize::from(self.is_entity());
        own + self.children.values().map(PathNode::count_entities).sum::<usize>()
    }

    fn stamp_entities(&mut self, time: DateTime<Utc>) -> usize {
        let mut stamped = 0;
        if self.kind.is_some() {
            self.last_transferred = Some(time);
            stamped += 1;
        }
        for child in self.children.values_mut() {
            stamped += child.stamp_entities(time);
        }
        stamped
    }
}

/// Where a path stands with respect to transfer history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// No node exists for the path or one of its prefixes
    Absent,
    /// The node only exists to contain other tracked nodes
    Structural,
    /// Observed as an entity but never confirmed
    Pending,
    /// Confirmed as transferred at the given time
    Transferred(DateTime<Utc>),
}

impl PathStatus {
    /// Whether the diff should treat the path as never transferred
    pub fn is_untransferred(&self) -> bool {
        !matches!(self, PathStatus::Transferred(_))
    }
}

/// One entity produced by [`PathTrie::walk`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Path relative to the source root
    pub path: PathBuf,
    /// Recorded kind
    pub kind: EntryKind,
    /// Time of the last confirmed transfer, if any
    pub last_transferred: Option<DateTime<Utc>>,
}

/// Persistent prefix tree keyed by path components
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathTrie {
    root: PathNode,
    path_count: usize,
}

impl PathTrie {
    /// Create an empty trie (a single root, no children)
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entity paths tracked
    pub fn path_count(&self) -> usize {
        self.path_count
    }

    /// Whether the trie has no nodes below the root
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Recount entities by traversal
    ///
    /// Used to validate a deserialized trie against its stored count.
    pub fn recount(&self) -> usize {
        self.root.count_entities()
    }

    /// Ensure every component of `path` exists and mark the terminal node as an entity
    ///
    /// Idempotent: inserting an already tracked path keeps its timestamp.
    /// Returns `true` if the path was not an entity before.
    pub fn insert(&mut self, path: &Path, kind: EntryKind) -> Result<bool> {
        let node = self.node_entry(path)?;
        let newly_tracked = node.kind.is_none();
        node.kind = Some(kind);
        if newly_tracked {
            self.path_count += 1;
            trace!("Tracking new {} {:?}", kind, path);
        }
        Ok(newly_tracked)
    }

    /// Look up the node for an exact path
    pub fn node(&self, path: &Path) -> Option<&PathNode> {
        let components = components(path).ok()?;
        let mut node = &self.root;
        for component in &components {
            node = node.children.get(component)?;
        }
        Some(node)
    }

    /// Classify a path against the recorded history
    ///
    /// Paths that cannot be expressed as trie keys are reported as absent.
    pub fn status(&self, path: &Path) -> PathStatus {
        match self.node(path) {
            None => PathStatus::Absent,
            Some(node) => match (node.kind, node.last_transferred) {
                (None, _) => PathStatus::Structural,
                (Some(_), None) => PathStatus::Pending,
                (Some(_), Some(time)) => PathStatus::Transferred(time),
            },
        }
    }

    /// Recorded `lastTransferred` for an exact path
    pub fn lookup(&self, path: &Path) -> Option<DateTime<Utc>> {
        self.node(path).and_then(|n| n.last_transferred)
    }

    /// Insert the path if absent, then set its `lastTransferred`
    ///
    /// Paths first registered by this call are recorded as files.
    pub fn set_timestamp(&mut self, path: &Path, time: DateTime<Utc>) -> Result<()> {
        let node = self.node_entry(path)?;
        let newly_tracked = node.kind.is_none();
        if newly_tracked {
            node.kind = Some(EntryKind::File);
        }
        node.last_transferred = Some(time);
        if newly_tracked {
            self.path_count += 1;
        }
        Ok(())
    }

    /// Set `lastTransferred` on the path and every entity below it
    ///
    /// An empty path addresses the whole trie. Structural nodes keep no
    /// timestamp. A path that is not tracked at all is registered as a file.
    /// Returns the number of entities stamped.
    pub fn set_timestamp_recursive(&mut self, path: &Path, time: DateTime<Utc>) -> Result<usize> {
        if self.node(path).is_none() {
            self.set_timestamp(path, time)?;
            return Ok(1);
        }
        let comps = components(path)?;
        let mut node = &mut self.root;
        for component in &comps {
            node = match node.children.get_mut(component) {
                Some(child) => child,
                None => return Ok(0),
            };
        }
        Ok(node.stamp_entities(time))
    }

    /// Remove a tracked path and prune dangling structural ancestors
    ///
    /// A node that still has descendants is demoted to structural instead of
    /// being dropped, so tracked children are never lost. Pruning stops at the
    /// first ancestor that still has children or is an entity itself.
    /// Returns `true` if an entity was removed.
    pub fn remove(&mut self, path: &Path) -> bool {
        let Ok(comps) = components(path) else {
            return false;
        };
        if comps.is_empty() {
            return false;
        }
        let removed = remove_entity(&mut self.root, &comps);
        if removed {
            self.path_count -= 1;
            trace!("Stopped tracking {:?}", path);
        }
        removed
    }

    /// Every tracked entity in depth-first order, siblings sorted by name
    ///
    /// The walk borrows the trie; calling `walk` again restarts from the root.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: vec![(PathBuf::new(), &self.root)],
        }
    }

    fn node_entry(&mut self, path: &Path) -> Result<&mut PathNode> {
        let comps = components(path)?;
        if comps.is_empty() {
            return Err(SweepError::invalid_path(path, "the source root itself cannot be tracked"));
        }
        let mut node = &mut self.root;
        for component in comps {
            node = node.children.entry(component).or_default();
        }
        Ok(node)
    }
}

/// Lazy depth-first iterator over tracked entities
#[derive(Debug)]
pub struct Walk<'a> {
    stack: Vec<(PathBuf, &'a PathNode)>,
}

impl Iterator for Walk<'_> {
    type Item = WalkEntry;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((path, node)) = self.stack.pop() {
            for (name, child) in node.children.iter().rev() {
                self.stack.push((path.join(name), child));
            }
            if let Some(kind) = node.kind {
                return Some(WalkEntry {
                    path,
                    kind,
                    last_transferred: node.last_transferred,
                });
            }
        }
        None
    }
}

fn remove_entity(node: &mut PathNode, comps: &[String]) -> bool {
    let Some((first, rest)) = comps.split_first() else {
        return false;
    };
    let Some(child) = node.children.get_mut(first) else {
        return false;
    };
    let removed = if rest.is_empty() {
        if child.kind.is_none() {
            return false;
        }
        child.kind = None;
        child.last_transferred = None;
        true
    } else {
        remove_entity(child, rest)
    };
    if removed && child.is_dangling() {
        node.children.remove(first);
    }
    removed
}

/// Split a relative path into trie keys
///
/// `.` components are skipped; roots, prefixes and `..` are rejected.
pub fn components(path: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => {
                let name = name
                    .to_str()
                    .ok_or_else(|| SweepError::PathConversion(name.to_os_string()))?;
                out.push(name.to_string());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(SweepError::invalid_path(path, "'..' components are not allowed"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SweepError::invalid_path(
                    path,
                    "expected a path relative to the source root",
                ));
            }
        }
    }
    Ok(out)
}
