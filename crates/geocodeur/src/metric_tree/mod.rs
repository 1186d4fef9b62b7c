//! Approximate string index: a BK-tree over Levenshtein distance.
//!
//! [`MetricTree`] is the in-memory structure. [`PersistentMetricTree`] pairs it
//! with a durable [`ValueLog`] so the tree can be rebuilt after a restart: the
//! log is the source of truth and the tree is a cache over it.

use std::collections::{BTreeMap, btree_map::Entry};
use std::path::Path;
use std::time::Instant;

use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use tracing::{info, instrument};

use crate::similarity::edit_distance;

mod log;

pub use error::{MetricTreeError, Result};
pub use log::ValueLog;

mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum MetricTreeError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
        #[error("Failed to open value log: {0}")]
        OpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),
        #[error("Tantivy error: {0}")]
        Tantivy(#[from] tantivy::TantivyError),
        #[error("Value log entry {0} has no value")]
        CorruptEntry(String),
    }

    pub type Result<T> = std::result::Result<T, MetricTreeError>;
}

#[derive(Debug)]
struct Node {
    value: String,
    /// Children keyed by their edit distance to `value`.
    children: BTreeMap<usize, Node>,
}

impl Node {
    fn leaf(value: String) -> Self {
        Self {
            value,
            children: BTreeMap::new(),
        }
    }
}

/// BK-tree of strings under edit distance.
///
/// Insertion and search walk the tree iteratively, so degenerate inputs (long
/// chains of equal-distance children) cannot exhaust the stack.
#[derive(Debug, Default)]
pub struct MetricTree {
    root: Option<Node>,
    len: usize,
}

impl MetricTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn insert(&mut self, value: impl Into<String>) {
        let value = value.into();
        let Some(root) = self.root.as_mut() else {
            self.root = Some(Node::leaf(value));
            self.len = 1;
            return;
        };

        let mut node = root;
        loop {
            let distance = edit_distance(&node.value, &value);
            node = match node.children.entry(distance) {
                Entry::Occupied(child) => child.into_mut(),
                Entry::Vacant(slot) => {
                    slot.insert(Node::leaf(value));
                    break;
                }
            };
        }
        self.len += 1;
    }

    /// All values within `max_distance` edits of `query`. Order is unspecified.
    pub fn search(&self, query: &str, max_distance: usize) -> Vec<&str> {
        let mut hits = Vec::new();
        let Some(root) = self.root.as_ref() else {
            return hits;
        };

        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let distance = edit_distance(&node.value, query);
            if distance <= max_distance {
                hits.push(node.value.as_str());
            }
            // Triangle inequality: a child at `d` can only hold hits when |distance - d| <= max_distance.
            let low = distance.saturating_sub(max_distance);
            let high = distance.saturating_add(max_distance);
            stack.extend(node.children.range(low..=high).map(|(_, child)| child));
        }
        hits
    }

    /// Every stored value, root first.
    pub fn values(&self) -> Vec<&str> {
        let mut values = Vec::with_capacity(self.len);
        let mut stack: Vec<&Node> = self.root.iter().collect();
        while let Some(node) = stack.pop() {
            values.push(node.value.as_str());
            stack.extend(node.children.values());
        }
        values
    }

    pub fn clear(&mut self) {
        self.drain_nodes();
        self.len = 0;
    }

    fn drain_nodes(&mut self) {
        let mut stack: Vec<Node> = self.root.take().into_iter().collect();
        while let Some(mut node) = stack.pop() {
            stack.extend(std::mem::take(&mut node.children).into_values());
        }
    }
}

impl Drop for MetricTree {
    fn drop(&mut self) {
        self.drain_nodes();
    }
}

impl<S: Into<String>> FromIterator<S> for MetricTree {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut tree = Self::new();
        for value in iter {
            tree.insert(value);
        }
        tree
    }
}

#[derive(Debug, Default)]
struct TreeState {
    tree: MetricTree,
    /// Whether the tree reflects the value log.
    hydrated: bool,
}

/// A [`MetricTree`] backed by a durable [`ValueLog`].
///
/// Every insert is written to the log before it reaches the tree; a value
/// already in the log is not inserted again. The first
/// operation after opening replays the log into the tree; concurrent callers
/// wait for that rebuild to finish.
#[derive(Debug)]
pub struct PersistentMetricTree {
    state: RwLock<TreeState>,
    log: ValueLog,
}

impl PersistentMetricTree {
    /// Open the tree whose log lives in `dir`. Failure to open the log is fatal.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_log(ValueLog::open(dir.as_ref())?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::with_log(ValueLog::in_memory()?))
    }

    pub fn with_log(log: ValueLog) -> Self {
        Self {
            state: RwLock::new(TreeState::default()),
            log,
        }
    }

    pub fn insert(&self, value: &str) -> Result<()> {
        let mut state = self.state.write();
        self.hydrate(&mut state)?;
        if self.log.put(value)? {
            state.tree.insert(value);
        }
        Ok(())
    }

    /// All stored values within `max_distance` edits of `query`.
    #[instrument(name = "Metric tree search", skip(self), level = "debug")]
    pub fn search(&self, query: &str, max_distance: usize) -> Result<Vec<String>> {
        let state = self.state.upgradable_read();
        let state = if state.hydrated {
            RwLockUpgradableReadGuard::downgrade(state)
        } else {
            let mut state = RwLockUpgradableReadGuard::upgrade(state);
            self.hydrate(&mut state)?;
            RwLockWriteGuard::downgrade(state)
        };
        Ok(state
            .tree
            .search(query, max_distance)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Number of values in the in-memory tree.
    pub fn len(&self) -> usize {
        self.state.read().tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard the in-memory tree. The next operation rebuilds it from the log.
    pub fn evict(&self) {
        let mut state = self.state.write();
        state.tree.clear();
        state.hydrated = false;
    }

    fn hydrate(&self, state: &mut TreeState) -> Result<()> {
        if state.hydrated {
            return Ok(());
        }
        let t0 = Instant::now();
        state.tree.clear();
        for value in self.log.values()? {
            state.tree.insert(value);
        }
        state.hydrated = true;
        info!(
            values = state.tree.len(),
            elapsed = ?t0.elapsed(),
            "Rebuilt metric tree from value log"
        );
        Ok(())
    }
}
