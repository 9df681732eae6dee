//! The B+Tree engine.
//!
//! [`BPlusTree`] implements ordered `get`/`insert`/`delete` over byte-string
//! keys on top of a [`DiskManager`]. Every mutation is copy-on-write: each
//! node on the path from the root to the touched leaf is decoded, changed in
//! memory, and written to a freshly allocated page. The new root is
//! published last with [`DiskManager::set_root`], so a failed operation
//! leaves the persisted tree untouched.

use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use tracing::{debug, warn};

use crate::common::config::{TreeConfig, MAX_ENTRY_SIZE, MAX_KEY_SIZE, PAGE_SIZE};
use crate::common::{Error, PageId, Result};
use crate::index::btree::rebalance::{NoRebalance, UnderflowPolicy};
use crate::index::btree::{Node, NodeEntries};
use crate::storage::DiskManager;

/// Shape of the tree, gathered by walking every reachable page.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels, leaves included.
    pub height: usize,
    pub internal_pages: usize,
    pub leaf_pages: usize,
    /// Key/value pairs stored in leaves.
    pub entries: usize,
}

/// What a caller needs to link a node that was just written.
#[derive(Debug)]
struct Persisted {
    page: PageId,
    /// `None` when the node has no entries.
    min_key: Option<Vec<u8>>,
    is_leaf: bool,
}

/// A disk-backed B+Tree.
///
/// # Invariants
/// - Keys inside a node are strictly increasing.
/// - Each internal separator equals the smallest key of its child's subtree,
///   so the first separator of the root is the smallest key in the tree.
/// - No persisted node is larger than a page, and every internal node has
///   fewer children than the branching factor.
///
/// # Usage
/// ```no_run
/// use bplusdb::BPlusTree;
///
/// let mut tree = BPlusTree::open("my_store.db").unwrap();
/// tree.insert(b"apple", b"red").unwrap();
/// assert_eq!(tree.get(b"apple").unwrap(), b"red");
/// tree.delete(b"apple").unwrap();
/// tree.close().unwrap();
/// ```
pub struct BPlusTree {
    disk: DiskManager,
    config: TreeConfig,
    underflow: Box<dyn UnderflowPolicy>,
    /// Set once an operation surfaces corruption.
    poisoned: Cell<bool>,
}

impl BPlusTree {
    /// Open (or create) the store at `path` with the default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, TreeConfig::default())
    }

    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` for a branching factor below 3
    /// - anything [`DiskManager::open`] returns
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: TreeConfig) -> Result<Self> {
        config.validate()?;
        Self::from_disk_manager(DiskManager::open(path)?, config)
    }

    /// Build a tree over an already opened page store. A store without a
    /// root gets an empty leaf as its root.
    pub fn from_disk_manager(mut disk: DiskManager, config: TreeConfig) -> Result<Self> {
        config.validate()?;

        if disk.root().is_none() {
            let mut root = Node::new_leaf();
            let page = disk.write_node(&mut root)?;
            disk.set_root(page)?;
            debug!(root = %page, "initialized empty tree");
        }

        Ok(Self {
            disk,
            config,
            underflow: Box::new(NoRebalance),
            poisoned: Cell::new(false),
        })
    }

    /// Replace the policy consulted for underflowed nodes on delete.
    pub fn with_underflow_policy<U: UnderflowPolicy + 'static>(mut self, policy: U) -> Self {
        self.underflow = Box::new(policy);
        self
    }

    // ========================================================================
    // Public API
    // ========================================================================

    /// Look up the value stored under `key`.
    ///
    /// # Errors
    /// `Error::KeyNotFound` if the key is absent.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_poisoned()?;
        let result = self.lookup(key);
        self.track(result)
    }

    /// Whether `key` is stored in the tree.
    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(Error::KeyNotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Insert `key`, replacing the value if it already exists.
    ///
    /// # Errors
    /// - `Error::KeyTooLarge` / `Error::ValueTooLarge` before anything is
    ///   written. `ValueTooLarge` is also returned when the entry is within
    ///   [`MAX_ENTRY_SIZE`] but no two-way split of its leaf fits a page.
    /// - `Error::OutOfPages` / `Error::Io` if a page cannot be allocated or
    ///   flushed; the root is left unchanged
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_poisoned()?;
        check_entry_size(key, value)?;
        let result = self.insert_at_root(key, value);
        self.track(result)
    }

    /// Remove `key`. Removing an absent key is not an error.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_poisoned()?;
        let result = self.delete_at_root(key);
        self.track(result)
    }

    /// Every key/value pair in ascending key order.
    pub fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_poisoned()?;
        let result = self.collect_entries();
        self.track(result)
    }

    /// Walk the whole tree and report its shape.
    pub fn tree_stats(&self) -> Result<TreeStats> {
        self.check_poisoned()?;
        let result = self.collect_stats();
        self.track(result)
    }

    /// Page of the current root node.
    pub fn root_page(&self) -> Result<PageId> {
        self.disk
            .root()
            .ok_or_else(|| Error::CorruptMetadata("store has no root node".into()))
    }

    #[inline]
    pub fn config(&self) -> TreeConfig {
        self.config
    }

    #[inline]
    pub fn disk_manager(&self) -> &DiskManager {
        &self.disk
    }

    /// Flush and release the store file.
    pub fn close(self) -> Result<()> {
        self.disk.close()
    }

    /// Close the tree and delete its store file.
    pub fn destroy(self) -> Result<()> {
        self.disk.delete_store()
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    fn lookup(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut node = self.disk.read_node(self.root_page()?)?;
        let mut at_root = true;

        while !node.is_leaf() {
            let child = match route(&node, key)? {
                Some((_, child)) => child,
                // Smaller than the smallest key in the tree
                None if at_root => return Err(Error::KeyNotFound),
                None => return Err(separator_violation(&node, key)),
            };
            node = self.load_child(child)?;
            at_root = false;
        }

        node.value(key)
            .map(<[u8]>::to_vec)
            .ok_or(Error::KeyNotFound)
    }

    // ========================================================================
    // Insert
    // ========================================================================

    fn insert_at_root(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let root = self.disk.read_node(self.root_page()?)?;
        let parts = self.insert_into(root, key, value)?;

        let new_root = if parts.len() == 1 {
            parts[0].page
        } else {
            let map = parts
                .into_iter()
                .map(|part| Ok((non_empty_min(part.min_key)?, part.page)))
                .collect::<Result<BTreeMap<_, _>>>()?;
            let mut root = Node::from_entries(NodeEntries::Internal(map));
            let page = self.disk.write_node(&mut root)?;
            debug!(root = %page, "root split, tree grew a level");
            page
        };

        self.disk.set_root(new_root)
    }

    /// Insert into the subtree rooted at `node`, returning the one or two
    /// persisted nodes that replace it.
    fn insert_into(&mut self, mut node: Node, key: &[u8], value: &[u8]) -> Result<Vec<Persisted>> {
        if node.is_leaf() {
            if let NodeEntries::Leaf(map) = node.entries_mut() {
                map.insert(key.to_vec(), value.to_vec());
            }
            // Only the half holding the new entry can overflow
            return self.split_and_persist(node).map_err(|err| match err {
                Error::NodeOverflow { size } => {
                    let entry = key.len() + value.len();
                    Error::ValueTooLarge {
                        size: entry,
                        max: (PAGE_SIZE + entry).saturating_sub(size),
                    }
                }
                other => other,
            });
        }

        // A key below every separator becomes the new minimum of the
        // leftmost subtree.
        let (separator, child) = match route(&node, key)? {
            Some(found) => found,
            None => node
                .first_child()
                .map(|(separator, child)| (separator.to_vec(), child))
                .ok_or_else(|| empty_internal(&node))?,
        };

        let child_node = self.load_child(child)?;
        let parts = self.insert_into(child_node, key, value)?;

        if let NodeEntries::Internal(map) = node.entries_mut() {
            map.remove(&separator);
            for part in parts {
                map.insert(non_empty_min(part.min_key)?, part.page);
            }
        }

        self.split_and_persist(node)
    }

    /// Persist `node`, splitting it in two first if it is over capacity.
    /// Nothing is written if either half would still overflow.
    fn split_and_persist(&mut self, node: Node) -> Result<Vec<Persisted>> {
        if !node.needs_split(self.config.branching_factor) {
            return Ok(vec![self.persist(node)?]);
        }
        if node.len() < 2 {
            return Err(Error::NodeOverflow {
                size: node.encoded_size(),
            });
        }

        let (first, second) = node.split_in_two();
        for half in [&first, &second] {
            let size = half.encoded_size();
            if size > PAGE_SIZE {
                return Err(Error::NodeOverflow { size });
            }
        }
        Ok(vec![self.persist(first)?, self.persist(second)?])
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Any key that routes to a leaf rewrites the whole path and swaps the
    /// root, even when the leaf does not hold it.
    fn delete_at_root(&mut self, key: &[u8]) -> Result<()> {
        let root = self.disk.read_node(self.root_page()?)?;
        if !root.is_leaf() && route(&root, key)?.is_none() {
            return Ok(());
        }

        let updated = self.delete_from(root, key)?;
        let new_root = if updated.min_key.is_none() && !updated.is_leaf {
            // Every child is gone: start over from an empty leaf
            self.disk.mark_page_obsolete(updated.page)?;
            let mut leaf = Node::new_leaf();
            self.disk.write_node(&mut leaf)?
        } else {
            updated.page
        };

        self.disk.set_root(new_root)
    }

    /// Delete from the subtree rooted at `node`, returning the persisted
    /// replacement. Children that end up empty are unlinked; nothing is
    /// merged unless the underflow policy does it.
    fn delete_from(&mut self, mut node: Node, key: &[u8]) -> Result<Persisted> {
        if node.is_leaf() {
            if let NodeEntries::Leaf(map) = node.entries_mut() {
                map.remove(key);
            }
            return self.persist(node);
        }

        let (separator, child) = route(&node, key)?.ok_or_else(|| separator_violation(&node, key))?;
        let child_node = self.load_child(child)?;
        let updated = self.delete_from(child_node, key)?;

        let mut unlinked = None;
        if let NodeEntries::Internal(map) = node.entries_mut() {
            match updated.min_key {
                None => {
                    map.remove(&separator);
                    unlinked = Some(updated.page);
                }
                // The child's smallest key was deleted: re-key its entry
                Some(min_key) if separator.as_slice() == key => {
                    map.remove(&separator);
                    map.insert(min_key, updated.page);
                }
                Some(_) => {
                    map.insert(separator, updated.page);
                }
            }
        }
        if let Some(page) = unlinked {
            self.disk.mark_page_obsolete(page)?;
        }

        let node = self.underflow.maybe_merge(&mut self.disk, node)?;
        self.persist(node)
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    fn collect_entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        let mut stack = vec![self.root_page()?];

        while let Some(page) = stack.pop() {
            let node = self.load_child(page)?;
            match node.entries() {
                NodeEntries::Leaf(map) => {
                    entries.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                NodeEntries::Internal(map) => stack.extend(map.values().rev().copied()),
            }
        }

        Ok(entries)
    }

    fn collect_stats(&self) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        let mut worklist = VecDeque::from([(self.root_page()?, 1usize)]);

        while let Some((page, depth)) = worklist.pop_front() {
            let node = self.load_child(page)?;
            stats.height = stats.height.max(depth);
            match node.entries() {
                NodeEntries::Leaf(map) => {
                    stats.leaf_pages += 1;
                    stats.entries += map.len();
                }
                NodeEntries::Internal(map) => {
                    stats.internal_pages += 1;
                    worklist.extend(map.values().map(|&child| (child, depth + 1)));
                }
            }
        }

        Ok(stats)
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn persist(&mut self, mut node: Node) -> Result<Persisted> {
        let page = self.disk.write_node(&mut node)?;
        Ok(Persisted {
            page,
            min_key: node.min_key().map(<[u8]>::to_vec),
            is_leaf: node.is_leaf(),
        })
    }

    /// Read a page named by a child pointer. A pointer outside the file is
    /// corruption, not a caller error.
    fn load_child(&self, page: PageId) -> Result<Node> {
        self.disk.read_node(page).map_err(|err| match err {
            Error::InvalidPageId(index) => {
                Error::CorruptNode(format!("child pointer to missing page {index}"))
            }
            other => other,
        })
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned.get() {
            return Err(Error::Poisoned);
        }
        Ok(())
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_corruption() {
                warn!(%err, "corruption detected, refusing further operations");
                self.poisoned.set(true);
            }
        }
        result
    }
}

/// The entry of an internal node to descend into for `key`.
fn route(node: &Node, key: &[u8]) -> Result<Option<(Vec<u8>, PageId)>> {
    if node.is_empty() {
        return Err(empty_internal(node));
    }
    Ok(node
        .child_for(key)
        .map(|(separator, child)| (separator.to_vec(), child)))
}

fn check_entry_size(key: &[u8], value: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(Error::KeyTooLarge {
            size: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    let size = key.len() + value.len();
    if size > MAX_ENTRY_SIZE {
        return Err(Error::ValueTooLarge {
            size,
            max: MAX_ENTRY_SIZE,
        });
    }
    Ok(())
}

fn non_empty_min(min_key: Option<Vec<u8>>) -> Result<Vec<u8>> {
    min_key.ok_or_else(|| Error::CorruptNode("split produced an empty node".into()))
}

fn empty_internal(node: &Node) -> Error {
    Error::CorruptNode(format!("internal node at {:?} has no entries", node.page()))
}

fn separator_violation(node: &Node, key: &[u8]) -> Error {
    Error::CorruptNode(format!(
        "key of {} bytes sorts before every separator of {:?}",
        key.len(),
        node.page()
    ))
}
