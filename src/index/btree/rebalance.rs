//! Underflow handling after deletes.
//!
//! Deletes never merge or redistribute siblings, so node occupancy can fall
//! arbitrarily low. [`UnderflowPolicy`] is the single hook where such a pass
//! would go; the tree calls it for every internal node rebuilt on the
//! delete path, before the node is written.
//!
//! Currently implements:
//! - [`NoRebalance`] - leaves nodes exactly as the delete produced them

use crate::common::Result;
use crate::index::btree::Node;
use crate::storage::DiskManager;

/// Decides what happens to an internal node whose children shrank.
pub trait UnderflowPolicy {
    /// Called with the updated (not yet persisted) parent on the delete
    /// path. Returns the node to persist in its place.
    ///
    /// Implementations may read sibling pages through `disk`; they must not
    /// rewrite pages reachable from the persisted root.
    fn maybe_merge(&self, disk: &mut DiskManager, parent: Node) -> Result<Node>;
}

/// The default policy: underflowed nodes are kept as they are.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRebalance;

impl UnderflowPolicy for NoRebalance {
    #[inline]
    fn maybe_merge(&self, _disk: &mut DiskManager, parent: Node) -> Result<Node> {
        Ok(parent)
    }
}
