//! Configuration constants for bplusdb.

use crate::common::{Error, Result};

/// Size of a page in bytes (4KB).
///
/// Every node occupies exactly one page, and page `N` lives at file offset
/// `N × PAGE_SIZE`. The size is fixed; variable page sizes are not supported.
pub const PAGE_SIZE: usize = 4096;

/// Number of pages a freshly created store file starts with.
///
/// Page 0 is the metadata page, so a new store has
/// `INITIAL_PAGE_COUNT - 1` free node pages.
pub const INITIAL_PAGE_COUNT: u64 = 8;

/// When fewer free pages than this remain, the file doubles in size before
/// the next allocation.
pub const FREE_PAGE_LOW_WATER_MARK: usize = 5;

/// Node header: kind byte + big-endian `u16` entry count.
pub const NODE_HEADER_SIZE: usize = 3;

/// Size of an encoded child pointer in an internal node.
pub const CHILD_POINTER_SIZE: usize = 8;

/// Largest key accepted by the tree.
///
/// Two maximal separators and their pointers always fit in one internal
/// page, so a root split can always be persisted.
pub const MAX_KEY_SIZE: usize =
    (PAGE_SIZE - NODE_HEADER_SIZE - 2 * 3 * 2 - 2 * CHILD_POINTER_SIZE) / 2;

/// Largest `key.len() + value.len()` accepted by the tree: one entry alone
/// in a leaf page.
pub const MAX_ENTRY_SIZE: usize = PAGE_SIZE - NODE_HEADER_SIZE - 2 * 2 * 2;

/// Default maximum fanout of internal nodes.
pub const DEFAULT_BRANCHING_FACTOR: usize = 64;

/// Construction-time parameters of a [`BPlusTree`](crate::BPlusTree).
///
/// # Example
/// ```
/// use bplusdb::TreeConfig;
///
/// let config = TreeConfig::new(4);
/// assert!(config.validate().is_ok());
/// assert!(TreeConfig::new(1).validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// An internal node splits once it holds this many children, so at most
    /// `branching_factor - 1` are ever persisted.
    pub branching_factor: usize,
}

impl TreeConfig {
    /// Create a config with the given branching factor.
    pub fn new(branching_factor: usize) -> Self {
        Self { branching_factor }
    }

    /// Reject parameters the split algorithm cannot work with.
    ///
    /// A branching factor below 3 leaves internal nodes room for a single
    /// child, and every split would add a level to the tree.
    pub fn validate(&self) -> Result<()> {
        if self.branching_factor < 3 {
            return Err(Error::InvalidConfig(format!(
                "branching factor must be at least 3, got {}",
                self.branching_factor
            )));
        }
        Ok(())
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BRANCHING_FACTOR)
    }
}
