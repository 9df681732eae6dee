//! Page identifier type.

use std::fmt;

use crate::common::config::PAGE_SIZE;

/// Identifies a page in the store file.
///
/// A `PageId` is an opaque page index. It is the identity of a persisted
/// node; all dereferencing goes through the
/// [`DiskManager`](crate::storage::DiskManager). On disk, child pointers and
/// the root pointer are stored as byte addresses (`index × PAGE_SIZE`); the
/// conversion is private to the crate.
///
/// # Example
/// ```
/// use bplusdb::PageId;
///
/// let page_id = PageId::new(42);
/// assert_eq!(page_id.index(), 42);
/// assert!(!page_id.is_meta());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(u64);

impl PageId {
    /// The metadata page. Never holds a tree node.
    pub const META: PageId = PageId(0);

    /// Create a new PageId from a page index.
    #[inline]
    pub fn new(index: u64) -> Self {
        PageId(index)
    }

    /// The page index within the file.
    #[inline]
    pub fn index(&self) -> u64 {
        self.0
    }

    /// Whether this is the reserved metadata page.
    #[inline]
    pub fn is_meta(&self) -> bool {
        *self == Self::META
    }

    /// Byte address of the page within the file.
    #[inline]
    pub(crate) fn address(&self) -> u64 {
        self.0 * PAGE_SIZE as u64
    }

    /// Parse an on-disk byte address. Returns `None` for misaligned input.
    #[inline]
    pub(crate) fn from_address(address: u64) -> Option<Self> {
        if address % PAGE_SIZE as u64 == 0 {
            Some(PageId(address / PAGE_SIZE as u64))
        } else {
            None
        }
    }

    /// Byte range of the page inside a mapping of the whole file.
    #[inline]
    pub(crate) fn byte_range(&self) -> std::ops::Range<usize> {
        let start = self.0 as usize * PAGE_SIZE;
        start..start + PAGE_SIZE
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_meta() {
            write!(f, "Page(META)")
        } else {
            write!(f, "Page({})", self.0)
        }
    }
}
