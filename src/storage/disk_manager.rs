//! Disk Manager - the page store behind the B+Tree.
//!
//! The [`DiskManager`] owns the store file and its memory mapping:
//! - Allocating pages from a FIFO free-page queue, growing the file on demand
//! - Writing nodes copy-on-write to freshly allocated pages
//! - Decoding nodes straight out of the mapping
//! - Persisting the root pointer in the metadata page
//! - Reclaiming unreachable pages once, at startup

use std::collections::{BTreeSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::{debug, info, warn};

use crate::common::config::{FREE_PAGE_LOW_WATER_MARK, INITIAL_PAGE_COUNT, PAGE_SIZE};
use crate::common::{Error, PageId, Result};
use crate::index::btree::Node;
use crate::storage::page::MetaPage;
use crate::storage::stats::StoreStats;

/// Manages the pages of a single store file.
///
/// # File Layout
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Page 0  │ Page 1  │ Page 2  │  ...    │ Page N  │
/// │ (meta)  │ (node)  │ (node)  │         │ (node)  │
/// └─────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0      4096     8192    ...    N×4096
/// ```
///
/// Page 0 holds the [`MetaPage`]; every other page is either a node or
/// sits on the free-page queue. The queue lives in memory only and is
/// rebuilt by [`reconcile_orphans`](Self::reconcile_orphans) on open.
///
/// # Thread Safety
/// `DiskManager` is **single-threaded** and assumes it is the only process
/// with the file open. Nothing locks the file.
///
/// # Durability
/// Every node write and metadata update flushes the touched page before
/// returning. Durability is per page, not per tree operation.
pub struct DiskManager {
    path: PathBuf,
    file: File,
    /// Writable mapping of the whole file.
    mmap: MmapMut,
    /// Number of pages in the file, metadata page included.
    page_count: u64,
    root: Option<PageId>,
    /// Pages available for allocation (front = next to hand out).
    free_pages: VecDeque<PageId>,
    stats: StoreStats,
}

impl DiskManager {
    /// Open the store at `path`, creating it if it doesn't exist.
    ///
    /// # Errors
    /// - `Error::Io` on file-system or mapping failure
    /// - `Error::CorruptMetadata` if an existing file has an unreadable
    ///   metadata page
    /// - `Error::CorruptNode` if a reachable node fails to decode
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open_existing(path)
        } else {
            Self::create(path)
        }
    }

    /// Create a new store file with [`INITIAL_PAGE_COUNT`] pages.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(INITIAL_PAGE_COUNT * PAGE_SIZE as u64)?;
        let mmap = map_file(&file)?;

        let mut dm = Self {
            path,
            file,
            mmap,
            page_count: INITIAL_PAGE_COUNT,
            root: None,
            free_pages: (1..INITIAL_PAGE_COUNT).map(PageId::new).collect(),
            stats: StoreStats::new(),
        };
        dm.write_meta()?;

        info!(path = %dm.path.display(), pages = dm.page_count, "created store");
        Ok(dm)
    }

    /// Open an existing store file and rebuild its free-page queue.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist, or see [`open`](Self::open).
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let file_len = file.metadata()?.len();
        if file_len < PAGE_SIZE as u64 {
            warn!(path = %path.display(), file_len, "store file has no metadata page");
            return Err(Error::CorruptMetadata(format!(
                "file of {file_len} bytes is shorter than one page"
            )));
        }

        let mmap = map_file(&file)?;
        let meta = MetaPage::from_bytes(&mmap[..PAGE_SIZE]).inspect_err(|err| {
            warn!(path = %path.display(), %err, "rejecting metadata page");
        })?;

        let required = meta.page_count.checked_mul(PAGE_SIZE as u64);
        if required.map_or(true, |required| required > file_len) {
            return Err(Error::CorruptMetadata(format!(
                "metadata claims {} pages but the file holds {} bytes",
                meta.page_count, file_len
            )));
        }

        let mut dm = Self {
            path,
            file,
            mmap,
            page_count: meta.page_count,
            root: meta.root,
            free_pages: VecDeque::new(),
            stats: StoreStats::new(),
        };
        dm.reconcile_orphans()?;

        info!(
            path = %dm.path.display(),
            pages = dm.page_count,
            free = dm.free_pages.len(),
            root = ?dm.root,
            "opened store"
        );
        Ok(dm)
    }

    // ========================================================================
    // Page allocation
    // ========================================================================

    /// Take the next free page, zero-filled.
    ///
    /// When fewer than [`FREE_PAGE_LOW_WATER_MARK`] pages are free, the file
    /// first doubles in size.
    ///
    /// # Errors
    /// `Error::OutOfPages` if growing the file fails.
    pub fn get_free_page(&mut self) -> Result<PageId> {
        if self.free_pages.len() < FREE_PAGE_LOW_WATER_MARK {
            let target = self
                .page_count
                .checked_mul(2)
                .ok_or_else(|| Error::OutOfPages(io::Error::other("page count overflow")))?;
            self.set_file_page_count(target).map_err(|err| match err {
                Error::Io(io_err) => Error::OutOfPages(io_err),
                other => other,
            })?;
        }

        let page_id = self.free_pages.pop_front().ok_or_else(|| {
            Error::OutOfPages(io::Error::other("free page queue empty after growth"))
        })?;
        self.mmap[page_id.byte_range()].fill(0);
        StoreStats::bump(&self.stats.pages_allocated);

        Ok(page_id)
    }

    /// Grow the file (and mapping) to `n_pages` pages, queueing the new
    /// pages as free.
    ///
    /// # Errors
    /// `Error::ShrinkNotSupported` if `n_pages` is not larger than the
    /// current page count.
    pub fn set_file_page_count(&mut self, n_pages: u64) -> Result<()> {
        if n_pages <= self.page_count {
            return Err(Error::ShrinkNotSupported {
                requested: n_pages,
                current: self.page_count,
            });
        }
        let len = n_pages
            .checked_mul(PAGE_SIZE as u64)
            .ok_or_else(|| Error::OutOfPages(io::Error::other("file size overflow")))?;

        self.mmap.flush()?;
        self.file.set_len(len)?;
        self.mmap = map_file(&self.file)?;

        let old_count = self.page_count;
        self.free_pages.extend((old_count..n_pages).map(PageId::new));
        self.page_count = n_pages;
        self.write_meta()?;

        StoreStats::bump(&self.stats.file_growths);
        debug!(from = old_count, to = n_pages, "grew store file");
        Ok(())
    }

    /// Return a page to the back of the free-page queue.
    ///
    /// The caller guarantees nothing reachable still points at `page_id`.
    pub fn mark_page_obsolete(&mut self, page_id: PageId) -> Result<()> {
        self.check_node_page(page_id)?;
        self.free_pages.push_back(page_id);
        StoreStats::bump(&self.stats.pages_freed);
        Ok(())
    }

    // ========================================================================
    // Node I/O
    // ========================================================================

    /// Encode `node` into a freshly allocated page and flush it.
    ///
    /// Nodes are never rewritten in place: the node's previous page (if
    /// any) is left untouched, and the new page becomes its identity.
    ///
    /// # Errors
    /// - `Error::NodeOverflow` if the node does not fit in a page (nothing
    ///   is allocated)
    /// - `Error::OutOfPages` / `Error::Io` on allocation or flush failure
    pub fn write_node(&mut self, node: &mut Node) -> Result<PageId> {
        let size = node.encoded_size();
        if size > PAGE_SIZE {
            return Err(Error::NodeOverflow { size });
        }

        // The page comes back zero-filled, so the tail past the node is clean
        let page_id = self.get_free_page()?;
        let range = page_id.byte_range();
        let offset = range.start;
        node.encode_into(&mut self.mmap[range])?;
        self.mmap.flush_range(offset, PAGE_SIZE)?;

        node.set_page(page_id);
        StoreStats::bump(&self.stats.nodes_written);
        Ok(page_id)
    }

    /// Decode the node stored at `page_id` directly from the mapping.
    ///
    /// # Errors
    /// - `Error::InvalidPageId` for page 0 or a page past the end of the file
    /// - `Error::CorruptNode` if the page does not hold a valid node
    pub fn read_node(&self, page_id: PageId) -> Result<Node> {
        self.check_node_page(page_id)?;

        let mut node = Node::decode(&self.mmap[page_id.byte_range()])?;
        node.set_page(page_id);
        StoreStats::bump(&self.stats.nodes_read);
        Ok(node)
    }

    // ========================================================================
    // Root pointer
    // ========================================================================

    /// Current root node, `None` for a store that never had one.
    #[inline]
    pub fn root(&self) -> Option<PageId> {
        self.root
    }

    /// Persist `new_root` in the metadata page, then free the previous root.
    ///
    /// The previous root is the only page reclaimed during normal operation.
    pub fn set_root(&mut self, new_root: PageId) -> Result<()> {
        self.check_node_page(new_root)?;

        let previous = self.root.replace(new_root);
        self.write_meta()?;

        if let Some(previous) = previous.filter(|&previous| previous != new_root) {
            self.mark_page_obsolete(previous)?;
        }
        debug!(root = %new_root, previous = ?previous, "root updated");
        Ok(())
    }

    // ========================================================================
    // Orphan reconciliation
    // ========================================================================

    /// Every page reachable from the root, found breadth-first with an
    /// explicit worklist.
    ///
    /// # Errors
    /// `Error::CorruptNode` if a child pointer leaves the file or a reachable
    /// page does not decode.
    pub fn reachable_pages(&self) -> Result<BTreeSet<PageId>> {
        let mut visited = BTreeSet::new();
        let mut worklist: VecDeque<PageId> = self.root.into_iter().collect();

        while let Some(page_id) = worklist.pop_front() {
            if page_id.is_meta() || page_id.index() >= self.page_count {
                return Err(Error::CorruptNode(format!(
                    "pointer to {page_id} outside node pages 1..{}",
                    self.page_count
                )));
            }
            if !visited.insert(page_id) {
                continue;
            }
            worklist.extend(self.read_node(page_id)?.children());
        }

        Ok(visited)
    }

    /// Queue every node page not reachable from the root as free.
    ///
    /// Run once when an existing store is opened. Pages leaked by
    /// interrupted or copy-on-write updates are recovered here.
    pub fn reconcile_orphans(&mut self) -> Result<()> {
        let reachable = self.reachable_pages().inspect_err(|err| {
            warn!(path = %self.path.display(), %err, "orphan scan hit a corrupt node");
        })?;

        self.free_pages = (1..self.page_count)
            .map(PageId::new)
            .filter(|page_id| !reachable.contains(page_id))
            .collect();

        debug!(
            reachable = reachable.len(),
            free = self.free_pages.len(),
            "reconciled orphaned pages"
        );
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Flush the mapping and release the file.
    pub fn close(self) -> Result<()> {
        self.mmap.flush()?;
        self.file.sync_all()?;
        info!(path = %self.path.display(), "closed store");
        Ok(())
    }

    /// Truncate and remove the store file.
    pub fn delete_store(self) -> Result<()> {
        let DiskManager { path, file, mmap, .. } = self;
        drop(mmap);
        file.set_len(0)?;
        drop(file);
        fs::remove_file(&path)?;
        info!(path = %path.display(), "deleted store");
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Number of pages in the file, metadata page included.
    #[inline]
    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    /// Total size of the store in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        self.page_count * PAGE_SIZE as u64
    }

    /// Number of pages waiting on the free-page queue.
    #[inline]
    pub fn free_page_count(&self) -> usize {
        self.free_pages.len()
    }

    /// Free pages in allocation order.
    pub fn free_page_ids(&self) -> impl Iterator<Item = PageId> + '_ {
        self.free_pages.iter().copied()
    }

    #[inline]
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn check_node_page(&self, page_id: PageId) -> Result<()> {
        if page_id.is_meta() || page_id.index() >= self.page_count {
            return Err(Error::InvalidPageId(page_id.index()));
        }
        Ok(())
    }

    fn write_meta(&mut self) -> Result<()> {
        let meta = MetaPage {
            page_count: self.page_count,
            root: self.root,
        };
        meta.write_to(&mut self.mmap[..PAGE_SIZE]);
        self.mmap.flush_range(0, PAGE_SIZE)?;
        Ok(())
    }
}

fn map_file(file: &File) -> io::Result<MmapMut> {
    // SAFETY: the store assumes a single DiskManager per file, so nothing
    // else truncates or writes the file while it is mapped.
    unsafe { MmapMut::map_mut(file) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::btree::NodeEntries;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn leaf(pairs: &[(&[u8], &[u8])]) -> Node {
        Node::from_entries(NodeEntries::Leaf(
            pairs.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect(),
        ))
    }

    fn internal(pairs: &[(&[u8], PageId)]) -> Node {
        let map: BTreeMap<Vec<u8>, PageId> =
            pairs.iter().map(|(k, p)| (k.to_vec(), *p)).collect();
        Node::from_entries(NodeEntries::Internal(map))
    }

    #[test]
    fn test_create_new_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let dm = DiskManager::create(&path).unwrap();
        assert_eq!(dm.page_count(), INITIAL_PAGE_COUNT);
        assert_eq!(dm.file_size(), INITIAL_PAGE_COUNT * PAGE_SIZE as u64);
        assert_eq!(dm.free_page_count(), 7);
        assert_eq!(dm.root(), None);
        assert_eq!(fs::metadata(&path).unwrap().len(), 8 * 4096);
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        DiskManager::create(&path).unwrap();
        assert!(DiskManager::create(&path).is_err());
    }

    #[test]
    fn test_open_nonexistent_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.db");

        assert!(DiskManager::open_existing(&path).is_err());
    }

    #[test]
    fn test_write_and_read_node() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("test.db")).unwrap();

        let mut node = leaf(&[(b"hello", b"world")]);
        let page_id = dm.write_node(&mut node).unwrap();
        assert_eq!(page_id, PageId::new(1));
        assert_eq!(node.page(), Some(page_id));

        let read = dm.read_node(page_id).unwrap();
        assert_eq!(read, node);
        assert_eq!(read.value(b"hello"), Some(&b"world"[..]));
    }

    #[test]
    fn test_write_node_is_copy_on_write() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("test.db")).unwrap();

        let mut node = leaf(&[(b"k", b"v1")]);
        let first = dm.write_node(&mut node).unwrap();
        let second = dm.write_node(&mut node).unwrap();

        assert_ne!(first, second);
        assert_eq!(dm.read_node(first).unwrap().value(b"k"), Some(&b"v1"[..]));
    }

    #[test]
    fn test_free_page_is_zero_filled() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("test.db")).unwrap();

        let mut node = leaf(&[(b"k", b"v")]);
        let page_id = dm.write_node(&mut node).unwrap();
        dm.mark_page_obsolete(page_id).unwrap();

        // Drain the queue until the obsolete page comes back around
        let mut reused = dm.get_free_page().unwrap();
        while reused != page_id {
            reused = dm.get_free_page().unwrap();
        }
        assert!(dm.mmap[page_id.byte_range()].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_node_over_reused_page_leaves_clean_tail() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("test.db")).unwrap();

        let mut big = leaf(&[(b"k", &[0xEE; 3000])]);
        let page_id = dm.write_node(&mut big).unwrap();
        dm.mark_page_obsolete(page_id).unwrap();

        let mut small = leaf(&[(b"k", b"v")]);
        let mut written = dm.write_node(&mut small).unwrap();
        while written != page_id {
            written = dm.write_node(&mut small).unwrap();
        }

        let bytes = &dm.mmap[page_id.byte_range()];
        assert!(bytes[small.encoded_size()..].iter().all(|&b| b == 0));
        assert_eq!(dm.read_node(page_id).unwrap(), small);
    }

    #[test]
    fn test_write_node_overflow_allocates_nothing() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("test.db")).unwrap();
        let free = dm.free_page_count();

        let mut node = leaf(&[(b"a", &[0; 2100]), (b"b", &[0; 2100])]);
        assert!(matches!(
            dm.write_node(&mut node),
            Err(Error::NodeOverflow { .. })
        ));
        assert_eq!(dm.free_page_count(), free);
        assert_eq!(node.page(), None);
    }

    #[test]
    fn test_stats_track_node_io() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("test.db")).unwrap();

        let mut node = leaf(&[(b"k", b"v")]);
        let page_id = dm.write_node(&mut node).unwrap();
        dm.read_node(page_id).unwrap();
        dm.read_node(page_id).unwrap();
        dm.mark_page_obsolete(page_id).unwrap();

        let snapshot = dm.stats().snapshot();
        assert_eq!(snapshot.nodes_written, 1);
        assert_eq!(snapshot.nodes_read, 2);
        assert_eq!(snapshot.pages_allocated, 1);
        assert_eq!(snapshot.pages_freed, 1);
        assert_eq!(snapshot.file_growths, 0);
    }

    #[test]
    fn test_growth_below_low_water_mark() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("test.db")).unwrap();

        // 7 free: three allocations leave 4, below the mark of 5
        for _ in 0..3 {
            dm.get_free_page().unwrap();
        }
        assert_eq!(dm.free_page_count(), 4);
        assert_eq!(dm.page_count(), 8);

        let page_id = dm.get_free_page().unwrap();
        assert_eq!(page_id, PageId::new(4));
        assert_eq!(dm.page_count(), 16);
        assert_eq!(dm.free_page_count(), 4 + 8 - 1);
        assert_eq!(dm.stats().snapshot().file_growths, 1);
    }

    #[test]
    fn test_shrink_rejected() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("test.db")).unwrap();

        assert!(matches!(
            dm.set_file_page_count(8),
            Err(Error::ShrinkNotSupported { requested: 8, current: 8 })
        ));
        assert!(matches!(
            dm.set_file_page_count(2),
            Err(Error::ShrinkNotSupported { .. })
        ));
        assert_eq!(dm.page_count(), 8);
    }

    #[test]
    fn test_set_root_frees_previous_root() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::open(dir.path().join("test.db")).unwrap();

        let first = dm.write_node(&mut leaf(&[(b"a", b"1")])).unwrap();
        dm.set_root(first).unwrap();
        let free_before = dm.free_page_count();

        let second = dm.write_node(&mut leaf(&[(b"a", b"2")])).unwrap();
        dm.set_root(second).unwrap();

        assert_eq!(dm.root(), Some(second));
        assert_eq!(dm.free_page_count(), free_before);
        assert_eq!(dm.free_page_ids().last(), Some(first));

        // Same root again: nothing is freed
        dm.set_root(second).unwrap();
        assert_eq!(dm.free_page_count(), free_before);
    }

    #[test]
    fn test_reopen_reconciles_orphans() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut dm = DiskManager::create(&path).unwrap();
            let a = dm.write_node(&mut leaf(&[(b"a", b"1")])).unwrap();
            let _orphan = dm.write_node(&mut leaf(&[(b"b", b"2")])).unwrap();
            let root = dm.write_node(&mut internal(&[(b"a", a)])).unwrap();
            dm.set_root(root).unwrap();
            let _leaked = dm.write_node(&mut leaf(&[(b"c", b"3")])).unwrap();
            dm.close().unwrap();
        }

        let dm = DiskManager::open(&path).unwrap();
        assert_eq!(dm.root(), Some(PageId::new(3)));
        // The fourth allocation dropped below the low-water mark and doubled the file
        assert_eq!(dm.page_count(), 16);

        let reachable = dm.reachable_pages().unwrap();
        assert_eq!(
            reachable.into_iter().collect::<Vec<_>>(),
            vec![PageId::new(1), PageId::new(3)]
        );
        let free: Vec<u64> = dm.free_page_ids().map(|p| p.index()).collect();
        let expected: Vec<u64> = std::iter::once(2).chain(4..16).collect();
        assert_eq!(free, expected);
    }

    #[test]
    fn test_read_node_rejects_meta_and_out_of_range() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("test.db")).unwrap();

        assert!(matches!(dm.read_node(PageId::META), Err(Error::InvalidPageId(0))));
        assert!(matches!(dm.read_node(PageId::new(8)), Err(Error::InvalidPageId(8))));
    }

    #[test]
    fn test_open_rejects_corrupt_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        DiskManager::create(&path).unwrap().close().unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[3] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            DiskManager::open(&path),
            Err(Error::CorruptMetadata(_))
        ));
    }

    #[test]
    fn test_open_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        fs::write(&path, [0u8; 100]).unwrap();

        assert!(matches!(
            DiskManager::open(&path),
            Err(Error::CorruptMetadata(_))
        ));
    }

    #[test]
    fn test_delete_store_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let dm = DiskManager::create(&path).unwrap();
        dm.delete_store().unwrap();
        assert!(!path.exists());
    }
}
