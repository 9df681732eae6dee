//! The metadata page (page 0).

use crate::common::{Error, PageId, Result};

/// Decoded contents of page 0.
///
/// # Layout (20 bytes, rest of the page zero)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       8     page_count (big-endian u64)
/// 8       8     root byte address (big-endian u64, 0 = empty tree)
/// 16      4     checksum (CRC32 of bytes 0..16, big-endian)
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetaPage {
    /// Number of pages in the file, metadata page included.
    pub page_count: u64,
    /// Current root node, `None` before the first root is written.
    pub root: Option<PageId>,
}

impl MetaPage {
    /// Number of meaningful bytes at the start of page 0.
    pub const SIZE: usize = 20;

    pub const OFFSET_PAGE_COUNT: usize = 0;
    pub const OFFSET_ROOT: usize = 8;
    pub const OFFSET_CHECKSUM: usize = 16;

    /// Create metadata for a store with `page_count` pages and no root.
    pub fn new(page_count: u64) -> Self {
        Self {
            page_count,
            root: None,
        }
    }

    /// Decode and validate the metadata at the start of `data`.
    ///
    /// # Errors
    /// `Error::CorruptMetadata` if the buffer is short, the checksum does not
    /// match, or the root address is misaligned, points at page 0 or lies
    /// past `page_count`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::CorruptMetadata(format!(
                "metadata page truncated to {} bytes",
                data.len()
            )));
        }

        let stored = read_u32(data, Self::OFFSET_CHECKSUM);
        let computed = Self::compute_checksum(data);
        if stored != computed {
            return Err(Error::CorruptMetadata(format!(
                "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }

        let page_count = read_u64(data, Self::OFFSET_PAGE_COUNT);
        if page_count < 2 {
            return Err(Error::CorruptMetadata(format!(
                "page count {page_count} leaves no room for nodes"
            )));
        }

        let root_address = read_u64(data, Self::OFFSET_ROOT);
        let root = if root_address == 0 {
            None
        } else {
            let root = PageId::from_address(root_address).ok_or_else(|| {
                Error::CorruptMetadata(format!("misaligned root address {root_address}"))
            })?;
            if root.index() >= page_count {
                return Err(Error::CorruptMetadata(format!(
                    "root {root} beyond page count {page_count}"
                )));
            }
            Some(root)
        };

        Ok(Self { page_count, root })
    }

    /// Write this metadata (with a fresh checksum) to the start of `data`.
    ///
    /// # Panics
    /// Panics if `data.len() < MetaPage::SIZE`.
    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= Self::SIZE, "buffer too small for MetaPage");

        data[Self::OFFSET_PAGE_COUNT..Self::OFFSET_PAGE_COUNT + 8]
            .copy_from_slice(&self.page_count.to_be_bytes());

        let root_address = self.root.map_or(0, |root| root.address());
        data[Self::OFFSET_ROOT..Self::OFFSET_ROOT + 8].copy_from_slice(&root_address.to_be_bytes());

        let checksum = Self::compute_checksum(data);
        data[Self::OFFSET_CHECKSUM..Self::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&checksum.to_be_bytes());
    }

    /// CRC32 over the page count and root fields.
    pub fn compute_checksum(data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data[..Self::OFFSET_CHECKSUM]);
        hasher.finalize()
    }
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}
