//! B+Tree node encoding.
//!
//! A [`Node`] is the decoded form of one tree page. The codec is
//! bit-exact and invertible: `Node::decode(&encoded) == node` for every node
//! that fits in a page.
//!
//! # Page Layout
//! All integers are big-endian and unsigned.
//! ```text
//! Offset            Size          Field
//! ------            ----          -----
//! 0                 1             kind (0 = internal, 1 = leaf)
//! 1                 2             entry count N
//! 3                 (N+1) × 2     key offsets, k[0] = 0, k[N] = total key bytes
//! 3 + (N+1)×2       (N+1) × 2     value offsets, v[0] = k[N]
//! 3 + (N+1)×4       k[N]          concatenated keys
//! ...               v[N] - k[N]   concatenated values (leaf) or
//!                                 N × 8-byte child addresses (internal)
//! ```
//! Every offset is relative to the start of the key blob, so entry `i` has
//! key `data[k[i]..k[i+1]]` and value `data[v[i]..v[i+1]]`.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::common::config::{CHILD_POINTER_SIZE, NODE_HEADER_SIZE, PAGE_SIZE};
use crate::common::{Error, PageId, Result};

/// On-disk node discriminator.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Separator keys pointing at child pages.
    Internal = 0,
    /// Keys with their values.
    Leaf = 1,
}

impl NodeKind {
    /// Convert from the kind byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(NodeKind::Internal),
            1 => Some(NodeKind::Leaf),
            _ => None,
        }
    }
}

/// Sorted node contents, tagged by kind.
///
/// In an internal node each separator equals the minimum key reachable
/// through its child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEntries {
    Internal(BTreeMap<Vec<u8>, PageId>),
    Leaf(BTreeMap<Vec<u8>, Vec<u8>>),
}

/// A decoded tree node plus the page it was read from or written to.
///
/// `page` is `None` until the node is first persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    page: Option<PageId>,
    entries: NodeEntries,
}

impl Node {
    /// An empty, unpersisted leaf.
    pub fn new_leaf() -> Self {
        Self::from_entries(NodeEntries::Leaf(BTreeMap::new()))
    }

    /// An empty, unpersisted internal node.
    pub fn new_internal() -> Self {
        Self::from_entries(NodeEntries::Internal(BTreeMap::new()))
    }

    /// Wrap existing contents in an unpersisted node.
    pub fn from_entries(entries: NodeEntries) -> Self {
        Self {
            page: None,
            entries,
        }
    }

    #[inline]
    pub fn page(&self) -> Option<PageId> {
        self.page
    }

    #[inline]
    pub(crate) fn set_page(&mut self, page: PageId) {
        self.page = Some(page);
    }

    #[inline]
    pub fn entries(&self) -> &NodeEntries {
        &self.entries
    }

    #[inline]
    pub fn entries_mut(&mut self) -> &mut NodeEntries {
        &mut self.entries
    }

    pub fn kind(&self) -> NodeKind {
        match self.entries {
            NodeEntries::Internal(_) => NodeKind::Internal,
            NodeEntries::Leaf(_) => NodeKind::Leaf,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.kind() == NodeKind::Leaf
    }

    pub fn len(&self) -> usize {
        match &self.entries {
            NodeEntries::Internal(map) => map.len(),
            NodeEntries::Leaf(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest key in the node, which is also the smallest key of its
    /// subtree.
    pub fn min_key(&self) -> Option<&[u8]> {
        match &self.entries {
            NodeEntries::Internal(map) => map.keys().next().map(Vec::as_slice),
            NodeEntries::Leaf(map) => map.keys().next().map(Vec::as_slice),
        }
    }

    /// Value stored under `key` in a leaf. Always `None` for internal nodes.
    pub fn value(&self, key: &[u8]) -> Option<&[u8]> {
        match &self.entries {
            NodeEntries::Leaf(map) => map.get(key).map(Vec::as_slice),
            NodeEntries::Internal(_) => None,
        }
    }

    /// The entry with the greatest separator `<= key` in an internal node.
    ///
    /// Returns `None` for leaves and when `key` sorts before every separator.
    pub fn child_for(&self, key: &[u8]) -> Option<(&[u8], PageId)> {
        match &self.entries {
            NodeEntries::Internal(map) => map
                .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
                .next_back()
                .map(|(separator, child)| (separator.as_slice(), *child)),
            NodeEntries::Leaf(_) => None,
        }
    }

    /// The leftmost entry of an internal node.
    pub fn first_child(&self) -> Option<(&[u8], PageId)> {
        match &self.entries {
            NodeEntries::Internal(map) => map
                .iter()
                .next()
                .map(|(separator, child)| (separator.as_slice(), *child)),
            NodeEntries::Leaf(_) => None,
        }
    }

    /// Child pages of an internal node, in key order.
    pub fn children(&self) -> Vec<PageId> {
        match &self.entries {
            NodeEntries::Internal(map) => map.values().copied().collect(),
            NodeEntries::Leaf(_) => Vec::new(),
        }
    }

    /// Exact number of bytes [`encode_into`](Self::encode_into) writes.
    pub fn encoded_size(&self) -> usize {
        let n = self.len();
        let payload: usize = match &self.entries {
            NodeEntries::Internal(map) => map.keys().map(|k| k.len() + CHILD_POINTER_SIZE).sum(),
            NodeEntries::Leaf(map) => map.iter().map(|(k, v)| k.len() + v.len()).sum(),
        };
        NODE_HEADER_SIZE + 2 * offsets_size(n) + payload
    }

    /// Whether the node must be split before it may be written: it does not
    /// fit in a page, or an internal node has reached `branching_factor`
    /// children.
    pub fn needs_split(&self, branching_factor: usize) -> bool {
        if self.encoded_size() > PAGE_SIZE {
            return true;
        }
        matches!(&self.entries, NodeEntries::Internal(map) if map.len() >= branching_factor)
    }

    /// Split into two unpersisted nodes of the same kind.
    ///
    /// The pivot starts at `len / 2`. While the half on one side of it does
    /// not fit in a page, the pivot moves one entry away from that side,
    /// stopping when the half is down to a single entry.
    ///
    /// # Panics
    /// Panics if the node has fewer than two entries.
    pub fn split_in_two(self) -> (Node, Node) {
        assert!(self.len() >= 2, "cannot split a node with fewer than 2 entries");
        let mid = self.split_pivot();

        match self.entries {
            NodeEntries::Internal(mut first) => {
                let second = split_map_at(&mut first, mid);
                (
                    Node::from_entries(NodeEntries::Internal(first)),
                    Node::from_entries(NodeEntries::Internal(second)),
                )
            }
            NodeEntries::Leaf(mut first) => {
                let second = split_map_at(&mut first, mid);
                (
                    Node::from_entries(NodeEntries::Leaf(first)),
                    Node::from_entries(NodeEntries::Leaf(second)),
                )
            }
        }
    }

    fn split_pivot(&self) -> usize {
        let payloads: Vec<usize> = match &self.entries {
            NodeEntries::Internal(map) => map.keys().map(|k| k.len() + CHILD_POINTER_SIZE).collect(),
            NodeEntries::Leaf(map) => map.iter().map(|(k, v)| k.len() + v.len()).collect(),
        };
        let fits = |part: &[usize]| {
            NODE_HEADER_SIZE + 2 * offsets_size(part.len()) + part.iter().sum::<usize>() <= PAGE_SIZE
        };

        let n = payloads.len();
        let mut mid = n / 2;
        if !fits(&payloads[..mid]) {
            while mid > 1 && !fits(&payloads[..mid]) {
                mid -= 1;
            }
        } else {
            while mid < n - 1 && !fits(&payloads[mid..]) {
                mid += 1;
            }
        }
        mid
    }

    /// Encode into the start of `buf`, returning the number of bytes written.
    ///
    /// # Errors
    /// `Error::NodeOverflow` if the encoding is larger than `buf`.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.encoded_size();
        if size > buf.len() || size > PAGE_SIZE {
            return Err(Error::NodeOverflow { size });
        }

        let n = self.len();
        buf[0] = self.kind() as u8;
        buf[1..3].copy_from_slice(&(n as u16).to_be_bytes());

        let key_offsets_at = NODE_HEADER_SIZE;
        let value_offsets_at = key_offsets_at + offsets_size(n);
        let data_at = value_offsets_at + offsets_size(n);

        let keys: Vec<&[u8]> = match &self.entries {
            NodeEntries::Internal(map) => map.keys().map(Vec::as_slice).collect(),
            NodeEntries::Leaf(map) => map.keys().map(Vec::as_slice).collect(),
        };

        let mut cursor = 0usize;
        write_u16(buf, key_offsets_at, 0);
        for (i, key) in keys.iter().enumerate() {
            buf[data_at + cursor..data_at + cursor + key.len()].copy_from_slice(key);
            cursor += key.len();
            write_u16(buf, key_offsets_at + (i + 1) * 2, cursor as u16);
        }

        write_u16(buf, value_offsets_at, cursor as u16);
        let mut put_value = |i: usize, bytes: &[u8], cursor: &mut usize| {
            buf[data_at + *cursor..data_at + *cursor + bytes.len()].copy_from_slice(bytes);
            *cursor += bytes.len();
            write_u16(buf, value_offsets_at + (i + 1) * 2, *cursor as u16);
        };
        match &self.entries {
            NodeEntries::Internal(map) => {
                for (i, child) in map.values().enumerate() {
                    put_value(i, &child.address().to_be_bytes(), &mut cursor);
                }
            }
            NodeEntries::Leaf(map) => {
                for (i, value) in map.values().enumerate() {
                    put_value(i, value, &mut cursor);
                }
            }
        }

        debug_assert_eq!(data_at + cursor, size);
        Ok(size)
    }

    /// Decode a node from the start of `buf`. The result has no page set.
    ///
    /// # Errors
    /// `Error::CorruptNode` if the kind byte is unknown, offsets are
    /// non-monotonic or run past `buf`, a child pointer is not a valid node
    /// address, or keys are not strictly increasing.
    pub fn decode(buf: &[u8]) -> Result<Node> {
        if buf.len() < NODE_HEADER_SIZE {
            return Err(corrupt(format!("buffer of {} bytes has no header", buf.len())));
        }

        let kind = NodeKind::from_u8(buf[0])
            .ok_or_else(|| corrupt(format!("unknown node kind {}", buf[0])))?;
        let n = read_u16(buf, 1) as usize;

        let key_offsets_at = NODE_HEADER_SIZE;
        let value_offsets_at = key_offsets_at + offsets_size(n);
        let data_at = value_offsets_at + offsets_size(n);
        if data_at > buf.len() {
            return Err(corrupt(format!("{n} entries overflow the offset tables")));
        }

        let key_offsets = read_offsets(buf, key_offsets_at, n);
        let value_offsets = read_offsets(buf, value_offsets_at, n);

        if key_offsets[0] != 0 {
            return Err(corrupt(format!("first key offset is {}", key_offsets[0])));
        }
        if value_offsets[0] != key_offsets[n] {
            return Err(corrupt(format!(
                "values start at {} but keys end at {}",
                value_offsets[0], key_offsets[n]
            )));
        }
        check_monotonic(&key_offsets, "key")?;
        check_monotonic(&value_offsets, "value")?;
        if data_at + value_offsets[n] > buf.len() {
            return Err(corrupt(format!(
                "entries end at byte {} past buffer of {}",
                data_at + value_offsets[n],
                buf.len()
            )));
        }

        let data = &buf[data_at..];
        let key = |i: usize| span(data, &key_offsets, i);
        let value = |i: usize| span(data, &value_offsets, i);

        for i in 1..n {
            if key(i - 1) >= key(i) {
                return Err(corrupt(format!("keys not strictly increasing at entry {i}")));
            }
        }

        let entries = match kind {
            NodeKind::Leaf => NodeEntries::Leaf(
                (0..n).map(|i| (key(i).to_vec(), value(i).to_vec())).collect(),
            ),
            NodeKind::Internal => {
                let mut map = BTreeMap::new();
                for i in 0..n {
                    map.insert(key(i).to_vec(), decode_child(value(i))?);
                }
                NodeEntries::Internal(map)
            }
        };

        Ok(Node::from_entries(entries))
    }
}

fn split_map_at<V>(map: &mut BTreeMap<Vec<u8>, V>, mid: usize) -> BTreeMap<Vec<u8>, V> {
    match map.keys().nth(mid).cloned() {
        Some(pivot) => map.split_off(&pivot),
        None => BTreeMap::new(),
    }
}

#[inline]
fn span<'a>(data: &'a [u8], offsets: &[usize], i: usize) -> &'a [u8] {
    &data[offsets[i]..offsets[i + 1]]
}

fn decode_child(bytes: &[u8]) -> Result<PageId> {
    if bytes.len() != CHILD_POINTER_SIZE {
        return Err(corrupt(format!("child pointer of {} bytes", bytes.len())));
    }
    let mut raw = [0u8; CHILD_POINTER_SIZE];
    raw.copy_from_slice(bytes);
    let address = u64::from_be_bytes(raw);

    match PageId::from_address(address) {
        Some(child) if !child.is_meta() => Ok(child),
        _ => Err(corrupt(format!("invalid child address {address}"))),
    }
}

/// Bytes used by one offset table of a node with `n` entries.
#[inline]
fn offsets_size(n: usize) -> usize {
    (n + 1) * 2
}

fn read_offsets(buf: &[u8], at: usize, n: usize) -> Vec<usize> {
    (0..=n).map(|i| read_u16(buf, at + i * 2) as usize).collect()
}

fn check_monotonic(offsets: &[usize], what: &str) -> Result<()> {
    match offsets.windows(2).position(|pair| pair[0] > pair[1]) {
        Some(i) => Err(corrupt(format!("{what} offsets decrease at entry {i}"))),
        None => Ok(()),
    }
}

#[inline]
fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

#[inline]
fn write_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

fn corrupt(msg: String) -> Error {
    Error::CorruptNode(msg)
}
