//! bplusdb - An on-disk, copy-on-write B+Tree key/value store.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            bplusdb                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              B+Tree Engine (index/btree/)               │   │
//! │  │     get / insert / delete, copy-on-write path writes    │   │
//! │  │          split on overflow, UnderflowPolicy hook        │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Node Codec (index/btree/node)            │   │
//! │  │      Node <-> one 4 KiB page, offset tables + payload   │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │               Page Store (storage/)                     │   │
//! │  │  DiskManager: mmap'd file, FIFO free pages, growth,     │   │
//! │  │  metadata page, orphan reconciliation on open           │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, Error, config)
//! - [`storage`] - Page store, metadata page and I/O counters
//! - [`index`] - The B+Tree and its node format
//!
//! # Quick Start
//! ```no_run
//! use bplusdb::BPlusTree;
//!
//! let mut tree = BPlusTree::open("my_store.db").unwrap();
//! tree.insert(b"hello", b"world").unwrap();
//! assert_eq!(tree.get(b"hello").unwrap(), b"world");
//! tree.close().unwrap();
//! ```

pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::{TreeConfig, PAGE_SIZE};
pub use common::{Error, PageId, Result};

pub use index::btree::{BPlusTree, NoRebalance, Node, NodeEntries, NodeKind, TreeStats, UnderflowPolicy};
pub use storage::page::MetaPage;
pub use storage::{DiskManager, StatsSnapshot, StoreStats};
