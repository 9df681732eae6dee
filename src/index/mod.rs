//! Index structures.
//!
//! - [`btree`] - The disk-backed B+Tree

pub mod btree;
