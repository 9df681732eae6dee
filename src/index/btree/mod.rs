//! B+Tree index implementation.
//!
//! - [`node`] - Node representation and its page encoding
//! - [`BPlusTree`] - Search, insert and delete over persisted nodes
//! - [`rebalance`] - The underflow hook on the delete path

pub mod node;
pub mod rebalance;
mod tree;

pub use node::{Node, NodeEntries, NodeKind};
pub use rebalance::{NoRebalance, UnderflowPolicy};
pub use tree::{BPlusTree, TreeStats};
