//! Storage layer - the page store and page formats.
//!
//! This module handles persistent storage:
//! - [`DiskManager`] - Page allocation, node I/O and the root pointer
//! - [`page`] - The metadata page layout
//! - [`StoreStats`] - I/O counters

mod disk_manager;
pub mod page;
mod stats;

pub use disk_manager::DiskManager;
pub use stats::{StatsSnapshot, StoreStats};
