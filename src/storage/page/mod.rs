//! On-disk page formats.
//!
//! Node pages are laid out by the codec in
//! [`index::btree::node`](crate::index::btree::node). This module holds the
//! one page the store formats itself:
//! - [`MetaPage`] - The decoded metadata page (page 0)

mod meta_page;

pub use meta_page::MetaPage;
