//! Error types for bplusdb.

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in bplusdb.
///
/// # Severity
/// - `KeyNotFound` is an ordinary lookup miss.
/// - `CorruptNode` / `CorruptMetadata` mean the file violates its own
///   format. A [`BPlusTree`](crate::BPlusTree) that surfaces one of these
///   refuses further operations with `Poisoned`.
/// - `OutOfPages` / `Io` fail the triggering operation only.
/// - `KeyTooLarge` / `ValueTooLarge` are rejected before any page is touched.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from file or mapping operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested key is not stored in the tree.
    #[error("key not found")]
    KeyNotFound,

    /// A node page failed to decode.
    #[error("corrupt node: {0}")]
    CorruptNode(String),

    /// The metadata page is unreadable or inconsistent with the file.
    #[error("corrupt metadata: {0}")]
    CorruptMetadata(String),

    /// Growing the store file to make room for new pages failed.
    #[error("out of pages: {0}")]
    OutOfPages(#[source] std::io::Error),

    /// Attempted to resize the store file to fewer pages than it has.
    ///
    /// This indicates a bug - the page store only grows.
    #[error("cannot shrink store from {current} to {requested} pages")]
    ShrinkNotSupported { requested: u64, current: u64 },

    /// A key is too large to ever be stored.
    #[error("key of {size} bytes exceeds the {max} byte limit")]
    KeyTooLarge { size: usize, max: usize },

    /// A key/value pair is too large to fit alone in a leaf page.
    #[error("entry of {size} bytes exceeds the {max} byte limit")]
    ValueTooLarge { size: usize, max: usize },

    /// A node still exceeds one page after splitting; it was not written.
    #[error("node of {size} bytes does not fit in a page")]
    NodeOverflow { size: usize },

    /// A page index outside the node range of the file.
    #[error("invalid page id: {0}")]
    InvalidPageId(u64),

    /// Rejected construction-time parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The store hit corruption earlier and refuses further operations.
    #[error("store is poisoned by an earlier corruption error")]
    Poisoned,
}

impl Error {
    /// Whether this error means the on-disk format is violated.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::CorruptNode(_) | Error::CorruptMetadata(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidPageId(42);
        assert_eq!(format!("{}", err), "invalid page id: 42");

        let err = Error::ShrinkNotSupported {
            requested: 4,
            current: 8,
        };
        assert_eq!(format!("{}", err), "cannot shrink store from 8 to 4 pages");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        match err {
            Error::Io(_) => {} // Success
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_is_corruption() {
        assert!(Error::CorruptNode("bad".into()).is_corruption());
        assert!(Error::CorruptMetadata("bad".into()).is_corruption());
        assert!(!Error::KeyNotFound.is_corruption());
    }
}
