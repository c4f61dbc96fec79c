//! Error types for SamehadaDB.

use thiserror::Error as ThisError;

use crate::common::{PageId, Rid, TxnId};

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
/// This is a common Rust pattern (see `std::io::Result`).
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in SamehadaDB.
///
/// This enum represents every error that can occur in the database. By having
/// a single error type, we make error handling consistent across the storage
/// core and propagate cleanly up to the transaction manager, which is
/// responsible for turning page/lock-level failures into transaction aborts.
#[derive(Debug, ThisError)]
pub enum Error {
    /// I/O error from disk or log operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page does not exist on disk.
    #[error("page {0} not found")]
    PageNotFound(u32),

    /// Buffer pool has no free frames and cannot evict any pages.
    ///
    /// This happens when all frames are pinned.
    #[error("no free frames available in buffer pool")]
    NoFreeFrames,

    /// The provided page ID is invalid (e.g., exceeds max pages).
    #[error("invalid page id: {0}")]
    InvalidPageId(u32),

    /// Buffer pool is at maximum capacity.
    #[error("buffer pool is full")]
    BufferPoolFull,

    /// Attempted to unpin a page that wasn't pinned.
    #[error("page {0} is not pinned")]
    PageNotPinned(u32),

    /// Tuple/slot not found at the given RID, or a name lookup missed.
    /// Normal, non-fatal.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-index (key, value) pair already present.
    #[error("duplicate entry for key")]
    DuplicateEntry,

    /// Lock request refused: wound-wait victim, cycle victim, or
    /// already-shrinking transaction under strict 2PL.
    #[error("lock conflict, transaction {0:?} must abort")]
    LockConflictAbort(TxnId),

    /// Operation attempted on a committed/aborted/shrinking transaction.
    #[error("invalid transaction state for txn {0:?}")]
    TxnStateError(TxnId),

    /// A page's bytes failed checksum or structural validation.
    #[error("corrupted page {0}")]
    CorruptedPage(PageId),

    /// The log stream is malformed past a recoverable point.
    #[error("corrupted log: {0}")]
    CorruptedLog(String),

    /// The catalog root page cannot fit another table entry.
    #[error("catalog root page is full")]
    CatalogFull,

    /// Every slot across every bucket of a hash index is occupied.
    #[error("hash index is full")]
    IndexFull,

    /// `create_table` was asked to create a table that's already registered.
    #[error("table '{0}' already exists")]
    TableAlreadyExists(String),

    /// An index key's encoded form exceeds the hash index's fixed slot width.
    #[error("index key of {0} bytes exceeds the fixed key width")]
    KeyTooLong(usize),
}

impl Error {
    /// Build a [`Error::NotFound`] for a missing RID.
    pub fn rid_not_found(rid: Rid) -> Self {
        Error::NotFound(format!("rid {:?}", rid))
    }

    /// Build a [`Error::NotFound`] for an unknown table name.
    pub fn table_not_found(name: &str) -> Self {
        Error::NotFound(format!("table '{}'", name))
    }

    /// Build a [`Error::TableAlreadyExists`] for a `create_table` collision.
    pub fn table_already_exists(name: &str) -> Self {
        Error::TableAlreadyExists(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PageNotFound(42);
        assert_eq!(format!("{}", err), "page 42 not found");

        let err = Error::NoFreeFrames;
        assert_eq!(format!("{}", err), "no free frames available in buffer pool");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        match err {
            Error::Io(_) => {}
            _ => panic!("expected Io error"),
        }
    }

    #[test]
    fn test_result_type_alias() {
        fn might_fail() -> Result<u32> {
            Ok(42)
        }

        assert_eq!(might_fail().unwrap(), 42);
    }

    #[test]
    fn test_not_found_helpers() {
        let err = Error::table_not_found("users");
        assert!(format!("{}", err).contains("users"));
    }
}
