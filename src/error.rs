//! Error types for the index engine.

use crate::types::PageId;
use thiserror::Error;

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors that can occur in the index engine
#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page was not found
    #[error("Page {0} not found")]
    PageNotFound(PageId),

    /// Open or drop of an index name the registry does not know
    #[error("Index '{0}' not found")]
    IndexNotFound(String),

    /// Create of an index name that is already registered
    #[error("Index '{0}' already exists")]
    IndexAlreadyExists(String),

    /// Caller passed an argument the operation cannot accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A structural property of the tree failed verification
    #[error("Invariant violated: {0}")]
    InvariantViolated(String),

    /// Buffer pool has no available frames
    #[error("Buffer pool exhausted: no available frames")]
    BufferPoolExhausted,

    /// Data corruption detected (e.g., checksum mismatch)
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Database file is corrupted or has invalid format
    #[error("Invalid database file: {0}")]
    InvalidDatabaseFile(String),
}

impl IndexError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an invariant violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolated(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an invalid database file error
    pub fn invalid_db(msg: impl Into<String>) -> Self {
        Self::InvalidDatabaseFile(msg.into())
    }
}
