//! Error types for storage operations.

use std::io;
use thiserror::Error;

use crate::table::RowId;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A row could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The row does not exist.
    #[error("row {id} not found in table {table}")]
    RowNotFound {
        /// Table name.
        table: String,
        /// Row id that was requested.
        id: RowId,
    },

    /// Iteration was requested over an index the table never declared.
    #[error("table {table} has no index named {index}")]
    UnknownIndex {
        /// Table name.
        table: String,
        /// Requested index name.
        index: String,
    },

    /// The table was opened with a schema that conflicts with an earlier one.
    #[error("schema mismatch for table {0}")]
    SchemaMismatch(String),

    /// The store is closed.
    #[error("store is closed")]
    Closed,
}
