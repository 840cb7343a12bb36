//! Error types for the sync engine.

use std::fmt;
use thiserror::Error;
use tidesync_protocol::ProtocolError;
use tidesync_storage::StorageError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local durable store operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Network or server-side failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Local application of a fetched batch failed.
    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Envelope could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A stored row could not be read back.
    #[error("corrupt row {id} in table {table}: {message}")]
    CorruptRow {
        /// Table name.
        table: &'static str,
        /// Row id.
        id: u64,
        /// Decoding failure.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No async runtime is available to drive the scheduler.
    #[error("no tokio runtime available: {0}")]
    Runtime(String),

    /// The component was stopped while the cycle was in flight.
    #[error("sync stopped")]
    Stopped,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Storage(_) | SyncError::Apply(_) => true,
            _ => false,
        }
    }
}

/// Failure to apply one remote item locally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("item {index}: {message}")]
pub struct ApplyError {
    /// Position of the item within the fetched batch.
    pub index: usize,
    /// Failure description.
    pub message: String,
}

impl ApplyError {
    /// Creates an apply error for the item at `index`.
    pub fn new(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            message: message.into(),
        }
    }
}

/// Subsystem tag attached to every reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorTag {
    /// Outbound queue storage failures.
    SyncQueue,
    /// Outbound transport failures.
    SyncRequest,
    /// Inbound polling failures of any kind.
    CheckingUpdates,
}

impl ErrorTag {
    /// Returns the wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::SyncQueue => "sync-queue",
            ErrorTag::SyncRequest => "sync-request",
            ErrorTag::CheckingUpdates => "checking-updates",
        }
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
