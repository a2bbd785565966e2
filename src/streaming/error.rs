//! Error types for a single streamed response.

use thiserror::Error;

use crate::storage::StorageError;

/// A row could not be represented in the target wire format.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("row {key} has {actual} columns, expected {expected}")]
    ColumnCount {
        key: u64,
        expected: usize,
        actual: usize,
    },

    #[error("row {key}: {reason}")]
    Unrepresentable { key: u64, reason: String },

    #[error("formatting failed")]
    Format(#[from] std::fmt::Error),
}

/// Failure on the response side of a stream.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The peer stopped reading; the body channel is gone.
    #[error("client disconnected")]
    Disconnected,

    /// Headers or status were changed after the first body byte.
    #[error("response head already committed")]
    HeadersCommitted,

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a stream stopped before exhausting its cursor.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The request's token was cancelled (shutdown deadline reached).
    #[error("stream cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl StreamError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::Cancelled => "cancelled",
            StreamError::Storage(StorageError::Decode(_)) => "decode",
            StreamError::Storage(_) => "query",
            StreamError::Encode(_) => "encode",
            StreamError::Write(_) => "write",
        }
    }
}
