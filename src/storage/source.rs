//! Row model and the paginated query contract.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// A single column value as read from a row source.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Real(f64),
    Text(String),
    Null,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Real(x) => write!(f, "{}", x),
            Value::Text(s) => f.write_str(s),
            Value::Null => Ok(()),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// A row keyed by a monotonically increasing identifier.
///
/// `columns` holds every selected column after the key, in query order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: u64,
    pub columns: Vec<Value>,
}

impl Row {
    pub fn new(key: u64, columns: Vec<Value>) -> Self {
        Self { key, columns }
    }

    /// A row with no columns besides its key.
    pub fn bare(key: u64) -> Self {
        Self {
            key,
            columns: Vec::new(),
        }
    }
}

/// Per-request storage failures. Neither variant is retried.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The query itself failed (connection lost, bad statement, timeout).
    #[error("query failed: {0}")]
    Query(String),

    /// A returned row could not be decoded into a [`Row`].
    #[error("failed to decode row: {0}")]
    Decode(String),

    /// Releasing the handle failed. Only reported at shutdown.
    #[error("failed to close storage: {0}")]
    Close(String),
}

/// Failure to bring a storage handle up at boot.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("storage is disabled by configuration")]
    Disabled,

    #[error("failed to open {connection}: {reason}")]
    Open { connection: String, reason: String },

    #[error("failed to probe table {table}: {reason}")]
    Probe { table: String, reason: String },

    #[error("invalid storage configuration: {0}")]
    Config(String),
}

/// A paginated data source queried by key.
///
/// Implementations must be safe to call from many requests at once.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Fetch at most `limit` rows whose key is strictly greater than `after`,
    /// ordered by key ascending.
    async fn fetch_after(&self, after: u64, limit: usize) -> Result<Vec<Row>, StorageError>;
}
