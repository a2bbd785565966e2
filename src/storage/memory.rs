//! In-memory row source with fault injection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::storage::source::{Row, RowSource, StorageError};

/// Which error a scheduled fault produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Query,
    Decode,
}

/// Rows held in memory, sorted by key.
///
/// Fetches can be delayed and the Nth fetch (1-based) can be made to fail,
/// which is how streaming failure paths are exercised end to end.
#[derive(Debug, Default)]
pub struct MemorySource {
    rows: Vec<Row>,
    delay: Option<Duration>,
    fail_on: Option<(usize, Fault)>,
    fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new(mut rows: Vec<Row>) -> Self {
        rows.sort_by_key(|r| r.key);
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Rows `1..=count`, each with a single text column `value-{key}`.
    pub fn with_keys(count: u64) -> Self {
        Self::new(
            (1..=count)
                .map(|k| Row::new(k, vec![format!("value-{}", k).into()]))
                .collect(),
        )
    }

    /// Sleep this long before answering each fetch.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the `nth` fetch (1-based) with the given fault.
    pub fn fail_on_fetch(mut self, nth: usize, fault: Fault) -> Self {
        self.fail_on = Some((nth, fault));
        self
    }

    /// Number of fetches issued so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RowSource for MemorySource {
    async fn fetch_after(&self, after: u64, limit: usize) -> Result<Vec<Row>, StorageError> {
        let nth = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.fail_on {
            Some((n, Fault::Query)) if n == nth => {
                return Err(StorageError::Query(format!("injected failure on fetch {}", nth)))
            }
            Some((n, Fault::Decode)) if n == nth => {
                return Err(StorageError::Decode(format!("injected failure on fetch {}", nth)))
            }
            _ => {}
        }

        let start = self.rows.partition_point(|r| r.key <= after);
        Ok(self.rows[start..].iter().take(limit).cloned().collect())
    }
}
