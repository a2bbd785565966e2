//! Synthetic row source producing the keys `1..=len`.

use async_trait::async_trait;

use crate::storage::source::{Row, RowSource, StorageError};

/// Bounded integer sequence served without any backing store.
#[derive(Debug, Clone, Copy)]
pub struct SequenceSource {
    len: u64,
}

impl SequenceSource {
    pub fn new(len: u64) -> Self {
        Self { len }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[async_trait]
impl RowSource for SequenceSource {
    async fn fetch_after(&self, after: u64, limit: usize) -> Result<Vec<Row>, StorageError> {
        if after >= self.len {
            return Ok(Vec::new());
        }
        let end = after.saturating_add(limit as u64).min(self.len);
        Ok((after + 1..=end).map(Row::bare).collect())
    }
}
