//! Keyset pagination over a [`RowSource`].
//!
//! The cursor remembers the last key it handed out and asks for rows strictly
//! after it. Unlike offset pagination this neither skips nor repeats rows
//! when the source gains rows concurrently.

use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::storage::{Row, RowSource, StorageError};
use crate::streaming::error::StreamError;

/// Rows returned by one page fetch, in strictly increasing key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    rows: Vec<Row>,
}

impl Batch {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last_key(&self) -> Option<u64> {
        self.rows.last().map(|r| r.key)
    }
}

/// Sequential page cursor for one request.
pub struct PageCursor {
    source: Arc<dyn RowSource>,
    low_watermark: u64,
    page_size: NonZeroUsize,
    exhausted: bool,
    pages: u64,
}

impl PageCursor {
    /// Start before the first key.
    pub fn new(source: Arc<dyn RowSource>, page_size: NonZeroUsize) -> Self {
        Self::starting_after(source, 0, page_size)
    }

    /// Resume after a previously observed watermark.
    pub fn starting_after(source: Arc<dyn RowSource>, key: u64, page_size: NonZeroUsize) -> Self {
        Self {
            source,
            low_watermark: key,
            page_size,
            exhausted: false,
            pages: 0,
        }
    }

    /// Fetch the next page.
    ///
    /// Fails with [`StreamError::Cancelled`] without touching the source if
    /// `token` is already cancelled, and aborts an in-progress query when it
    /// is cancelled meanwhile. On success the watermark advances to the last
    /// key of the page and a short page marks the cursor exhausted.
    pub async fn next_page(&mut self, token: &CancellationToken) -> Result<Batch, StreamError> {
        if token.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        if self.exhausted {
            return Ok(Batch::default());
        }

        let limit = self.page_size.get();
        let rows = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(StreamError::Cancelled),
            rows = self.source.fetch_after(self.low_watermark, limit) => rows?,
        };
        self.pages += 1;

        if rows.len() > limit {
            return Err(StorageError::Decode(format!(
                "page returned {} rows, limit was {}",
                rows.len(),
                limit
            ))
            .into());
        }

        let mut previous = self.low_watermark;
        for row in &rows {
            if row.key <= previous {
                return Err(StorageError::Decode(format!(
                    "key {} does not follow {}",
                    row.key, previous
                ))
                .into());
            }
            previous = row.key;
        }

        self.low_watermark = previous;
        self.exhausted = rows.len() < limit;

        tracing::trace!(
            page = self.pages,
            rows = rows.len(),
            watermark = self.low_watermark,
            exhausted = self.exhausted,
            "Fetched page"
        );

        Ok(Batch::new(rows))
    }

    /// Last key handed out; a valid resumption point.
    pub fn low_watermark(&self) -> u64 {
        self.low_watermark
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::Fault;
    use crate::storage::MemorySource;
    use async_trait::async_trait;

    fn page(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn pages_300_rows_by_128() {
        let source = Arc::new(MemorySource::with_keys(300));
        let mut cursor = PageCursor::new(source.clone(), page(128));
        let token = CancellationToken::new();

        let mut sizes = Vec::new();
        while !cursor.is_exhausted() {
            sizes.push(cursor.next_page(&token).await.unwrap().len());
        }

        assert_eq!(sizes, vec![128, 128, 44]);
        assert_eq!(cursor.low_watermark(), 300);
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test]
    async fn exact_multiple_needs_an_empty_page() {
        let source = Arc::new(MemorySource::with_keys(256));
        let mut cursor = PageCursor::new(source.clone(), page(128));
        let token = CancellationToken::new();

        assert_eq!(cursor.next_page(&token).await.unwrap().len(), 128);
        assert_eq!(cursor.next_page(&token).await.unwrap().len(), 128);
        assert!(!cursor.is_exhausted());

        let last = cursor.next_page(&token).await.unwrap();
        assert!(last.is_empty());
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.low_watermark(), 256);
    }

    #[tokio::test]
    async fn cancelled_token_skips_io() {
        let source = Arc::new(MemorySource::with_keys(10));
        let mut cursor = PageCursor::new(source.clone(), page(4));
        let token = CancellationToken::new();
        token.cancel();

        assert!(matches!(
            cursor.next_page(&token).await,
            Err(StreamError::Cancelled)
        ));
        assert_eq!(source.fetch_count(), 0);
        assert_eq!(cursor.low_watermark(), 0);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_watermark() {
        let source = Arc::new(MemorySource::with_keys(10).fail_on_fetch(2, Fault::Query));
        let mut cursor = PageCursor::new(source, page(4));
        let token = CancellationToken::new();

        cursor.next_page(&token).await.unwrap();
        assert!(matches!(
            cursor.next_page(&token).await,
            Err(StreamError::Storage(StorageError::Query(_)))
        ));
        assert_eq!(cursor.low_watermark(), 4);
    }

    #[tokio::test]
    async fn resumes_after_watermark() {
        let source = Arc::new(MemorySource::with_keys(10));
        let mut cursor = PageCursor::starting_after(source, 7, page(4));
        let batch = cursor.next_page(&CancellationToken::new()).await.unwrap();
        assert_eq!(batch.last_key(), Some(10));
        assert_eq!(batch.len(), 3);
        assert!(cursor.is_exhausted());
    }

    struct Unordered;

    #[async_trait]
    impl RowSource for Unordered {
        async fn fetch_after(&self, _after: u64, _limit: usize) -> Result<Vec<Row>, StorageError> {
            Ok(vec![Row::bare(3), Row::bare(2)])
        }
    }

    #[tokio::test]
    async fn out_of_order_page_is_decode_error() {
        let mut cursor = PageCursor::new(Arc::new(Unordered), page(8));
        assert!(matches!(
            cursor.next_page(&CancellationToken::new()).await,
            Err(StreamError::Storage(StorageError::Decode(_)))
        ));
        assert_eq!(cursor.low_watermark(), 0);
    }
}
