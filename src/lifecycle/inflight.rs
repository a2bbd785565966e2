//! In-flight stream tracking for graceful shutdown.
//!
//! # Responsibilities
//! - Generate unique stream IDs for tracing
//! - Count streams that are still producing a body
//! - Let the supervisor wait until that count drains to zero

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Global atomic counter for stream IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static STREAM_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for one streamed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    /// Generate a new unique stream ID.
    pub fn new() -> Self {
        Self(STREAM_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Counts active streams. Clones share the count.
#[derive(Debug, Clone)]
pub struct InFlightTracker {
    active: Arc<watch::Sender<u64>>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    /// Record a new stream. The returned guard ends it on drop.
    pub fn track(&self) -> StreamGuard {
        self.active.send_modify(|n| *n += 1);
        StreamGuard {
            active: Arc::clone(&self.active),
            id: StreamId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Resolve once no stream is active.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by a stream for as long as it produces a body.
#[derive(Debug)]
pub struct StreamGuard {
    active: Arc<watch::Sender<u64>>,
    id: StreamId,
}

impl StreamGuard {
    pub fn id(&self) -> StreamId {
        self.id
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(stream_id = %self.id, "Stream finished");
    }
}
