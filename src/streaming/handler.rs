//! Drives a cursor and an encoder against a live response sink.
//!
//! # Protocol
//! ```text
//! set Content-Type / Content-Disposition
//!     → write preamble (if the encoder has one)
//!     → loop: next_page → stop on empty page
//!             encode → write → stop once the cursor is exhausted
//!     → finish (success) | error status (nothing sent) | abort (body cut short)
//! ```
//!
//! Pages are strictly sequential: page N+1 is not requested until page N
//! has been handed to the sink, so memory stays bounded by one page plus the
//! sink's buffer.

use std::time::Instant;

use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::streaming::cursor::PageCursor;
use crate::streaming::encoder::StreamEncoder;
use crate::streaming::error::StreamError;
use crate::streaming::sink::ResponseSink;

/// Counters for one streamed response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Page fetches issued, including a final empty one.
    pub pages: u64,
    /// Rows encoded and handed to the sink.
    pub rows: u64,
    /// Body bytes accepted by the sink, preamble included.
    pub bytes: u64,
    /// Cursor watermark when the stream ended.
    pub watermark: u64,
}

/// How a stream ended.
#[derive(Debug)]
pub enum StreamOutcome {
    /// Every row was written and the body ended normally.
    Completed(StreamSummary),
    /// Failed before the head was committed; the client got a 500.
    Rejected(StreamError),
    /// Failed after the head was committed; the body was torn down.
    Truncated {
        summary: StreamSummary,
        error: StreamError,
    },
}

impl StreamOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StreamOutcome::Completed(_) => "completed",
            StreamOutcome::Rejected(_) => "rejected",
            StreamOutcome::Truncated { .. } => "truncated",
        }
    }
}

/// One downloadable stream: an encoder plus response framing.
pub struct StreamingHandler<E> {
    route: &'static str,
    encoder: E,
    disposition: HeaderValue,
}

impl<E: StreamEncoder> StreamingHandler<E> {
    /// `route` labels logs and metrics; `filename` names the attachment.
    pub fn new(route: &'static str, encoder: E, filename: &str) -> Self {
        let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
        Self {
            route,
            encoder,
            disposition,
        }
    }

    /// Run the stream to completion or failure and close the sink accordingly.
    ///
    /// `token` is checked before every page; cancelling it never interrupts
    /// a batch that is already being written.
    pub async fn execute<S: ResponseSink>(
        &self,
        mut cursor: PageCursor,
        mut sink: S,
        token: CancellationToken,
    ) -> StreamOutcome {
        let started = Instant::now();
        let mut summary = StreamSummary::default();

        let result = self
            .stream(&mut cursor, &mut sink, &token, &mut summary)
            .await;
        summary.bytes = sink.bytes_written();
        summary.watermark = cursor.low_watermark();

        let outcome = match result {
            Ok(()) => {
                sink.finish().await;
                tracing::info!(
                    route = self.route,
                    pages = summary.pages,
                    rows = summary.rows,
                    bytes = summary.bytes,
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Stream completed"
                );
                StreamOutcome::Completed(summary)
            }
            Err(error) if !sink.is_committed() => {
                tracing::warn!(
                    route = self.route,
                    error = %error,
                    "Stream failed before first byte"
                );
                if let Err(e) = sink.set_status(StatusCode::INTERNAL_SERVER_ERROR) {
                    tracing::debug!(error = %e, "Could not set error status");
                }
                sink.finish().await;
                StreamOutcome::Rejected(error)
            }
            Err(error) => {
                tracing::error!(
                    route = self.route,
                    error = %error,
                    kind = error.kind(),
                    rows = summary.rows,
                    bytes = summary.bytes,
                    watermark = summary.watermark,
                    "Stream failed mid-body, closing connection"
                );
                sink.abort(&error).await;
                StreamOutcome::Truncated { summary, error }
            }
        };

        metrics::record_stream(self.route, &outcome, &summary);
        outcome
    }

    async fn stream<S: ResponseSink>(
        &self,
        cursor: &mut PageCursor,
        sink: &mut S,
        token: &CancellationToken,
        summary: &mut StreamSummary,
    ) -> Result<(), StreamError> {
        sink.set_header(
            CONTENT_TYPE,
            HeaderValue::from_static(self.encoder.content_type()),
        )?;
        sink.set_header(CONTENT_DISPOSITION, self.disposition.clone())?;

        if let Some(preamble) = self.encoder.preamble() {
            write_or_cancel(sink, preamble, token).await?;
        }

        loop {
            let batch = cursor.next_page(token).await?;
            summary.pages += 1;
            tracing::debug!(
                route = self.route,
                page = summary.pages,
                rows = batch.len(),
                watermark = cursor.low_watermark(),
                "Streaming page"
            );
            if batch.is_empty() {
                break;
            }

            let bytes = self.encoder.encode_batch(&batch)?;
            write_or_cancel(sink, bytes, token).await?;
            summary.rows += batch.len() as u64;

            if cursor.is_exhausted() {
                break;
            }
        }

        Ok(())
    }
}

/// Hand `bytes` to the sink unless `token` is cancelled while the sink is
/// applying backpressure. A write that can complete always does.
async fn write_or_cancel<S: ResponseSink>(
    sink: &mut S,
    bytes: Bytes,
    token: &CancellationToken,
) -> Result<(), StreamError> {
    tokio::select! {
        biased;
        written = sink.write(bytes) => Ok(written?),
        _ = token.cancelled() => Err(StreamError::Cancelled),
    }
}
