//! Response sinks: a byte sink with header and status primitives.
//!
//! # Design Decisions
//! - Status and headers are mutable only until the head is committed
//! - The head commits on the first body write, or on `finish` if nothing was
//!   written
//! - After commit the only failure signal left is tearing the body down;
//!   no trailer or in-band marker is written

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::Stream;

use crate::streaming::error::{StreamError, WriteError};

/// Destination of one streamed response.
#[async_trait]
pub trait ResponseSink: Send {
    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), WriteError>;

    fn set_status(&mut self, status: StatusCode) -> Result<(), WriteError>;

    /// Whether the head has gone out; status and headers are then frozen.
    fn is_committed(&self) -> bool;

    /// Body bytes accepted so far.
    fn bytes_written(&self) -> u64;

    /// Append to the body, committing the head first if needed.
    async fn write(&mut self, chunk: Bytes) -> Result<(), WriteError>;

    /// End the response normally.
    async fn finish(&mut self);

    /// End a committed response abnormally so the client sees truncation.
    async fn abort(&mut self, reason: &StreamError);
}

type BodyItem = Result<Bytes, io::Error>;

/// Response body draining the chunk channel.
///
/// Once every sender is gone and the channel is empty, a recorded abort
/// reason surfaces as one error item so hyper cuts the connection instead
/// of ending the body cleanly. The error is held back for one poll so the
/// connection flushes what it already buffered.
struct BodyStream {
    rx: mpsc::Receiver<BodyItem>,
    abort_reason: Arc<Mutex<Option<String>>>,
    yielded_before_error: bool,
}

impl Stream for BodyStream {
    type Item = BodyItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<BodyItem>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(None) => {
                let mut reason = self.abort_reason.lock();
                if reason.is_none() {
                    return Poll::Ready(None);
                }
                if !self.yielded_before_error {
                    drop(reason);
                    self.yielded_before_error = true;
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
                let message = reason.take().unwrap_or_default();
                Poll::Ready(Some(Err(io::Error::other(message))))
            }
            other => other,
        }
    }
}

/// Sink feeding an axum [`Response`] whose body is a bounded channel.
///
/// The response head is delivered through a oneshot once committed; the
/// handler awaiting it returns the response to axum while this sink keeps
/// producing body chunks from another task.
pub struct ChannelSink {
    status: StatusCode,
    headers: HeaderMap,
    head_tx: Option<oneshot::Sender<Response>>,
    body_rx: Option<mpsc::Receiver<BodyItem>>,
    body_tx: Option<mpsc::Sender<BodyItem>>,
    abort_reason: Arc<Mutex<Option<String>>>,
    written: u64,
}

impl ChannelSink {
    /// Create a sink buffering at most `capacity` chunks ahead of the client.
    pub fn new(capacity: usize) -> (Self, oneshot::Receiver<Response>) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                head_tx: Some(head_tx),
                body_rx: Some(body_rx),
                body_tx: Some(body_tx),
                abort_reason: Arc::new(Mutex::new(None)),
                written: 0,
            },
            head_rx,
        )
    }

    fn commit(&mut self) -> Result<(), WriteError> {
        let (Some(head_tx), Some(body_rx)) = (self.head_tx.take(), self.body_rx.take()) else {
            return Ok(());
        };

        let body = BodyStream {
            rx: body_rx,
            abort_reason: Arc::clone(&self.abort_reason),
            yielded_before_error: false,
        };
        let mut response = Response::new(Body::from_stream(body));
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.headers);

        head_tx.send(response).map_err(|_| WriteError::Disconnected)
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), WriteError> {
        if self.is_committed() {
            return Err(WriteError::HeadersCommitted);
        }
        self.headers.insert(name, value);
        Ok(())
    }

    fn set_status(&mut self, status: StatusCode) -> Result<(), WriteError> {
        if self.is_committed() {
            return Err(WriteError::HeadersCommitted);
        }
        self.status = status;
        Ok(())
    }

    fn is_committed(&self) -> bool {
        self.head_tx.is_none()
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }

    async fn write(&mut self, chunk: Bytes) -> Result<(), WriteError> {
        self.commit()?;
        let len = chunk.len() as u64;
        let tx = self.body_tx.as_ref().ok_or(WriteError::Disconnected)?;
        tx.send(Ok(chunk))
            .await
            .map_err(|_| WriteError::Disconnected)?;
        self.written += len;
        Ok(())
    }

    async fn finish(&mut self) {
        if let Err(e) = self.commit() {
            tracing::debug!(error = %e, "Response head dropped before commit");
        }
        // Dropping the sender ends the body cleanly.
        self.body_tx = None;
    }

    async fn abort(&mut self, reason: &StreamError) {
        if !self.is_committed() {
            // Nothing reached the client yet; fall back to an empty error head.
            let _ = self.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            self.finish().await;
            return;
        }
        // Never waits on channel capacity: a stalled client must not hold
        // the producer. Buffered chunks still drain ahead of the error.
        *self.abort_reason.lock() = Some(reason.to_string());
        self.body_tx = None;
    }
}
