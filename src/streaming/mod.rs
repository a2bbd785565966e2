//! Streaming subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP handler
//!     → handler.rs (StreamingHandler: framing, page loop, failure policy)
//!     → cursor.rs (PageCursor: keyset pagination over a RowSource)
//!     → encoder.rs (StreamEncoder: batch → bytes)
//!     → sink.rs (ResponseSink: status/headers until first byte, then body)
//! ```
//!
//! # Design Decisions
//! - Cursor and encoder are composed by the handler, never fused
//! - One page in flight per request; no pipelining
//! - A failure after the first body byte can only cut the connection

pub mod cursor;
pub mod encoder;
pub mod error;
pub mod handler;
pub mod sink;

pub use cursor::{Batch, PageCursor};
pub use encoder::{DelimitedEncoder, LineEncoder, StreamEncoder};
pub use error::{EncodeError, StreamError, WriteError};
pub use handler::{StreamOutcome, StreamSummary, StreamingHandler};
pub use sink::{ChannelSink, ResponseSink};
