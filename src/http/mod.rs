//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (accepted by axum::serve in lifecycle::supervisor)
//!     → server.rs (request ID, trace span, route match)
//!     → spawn producer: streaming::StreamingHandler → ChannelSink
//!     → response head returned to Axum, body pulled from the channel
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
