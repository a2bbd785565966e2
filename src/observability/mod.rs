//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! main.rs
//!     → logging.rs (tracing-subscriber: EnvFilter + fmt)
//!     → metrics.rs (Prometheus exporter, optional)
//!
//! streaming::handler
//!     → metrics::record_stream (one call per finished stream)
//! ```
//!
//! # Design Decisions
//! - Log level comes from config unless RUST_LOG is set
//! - Counters are recorded whether or not an exporter is installed;
//!   without one they are no-ops

pub mod logging;
pub mod metrics;
