//! Metrics collection and exposition.
//!
//! # Metrics
//! - `stream_requests_total` (counter): finished streams by route, outcome
//! - `stream_pages_total` (counter): page fetches by route
//! - `stream_rows_total` (counter): rows written by route
//! - `stream_bytes_total` (counter): body bytes written by route
//!
//! # Design Decisions
//! - Recorded once per stream, after it ends, not per page
//! - Exporter is opt-in through `observability.metrics_enabled`

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::streaming::{StreamOutcome, StreamSummary};

/// Record the result of one finished stream.
pub fn record_stream(route: &'static str, outcome: &StreamOutcome, summary: &StreamSummary) {
    counter!("stream_requests_total", "route" => route, "outcome" => outcome.label()).increment(1);
    counter!("stream_pages_total", "route" => route).increment(summary.pages);
    counter!("stream_rows_total", "route" => route).increment(summary.rows);
    counter!("stream_bytes_total", "route" => route).increment(summary.bytes);
}

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}
