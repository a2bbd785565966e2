//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the streaming server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Graceful shutdown bounds.
    pub shutdown: ShutdownConfig,

    /// Row store backing the export route.
    pub storage: StorageConfig,

    /// Pagination and response framing.
    pub streaming: StreamingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight streams may keep running after a shutdown signal.
    pub grace_period_secs: u64,

    /// After the grace period, how long to wait for cancelled streams to
    /// notice before giving up on them.
    pub force_wait_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 30,
            force_wait_ms: 500,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Serve the export route at all.
    pub enabled: bool,

    /// Opaque connection string handed to the storage driver.
    pub connection: String,

    /// Table to export.
    pub table: String,

    /// Integer column used as the pagination key.
    pub key_column: String,

    /// Columns exported after the key, in order.
    pub columns: Vec<String>,

    /// Number of pooled read-only connections.
    pub pool_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            connection: "stream.db".to_string(),
            table: "test_tab".to_string(),
            key_column: "id".to_string(),
            columns: vec!["some_col".to_string()],
            pool_size: 4,
        }
    }
}

/// Streaming configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Rows fetched per page on the export route.
    pub page_size: usize,

    /// Length of the synthetic sequence served on `/test`.
    pub sequence_length: u64,

    /// Rows generated per page on `/test`.
    pub sequence_page_size: usize,

    /// Encoded pages buffered between a stream and its connection.
    pub channel_capacity: usize,

    /// Attachment filename for the export route.
    pub export_filename: String,

    /// Attachment filename for `/test`.
    pub sequence_filename: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            page_size: 128,
            sequence_length: 1_000_000,
            sequence_page_size: 4096,
            channel_capacity: 4,
            export_filename: "test.csv".to_string(),
            sequence_filename: "test.txt".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
