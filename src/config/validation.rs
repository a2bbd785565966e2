//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, addresses parse)
//! - Reject storage identifiers that cannot be spliced into SQL
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a loaded configuration, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let streaming = &config.streaming;
    for (field, value) in [
        ("streaming.page_size", streaming.page_size),
        ("streaming.sequence_page_size", streaming.sequence_page_size),
        ("streaming.channel_capacity", streaming.channel_capacity),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    for (field, name) in [
        ("streaming.export_filename", &streaming.export_filename),
        ("streaming.sequence_filename", &streaming.sequence_filename),
    ] {
        if name.is_empty() || name.contains(['"', '\\', '/', '\r', '\n']) {
            errors.push(ValidationError::new(
                field,
                format!("'{}' is not a usable attachment filename", name),
            ));
        }
    }

    let storage = &config.storage;
    if storage.enabled {
        if storage.pool_size == 0 {
            errors.push(ValidationError::new("storage.pool_size", "must be greater than zero"));
        }
        if storage.connection.is_empty() {
            errors.push(ValidationError::new("storage.connection", "must not be empty"));
        }
        if !is_identifier(&storage.table) {
            errors.push(ValidationError::new(
                "storage.table",
                format!("'{}' is not a valid identifier", storage.table),
            ));
        }
        if !is_identifier(&storage.key_column) {
            errors.push(ValidationError::new(
                "storage.key_column",
                format!("'{}' is not a valid identifier", storage.key_column),
            ));
        }
        for column in storage.columns.iter().filter(|c| !is_identifier(c)) {
            errors.push(ValidationError::new(
                "storage.columns",
                format!("'{}' is not a valid identifier", column),
            ));
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Plain SQL identifier: ASCII letter or underscore, then letters, digits or
/// underscores.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
