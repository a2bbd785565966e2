//! Structured logging.
//!
//! `RUST_LOG` wins when present; otherwise the configured level applies to
//! this crate and to tower-http's request spans.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Safe to call more than once; later calls
/// leave the first subscriber in place.
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directives(log_level).into());

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

fn default_directives(log_level: &str) -> String {
    format!("stream_server={level},tower_http={level}", level = log_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_cover_crate_and_http_layer() {
        let directives = default_directives("debug");
        assert_eq!(directives, "stream_server=debug,tower_http=debug");
        assert!(directives.parse::<EnvFilter>().is_ok());
    }

    #[test]
    fn init_twice_does_not_panic() {
        init("info");
        init("warn");
    }
}
