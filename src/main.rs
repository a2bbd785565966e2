//! Streaming export server.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                    STREAM SERVER                     │
//!                  │                                                      │
//!   SIGINT/SIGTERM │  ┌──────────────┐        ┌───────────────────┐       │
//!   ───────────────┼─▶│  lifecycle   │───────▶│    supervisor     │       │
//!                  │  │   signal     │        │ accept / drain    │       │
//!                  │  └──────────────┘        └─────────┬─────────┘       │
//!                  │                                    │                 │
//!   GET / , /test  │  ┌──────────────┐        ┌─────────▼─────────┐       │
//!   ───────────────┼─▶│    http      │───────▶│ StreamingHandler  │       │
//!                  │  │   router     │        │ cursor → encoder  │       │
//!                  │  └──────────────┘        └─────────┬─────────┘       │
//!                  │                                    │                 │
//!   chunked body   │  ┌──────────────┐        ┌─────────▼─────────┐       │
//!   ◀──────────────┼──│ ChannelSink  │◀───────│  storage (SQLite) │       │
//!                  │  └──────────────┘        └───────────────────┘       │
//!                  └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use stream_server::config::validation::validate_config;
use stream_server::config::{load_config, ConfigError, ServerConfig, StorageConfig};
use stream_server::lifecycle::{LifecycleSignal, ServerSupervisor, SupervisorError};
use stream_server::observability::{logging, metrics};
use stream_server::storage::{RowSource, SetupError, SqliteStore};
use stream_server::HttpServer;

#[derive(Parser)]
#[command(name = "stream-server", version)]
#[command(about = "Streams table exports and synthetic sequences over HTTP", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `storage.connection`.
    #[arg(long)]
    database: Option<String>,

    /// Override `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve HTTP until interrupted (default)
    Serve,
    /// Create the configured table if missing and append sample rows
    Seed {
        #[arg(long, default_value_t = 1000)]
        rows: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    logging::init(&config.observability.log_level);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Seed { rows } => {
            let last_key = SqliteStore::seed(&config.storage, rows)?;
            tracing::info!(
                connection = %config.storage.connection,
                rows,
                last_key,
                "Seed complete"
            );
            Ok(())
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<ServerConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(database) = &cli.database {
        config.storage.connection = database.clone();
    }
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

async fn serve(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        grace_period_secs = config.shutdown.grace_period_secs,
        page_size = config.streaming.page_size,
        "stream-server starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let root = CancellationToken::new();
    let signal = LifecycleSignal::new(&root)?;
    signal.register_cleanup(|interrupt| match interrupt {
        Some(sig) => tracing::info!(signal = %sig, "Interrupt cleanup complete"),
        None => tracing::debug!("Lifecycle ended without an interrupt"),
    });

    let store = open_storage(&config.storage);
    let source = store
        .as_ref()
        .map(|store| Arc::clone(store) as Arc<dyn RowSource>);

    let server = HttpServer::new(&config, source);
    let supervisor = ServerSupervisor::new(&config, server);
    let result = supervisor.run(&signal).await;

    root.cancel();
    signal.cleaned_up().await;
    close_storage(store);

    match result {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            Ok(())
        }
        Err(SupervisorError::Shutdown(e)) => {
            tracing::warn!(error = %e, "Shutdown completed with errors");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Acquire the store or report the service as degraded.
fn open_storage(config: &StorageConfig) -> Option<Arc<SqliteStore>> {
    match SqliteStore::open(config) {
        Ok(store) => Some(Arc::new(store)),
        Err(SetupError::Disabled) => {
            tracing::info!("Storage disabled, serving /test only");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "Storage setup failed, serving /test only");
            None
        }
    }
}

/// Release a store that was successfully opened.
fn close_storage(store: Option<Arc<SqliteStore>>) {
    let Some(store) = store else {
        return;
    };
    match Arc::into_inner(store) {
        Some(store) => {
            if let Err(e) = store.close() {
                tracing::warn!(error = %e, "Failed to close storage");
            }
        }
        None => tracing::warn!("Storage still in use by abandoned streams, dropping without close"),
    }
}
