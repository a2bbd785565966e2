//! Listening socket lifecycle.
//!
//! # State Machine
//! ```text
//! Starting → Listening → ShuttingDown → Stopped
//!     └──────────┴─────→ FailedToStart
//! ```
//!
//! The accept loop runs on its own task. The supervisor waits for whichever
//! comes first: a failure on the single-slot error channel, or the
//! lifecycle signal. Only the winner is recorded.
//!
//! # Shutdown
//! 1. Stop accepting (Axum graceful shutdown follows the signal)
//! 2. Wait up to `grace_period_secs` for open connections to finish
//! 3. Cancel the stream token; producers abort at their next page or
//!    blocked write
//! 4. Wait up to `force_wait_ms` for producers to release, then for the
//!    accept task, and abandon it past that

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::http::HttpServer;
use crate::lifecycle::signals::LifecycleSignal;

/// Observable supervisor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Listening(SocketAddr),
    ShuttingDown,
    Stopped,
    /// Bind or serve failure, rendered for display.
    FailedToStart(String),
}

impl SupervisorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SupervisorState::Stopped | SupervisorState::FailedToStart(_))
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Starting => f.write_str("starting"),
            SupervisorState::Listening(addr) => write!(f, "listening on {}", addr),
            SupervisorState::ShuttingDown => f.write_str("shutting down"),
            SupervisorState::Stopped => f.write_str("stopped"),
            SupervisorState::FailedToStart(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Why the supervisor did not stop cleanly.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("server loop failed: {0}")]
    Serve(#[source] io::Error),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Reported, but the process still exits normally.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("grace period of {grace:?} exceeded with {in_flight} stream(s) still open")]
    DeadlineExceeded { grace: Duration, in_flight: u64 },

    #[error("server task failed during shutdown: {0}")]
    Join(#[from] JoinError),
}

/// Owns the listening socket and decides how the server ends.
pub struct ServerSupervisor {
    bind_address: String,
    grace: Duration,
    force_wait: Duration,
    server: HttpServer,
    state: Arc<watch::Sender<SupervisorState>>,
}

impl ServerSupervisor {
    pub fn new(config: &ServerConfig, server: HttpServer) -> Self {
        let (state, _) = watch::channel(SupervisorState::Starting);
        Self {
            bind_address: config.listener.bind_address.clone(),
            grace: Duration::from_secs(config.shutdown.grace_period_secs),
            force_wait: Duration::from_millis(config.shutdown.force_wait_ms),
            server,
            state: Arc::new(state),
        }
    }

    /// Watch state transitions. The last state stays readable after `run`
    /// returns.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SupervisorState {
        self.state.borrow().clone()
    }

    /// Serve until `signal` is done or the server fails.
    pub async fn run(self, signal: &LifecycleSignal) -> Result<(), SupervisorError> {
        let (router, streams, tracker) = self.server.into_parts();
        let (err_tx, mut err_rx) = oneshot::channel();

        let mut handle = tokio::spawn(serve(
            self.bind_address.clone(),
            router,
            signal.child_token(),
            Arc::clone(&self.state),
            err_tx,
        ));

        let failure = tokio::select! {
            biased;
            _ = signal.cancelled() => None,
            received = &mut err_rx => Some(received.unwrap_or_else(|_| {
                SupervisorError::Serve(io::Error::other("server task ended unexpectedly"))
            })),
        };

        if let Some(error) = failure {
            tracing::error!(error = %error, "Server failed");
            self.state
                .send_replace(SupervisorState::FailedToStart(error.to_string()));
            streams.cancel();
            if let Err(e) = handle.await {
                tracing::debug!(error = %e, "Server task did not join cleanly");
            }
            return Err(error);
        }

        self.state.send_replace(SupervisorState::ShuttingDown);
        tracing::info!(
            in_flight = tracker.active_count(),
            grace_secs = self.grace.as_secs(),
            "Shutting down, no longer accepting connections"
        );

        let drained = tokio::time::timeout(self.grace, &mut handle).await;
        let result = match drained {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join)) => Err(ShutdownError::Join(join).into()),
            Err(_) => {
                let in_flight = tracker.active_count();
                tracing::warn!(
                    in_flight,
                    grace_secs = self.grace.as_secs(),
                    "Grace period exceeded, cancelling open streams"
                );
                streams.cancel();
                let deadline = tokio::time::Instant::now() + self.force_wait;
                match tokio::time::timeout_at(deadline, tracker.wait_idle()).await {
                    Ok(()) => tracing::debug!("Cancelled streams released"),
                    Err(_) => tracing::warn!(
                        remaining = tracker.active_count(),
                        "Streams still running after cancellation"
                    ),
                }
                if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                    tracing::warn!("Server task still running, abandoning it");
                    handle.abort();
                }
                Err(ShutdownError::DeadlineExceeded {
                    grace: self.grace,
                    in_flight,
                }
                .into())
            }
        };

        // The signal won the race; a failure that lands afterwards is only logged.
        if let Ok(late) = err_rx.try_recv() {
            tracing::warn!(error = %late, "Server reported an error during shutdown");
        }

        self.state.send_replace(SupervisorState::Stopped);
        tracing::info!("HTTP server stopped");
        result
    }
}

async fn serve(
    address: String,
    router: Router,
    accept: CancellationToken,
    state: Arc<watch::Sender<SupervisorState>>,
    err_tx: oneshot::Sender<SupervisorError>,
) {
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(source) => {
            let _ = err_tx.send(SupervisorError::Bind { address, source });
            return;
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            let _ = err_tx.send(SupervisorError::Serve(e));
            return;
        }
    };

    let published = state.send_if_modified(|current| {
        if *current == SupervisorState::Starting {
            *current = SupervisorState::Listening(local_addr);
            true
        } else {
            false
        }
    });
    if published {
        tracing::info!(address = %local_addr, "Listening for connections");
    }

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(accept.cancelled_owned())
        .await;
    if let Err(e) = result {
        let _ = err_tx.send(SupervisorError::Serve(e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(bind_address: String) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.listener.bind_address = bind_address;
        config.shutdown.grace_period_secs = 5;
        config.storage.enabled = false;
        config
    }

    #[tokio::test]
    async fn bind_conflict_fails_to_start() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = taken.local_addr().unwrap().to_string();
        let config = config(address.clone());

        let parent = CancellationToken::new();
        let signal = LifecycleSignal::new(&parent).unwrap();
        let supervisor = ServerSupervisor::new(&config, HttpServer::new(&config, None));
        let state = supervisor.subscribe();

        let err = supervisor.run(&signal).await.unwrap_err();
        assert!(
            matches!(&err, SupervisorError::Bind { address: a, .. } if *a == address),
            "unexpected error: {err}"
        );
        assert!(matches!(*state.borrow(), SupervisorState::FailedToStart(_)));
        assert!(!signal.is_done());
    }

    #[tokio::test]
    async fn stops_cleanly_when_signal_is_done() {
        let config = config("127.0.0.1:0".to_string());
        let parent = CancellationToken::new();
        let signal = LifecycleSignal::new(&parent).unwrap();
        let supervisor = ServerSupervisor::new(&config, HttpServer::new(&config, None));
        let mut state = supervisor.subscribe();
        assert_eq!(supervisor.state(), SupervisorState::Starting);

        let task = {
            let signal = signal.clone();
            tokio::spawn(async move { supervisor.run(&signal).await })
        };
        state
            .wait_for(|s| matches!(s, SupervisorState::Listening(_)))
            .await
            .unwrap();

        parent.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(*state.borrow(), SupervisorState::Stopped);
    }

    #[test]
    fn terminal_states() {
        assert!(SupervisorState::Stopped.is_terminal());
        assert!(SupervisorState::FailedToStart("x".into()).is_terminal());
        assert!(!SupervisorState::ShuttingDown.is_terminal());
    }
}
