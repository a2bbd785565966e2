//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use stream_server::config::ServerConfig;
use stream_server::lifecycle::{
    InFlightTracker, LifecycleSignal, ServerSupervisor, SupervisorError, SupervisorState,
};
use stream_server::storage::RowSource;
use stream_server::HttpServer;

/// Loopback on an ephemeral port, storage off, short shutdown timings.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.storage.enabled = false;
    config.shutdown.grace_period_secs = 10;
    config.shutdown.force_wait_ms = 500;
    config
}

/// A supervised server running on its own task.
pub struct TestServer {
    pub addr: SocketAddr,
    pub parent: CancellationToken,
    pub signal: LifecycleSignal,
    pub state: watch::Receiver<SupervisorState>,
    /// Producer tasks still holding a stream open.
    pub tracker: InFlightTracker,
    pub task: JoinHandle<Result<(), SupervisorError>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Cancel the lifecycle parent and wait for the supervisor to return.
    pub async fn stop(self) -> Result<(), SupervisorError> {
        self.parent.cancel();
        self.join().await
    }

    pub async fn join(self) -> Result<(), SupervisorError> {
        tokio::time::timeout(Duration::from_secs(30), self.task)
            .await
            .expect("supervisor did not stop in time")
            .expect("supervisor task panicked")
    }

    pub async fn wait_for_state(&mut self, wanted: fn(&SupervisorState) -> bool) {
        tokio::time::timeout(Duration::from_secs(10), self.state.wait_for(wanted))
            .await
            .expect("state not reached in time")
            .expect("supervisor dropped its state");
    }
}

/// Start a server and wait until it is accepting connections.
pub async fn start_server(config: ServerConfig, store: Option<Arc<dyn RowSource>>) -> TestServer {
    let parent = CancellationToken::new();
    let signal = LifecycleSignal::new(&parent).expect("signal subscription");
    let http = HttpServer::new(&config, store);
    let tracker = http.tracker().clone();
    let supervisor = ServerSupervisor::new(&config, http);
    let mut state = supervisor.subscribe();

    let task = {
        let signal = signal.clone();
        tokio::spawn(async move { supervisor.run(&signal).await })
    };

    let addr = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let SupervisorState::Listening(addr) = *state.borrow_and_update() {
                return addr;
            }
            state.changed().await.expect("supervisor exited before listening");
        }
    })
    .await
    .expect("server did not start listening");

    TestServer {
        addr,
        parent,
        signal,
        state,
        tracker,
        task,
    }
}

/// Collect a body chunk by chunk, returning what arrived and whether the
/// transfer ended in an error.
pub async fn read_body(mut response: reqwest::Response) -> (Vec<u8>, Option<reqwest::Error>) {
    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) => return (body, None),
            Err(e) => return (body, Some(e)),
        }
    }
}

/// Expected CSV export of `MemorySource::with_keys(rows)`.
pub fn memory_csv(rows: u64) -> String {
    let mut out = String::from("id,some_col\n");
    for k in 1..=rows {
        out.push_str(&format!("{},value-{}\n", k, k));
    }
    out
}
