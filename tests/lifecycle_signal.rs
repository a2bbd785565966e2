//! Real SIGINT/SIGTERM delivery.
//!
//! Signals are process-wide, so every test here holds `SIGNAL_LOCK` and
//! subscribes before sending; tokio's handler then replaces the default
//! action and the test process survives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use stream_server::lifecycle::{Interrupt, LifecycleSignal, SupervisorState};

mod common;

static SIGNAL_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

async fn deliver(signal: &str) {
    let status = Command::new("kill")
        .arg(format!("-{}", signal))
        .arg(std::process::id().to_string())
        .status()
        .await
        .expect("kill not available");
    assert!(status.success());
}

fn recording_signal(
    parent: &CancellationToken,
) -> (LifecycleSignal, Arc<AtomicUsize>, Arc<Mutex<Vec<Option<Interrupt>>>>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let signal = LifecycleSignal::new(parent).unwrap();
    {
        let calls = Arc::clone(&calls);
        let seen = Arc::clone(&seen);
        signal.register_cleanup(move |interrupt| {
            calls.fetch_add(1, Ordering::SeqCst);
            seen.lock().unwrap().push(interrupt);
        });
    }
    (signal, calls, seen)
}

async fn assert_interrupt_handled(name: &str, expected: Interrupt) {
    let parent = CancellationToken::new();
    let (signal, calls, seen) = recording_signal(&parent);

    deliver(name).await;
    tokio::time::timeout(Duration::from_secs(5), signal.cleaned_up())
        .await
        .expect("cleanup did not run");

    assert!(signal.is_done());
    assert!(!parent.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock().unwrap(), vec![Some(expected)]);
    assert_eq!(signal.interrupt(), Some(Some(expected)));

    // Cancelling afterwards changes nothing.
    parent.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sigterm_cancels_and_cleans_up_once() {
    let _guard = SIGNAL_LOCK.lock().await;
    assert_interrupt_handled("TERM", Interrupt::Terminate).await;
}

#[tokio::test]
async fn sigint_cancels_and_cleans_up_once() {
    let _guard = SIGNAL_LOCK.lock().await;
    assert_interrupt_handled("INT", Interrupt::Interrupt).await;
}

#[tokio::test]
async fn finished_signal_ignores_later_interrupts() {
    let _guard = SIGNAL_LOCK.lock().await;
    let parent = CancellationToken::new();
    let (finished, calls, seen) = recording_signal(&parent);
    parent.cancel();
    finished.cleaned_up().await;

    // A live signal keeps the default disposition replaced.
    let (live, _, _) = recording_signal(&CancellationToken::new());
    deliver("TERM").await;
    tokio::time::timeout(Duration::from_secs(5), live.cleaned_up())
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock().unwrap(), vec![None]);
}

#[tokio::test]
async fn sigterm_shuts_down_a_running_server() {
    let _guard = SIGNAL_LOCK.lock().await;
    let mut config = common::test_config();
    config.streaming.sequence_length = 10;
    let mut server = common::start_server(config, None).await;

    let body = reqwest::get(server.url("/test"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body.lines().count(), 10);

    deliver("TERM").await;
    server
        .wait_for_state(|s| matches!(s, SupervisorState::ShuttingDown | SupervisorState::Stopped))
        .await;
    tokio::time::timeout(Duration::from_secs(5), server.signal.cleaned_up())
        .await
        .unwrap();
    assert_eq!(server.signal.interrupt(), Some(Some(Interrupt::Terminate)));
    assert!(!server.parent.is_cancelled());

    let final_state = server.state.clone();
    server.join().await.unwrap();
    assert_eq!(*final_state.borrow(), SupervisorState::Stopped);
}
