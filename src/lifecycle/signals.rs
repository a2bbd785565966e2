//! OS signal handling.
//!
//! # Responsibilities
//! - Turn SIGINT/SIGTERM into cancellation of a process-lifetime token
//! - Follow a parent token, whichever finishes first
//! - Run registered cleanup handlers once, after cancellation is visible
//!
//! # Design Decisions
//! - One watcher task per signal races "interrupt received" against
//!   "parent done"; only the watcher ever cancels, so there is no double
//!   cancellation
//! - The OS subscriptions are dropped as soon as the race is decided, so
//!   repeated creation does not accumulate listeners
//! - Consumers get tokens, never a global flag

use std::fmt;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// The interrupt that ended the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// SIGINT (Ctrl+C).
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Interrupt => f.write_str("SIGINT"),
            Interrupt::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Invoked once after cancellation with the interrupt that caused it, or
/// `None` when the parent was cancelled instead.
///
/// Handlers report their own failures; nothing they do affects the signal.
pub type CleanupHandler = Box<dyn FnOnce(Option<Interrupt>) + Send + 'static>;

enum Cleanup {
    Armed(Vec<CleanupHandler>),
    Fired(Option<Interrupt>),
}

struct Shared {
    cleanup: Mutex<Cleanup>,
    cleaned_tx: watch::Sender<bool>,
}

/// Cancellation token bound to the process's interrupt signals.
///
/// Done exactly when its parent is cancelled or SIGINT/SIGTERM arrives,
/// whichever happens first. Clones observe the same state.
#[derive(Clone)]
pub struct LifecycleSignal {
    token: CancellationToken,
    shared: Arc<Shared>,
}

impl LifecycleSignal {
    /// Subscribe to interrupts and start the watcher.
    ///
    /// Must be called from within a Tokio runtime. Fails only if the OS
    /// refuses the signal subscription.
    pub fn new(parent: &CancellationToken) -> io::Result<Self> {
        Self::with_handlers(parent, Vec::new())
    }

    /// Like [`new`](Self::new), with cleanup handlers registered up front.
    pub fn with_handlers(
        parent: &CancellationToken,
        handlers: Vec<CleanupHandler>,
    ) -> io::Result<Self> {
        let interrupts = Interrupts::subscribe()?;
        let token = parent.child_token();
        let (cleaned_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            cleanup: Mutex::new(Cleanup::Armed(handlers)),
            cleaned_tx,
        });

        tokio::spawn(watch_interrupts(interrupts, token.clone(), Arc::clone(&shared)));

        Ok(Self { token, shared })
    }

    /// Register a cleanup handler.
    ///
    /// If the signal already fired, the handler runs immediately on the
    /// caller's thread with the recorded interrupt.
    pub fn register_cleanup<F>(&self, handler: F)
    where
        F: FnOnce(Option<Interrupt>) + Send + 'static,
    {
        let fired = {
            let mut cleanup = self.shared.cleanup.lock();
            match &mut *cleanup {
                Cleanup::Armed(handlers) => {
                    handlers.push(Box::new(handler));
                    return;
                }
                Cleanup::Fired(interrupt) => *interrupt,
            }
        };
        handler(fired);
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal is done.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// A child token that is cancelled along with this signal.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Which interrupt fired, once cleanup has started.
    ///
    /// `None` while armed; `Some(None)` when the parent was cancelled.
    pub fn interrupt(&self) -> Option<Option<Interrupt>> {
        match &*self.shared.cleanup.lock() {
            Cleanup::Armed(_) => None,
            Cleanup::Fired(interrupt) => Some(*interrupt),
        }
    }

    /// Resolves after every registered cleanup handler has returned.
    pub async fn cleaned_up(&self) {
        let mut rx = self.shared.cleaned_tx.subscribe();
        // The sender lives in `shared`, which `self` keeps alive.
        let _ = rx.wait_for(|cleaned| *cleaned).await;
    }
}

async fn watch_interrupts(mut interrupts: Interrupts, token: CancellationToken, shared: Arc<Shared>) {
    let received = tokio::select! {
        interrupt = interrupts.recv() => Some(interrupt),
        _ = token.cancelled() => None,
    };
    // Retract the OS subscription before anything else observes the outcome.
    drop(interrupts);
    token.cancel();

    match received {
        Some(interrupt) => tracing::info!(signal = %interrupt, "Shutdown signal received"),
        None => tracing::debug!("Lifecycle parent cancelled"),
    }

    let handlers = {
        let mut cleanup = shared.cleanup.lock();
        match std::mem::replace(&mut *cleanup, Cleanup::Fired(received)) {
            Cleanup::Armed(handlers) => handlers,
            Cleanup::Fired(_) => Vec::new(),
        }
    };
    for handler in handlers {
        handler(received);
    }
    shared.cleaned_tx.send_replace(true);
}

#[cfg(unix)]
struct Interrupts {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Interrupts {
    fn subscribe() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> Interrupt {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Interrupt::Interrupt,
            Some(()) = self.terminate.recv() => Interrupt::Terminate,
            else => std::future::pending::<Interrupt>().await,
        }
    }
}

#[cfg(not(unix))]
struct Interrupts;

#[cfg(not(unix))]
impl Interrupts {
    fn subscribe() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Interrupt {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Interrupt::Interrupt,
            Err(_) => std::future::pending::<Interrupt>().await,
        }
    }
}
