//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT or parent cancel → LifecycleSignal done → cleanup handlers
//!
//! Supervisor (supervisor.rs):
//!     bind → Listening → [signal] → stop accepting → drain → Stopped
//!                     → [bind/serve error] → FailedToStart
//!
//! In-flight (inflight.rs):
//!     one guard per open stream, counted for the shutdown report
//! ```
//!
//! # Design Decisions
//! - The signal stops the accept loop; open streams keep their own token
//!   until the grace period runs out
//! - Shutdown has a deadline: forced stream cancellation after it

pub mod inflight;
pub mod signals;
pub mod supervisor;

pub use inflight::{InFlightTracker, StreamGuard, StreamId};
pub use signals::{CleanupHandler, Interrupt, LifecycleSignal};
pub use supervisor::{ServerSupervisor, ShutdownError, SupervisorError, SupervisorState};
