//! Streaming export server library.
//!
//! Serves large result sets as downloadable attachments, one keyset page at
//! a time, and shuts down on SIGINT/SIGTERM without cutting off streams that
//! can still finish inside the grace period.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod storage;
pub mod streaming;

pub use config::schema::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::{LifecycleSignal, ServerSupervisor, SupervisorError, SupervisorState};
pub use storage::{RowSource, SqliteStore};
