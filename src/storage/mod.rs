//! Storage collaborator subsystem.
//!
//! # Data Flow
//! ```text
//! PageCursor
//!     → source.rs (RowSource: one bounded keyset query per call)
//!     → sqlite.rs (read-only SQLite pool, blocking work off the runtime)
//!     → sequence.rs (synthetic 1..=n rows for the test route)
//!     → memory.rs (in-memory rows with fault injection)
//! ```
//!
//! # Design Decisions
//! - Sources never paginate on their own; the cursor owns the watermark
//! - Query failures and decode failures are distinct error variants
//! - A store is only closed if it was successfully opened

pub mod memory;
pub mod sequence;
pub mod source;
pub mod sqlite;

pub use memory::MemorySource;
pub use sequence::SequenceSource;
pub use source::{Row, RowSource, SetupError, StorageError, Value};
pub use sqlite::SqliteStore;
