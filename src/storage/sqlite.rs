//! SQLite-backed row source.
//!
//! # Responsibilities
//! - Open a small pool of read-only connections from an opaque connection string
//! - Probe the configured table once at boot and log its size
//! - Serve keyset pages off the async runtime via `spawn_blocking`
//! - Close connections only for a handle that actually opened

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};

use crate::config::validation::is_identifier;
use crate::config::StorageConfig;
use crate::storage::source::{Row, RowSource, SetupError, StorageError, Value};

/// Read-only handle over a SQLite table keyed by an integer column.
///
/// Cheap to share behind an `Arc`; concurrent fetches are spread across the
/// pool round-robin.
pub struct SqliteStore {
    inner: Arc<Pool>,
}

struct Pool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
    select_sql: String,
    column_count: usize,
    table: String,
}

impl SqliteStore {
    /// Open the store described by `config` and verify its table is readable.
    pub fn open(config: &StorageConfig) -> Result<Self, SetupError> {
        if !config.enabled {
            return Err(SetupError::Disabled);
        }
        check_identifiers(config)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let size = config.pool_size.max(1);
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(&config.connection, flags).map_err(|e| {
                SetupError::Open {
                    connection: config.connection.clone(),
                    reason: e.to_string(),
                }
            })?;
            connections.push(Mutex::new(conn));
        }

        let count: i64 = connections[0]
            .lock()
            .query_row(&format!("SELECT COUNT(1) FROM {}", config.table), [], |row| row.get(0))
            .map_err(|e| SetupError::Probe {
                table: config.table.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            table = %config.table,
            rows = count,
            pool_size = size,
            "Storage opened"
        );

        Ok(Self {
            inner: Arc::new(Pool {
                connections,
                next: AtomicUsize::new(0),
                select_sql: select_sql(config),
                column_count: config.columns.len(),
                table: config.table.clone(),
            }),
        })
    }

    /// Close every pooled connection, reporting the first failure.
    ///
    /// A fetch still running on a blocking thread keeps the pool alive; in
    /// that case the connections are released when it finishes.
    pub fn close(self) -> Result<(), StorageError> {
        let pool = match Arc::try_unwrap(self.inner) {
            Ok(pool) => pool,
            Err(_) => {
                tracing::warn!("Storage still in use, connections released on drop");
                return Ok(());
            }
        };

        let table = pool.table;
        let mut first_error = None;
        for conn in pool.connections {
            if let Err((_, e)) = conn.into_inner().close() {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(StorageError::Close(e.to_string())),
            None => {
                tracing::info!(table = %table, "Storage closed");
                Ok(())
            }
        }
    }

    /// Create the configured table if needed and append `rows` sample rows.
    ///
    /// Returns the key of the last inserted row.
    pub fn seed(config: &StorageConfig, rows: u64) -> Result<u64, SetupError> {
        check_identifiers(config)?;
        let setup = |e: rusqlite::Error| SetupError::Open {
            connection: config.connection.clone(),
            reason: e.to_string(),
        };

        let mut conn = Connection::open(&config.connection).map_err(setup)?;

        let column_defs: String = config
            .columns
            .iter()
            .map(|c| format!(", {} TEXT", c))
            .collect();
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} ({} INTEGER PRIMARY KEY{})",
                config.table, config.key_column, column_defs
            ),
            [],
        )
        .map_err(setup)?;

        let start: i64 = conn
            .query_row(
                &format!(
                    "SELECT COALESCE(MAX({}), 0) FROM {}",
                    config.key_column, config.table
                ),
                [],
                |row| row.get(0),
            )
            .map_err(setup)?;

        let placeholders: Vec<String> = (1..=config.columns.len() + 1)
            .map(|i| format!("?{}", i))
            .collect();
        let mut names = vec![config.key_column.as_str()];
        names.extend(config.columns.iter().map(String::as_str));
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            config.table,
            names.join(", "),
            placeholders.join(", ")
        );

        let tx = conn.transaction().map_err(setup)?;
        let mut last = start;
        {
            let mut stmt = tx.prepare(&insert).map_err(setup)?;
            for offset in 1..=rows as i64 {
                last = start + offset;
                let mut values = vec![rusqlite::types::Value::Integer(last)];
                values.extend(
                    config
                        .columns
                        .iter()
                        .map(|c| rusqlite::types::Value::Text(format!("{}-{}", c, last))),
                );
                stmt.execute(params_from_iter(values.iter())).map_err(setup)?;
            }
        }
        tx.commit().map_err(setup)?;

        tracing::info!(table = %config.table, inserted = rows, last_key = last, "Storage seeded");
        Ok(last as u64)
    }
}

#[async_trait]
impl RowSource for SqliteStore {
    async fn fetch_after(&self, after: u64, limit: usize) -> Result<Vec<Row>, StorageError> {
        let pool = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || pool.fetch_after(after, limit))
            .await
            .map_err(|e| StorageError::Query(format!("query task failed: {}", e)))?
    }
}

impl Pool {
    fn fetch_after(&self, after: u64, limit: usize) -> Result<Vec<Row>, StorageError> {
        let after = i64::try_from(after)
            .map_err(|_| StorageError::Query(format!("watermark {} exceeds the key range", after)))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        let conn = self.connections[slot].lock();

        let mut stmt = conn.prepare_cached(&self.select_sql).map_err(query_error)?;
        let mut rows = stmt.query(params![after, limit]).map_err(query_error)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(query_error)? {
            out.push(decode_row(row, self.column_count)?);
        }
        Ok(out)
    }
}

fn decode_row(row: &rusqlite::Row<'_>, column_count: usize) -> Result<Row, StorageError> {
    let key = match row.get_ref(0).map_err(decode_error)? {
        ValueRef::Integer(n) => u64::try_from(n)
            .map_err(|_| StorageError::Decode(format!("negative key {}", n)))?,
        other => {
            return Err(StorageError::Decode(format!(
                "key must be an integer, got {}",
                other.data_type()
            )))
        }
    };

    let mut columns = Vec::with_capacity(column_count);
    for idx in 1..=column_count {
        let value = match row.get_ref(idx).map_err(decode_error)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => Value::Integer(n),
            ValueRef::Real(x) => Value::Real(x),
            ValueRef::Text(bytes) => Value::Text(
                std::str::from_utf8(bytes)
                    .map_err(|e| StorageError::Decode(format!("column {}: {}", idx, e)))?
                    .to_string(),
            ),
            ValueRef::Blob(_) => {
                return Err(StorageError::Decode(format!(
                    "column {} of row {} holds a blob",
                    idx, key
                )))
            }
        };
        columns.push(value);
    }

    Ok(Row::new(key, columns))
}

fn select_sql(config: &StorageConfig) -> String {
    let mut names = vec![config.key_column.as_str()];
    names.extend(config.columns.iter().map(String::as_str));
    format!(
        "SELECT {} FROM {} WHERE {} > ?1 ORDER BY {} ASC LIMIT ?2",
        names.join(", "),
        config.table,
        config.key_column,
        config.key_column
    )
}

fn check_identifiers(config: &StorageConfig) -> Result<(), SetupError> {
    std::iter::once(&config.table)
        .chain(std::iter::once(&config.key_column))
        .chain(config.columns.iter())
        .find(|name| !is_identifier(name))
        .map_or(Ok(()), |bad| {
            Err(SetupError::Config(format!("'{}' is not a valid identifier", bad)))
        })
}

fn query_error(e: rusqlite::Error) -> StorageError {
    StorageError::Query(e.to_string())
}

fn decode_error(e: rusqlite::Error) -> StorageError {
    StorageError::Decode(e.to_string())
}
