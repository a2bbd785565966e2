//! Wire encodings for batches of rows.
//!
//! Encoders are pure: a whole batch encodes or the call fails, and nothing is
//! buffered between calls. They are composed with a cursor by the streaming
//! handler rather than built into it.

use std::fmt::Write;

use bytes::Bytes;

use crate::storage::{Row, Value};
use crate::streaming::cursor::Batch;
use crate::streaming::error::EncodeError;

/// Serializes batches into response body bytes.
pub trait StreamEncoder: Send + Sync {
    /// Value of the `Content-Type` header.
    fn content_type(&self) -> &'static str;

    /// Bytes written once before the first batch, if any.
    fn preamble(&self) -> Option<Bytes> {
        None
    }

    fn encode_batch(&self, batch: &Batch) -> Result<Bytes, EncodeError>;
}

/// Delimited text with a header line naming the key and every column.
///
/// Text fields containing the delimiter, a quote or a line break are quoted
/// with embedded quotes doubled.
#[derive(Debug, Clone)]
pub struct DelimitedEncoder {
    header: Vec<String>,
    delimiter: char,
}

impl DelimitedEncoder {
    /// Comma-separated output with the given column names, key first.
    pub fn csv<I, S>(header: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            header: header.into_iter().map(Into::into).collect(),
            delimiter: ',',
        }
    }

    fn write_field(&self, out: &mut String, key: u64, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Integer(n) => write!(out, "{}", n)?,
            Value::Real(x) if x.is_finite() => write!(out, "{}", x)?,
            Value::Real(x) => {
                return Err(EncodeError::Unrepresentable {
                    key,
                    reason: format!("non-finite number {}", x),
                })
            }
            Value::Text(s) if self.needs_quotes(s) => {
                out.push('"');
                out.push_str(&s.replace('"', "\"\""));
                out.push('"');
            }
            Value::Text(s) => out.push_str(s),
            Value::Null => {}
        }
        Ok(())
    }

    fn needs_quotes(&self, s: &str) -> bool {
        s.contains(|c: char| c == self.delimiter || c == '"' || c == '\n' || c == '\r')
    }

    fn encode_row(&self, out: &mut String, row: &Row) -> Result<(), EncodeError> {
        let expected = self.header.len().saturating_sub(1);
        if row.columns.len() != expected {
            return Err(EncodeError::ColumnCount {
                key: row.key,
                expected,
                actual: row.columns.len(),
            });
        }

        write!(out, "{}", row.key)?;
        for value in &row.columns {
            out.push(self.delimiter);
            self.write_field(out, row.key, value)?;
        }
        out.push('\n');
        Ok(())
    }
}

impl StreamEncoder for DelimitedEncoder {
    fn content_type(&self) -> &'static str {
        "text/csv"
    }

    fn preamble(&self) -> Option<Bytes> {
        let mut line = self.header.join(&self.delimiter.to_string());
        line.push('\n');
        Some(Bytes::from(line))
    }

    fn encode_batch(&self, batch: &Batch) -> Result<Bytes, EncodeError> {
        let mut out = String::with_capacity(batch.len() * 32);
        for row in batch.rows() {
            self.encode_row(&mut out, row)?;
        }
        Ok(Bytes::from(out))
    }
}

/// One value per line: the single column if present, otherwise the key.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineEncoder;

impl StreamEncoder for LineEncoder {
    fn content_type(&self) -> &'static str {
        "text/plain"
    }

    fn encode_batch(&self, batch: &Batch) -> Result<Bytes, EncodeError> {
        let mut out = String::with_capacity(batch.len() * 8);
        for row in batch.rows() {
            match row.columns.as_slice() {
                [] => write!(out, "{}", row.key)?,
                [Value::Text(s)] if s.contains(['\n', '\r']) => {
                    return Err(EncodeError::Unrepresentable {
                        key: row.key,
                        reason: "line break inside a line-oriented value".to_string(),
                    })
                }
                [value] => write!(out, "{}", value)?,
                columns => {
                    return Err(EncodeError::ColumnCount {
                        key: row.key,
                        expected: 1,
                        actual: columns.len(),
                    })
                }
            }
            out.push('\n');
        }
        Ok(Bytes::from(out))
    }
}
