//! Downloads a stream and reports whether it arrived whole.
//!
//! A truncated stream has no in-band error marker, so completeness is
//! inferred: every record must end with a newline, leading keys must be
//! strictly ascending, and the row count must match when one is expected.

use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "stream-check")]
#[command(about = "Verify a streamed download from stream-server", long_about = None)]
struct Cli {
    /// Full URL of the stream, e.g. http://127.0.0.1:8080/test
    #[arg(short, long)]
    url: String,

    /// The first record is a column header.
    #[arg(long)]
    header: bool,

    /// Fail unless exactly this many data rows arrive.
    #[arg(long)]
    expect_rows: Option<u64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
enum CheckError {
    #[error("record {record}: leading field {found:?} is not a key")]
    BadKey { record: u64, found: String },

    #[error("record {record}: key {key} does not follow {previous}")]
    OutOfOrder { record: u64, previous: u64, key: u64 },

    #[error("body ended mid-record after {rows} rows ({pending} trailing bytes)")]
    Unterminated { rows: u64, pending: usize },

    #[error("expected {expected} rows, received {actual}")]
    RowCount { expected: u64, actual: u64 },
}

/// Incremental record splitter and key-order check.
///
/// Newlines inside double-quoted fields do not end a record.
#[derive(Debug, Default)]
struct RecordChecker {
    skip_header: bool,
    current: Vec<u8>,
    in_quotes: bool,
    records: u64,
    rows: u64,
    last_key: Option<u64>,
}

impl RecordChecker {
    fn new(skip_header: bool) -> Self {
        Self {
            skip_header,
            ..Self::default()
        }
    }

    fn feed(&mut self, chunk: &[u8]) -> Result<(), CheckError> {
        for &byte in chunk {
            match byte {
                b'"' => {
                    self.in_quotes = !self.in_quotes;
                    self.current.push(byte);
                }
                b'\n' if !self.in_quotes => {
                    let record = std::mem::take(&mut self.current);
                    self.complete(&record)?;
                }
                _ => self.current.push(byte),
            }
        }
        Ok(())
    }

    fn complete(&mut self, record: &[u8]) -> Result<(), CheckError> {
        self.records += 1;
        if self.skip_header && self.records == 1 {
            return Ok(());
        }

        let leading = record.split(|b| *b == b',').next().unwrap_or_default();
        let text = String::from_utf8_lossy(leading);
        let key: u64 = text.trim().parse().map_err(|_| CheckError::BadKey {
            record: self.records,
            found: text.to_string(),
        })?;

        if let Some(previous) = self.last_key {
            if key <= previous {
                return Err(CheckError::OutOfOrder {
                    record: self.records,
                    previous,
                    key,
                });
            }
        }
        self.last_key = Some(key);
        self.rows += 1;
        Ok(())
    }

    fn finish(&self, expect_rows: Option<u64>) -> Result<u64, CheckError> {
        if !self.current.is_empty() || self.in_quotes {
            return Err(CheckError::Unterminated {
                rows: self.rows,
                pending: self.current.len(),
            });
        }
        match expect_rows {
            Some(expected) if expected != self.rows => Err(CheckError::RowCount {
                expected,
                actual: self.rows,
            }),
            _ => Ok(self.rows),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli).await {
        Ok(rows) => {
            println!("OK: {} rows", rows);
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("TRUNCATED: {}", message);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<u64, String> {
    let started = Instant::now();
    let mut response = reqwest::get(&cli.url)
        .await
        .map_err(|e| format!("request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("server answered {}", status));
    }

    let mut checker = RecordChecker::new(cli.header);
    let mut bytes = 0u64;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                bytes += chunk.len() as u64;
                checker.feed(&chunk).map_err(|e| e.to_string())?;
            }
            Ok(None) => break,
            Err(e) => {
                return Err(format!(
                    "connection failed after {} bytes and {} rows: {}",
                    bytes, checker.rows, e
                ))
            }
        }
    }

    let rows = checker.finish(cli.expect_rows).map_err(|e| e.to_string())?;
    eprintln!(
        "received {} bytes in {:.2}s",
        bytes,
        started.elapsed().as_secs_f64()
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_rows_across_chunk_boundaries() {
        let mut checker = RecordChecker::new(false);
        checker.feed(b"1\n2\n1").unwrap();
        checker.feed(b"0\n11\n").unwrap();
        assert_eq!(checker.finish(Some(4)), Ok(4));
    }

    #[test]
    fn header_is_skipped_and_quoted_newlines_kept() {
        let mut checker = RecordChecker::new(true);
        checker
            .feed(b"id,note\n1,plain\n2,\"two\nlines\"\n3,\"x,y\"\n")
            .unwrap();
        assert_eq!(checker.finish(None), Ok(3));
    }

    #[test]
    fn missing_final_newline_is_truncation() {
        let mut checker = RecordChecker::new(false);
        checker.feed(b"1\n2\n3").unwrap();
        assert_eq!(
            checker.finish(None),
            Err(CheckError::Unterminated { rows: 2, pending: 1 })
        );
    }

    #[test]
    fn keys_must_ascend() {
        let mut checker = RecordChecker::new(false);
        let err = checker.feed(b"1\n3\n3\n").unwrap_err();
        assert_eq!(
            err,
            CheckError::OutOfOrder {
                record: 3,
                previous: 3,
                key: 3
            }
        );
    }

    #[test]
    fn row_count_mismatch() {
        let mut checker = RecordChecker::new(false);
        checker.feed(b"1\n2\n").unwrap();
        assert_eq!(
            checker.finish(Some(3)),
            Err(CheckError::RowCount {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn non_numeric_key() {
        let mut checker = RecordChecker::new(false);
        assert!(matches!(
            checker.feed(b"id,x\n"),
            Err(CheckError::BadKey { record: 1, .. })
        ));
    }
}
