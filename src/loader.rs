use std::fmt::Write as _;
use std::time::Instant;

use chrono::SecondsFormat;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::db::Sink;
use crate::models::{RECORD_COLUMNS, Record};

pub const DENSITY_TABLE: &str = "density_data";

const COPY_CHUNK_ROWS: usize = 1000;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open transaction: {0}")]
    Begin(#[source] sqlx::Error),
    #[error("bulk copy failed: {0}")]
    Copy(#[source] sqlx::Error),
    #[error("bulk copy accepted {copied} rows, expected {expected}")]
    RowCountMismatch { copied: u64, expected: usize },
    #[error("failed to commit bulk copy: {source}")]
    Commit {
        #[source]
        source: sqlx::Error,
        /// Set when the rollback issued after the failed commit also failed.
        rollback: Option<sqlx::Error>,
    },
}

/// Writes one batch of records with a single COPY inside a single transaction.
pub struct BulkLoader<'a, S: Sink> {
    sink: &'a mut S,
}

impl<'a, S: Sink> BulkLoader<'a, S> {
    pub fn new(sink: &'a mut S) -> Self {
        Self { sink }
    }

    /// Either every record becomes visible or none do.
    pub async fn load(&mut self, records: &[Record]) -> Result<u64, LoadError> {
        if records.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        self.sink.begin().await.map_err(LoadError::Begin)?;

        let statement = copy_statement();
        let mut chunks = records.chunks(COPY_CHUNK_ROWS).map(encode_rows);
        let copied = match self.sink.copy_in(&statement, &mut chunks).await {
            Ok(copied) => copied,
            Err(err) => {
                self.abandon().await;
                return Err(LoadError::Copy(err));
            }
        };

        if copied != records.len() as u64 {
            self.abandon().await;
            return Err(LoadError::RowCountMismatch {
                copied,
                expected: records.len(),
            });
        }

        if let Err(source) = self.sink.commit().await {
            let rollback = self.sink.rollback().await.err();
            if let Some(rollback_err) = &rollback {
                error!(
                    stage = "load",
                    event = "load.rollback",
                    result = "fail",
                    error = %rollback_err,
                    "rollback after failed commit also failed"
                );
            }
            return Err(LoadError::Commit { source, rollback });
        }

        info!(
            stage = "load",
            event = "load.end",
            result = "ok",
            rows = copied,
            duration_ms = start.elapsed().as_millis(),
            "bulk copy committed"
        );

        Ok(copied)
    }

    async fn abandon(&mut self) {
        if let Err(err) = self.sink.rollback().await {
            warn!(
                stage = "load",
                event = "load.rollback",
                result = "fail",
                error = %err,
                "failed to roll back abandoned bulk copy"
            );
        }
    }
}

fn copy_statement() -> String {
    format!(
        "COPY {DENSITY_TABLE} ({}) FROM STDIN",
        RECORD_COLUMNS.join(", ")
    )
}

/// Encodes records as COPY text rows in `RECORD_COLUMNS` order.
fn encode_rows(records: &[Record]) -> Vec<u8> {
    let mut out = String::with_capacity(records.len() * 64);
    for record in records {
        // Writing into a String cannot fail.
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            record
                .dump_time
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            record.group_id,
            escape_copy_text(&record.group_name),
            record.parent_id,
            escape_copy_text(&record.parent_name),
            record.client_count,
        );
    }
    out.into_bytes()
}

fn escape_copy_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}
