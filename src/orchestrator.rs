//! Drives dump files through parse, load and archive, one file at a time.
//!
//! Two discovery modes feed the same per-file pipeline:
//!
//! - [`Orchestrator::backfill`] lists a directory once and processes every
//!   regular file in file-name order over a single connection.
//! - [`Orchestrator::watch`] drains directory events, taking a fresh
//!   connection for each dump that arrives.
//!
//! Views are refreshed once per batch (the whole backfill, or one watched
//! file) whatever the individual load outcomes were. Per-file failures are
//! logged and the file is left where it was found.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use thiserror::Error;
use tokio::fs;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

use crate::db::{Connector, Sink};
use crate::dump_file::{TimestampError, dump_timestamp, is_dump_file};
use crate::loader::{BulkLoader, LoadError};
use crate::lookup::BuildingDirectory;
use crate::parser::{ParseError, parse_dump};
use crate::refresher::ViewRefresher;
use crate::watcher::{DirectoryWatcher, WatchEvent};

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub archive_dir: PathBuf,
    pub views: Vec<String>,
    /// Wait between a create event and the read, so a file still being
    /// written is not parsed half-finished. A slower writer still loses.
    pub settle_delay: Duration,
    pub timezone: Tz,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to list {path}: {source}")]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to the database: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

#[derive(Debug, Error)]
pub enum FileError {
    #[error(transparent)]
    BadTimestamp(#[from] TimestampError),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: LoadError,
    },
    #[error("loaded {path} but failed to archive it to {target}: {source}")]
    Archive {
        path: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to the database: {0}")]
    Connect(#[source] sqlx::Error),
}

impl FileError {
    fn reason(&self) -> &'static str {
        match self {
            FileError::BadTimestamp(_) => "bad_timestamp",
            FileError::Read { .. } => "read",
            FileError::Parse { .. } => "parse",
            FileError::Load { .. } => "load",
            FileError::Archive { .. } => "archive",
            FileError::Connect(_) => "connect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub records: u64,
    /// `None` when the file already sat in the archive directory.
    pub archived_to: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub files_loaded: usize,
    pub files_failed: usize,
    pub records_loaded: u64,
}

impl BatchSummary {
    fn absorb(&mut self, result: &Result<FileOutcome, FileError>) {
        match result {
            Ok(outcome) => {
                self.files_loaded += 1;
                self.records_loaded += outcome.records;
            }
            Err(_) => self.files_failed += 1,
        }
    }

    fn merge(&mut self, other: BatchSummary) {
        self.files_loaded += other.files_loaded;
        self.files_failed += other.files_failed;
        self.records_loaded += other.records_loaded;
    }
}

pub struct Orchestrator<C: Connector> {
    connector: C,
    directory: Arc<BuildingDirectory>,
    settings: IngestSettings,
}

impl<C: Connector> Orchestrator<C> {
    pub fn new(connector: C, directory: Arc<BuildingDirectory>, settings: IngestSettings) -> Self {
        Self {
            connector,
            directory,
            settings,
        }
    }

    /// One-time load of every file already in `dir`.
    pub async fn backfill(&self, dir: &Path) -> Result<BatchSummary, IngestError> {
        let start = Instant::now();
        info!(
            stage = "backfill",
            event = "backfill.begin",
            dir = %dir.display(),
            "loading every file in directory"
        );

        let files = list_files(dir).await?;
        let mut sink = self
            .connector
            .connect()
            .await
            .map_err(IngestError::Connect)?;

        let mut summary = BatchSummary::default();
        for path in &files {
            let result = self.process_file(&mut sink, path).await;
            log_file_result(path, &result);
            summary.absorb(&result);
        }

        ViewRefresher::new(&mut sink)
            .refresh(&self.settings.views)
            .await;
        close_sink(sink).await;

        info!(
            stage = "backfill",
            event = "backfill.end",
            dir = %dir.display(),
            files_total = files.len(),
            files_loaded = summary.files_loaded,
            files_failed = summary.files_failed,
            records_loaded = summary.records_loaded,
            duration_ms = start.elapsed().as_millis(),
            "backfill finished"
        );

        Ok(summary)
    }

    /// Starts a watch on `dir` and processes arrivals until `shutdown` resolves.
    pub async fn watch_directory<F>(
        &self,
        dir: &Path,
        shutdown: F,
    ) -> Result<BatchSummary, IngestError>
    where
        F: Future<Output = ()>,
    {
        let (_watcher, events) =
            DirectoryWatcher::start(dir).map_err(|source| IngestError::Watch {
                path: dir.to_path_buf(),
                source,
            })?;
        info!(
            stage = "watch",
            event = "watch.begin",
            dir = %dir.display(),
            "watching for new dump files"
        );
        Ok(self.watch(events, shutdown).await)
    }

    /// Drains `events` in delivery order. Returns when the stream ends or
    /// `shutdown` resolves; a file in flight at shutdown is abandoned.
    pub async fn watch<F>(
        &self,
        mut events: UnboundedReceiver<WatchEvent>,
        shutdown: F,
    ) -> BatchSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut summary = BatchSummary::default();

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => {
                    info!(stage = "watch", event = "watch.shutdown", "shutdown requested; stopping watch");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!(stage = "watch", event = "watch.closed", "event stream closed");
                        break;
                    }
                },
            };

            match event {
                WatchEvent::Error(message) => error!(
                    stage = "watch",
                    event = "watch.error",
                    error = %message,
                    "directory watcher reported an error"
                ),
                WatchEvent::Created(path) if !is_dump_file(&path) => debug!(
                    stage = "watch",
                    event = "watch.ignore",
                    path = %path.display(),
                    "ignoring file that is not a dump"
                ),
                WatchEvent::Created(path) => {
                    tokio::select! {
                        _ = &mut shutdown => {
                            warn!(
                                stage = "watch",
                                event = "watch.shutdown",
                                path = %path.display(),
                                "shutdown requested mid-file; abandoning it"
                            );
                            break;
                        }
                        batch = self.ingest_arrival(&path) => summary.merge(batch),
                    }
                }
            }
        }

        summary
    }

    async fn ingest_arrival(&self, path: &Path) -> BatchSummary {
        let mut summary = BatchSummary::default();

        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }

        let mut sink = match self.connector.connect().await {
            Ok(sink) => sink,
            Err(err) => {
                let result = Err(FileError::Connect(err));
                log_file_result(path, &result);
                summary.absorb(&result);
                return summary;
            }
        };

        let result = self.process_file(&mut sink, path).await;
        log_file_result(path, &result);
        summary.absorb(&result);

        ViewRefresher::new(&mut sink)
            .refresh(&self.settings.views)
            .await;
        close_sink(sink).await;

        summary
    }

    /// Timestamp, read, parse, load, archive. The file only moves after its
    /// rows are committed.
    pub async fn process_file(
        &self,
        sink: &mut C::Sink,
        path: &Path,
    ) -> Result<FileOutcome, FileError> {
        let dump_time = dump_timestamp(path, self.settings.timezone)?;

        let payload = fs::read(path).await.map_err(|source| FileError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let records =
            parse_dump(dump_time, &payload, &self.directory).map_err(|source| FileError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        drop(payload);

        let loaded = BulkLoader::new(sink)
            .load(&records)
            .await
            .map_err(|source| FileError::Load {
                path: path.to_path_buf(),
                source,
            })?;
        drop(records);

        let archived_to = self.archive(path).await?;

        Ok(FileOutcome {
            records: loaded,
            archived_to,
        })
    }

    async fn archive(&self, path: &Path) -> Result<Option<PathBuf>, FileError> {
        if self.already_archived(path).await {
            return Ok(None);
        }

        let Some(name) = path.file_name() else {
            return Err(FileError::Archive {
                path: path.to_path_buf(),
                target: self.settings.archive_dir.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
            });
        };
        let target = self.settings.archive_dir.join(name);

        move_file(path, &target)
            .await
            .map_err(|source| FileError::Archive {
                path: path.to_path_buf(),
                target: target.clone(),
                source,
            })?;

        Ok(Some(target))
    }

    async fn already_archived(&self, path: &Path) -> bool {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        match (
            fs::canonicalize(parent).await,
            fs::canonicalize(&self.settings.archive_dir).await,
        ) {
            (Ok(parent), Ok(archive)) => parent == archive,
            _ => false,
        }
    }
}

async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(from, to).await?;
            fs::remove_file(from).await
        }
        Err(err) => Err(err),
    }
}

async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let list_err = |source| IngestError::ListDirectory {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir).await.map_err(list_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
        let path = entry.path();
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => files.push(path),
            Ok(_) => {}
            Err(err) => warn!(
                stage = "backfill",
                event = "backfill.stat",
                path = %path.display(),
                error = %err,
                "skipping entry that cannot be inspected"
            ),
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn log_file_result(path: &Path, result: &Result<FileOutcome, FileError>) {
    match result {
        Ok(outcome) => info!(
            stage = "file",
            event = "file.end",
            result = "ok",
            path = %path.display(),
            records = outcome.records,
            archived_to = ?outcome.archived_to,
            "dump file ingested"
        ),
        Err(err) => error!(
            stage = "file",
            event = "file.end",
            result = "fail",
            reason = err.reason(),
            path = %path.display(),
            error = %format!("{err:#}"),
            "dump file left in place"
        ),
    }
}

async fn close_sink<S: Sink>(sink: S) {
    if let Err(err) = sink.close().await {
        warn!(error = %err, "failed to close database connection");
    }
}
