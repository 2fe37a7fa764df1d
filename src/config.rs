use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use clap::{ArgAction, Parser};
use humantime::parse_duration;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::orchestrator::IngestSettings;
use crate::refresher::DEFAULT_VIEWS;

#[derive(Debug, Parser)]
#[command(
    name = "density-ingest",
    version,
    about = "Load wireless density dumps into Postgres and refresh the window views"
)]
pub struct Cli {
    #[arg(long, env = "PG_USER", default_value = "adicu")]
    pub pg_user: String,
    #[arg(long, env = "PG_PASSWORD", hide_env_values = true)]
    pub pg_password: String,
    #[arg(long, env = "PG_DB")]
    pub pg_db: String,
    #[arg(long, env = "PG_HOST", default_value = "localhost")]
    pub pg_host: String,
    #[arg(long, env = "PG_PORT", default_value_t = 5432)]
    pub pg_port: u16,
    /// libpq sslmode: disable, allow, prefer, require, verify-ca or verify-full.
    #[arg(long, env = "PG_SSL", default_value = "disable")]
    pub pg_ssl: String,
    /// Directory to watch for new dump files.
    #[arg(long = "dir", env = "DENSITY_WATCH_DIR", default_value = ".")]
    pub watch_dir: PathBuf,
    /// Directory loaded files are moved into.
    #[arg(long = "archive", env = "DENSITY_ARCHIVE_DIR")]
    pub archive_dir: PathBuf,
    /// Load every dump already present in the backfill directory before watching.
    #[arg(long = "all", env = "DENSITY_LOAD_ALL", default_value_t = false)]
    pub load_all: bool,
    /// Directory scanned by `--all`. Defaults to the archive directory.
    #[arg(long, env = "DENSITY_BACKFILL_DIR")]
    pub backfill_dir: Option<PathBuf>,
    /// Keep watching for new files (`--watch false` to exit after the backfill).
    #[arg(long, env = "DENSITY_WATCH", default_value_t = true, action = ArgAction::Set)]
    pub watch: bool,
    /// Pause between a create event and reading the file.
    #[arg(long, env = "DENSITY_SETTLE_DELAY", default_value = "2s")]
    pub settle_delay: String,
    /// Time zone the file-name timestamps are written in.
    #[arg(long, env = "DENSITY_TIMEZONE", default_value = "America/New_York")]
    pub timezone: String,
    /// TOML building table replacing the bundled one.
    #[arg(long, env = "DENSITY_BUILDINGS")]
    pub buildings: Option<PathBuf>,
    /// Apply the bundled schema migrations before ingesting.
    #[arg(long, env = "DENSITY_MIGRATE", default_value_t = false)]
    pub migrate: bool,
    /// Increase logging verbosity (use -vv for trace level).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: String,
    pub database: String,
    pub host: String,
    pub port: u16,
    pub ssl_mode: PgSslMode,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub watch_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub backfill_dir: Option<PathBuf>,
    pub load_all: bool,
    pub watch: bool,
    pub settle_delay: Duration,
    pub timezone: Tz,
    pub buildings: Option<PathBuf>,
    pub migrate: bool,
}

impl AppConfig {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        if cli.pg_password.is_empty() {
            bail!("PG_PASSWORD must be set");
        }
        if cli.pg_db.trim().is_empty() {
            bail!("PG_DB must be set");
        }
        if cli.pg_host.trim().is_empty() {
            bail!("PG_HOST must not be empty");
        }

        let ssl_mode: PgSslMode = cli
            .pg_ssl
            .parse()
            .with_context(|| format!("invalid PG_SSL mode '{}'", cli.pg_ssl))?;

        let settle_delay = parse_duration(&cli.settle_delay)
            .with_context(|| format!("invalid settle delay '{}'", cli.settle_delay))?;

        let timezone: Tz = cli
            .timezone
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid timezone '{}': {err}", cli.timezone))?;

        Ok(Self {
            database: DatabaseConfig {
                user: cli.pg_user,
                password: cli.pg_password,
                database: cli.pg_db,
                host: cli.pg_host,
                port: cli.pg_port,
                ssl_mode,
            },
            watch_dir: cli.watch_dir,
            archive_dir: cli.archive_dir,
            backfill_dir: cli.backfill_dir,
            load_all: cli.load_all,
            watch: cli.watch,
            settle_delay,
            timezone,
            buildings: cli.buildings,
            migrate: cli.migrate,
        })
    }

    pub fn validate_config(&self) -> Result<()> {
        ensure_dir(&self.archive_dir, "archive directory")?;
        if self.watch {
            ensure_dir(&self.watch_dir, "watch directory")?;
        }
        if self.load_all {
            ensure_dir(self.backfill_source(), "backfill directory")?;
        }
        if let Some(path) = &self.buildings {
            if !path.is_file() {
                bail!("building table {} does not exist", path.display());
            }
        }
        Ok(())
    }

    pub fn backfill_source(&self) -> &Path {
        self.backfill_dir.as_deref().unwrap_or(&self.archive_dir)
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        let db = &self.database;
        PgConnectOptions::new()
            .username(&db.user)
            .password(&db.password)
            .database(&db.database)
            .host(&db.host)
            .port(db.port)
            .ssl_mode(db.ssl_mode)
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            archive_dir: self.archive_dir.clone(),
            views: DEFAULT_VIEWS.iter().map(|v| v.to_string()).collect(),
            settle_delay: self.settle_delay,
            timezone: self.timezone,
        }
    }
}

fn ensure_dir(path: &Path, what: &str) -> Result<()> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("{what} {} is not accessible", path.display()))?;
    if !meta.is_dir() {
        bail!("{what} {} is not a directory", path.display());
    }
    Ok(())
}
