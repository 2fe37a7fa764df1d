//! Ingests periodic wireless-density JSON dumps into Postgres.
//!
//! Each dump file is named after the local time it was taken
//! (`YYYY-MM-DD-HH-MM.json`) and maps access-point group ids to their
//! current client count. Files are parsed into [`models::Record`]s, bulk
//! loaded into `density_data` in one transaction, moved to an archive
//! directory, and the rolling window views are refreshed afterwards.

pub mod config;
pub mod db;
pub mod dump_file;
pub mod loader;
pub mod logging;
pub mod lookup;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod refresher;
pub mod watcher;

pub use lookup::BuildingDirectory;
pub use models::Record;
pub use orchestrator::{BatchSummary, IngestSettings, Orchestrator};
