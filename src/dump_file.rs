use std::path::Path;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Date-time layout embedded in dump file names, e.g. `2014-10-31-15-15.json`.
pub const DUMP_TIME_FORMAT: &str = "%Y-%m-%d-%H-%M";

static DUMP_FILENAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4}(?:-\d{2}){4})\.json$").expect("dump filename pattern is valid")
});

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("{path} is not named like a dump file (YYYY-MM-DD-HH-MM.json)")]
    NotADump { path: String },
    #[error("{path}: {stamp:?} is not a valid date-time: {source}")]
    Invalid {
        path: String,
        stamp: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("{path}: {stamp} does not exist in {timezone}")]
    Nonexistent {
        path: String,
        stamp: String,
        timezone: String,
    },
}

pub fn is_dump_file(path: &Path) -> bool {
    DUMP_FILENAME.is_match(&path.to_string_lossy())
}

/// Reads the dump time out of the file's base name, interpreting it as local
/// time in `timezone`. During a DST overlap the earlier instant wins.
pub fn dump_timestamp(path: &Path, timezone: Tz) -> Result<DateTime<Utc>, TimestampError> {
    let display = path.display().to_string();
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();

    let stamp = DUMP_FILENAME
        .captures(&name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| TimestampError::NotADump {
            path: display.clone(),
        })?;

    let naive = NaiveDateTime::parse_from_str(stamp, DUMP_TIME_FORMAT).map_err(|source| {
        TimestampError::Invalid {
            path: display.clone(),
            stamp: stamp.to_string(),
            source,
        }
    })?;

    let local = timezone
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| TimestampError::Nonexistent {
            path: display,
            stamp: stamp.to_string(),
            timezone: timezone.name().to_string(),
        })?;

    Ok(local.with_timezone(&Utc))
}
