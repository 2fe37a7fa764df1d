use chrono::{DateTime, Utc};

/// Column order of `density_data`, shared by the COPY statement and the encoder.
pub const RECORD_COLUMNS: [&str; 6] = [
    "dump_time",
    "group_id",
    "group_name",
    "parent_id",
    "parent_name",
    "client_count",
];

// One access-point group's client count at the moment a dump was written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub dump_time: DateTime<Utc>,
    pub group_id: i32,
    pub group_name: String,
    pub parent_id: i32,
    /// Empty when the building directory has no entry for `parent_id`.
    pub parent_name: String,
    pub client_count: i32,
}
