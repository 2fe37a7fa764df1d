//! Decoding of a single wireless dump.
//!
//! A dump is a JSON object keyed by group id:
//!
//! ```json
//! { "152": { "name": "Lerner 3", "client_count": 70, "parent_id": 84 } }
//! ```
//!
//! `parent_id` and `client_count` show up either as JSON numbers or as
//! numerals wrapped in strings, depending on which exporter wrote the file.
//! Both decode through [`decode_integer`].

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::lookup::BuildingDirectory;
use crate::models::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Malformed,
    InvalidGroupId,
    InvalidField,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not a JSON object of group records: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("group id {key:?} is not a base-10 integer")]
    InvalidGroupId { key: String },
    #[error("group id {key:?} appears more than once")]
    DuplicateGroupId { key: String },
    #[error("group {group_id}: field `{field}` {reason}")]
    InvalidField {
        group_id: i32,
        field: &'static str,
        reason: String,
    },
}

impl ParseError {
    pub fn kind(&self) -> ParseErrorKind {
        match self {
            ParseError::Malformed(_) => ParseErrorKind::Malformed,
            ParseError::InvalidGroupId { .. } | ParseError::DuplicateGroupId { .. } => {
                ParseErrorKind::InvalidGroupId
            }
            ParseError::InvalidField { .. } => ParseErrorKind::InvalidField,
        }
    }
}

/// Parses one dump into records stamped with `dump_time`.
///
/// The whole call fails on the first bad group id or field; callers never see
/// a partial set. Records come back in the order the groups appear in the file.
pub fn parse_dump(
    dump_time: DateTime<Utc>,
    payload: &[u8],
    directory: &BuildingDirectory,
) -> Result<Vec<Record>, ParseError> {
    let DumpEntries(entries) = serde_json::from_slice(payload)?;

    let mut seen = HashSet::with_capacity(entries.len());
    let mut records = Vec::with_capacity(entries.len());

    for (key, value) in entries {
        let group_id: i32 = key
            .parse()
            .map_err(|_| ParseError::InvalidGroupId { key: key.clone() })?;
        if !seen.insert(group_id) {
            return Err(ParseError::DuplicateGroupId { key });
        }

        let body = value.as_object().ok_or_else(|| ParseError::InvalidField {
            group_id,
            field: "record",
            reason: format!("must be a JSON object, got {}", json_type(&value)),
        })?;

        let group_name = match body.get("name") {
            Some(Value::String(name)) => name.clone(),
            Some(other) => {
                return Err(ParseError::InvalidField {
                    group_id,
                    field: "name",
                    reason: format!("must be a string, got {}", json_type(other)),
                });
            }
            None => {
                return Err(ParseError::InvalidField {
                    group_id,
                    field: "name",
                    reason: "is missing".to_string(),
                });
            }
        };

        let parent_id = integer_field(body, group_id, "parent_id")?;
        let client_count = integer_field(body, group_id, "client_count")?;
        if client_count < 0 {
            return Err(ParseError::InvalidField {
                group_id,
                field: "client_count",
                reason: format!("must not be negative, got {client_count}"),
            });
        }

        let parent_name = match directory.resolve(parent_id) {
            Some(name) => name.to_string(),
            None => {
                warn!(
                    stage = "parse",
                    event = "parse.lookup.miss",
                    group_id,
                    parent_id,
                    "no building name for parent id"
                );
                String::new()
            }
        };

        records.push(Record {
            dump_time,
            group_id,
            group_name,
            parent_id,
            parent_name,
            client_count,
        });
    }

    Ok(records)
}

fn integer_field(
    body: &Map<String, Value>,
    group_id: i32,
    field: &'static str,
) -> Result<i32, ParseError> {
    let value = body.get(field).ok_or_else(|| ParseError::InvalidField {
        group_id,
        field,
        reason: "is missing".to_string(),
    })?;
    decode_integer(value).map_err(|reason| ParseError::InvalidField {
        group_id,
        field,
        reason,
    })
}

/// Accepts a JSON number (fractions truncate toward zero) or a string made of
/// ASCII digits only. Everything else is rejected with a reason.
pub(crate) fn decode_integer(value: &Value) -> Result<i32, String> {
    match value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return i32::try_from(int).map_err(|_| format!("{int} is out of range"));
            }
            match number.as_f64() {
                Some(float) if float.is_finite() => {
                    let truncated = float.trunc();
                    if truncated < f64::from(i32::MIN) || truncated > f64::from(i32::MAX) {
                        Err(format!("{number} is out of range"))
                    } else {
                        Ok(truncated as i32)
                    }
                }
                _ => Err(format!("{number} is not representable as an integer")),
            }
        }
        Value::String(text) => {
            if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format!("{text:?} is not a base-10 numeral"));
            }
            text.parse::<i32>()
                .map_err(|_| format!("{text:?} is out of range"))
        }
        other => Err(format!("must be a number or numeral string, got {}", json_type(other))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Top-level entries in file order, duplicates included.
struct DumpEntries(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for DumpEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = DumpEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object keyed by group id")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    entries.push((key, value));
                }
                Ok(DumpEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}
