use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

const BUNDLED_BUILDINGS: &str = include_str!("../buildings.toml");

/// Maps a building (`parent_id`) to the name shown in the density views.
///
/// Built once at startup and never mutated afterwards; share it behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildingDirectory {
    names: HashMap<i32, String>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to read building table {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse building table {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("building {id} is listed more than once")]
    DuplicateId { id: i32 },
    #[error("building {id} has an empty name")]
    EmptyName { id: i32 },
    #[error("building table {origin} has no [[building]] entries")]
    Empty { origin: String },
}

#[derive(Debug, Deserialize)]
struct BuildingFile {
    #[serde(rename = "building", default)]
    buildings: Vec<BuildingEntry>,
}

#[derive(Debug, Deserialize)]
struct BuildingEntry {
    id: i32,
    name: String,
}

impl BuildingDirectory {
    /// The table compiled into the binary from `buildings.toml`.
    pub fn bundled() -> Result<Self, DirectoryError> {
        Self::from_toml(BUNDLED_BUILDINGS, "bundled buildings.toml")
    }

    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| DirectoryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw, &path.display().to_string())
    }

    pub fn from_entries<I, S>(entries: I) -> Result<Self, DirectoryError>
    where
        I: IntoIterator<Item = (i32, S)>,
        S: Into<String>,
    {
        let mut names = HashMap::new();
        for (id, name) in entries {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(DirectoryError::EmptyName { id });
            }
            if names.insert(id, name).is_some() {
                return Err(DirectoryError::DuplicateId { id });
            }
        }
        Ok(Self { names })
    }

    fn from_toml(raw: &str, origin: &str) -> Result<Self, DirectoryError> {
        let parsed: BuildingFile = toml::from_str(raw).map_err(|source| DirectoryError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        let entries = parsed.buildings.into_iter().map(|b| (b.id, b.name));
        let directory = Self::from_entries(entries)?;
        // A table file with no entries would blank every parent_name.
        if directory.is_empty() {
            return Err(DirectoryError::Empty {
                origin: origin.to_string(),
            });
        }
        Ok(directory)
    }

    pub fn resolve(&self, parent_id: i32) -> Option<&str> {
        self.names.get(&parent_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_table_resolves_known_buildings() {
        let directory = BuildingDirectory::bundled().expect("bundled table");
        assert_eq!(directory.len(), 8);
        assert_eq!(directory.resolve(84), Some("Lerner"));
        assert_eq!(directory.resolve(103), Some("Butler"));
        assert_eq!(directory.resolve(2), Some("Uris"));
        assert_eq!(directory.resolve(15), Some("Northwest Corner Building"));
    }

    #[test]
    fn unknown_building_is_none() {
        let directory = BuildingDirectory::bundled().expect("bundled table");
        assert_eq!(directory.resolve(9999), None);
        assert_eq!(directory.resolve(-1), None);
    }

    #[test]
    fn loads_replacement_table_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("buildings.toml");
        std::fs::write(
            &path,
            r#"
                [[building]]
                id = 7
                name = "Mudd"
            "#,
        )
        .expect("write table");

        let directory = BuildingDirectory::load(&path).expect("load");
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.resolve(7), Some("Mudd"));
        assert_eq!(directory.resolve(84), None);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = BuildingDirectory::from_entries([(1, "A"), (1, "B")]).expect_err("duplicate");
        assert!(matches!(err, DirectoryError::DuplicateId { id: 1 }));
    }

    #[test]
    fn rejects_empty_names() {
        let raw = r#"
            [[building]]
            id = 3
            name = "  "
        "#;
        let err = BuildingDirectory::from_toml(raw, "inline").expect_err("empty name");
        assert!(err.to_string().contains("empty name"));
    }

    #[test]
    fn rejects_table_file_without_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("buildings.toml");
        std::fs::write(&path, "# no buildings yet\n").expect("write table");

        let err = BuildingDirectory::load(&path).expect_err("empty table");
        assert!(matches!(err, DirectoryError::Empty { .. }));
        assert!(BuildingDirectory::from_entries(Vec::<(i32, String)>::new())
            .expect("programmatic empty table")
            .is_empty());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = BuildingDirectory::load(Path::new("/nonexistent/buildings.toml"))
            .expect_err("missing file");
        assert!(err.to_string().contains("/nonexistent/buildings.toml"));
    }
}
