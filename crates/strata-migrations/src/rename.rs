//! Explicit renames the comments alone cannot reveal
//!
//! ```json
//! {
//!     "datasets/gov/OldCity": {"": "datasets/gov/City", "title": "name"},
//!     "datasets/gov/Country": {"code": "iso"}
//! }
//! ```
//!
//! Keys are old model names, the empty key holds the new model name and
//! every other key maps an old column to a new one.

use crate::error::{MigrationError, Result};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenameMap {
    tables: HashMap<String, String>,
    columns: HashMap<String, HashMap<String, String>>,
}

impl RenameMap {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| MigrationError::InvalidRenameMap {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        Self::parse(&content).map_err(|e| match e {
            MigrationError::InvalidRenameMap { details, .. } => MigrationError::InvalidRenameMap {
                path: path.display().to_string(),
                details,
            },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        let raw: HashMap<String, HashMap<String, String>> =
            serde_json::from_str(content).map_err(|e| MigrationError::InvalidRenameMap {
                path: "<inline>".to_string(),
                details: e.to_string(),
            })?;

        let mut map = RenameMap::default();
        for (table, renames) in raw {
            let mut columns = HashMap::new();
            for (old, new) in renames {
                if old.is_empty() {
                    map.tables.insert(table.clone(), new);
                } else {
                    columns.insert(old, new);
                }
            }
            if !columns.is_empty() {
                map.columns.insert(table, columns);
            }
        }
        Ok(map)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }

    /// New name of a model, if it was renamed
    pub fn table(&self, old: &str) -> Option<&str> {
        self.tables.get(old).map(String::as_str)
    }

    /// New name of a column of the model known as `old_table`
    pub fn column(&self, old_table: &str, old_column: &str) -> Option<&str> {
        self.columns
            .get(old_table)
            .and_then(|columns| columns.get(old_column))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let map = RenameMap::parse(r#"{"example/Old": {"": "example/New", "title": "name"}}"#).unwrap();
        assert_eq!(map.table("example/Old"), Some("example/New"));
        assert_eq!(map.column("example/Old", "title"), Some("name"));
        assert_eq!(map.column("example/Old", "other"), None);
        assert_eq!(map.table("example/New"), None);
    }

    #[test]
    fn test_invalid() {
        let err = RenameMap::parse(r#"{"example/Old": "example/New"}"#).unwrap_err();
        assert_eq!(err.kind(), "InvalidRenameMap");
    }
}
