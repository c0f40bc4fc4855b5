//! Logical and physical identifier naming
//!
//! Logical names use `/` as namespace separator and `/:<kind>` suffixes for
//! side tables (`City/:changelog`, `City/:list/tags`). Physical identifiers
//! must fit the engine limit, so long names are compressed into
//! `<prefix>_<8 hex>_<suffix>`, where the hex part is derived from the full
//! name. The logical name always survives in the table or column comment.

use sha2::{Digest, Sha256};
use std::fmt;

/// PostgreSQL keeps identifiers up to `NAMEDATALEN - 1` bytes
pub const NAMEDATALEN: usize = 63;

const HASH_LEN: usize = 8;

/// Marker that prefixes soft-deleted tables and columns
pub const REMOVED_PREFIX: &str = "__";

/// Kind of physical table a model maps to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableType {
    Main,
    Changelog,
    Redirect,
    Cache,
    /// Side table holding array elements of the given property place
    List(String),
    /// Side table holding file blocks of the given property place
    File(String),
}

impl TableType {
    /// Suffix appended to the model name (`""` for the main table)
    pub fn suffix(&self) -> String {
        match self {
            TableType::Main => String::new(),
            TableType::Changelog => "/:changelog".to_string(),
            TableType::Redirect => "/:redirect".to_string(),
            TableType::Cache => "/:cache".to_string(),
            TableType::List(place) => format!("/:list/{}", place),
            TableType::File(place) => format!("/:file/{}", place),
        }
    }

    /// Split a logical table name into the model name and its table type
    pub fn parse(logical: &str) -> (String, TableType) {
        match logical.find("/:") {
            None => (logical.to_string(), TableType::Main),
            Some(pos) => {
                let model = logical[..pos].to_string();
                let rest = &logical[pos + 2..];
                let kind = if rest == "changelog" {
                    TableType::Changelog
                } else if rest == "redirect" {
                    TableType::Redirect
                } else if rest == "cache" {
                    TableType::Cache
                } else if let Some(place) = rest.strip_prefix("list/") {
                    TableType::List(place.to_string())
                } else if let Some(place) = rest.strip_prefix("file/") {
                    TableType::File(place.to_string())
                } else {
                    return (logical.to_string(), TableType::Main);
                };
                (model, kind)
            }
        }
    }

    /// Logical table name for a model
    pub fn table_name(&self, model: &str) -> String {
        format!("{}{}", model, self.suffix())
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableType::Main => write!(f, "main"),
            TableType::Changelog => write!(f, "changelog"),
            TableType::Redirect => write!(f, "redirect"),
            TableType::Cache => write!(f, "cache"),
            TableType::List(place) => write!(f, "list({})", place),
            TableType::File(place) => write!(f, "file({})", place),
        }
    }
}

/// Compress `name` so it fits into `max_len` characters.
///
/// Names that already fit are returned unchanged, which also makes the
/// function idempotent: a compressed name always fits.
///
/// A longer name keeps its first two thirds of `max_len`, then `_<8 hex
/// digits of its SHA-256>_`, then as many trailing characters as still fit.
/// With the PostgreSQL limit of 63 that is a 42 character prefix and an 11
/// character suffix, so `…/VeryLongModelName` ends in `_ngModelName`; the
/// total never exceeds `max_len`.
pub fn compress_name(name: &str, max_len: usize) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= max_len {
        return name.to_string();
    }

    let digest = Sha256::digest(name.as_bytes());
    let hash = &hex::encode(digest)[..HASH_LEN];

    let prefix_len = max_len * 2 / 3;
    let suffix_len = max_len.saturating_sub(prefix_len + HASH_LEN + 2);
    let prefix: String = chars[..prefix_len].iter().collect();
    let suffix: String = chars[chars.len() - suffix_len..].iter().collect();

    format!("{}_{}_{}", prefix, hash, suffix)
}

/// Quote an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Whether a logical table or column name carries the soft-delete marker
pub fn is_soft_deleted(name: &str) -> bool {
    last_segment(name).starts_with(REMOVED_PREFIX)
}

/// Soft-delete name for a table or column.
///
/// Only the last `/` segment is prefixed, so `datasets/gov/City` becomes
/// `datasets/gov/__City` and `country._id` becomes `__country._id`. When the
/// plain `__` name is already `taken` more underscores are added until a free
/// name is found.
pub fn removed_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
    let (head, last) = split_last(name);
    let mut marker = REMOVED_PREFIX.to_string();
    loop {
        let candidate = format!("{}{}{}", head, marker, last);
        if !taken(&candidate) {
            return candidate;
        }
        marker.push('_');
    }
}

/// Inverse of [`removed_name`]: strip every leading underscore pair marker
pub fn restored_name(name: &str) -> String {
    let (head, last) = split_last(name);
    format!("{}{}", head, last.trim_start_matches('_'))
}

fn split_last(name: &str) -> (&str, &str) {
    match name.rfind('/') {
        Some(pos) => name.split_at(pos + 1),
        None => ("", name),
    }
}

fn last_segment(name: &str) -> &str {
    split_last(name).1
}

/// Builds physical identifiers for tables, columns, constraints and indexes
#[derive(Debug, Clone)]
pub struct Namer {
    max_len: usize,
}

impl Default for Namer {
    fn default() -> Self {
        Self::new(NAMEDATALEN)
    }
}

impl Namer {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Physical table name for a model and table type
    pub fn table(&self, model: &str, kind: &TableType) -> String {
        self.compress(&kind.table_name(model))
    }

    /// Physical name for an already composed logical name
    pub fn compress(&self, logical: &str) -> String {
        compress_name(logical, self.max_len)
    }

    pub fn column(&self, logical: &str) -> String {
        self.compress(logical)
    }

    pub fn primary_key(&self, table: &str) -> String {
        self.compress(&format!("pk_{}", table))
    }

    pub fn unique(&self, table: &str, column: &str) -> String {
        self.compress(&format!("uq_{}_{}", table, column))
    }

    pub fn foreign_key(&self, table: &str, column: &str) -> String {
        self.compress(&format!("fk_{}_{}", table, column))
    }

    pub fn index(&self, table: &str, column: &str) -> String {
        self.compress(&format!("ix_{}_{}", table, column))
    }

    /// Sequence backing a `bigserial` column
    pub fn sequence(&self, table: &str, column: &str) -> String {
        self.compress(&format!("{}_{}_seq", table, column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_pass_through() {
        assert_eq!(compress_name("datasets/gov/City", 63), "datasets/gov/City");
        assert_eq!(compress_name("", 63), "");
    }

    #[test]
    fn test_table_type_round_trip() {
        let name = TableType::List("notes".to_string()).table_name("datasets/gov/City");
        assert_eq!(name, "datasets/gov/City/:list/notes");
        assert_eq!(
            TableType::parse(&name),
            (
                "datasets/gov/City".to_string(),
                TableType::List("notes".to_string())
            )
        );
        assert_eq!(
            TableType::parse("datasets/gov/City"),
            ("datasets/gov/City".to_string(), TableType::Main)
        );
    }

    #[test]
    fn test_removed_name_cascades() {
        let taken = ["datasets/gov/__City"];
        let name = removed_name("datasets/gov/City", |n| taken.contains(&n));
        assert_eq!(name, "datasets/gov/___City");
        assert_eq!(removed_name("country._id", |_| false), "__country._id");
        assert_eq!(restored_name("datasets/gov/___City"), "datasets/gov/City");
    }

    #[test]
    fn test_soft_deleted_checks_last_segment() {
        assert!(is_soft_deleted("datasets/gov/__City"));
        assert!(is_soft_deleted("__name"));
        assert!(!is_soft_deleted("__datasets/gov/City"));
        assert!(!is_soft_deleted("_id"));
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
