//! Physical schema snapshot
//!
//! The same types describe what the database currently holds (read by a
//! [`crate::SchemaInspector`]) and what the manifest asks for (built by
//! [`crate::desired_schema`]). Logical names come from table and column
//! comments; an object without a comment is known by its physical name.

use std::fmt;

/// Column storage type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Text,
    BigInt,
    Integer,
    Double,
    Boolean,
    Bytea,
    Jsonb,
    Uuid,
    Date,
    Time,
    Timestamp,
    /// `bigint` filled from its own sequence
    BigSerial,
    Geometry {
        /// Lower case subtype (`point`, `polygon`), `None` for any geometry
        kind: Option<String>,
        srid: Option<u32>,
    },
    /// Anything the migrator does not manage, kept verbatim
    Other(String),
}

impl SqlType {
    /// Parse the output of PostgreSQL `format_type()`
    pub fn parse(raw: &str) -> SqlType {
        let lower = raw.trim().to_lowercase();
        match lower.as_str() {
            "text" | "character varying" | "varchar" => SqlType::Text,
            "bigint" | "int8" => SqlType::BigInt,
            "integer" | "int" | "int4" | "smallint" | "int2" => SqlType::Integer,
            "double precision" | "float8" | "real" | "float4" | "numeric" => SqlType::Double,
            "boolean" | "bool" => SqlType::Boolean,
            "bytea" => SqlType::Bytea,
            "jsonb" | "json" => SqlType::Jsonb,
            "uuid" => SqlType::Uuid,
            "date" => SqlType::Date,
            "time" | "time without time zone" => SqlType::Time,
            "timestamp" | "timestamp without time zone" | "timestamp with time zone" | "timestamptz" => {
                SqlType::Timestamp
            }
            "bigserial" => SqlType::BigSerial,
            "geometry" => SqlType::Geometry { kind: None, srid: None },
            other => match other.strip_prefix("geometry(").and_then(|s| s.strip_suffix(')')) {
                Some(args) => {
                    let mut parts = args.split(',').map(str::trim);
                    let kind = parts
                        .next()
                        .filter(|k| !k.is_empty() && *k != "geometry")
                        .map(str::to_string);
                    let srid = parts.next().and_then(|s| s.parse().ok());
                    SqlType::Geometry { kind, srid }
                }
                None if other.starts_with("character varying(") => SqlType::Text,
                None => SqlType::Other(raw.trim().to_string()),
            },
        }
    }

    pub fn sql(&self) -> String {
        match self {
            SqlType::Text => "text".to_string(),
            SqlType::BigInt => "bigint".to_string(),
            SqlType::Integer => "integer".to_string(),
            SqlType::Double => "double precision".to_string(),
            SqlType::Boolean => "boolean".to_string(),
            SqlType::Bytea => "bytea".to_string(),
            SqlType::Jsonb => "jsonb".to_string(),
            SqlType::Uuid => "uuid".to_string(),
            SqlType::Date => "date".to_string(),
            SqlType::Time => "time".to_string(),
            SqlType::Timestamp => "timestamp".to_string(),
            SqlType::BigSerial => "bigserial".to_string(),
            SqlType::Geometry { kind: None, srid: None } => "geometry".to_string(),
            SqlType::Geometry { kind, srid } => {
                let kind = kind.as_deref().unwrap_or("geometry");
                match srid {
                    Some(srid) => format!("geometry({},{})", kind, srid),
                    None => format!("geometry({})", kind),
                }
            }
            SqlType::Other(raw) => raw.clone(),
        }
    }

    /// Whether two types store values the same way; a `bigserial` is a
    /// `bigint` once created
    pub fn same_storage(&self, other: &SqlType) -> bool {
        match (self, other) {
            (SqlType::BigSerial, SqlType::BigInt) | (SqlType::BigInt, SqlType::BigSerial) => true,
            _ => self == other,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

/// What a desired column stands for, drives data transfers between
/// representations of the same property
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Role {
    /// Plain value column, or a column read from the database
    #[default]
    Plain,
    /// JSONB column holding a language keyed text
    Text { langs: Vec<String> },
    /// `<prop>._id` of a level 4 reference
    RefId {
        prop: String,
        /// Physical main table of the target model
        target: String,
        /// Physical primary key columns of the target and their types
        keys: Vec<(String, SqlType)>,
    },
    /// `<prop>.<key>` of a level 3 reference
    RefKey {
        prop: String,
        key: String,
        target: String,
        /// Physical column of the key in the target table
        target_column: String,
        key_type: SqlType,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub comment: Option<String>,
    pub default: Option<String>,
    /// Sequence owned by the column, as read from the database
    pub sequence: Option<String>,
    pub role: Role,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            comment: None,
            default: None,
            sequence: None,
            role: Role::Plain,
        }
    }

    pub fn commented(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn logical(&self) -> &str {
        self.comment.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey {
        table: String,
        columns: Vec<String>,
        cascade: bool,
    },
    Check(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub comment: Option<String>,
    pub columns: Vec<Column>,
    pub constraints: Vec<Constraint>,
    pub indexes: Vec<Index>,
    /// Physical columns of the model's declared primary key; empty for side
    /// tables and for tables read from the database
    pub pkeys: Vec<String>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            columns: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
            pkeys: Vec::new(),
        }
    }

    pub fn logical(&self) -> &str {
        self.comment.as_deref().unwrap_or(&self.name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_by_logical(&self, logical: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.logical() == logical)
    }
}

/// Every table of one database schema
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub tables: Vec<Table>,
}

impl Snapshot {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_by_logical(&self, logical: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.logical() == logical)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
