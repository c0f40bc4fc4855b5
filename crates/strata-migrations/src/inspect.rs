//! Reading the physical schema back from the database

use crate::action::qualified;
use crate::error::Result;
use crate::snapshot::{Column, Constraint, ConstraintKind, Index, Snapshot, SqlType, Table};
use async_trait::async_trait;
use sea_orm::{DatabaseBackend, DatabaseConnection, FromQueryResult, Statement};
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::quote_ident;
use tracing::debug;

/// Separator used to pack column lists into one text value
const LIST_SEPARATOR: char = '\u{1f}';

#[async_trait]
pub trait SchemaInspector: Send + Sync {
    /// Every table of `schema` with its columns, constraints and indexes
    async fn inspect(&self, schema: &str) -> Result<Snapshot>;

    /// Language keys stored in a text column
    async fn text_langs(&self, _schema: &str, _table: &str, _column: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

pub struct PostgresInspector {
    db: Arc<DatabaseConnection>,
}

impl PostgresInspector {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn statement(sql: &str, schema: &str) -> Statement {
        Statement::from_sql_and_values(DatabaseBackend::Postgres, sql, [schema.into()])
    }
}

#[derive(Debug, FromQueryResult)]
struct TableRow {
    name: String,
    comment: Option<String>,
}

#[derive(Debug, FromQueryResult)]
struct ColumnRow {
    table_name: String,
    name: String,
    sql_type: String,
    not_null: bool,
    comment: Option<String>,
    default_value: Option<String>,
    sequence: Option<String>,
}

#[derive(Debug, FromQueryResult)]
struct ConstraintRow {
    table_name: String,
    name: String,
    kind: String,
    columns: String,
    foreign_table: Option<String>,
    foreign_columns: Option<String>,
    on_delete: Option<String>,
    definition: String,
}

#[derive(Debug, FromQueryResult)]
struct IndexRow {
    table_name: String,
    name: String,
    columns: String,
}

#[derive(Debug, FromQueryResult)]
struct LangRow {
    lang: String,
}

const TABLES: &str = r#"
SELECT c.relname AS name, obj_description(c.oid, 'pg_class') AS comment
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relkind IN ('r', 'p')
ORDER BY c.relname
"#;

const COLUMNS: &str = r#"
SELECT c.relname AS table_name,
       a.attname AS name,
       format_type(a.atttypid, a.atttypmod) AS sql_type,
       a.attnotnull AS not_null,
       col_description(c.oid, a.attnum) AS comment,
       pg_get_expr(d.adbin, d.adrelid) AS default_value,
       (SELECT s.relname FROM pg_class s
        WHERE s.oid = pg_get_serial_sequence(format('%I.%I', n.nspname, c.relname), a.attname)::regclass
       ) AS sequence
FROM pg_attribute a
JOIN pg_class c ON c.oid = a.attrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE n.nspname = $1 AND c.relkind IN ('r', 'p') AND a.attnum > 0 AND NOT a.attisdropped
ORDER BY c.relname, a.attnum
"#;

const CONSTRAINTS: &str = r#"
SELECT c.relname AS table_name,
       con.conname AS name,
       con.contype::text AS kind,
       array_to_string(ARRAY(
           SELECT a.attname FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
           ORDER BY k.ord
       ), chr(31)) AS columns,
       f.relname AS foreign_table,
       array_to_string(ARRAY(
           SELECT a.attname FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
           ORDER BY k.ord
       ), chr(31)) AS foreign_columns,
       con.confdeltype::text AS on_delete,
       pg_get_constraintdef(con.oid) AS definition
FROM pg_constraint con
JOIN pg_class c ON c.oid = con.conrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_class f ON f.oid = con.confrelid
WHERE n.nspname = $1 AND con.contype IN ('p', 'u', 'f', 'c')
ORDER BY c.relname, con.conname
"#;

const INDEXES: &str = r#"
SELECT t.relname AS table_name,
       i.relname AS name,
       array_to_string(ARRAY(
           SELECT a.attname FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
           ORDER BY k.ord
       ), chr(31)) AS columns
FROM pg_index ix
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_class t ON t.oid = ix.indrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
WHERE n.nspname = $1
  AND NOT EXISTS (SELECT 1 FROM pg_constraint con WHERE con.conindid = ix.indexrelid)
ORDER BY t.relname, i.relname
"#;

#[async_trait]
impl SchemaInspector for PostgresInspector {
    async fn inspect(&self, schema: &str) -> Result<Snapshot> {
        let db = self.db.as_ref();
        let tables = TableRow::find_by_statement(Self::statement(TABLES, schema)).all(db).await?;
        let columns = ColumnRow::find_by_statement(Self::statement(COLUMNS, schema)).all(db).await?;
        let constraints = ConstraintRow::find_by_statement(Self::statement(CONSTRAINTS, schema))
            .all(db)
            .await?;
        let indexes = IndexRow::find_by_statement(Self::statement(INDEXES, schema)).all(db).await?;
        debug!(
            "Inspected schema {}: {} tables, {} columns, {} constraints, {} indexes",
            schema,
            tables.len(),
            columns.len(),
            constraints.len(),
            indexes.len()
        );
        Ok(assemble(tables, columns, constraints, indexes))
    }

    async fn text_langs(&self, schema: &str, table: &str, column: &str) -> Result<Vec<String>> {
        let column = quote_ident(column);
        let sql = format!(
            "SELECT DISTINCT jsonb_object_keys({col}) AS lang FROM {} WHERE jsonb_typeof({col}) = 'object' ORDER BY 1",
            qualified(schema, table),
            col = column,
        );
        let rows = LangRow::find_by_statement(Statement::from_string(DatabaseBackend::Postgres, sql))
            .all(self.db.as_ref())
            .await?;
        Ok(rows.into_iter().map(|row| row.lang).collect())
    }
}

fn split_list(packed: &str) -> Vec<String> {
    if packed.is_empty() {
        return Vec::new();
    }
    packed.split(LIST_SEPARATOR).map(str::to_string).collect()
}

fn assemble(
    tables: Vec<TableRow>,
    columns: Vec<ColumnRow>,
    constraints: Vec<ConstraintRow>,
    indexes: Vec<IndexRow>,
) -> Snapshot {
    let mut snapshot = Snapshot::default();
    let mut positions = HashMap::new();
    for row in tables {
        positions.insert(row.name.clone(), snapshot.tables.len());
        let mut table = Table::new(row.name);
        table.comment = row.comment;
        snapshot.tables.push(table);
    }

    for row in columns {
        let Some(&position) = positions.get(&row.table_name) else {
            continue;
        };
        let mut sql_type = SqlType::parse(&row.sql_type);
        let serial = row
            .default_value
            .as_deref()
            .map_or(false, |default| default.starts_with("nextval("));
        if serial && sql_type == SqlType::BigInt {
            sql_type = SqlType::BigSerial;
        }
        let mut column = Column::new(row.name, sql_type);
        column.nullable = !row.not_null;
        column.comment = row.comment;
        column.default = row.default_value;
        column.sequence = row.sequence;
        snapshot.tables[position].columns.push(column);
    }

    for row in constraints {
        let Some(&position) = positions.get(&row.table_name) else {
            continue;
        };
        let kind = match row.kind.as_str() {
            "p" => ConstraintKind::PrimaryKey,
            "u" => ConstraintKind::Unique,
            "f" => ConstraintKind::ForeignKey {
                table: row.foreign_table.unwrap_or_default(),
                columns: split_list(row.foreign_columns.as_deref().unwrap_or_default()),
                cascade: row.on_delete.as_deref() == Some("c"),
            },
            _ => ConstraintKind::Check(row.definition),
        };
        snapshot.tables[position].constraints.push(Constraint {
            name: row.name,
            kind,
            columns: split_list(&row.columns),
        });
    }

    for row in indexes {
        let Some(&position) = positions.get(&row.table_name) else {
            continue;
        };
        snapshot.tables[position].indexes.push(Index {
            name: row.name,
            columns: split_list(&row.columns),
        });
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(table: &str, name: &str, sql_type: &str, default_value: Option<&str>) -> ColumnRow {
        ColumnRow {
            table_name: table.to_string(),
            name: name.to_string(),
            sql_type: sql_type.to_string(),
            not_null: name == "_id",
            comment: Some(name.to_string()),
            default_value: default_value.map(str::to_string),
            sequence: None,
        }
    }

    #[test]
    fn test_assemble() {
        let snapshot = assemble(
            vec![
                TableRow {
                    name: "example/City".into(),
                    comment: Some("example/City".into()),
                },
                TableRow {
                    name: "example/City/:changelog".into(),
                    comment: Some("example/City/:changelog".into()),
                },
            ],
            vec![
                column("example/City", "_id", "uuid", None),
                column("example/City", "country._id", "uuid", None),
                ColumnRow {
                    sequence: Some("example/City/:changelog__id_seq".into()),
                    ..column(
                        "example/City/:changelog",
                        "_id",
                        "bigint",
                        Some("nextval('\"example/City/:changelog__id_seq\"'::regclass)"),
                    )
                },
            ],
            vec![ConstraintRow {
                table_name: "example/City".into(),
                name: "fk_example/City_country._id".into(),
                kind: "f".into(),
                columns: "country._id".into(),
                foreign_table: Some("example/Country".into()),
                foreign_columns: Some("_id".into()),
                on_delete: Some("a".into()),
                definition: "FOREIGN KEY (\"country._id\") REFERENCES \"example/Country\"(_id)".into(),
            }],
            vec![IndexRow {
                table_name: "example/City".into(),
                name: "ix_example/City_country._id".into(),
                columns: "country._id".into(),
            }],
        );

        let city = snapshot.table("example/City").unwrap();
        assert!(!city.column("_id").unwrap().nullable);
        assert_eq!(
            city.constraints[0].kind,
            ConstraintKind::ForeignKey {
                table: "example/Country".into(),
                columns: vec!["_id".into()],
                cascade: false,
            }
        );
        assert_eq!(city.indexes[0].columns, ["country._id"]);

        let changelog = snapshot.table_by_logical("example/City/:changelog").unwrap();
        assert_eq!(changelog.column("_id").unwrap().sql_type, SqlType::BigSerial);
        assert_eq!(
            changelog.column("_id").unwrap().sequence.as_deref(),
            Some("example/City/:changelog__id_seq")
        );
        assert_eq!(city.column("_id").unwrap().sequence, None);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(""), Vec::<String>::new());
        assert_eq!(split_list("a\u{1f}b.c"), ["a", "b.c"]);
    }
}
