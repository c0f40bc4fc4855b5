//! Migration actions and their SQL
//!
//! Identifiers in actions are physical names; the schema is applied when a
//! [`MigrationPlan`] renders its statements. Every action that creates or
//! renames a table or column also writes the logical name into the object
//! comment.

use crate::snapshot::{Column, Constraint, ConstraintKind, Index, SqlType, Table};
use std::fmt;
use strata_core::quote_ident;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnChange {
    Type { sql_type: SqlType, using: String },
    Nullable(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Create a table with its columns, primary key and unique constraints
    CreateTable(Table),
    /// Soft delete: the table is renamed and keeps its data
    DropTable {
        table: String,
        name: String,
        comment: String,
    },
    RenameTable {
        from: String,
        to: String,
        comment: String,
    },
    AlterTableComment {
        table: String,
        comment: String,
    },
    AddColumn {
        table: String,
        column: Column,
    },
    /// Soft delete: the column is renamed and keeps its data
    DropColumn {
        table: String,
        column: String,
        name: String,
        comment: String,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
        comment: String,
    },
    AlterColumn {
        table: String,
        column: String,
        change: ColumnChange,
    },
    AlterColumnComment {
        table: String,
        column: String,
        comment: String,
    },
    AddConstraint {
        table: String,
        constraint: Constraint,
    },
    DropConstraint {
        table: String,
        name: String,
    },
    RenameConstraint {
        table: String,
        from: String,
        to: String,
    },
    AddIndex {
        table: String,
        index: Index,
    },
    DropIndex {
        name: String,
    },
    RenameIndex {
        from: String,
        to: String,
    },
    RenameSequence {
        from: String,
        to: String,
    },
    /// `UPDATE … FROM` copying values between representations of a property
    TransferData {
        sql: String,
    },
}

impl Action {
    /// Short name used in logs and plan summaries
    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateTable(_) => "CreateTable",
            Action::DropTable { .. } => "DropTable",
            Action::RenameTable { .. } => "RenameTable",
            Action::AlterTableComment { .. } => "AlterTableComment",
            Action::AddColumn { .. } => "AddColumn",
            Action::DropColumn { .. } => "DropColumn",
            Action::RenameColumn { .. } => "RenameColumn",
            Action::AlterColumn { .. } => "AlterColumn",
            Action::AlterColumnComment { .. } => "AlterColumnComment",
            Action::AddConstraint { .. } => "AddConstraint",
            Action::DropConstraint { .. } => "DropConstraint",
            Action::RenameConstraint { .. } => "RenameConstraint",
            Action::AddIndex { .. } => "AddIndex",
            Action::DropIndex { .. } => "DropIndex",
            Action::RenameIndex { .. } => "RenameIndex",
            Action::RenameSequence { .. } => "RenameSequence",
            Action::TransferData { .. } => "TransferData",
        }
    }

    /// SQL statements of this action within `schema`
    pub fn statements(&self, schema: &str) -> Vec<String> {
        let table = |name: &str| qualified(schema, name);
        match self {
            Action::CreateTable(t) => {
                let mut defs: Vec<String> = t.columns.iter().map(column_def).collect();
                defs.extend(
                    t.constraints
                        .iter()
                        .map(|c| format!("CONSTRAINT {} {}", quote_ident(&c.name), constraint_def(schema, c))),
                );
                let mut stmts = vec![format!("CREATE TABLE {} (\n    {}\n)", table(&t.name), defs.join(",\n    "))];
                if let Some(comment) = &t.comment {
                    stmts.push(table_comment(&table(&t.name), comment));
                }
                for column in &t.columns {
                    if let Some(comment) = &column.comment {
                        stmts.push(column_comment(&table(&t.name), &column.name, comment));
                    }
                }
                for index in &t.indexes {
                    stmts.push(create_index(schema, &t.name, index));
                }
                stmts
            }
            Action::DropTable { table: from, name, comment } | Action::RenameTable { from, to: name, comment } => vec![
                format!("ALTER TABLE {} RENAME TO {}", table(from), quote_ident(name)),
                table_comment(&table(name), comment),
            ],
            Action::AlterTableComment { table: t, comment } => vec![table_comment(&table(t), comment)],
            Action::AddColumn { table: t, column } => {
                let mut stmts = vec![format!("ALTER TABLE {} ADD COLUMN {}", table(t), column_def(column))];
                if let Some(comment) = &column.comment {
                    stmts.push(column_comment(&table(t), &column.name, comment));
                }
                stmts
            }
            Action::DropColumn { table: t, column: from, name: to, comment }
            | Action::RenameColumn { table: t, from, to, comment } => vec![
                format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    table(t),
                    quote_ident(from),
                    quote_ident(to)
                ),
                column_comment(&table(t), to, comment),
            ],
            Action::AlterColumn { table: t, column, change } => {
                let change = match change {
                    ColumnChange::Type { sql_type, using } => format!("TYPE {} USING {}", sql_type, using),
                    ColumnChange::Nullable(true) => "DROP NOT NULL".to_string(),
                    ColumnChange::Nullable(false) => "SET NOT NULL".to_string(),
                };
                vec![format!("ALTER TABLE {} ALTER COLUMN {} {}", table(t), quote_ident(column), change)]
            }
            Action::AlterColumnComment { table: t, column, comment } => {
                vec![column_comment(&table(t), column, comment)]
            }
            Action::AddConstraint { table: t, constraint } => vec![format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {}",
                table(t),
                quote_ident(&constraint.name),
                constraint_def(schema, constraint)
            )],
            Action::DropConstraint { table: t, name } => {
                vec![format!("ALTER TABLE {} DROP CONSTRAINT {}", table(t), quote_ident(name))]
            }
            Action::RenameConstraint { table: t, from, to } => vec![format!(
                "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
                table(t),
                quote_ident(from),
                quote_ident(to)
            )],
            Action::AddIndex { table: t, index } => vec![create_index(schema, t, index)],
            Action::DropIndex { name } => vec![format!("DROP INDEX {}", table(name))],
            Action::RenameIndex { from, to } => {
                vec![format!("ALTER INDEX {} RENAME TO {}", table(from), quote_ident(to))]
            }
            Action::RenameSequence { from, to } => {
                vec![format!("ALTER SEQUENCE {} RENAME TO {}", table(from), quote_ident(to))]
            }
            Action::TransferData { sql } => vec![sql.clone()],
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::CreateTable(t) => write!(f, "CreateTable({})", t.logical()),
            Action::DropTable { table, name, .. } => write!(f, "DropTable({} -> {})", table, name),
            Action::RenameTable { from, to, .. } => write!(f, "RenameTable({} -> {})", from, to),
            Action::AlterTableComment { table, comment } => write!(f, "AlterTableComment({}, {})", table, comment),
            Action::AddColumn { table, column } => write!(f, "AddColumn({}.{})", table, column.name),
            Action::DropColumn { table, column, name, .. } => {
                write!(f, "DropColumn({}.{} -> {})", table, column, name)
            }
            Action::RenameColumn { table, from, to, .. } => write!(f, "RenameColumn({}.{} -> {})", table, from, to),
            Action::AlterColumn { table, column, change } => match change {
                ColumnChange::Type { sql_type, .. } => write!(f, "AlterColumn({}.{} type {})", table, column, sql_type),
                ColumnChange::Nullable(nullable) => {
                    write!(f, "AlterColumn({}.{} nullable {})", table, column, nullable)
                }
            },
            Action::AlterColumnComment { table, column, comment } => {
                write!(f, "AlterColumnComment({}.{}, {})", table, column, comment)
            }
            Action::AddConstraint { table, constraint } => write!(f, "AddConstraint({}, {})", table, constraint.name),
            Action::DropConstraint { table, name } => write!(f, "DropConstraint({}, {})", table, name),
            Action::RenameConstraint { table, from, to } => {
                write!(f, "RenameConstraint({}, {} -> {})", table, from, to)
            }
            Action::AddIndex { table, index } => write!(f, "AddIndex({}, {})", table, index.name),
            Action::DropIndex { name } => write!(f, "DropIndex({})", name),
            Action::RenameIndex { from, to } => write!(f, "RenameIndex({} -> {})", from, to),
            Action::RenameSequence { from, to } => write!(f, "RenameSequence({} -> {})", from, to),
            Action::TransferData { .. } => write!(f, "TransferData"),
        }
    }
}

/// Ordered actions reconciling a database schema with a manifest
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MigrationPlan {
    pub schema: String,
    pub actions: Vec<Action>,
    /// Unsafe casts and other non fatal findings
    pub warnings: Vec<String>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn statements(&self) -> Vec<String> {
        self.actions
            .iter()
            .flat_map(|action| action.statements(&self.schema))
            .collect()
    }

    /// The whole plan as one transactional SQL script
    pub fn to_sql(&self) -> String {
        let mut sql = String::from("BEGIN;\n");
        for statement in self.statements() {
            sql.push_str(&statement);
            sql.push_str(";\n");
        }
        sql.push_str("COMMIT;\n");
        sql
    }
}

pub(crate) fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn column_def(column: &Column) -> String {
    let mut def = format!("{} {}", quote_ident(&column.name), column.sql_type);
    if let Some(default) = &column.default {
        def.push_str(" DEFAULT ");
        def.push_str(default);
    }
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    def
}

fn columns_list(columns: &[String]) -> String {
    columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
}

fn constraint_def(schema: &str, constraint: &Constraint) -> String {
    let columns = columns_list(&constraint.columns);
    match &constraint.kind {
        ConstraintKind::PrimaryKey => format!("PRIMARY KEY ({})", columns),
        ConstraintKind::Unique => format!("UNIQUE ({})", columns),
        ConstraintKind::ForeignKey {
            table,
            columns: target,
            cascade,
        } => {
            let mut def = format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                columns,
                qualified(schema, table),
                columns_list(target)
            );
            if *cascade {
                def.push_str(" ON DELETE CASCADE");
            }
            def
        }
        ConstraintKind::Check(expr) => format!("CHECK ({})", expr),
    }
}

fn create_index(schema: &str, table: &str, index: &Index) -> String {
    format!(
        "CREATE INDEX {} ON {} ({})",
        quote_ident(&index.name),
        qualified(schema, table),
        columns_list(&index.columns)
    )
}

fn table_comment(table: &str, comment: &str) -> String {
    format!("COMMENT ON TABLE {} IS {}", table, quote_literal(comment))
}

fn column_comment(table: &str, column: &str, comment: &str) -> String {
    format!(
        "COMMENT ON COLUMN {}.{} IS {}",
        table,
        quote_ident(column),
        quote_literal(comment)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_drop_writes_comment() {
        let action = Action::DropColumn {
            table: "example/City".into(),
            column: "country._id".into(),
            name: "__country._id".into(),
            comment: "__country._id".into(),
        };
        assert_eq!(
            action.statements("public"),
            [
                r#"ALTER TABLE "public"."example/City" RENAME COLUMN "country._id" TO "__country._id""#,
                r#"COMMENT ON COLUMN "public"."example/City"."__country._id" IS '__country._id'"#,
            ]
        );
    }

    #[test]
    fn test_create_table() {
        let mut table = Table::new("example/City");
        table.comment = Some("example/City".into());
        table.columns = vec![
            Column::new("_id", SqlType::Uuid).not_null().commented("_id"),
            Column::new("name", SqlType::Text).commented("name"),
        ];
        table.constraints.push(Constraint {
            name: "pk_example/City".into(),
            kind: ConstraintKind::PrimaryKey,
            columns: vec!["_id".into()],
        });
        let plan = MigrationPlan {
            schema: "public".into(),
            actions: vec![Action::CreateTable(table)],
            warnings: Vec::new(),
        };
        let sql = plan.to_sql();
        assert!(sql.starts_with("BEGIN;\nCREATE TABLE \"public\".\"example/City\" (\n    \"_id\" uuid NOT NULL,"));
        assert!(sql.contains("CONSTRAINT \"pk_example/City\" PRIMARY KEY (\"_id\")"));
        assert!(sql.contains("COMMENT ON TABLE \"public\".\"example/City\" IS 'example/City';"));
        assert!(sql.contains("COMMENT ON COLUMN \"public\".\"example/City\".\"name\" IS 'name';"));
        assert!(sql.ends_with("COMMIT;\n"));
    }
}
