//! Physical schema a manifest asks for
//!
//! Every model stored in the default backend gets a main table plus
//! `changelog` and `redirect` side tables (reserved models only get the
//! main table). Root arrays get a list table, files with blocks a file
//! table. Denormalized, inherited and back-reference properties have no
//! columns: they are read through joins.

use crate::snapshot::{Column, Constraint, ConstraintKind, Index, Role, Snapshot, SqlType, Table};
use strata_core::{Namer, TableType};
use strata_schema::dtype::{DataType, TypeKind};
use strata_schema::{Manifest, Model, Property};
use tracing::debug;

/// Build the desired snapshot of every model
pub fn desired_schema(manifest: &Manifest, namer: &Namer) -> Snapshot {
    let mut tables = Vec::new();
    for model in manifest.models() {
        if model.backend.is_some() {
            debug!("Skipping {} stored in backend {:?}", model.name, model.backend);
            continue;
        }
        tables.extend(ModelTables { manifest, namer, model }.build());
    }
    Snapshot { tables }
}

struct ModelTables<'a> {
    manifest: &'a Manifest,
    namer: &'a Namer,
    model: &'a Model,
}

impl ModelTables<'_> {
    fn build(&self) -> Vec<Table> {
        let main = self.main_table();
        let main_name = main.name.clone();
        let mut tables = vec![main];

        for prop in self.manifest.flatprops(self.model.id) {
            match &prop.dtype {
                DataType::Array(array) | DataType::PartialArray(array)
                    if array.model.is_none() && prop.list.is_none() =>
                {
                    tables.push(self.list_table(&main_name, prop));
                }
                DataType::File(file) if file.backend.is_none() && prop.list.is_none() => {
                    tables.push(self.file_table(prop));
                }
                _ => {}
            }
        }

        if !self.model.is_reserved() {
            tables.push(self.changelog_table());
            tables.push(self.redirect_table());
        }
        tables
    }

    fn table(&self, kind: TableType) -> Table {
        let logical = kind.table_name(&self.model.name);
        let mut table = Table::new(self.namer.compress(&logical));
        table.comment = Some(logical);
        table
    }

    fn main_table(&self) -> Table {
        let mut table = self.table(TableType::Main);
        table.columns = vec![
            column(self.namer, "_txn", SqlType::Uuid),
            column(self.namer, "_created", SqlType::Timestamp),
            column(self.namer, "_updated", SqlType::Timestamp),
            column(self.namer, "_id", SqlType::Uuid).not_null(),
            column(self.namer, "_revision", SqlType::Text),
        ];
        table.constraints.push(primary_key(self.namer, &table, "_id"));
        table.pkeys = self
            .model
            .pkeys
            .iter()
            .map(|key| self.namer.column(&self.manifest.prop(*key).column()))
            .collect();

        for prop in self.manifest.flatprops(self.model.id) {
            if prop.list.is_some() {
                continue;
            }
            self.add_property(&mut table, prop, prop.column());
        }
        table
    }

    fn list_table(&self, main: &str, array: &Property) -> Table {
        let mut table = self.table(TableType::List(array.column()));
        table.columns = vec![
            column(self.namer, "_txn", SqlType::Uuid),
            column(self.namer, "_rid", SqlType::Uuid),
        ];
        let rid = self.namer.column("_rid");
        table.constraints.push(Constraint {
            name: self.namer.foreign_key(table.logical(), "_rid"),
            kind: ConstraintKind::ForeignKey {
                table: main.to_string(),
                columns: vec![self.namer.column("_id")],
                cascade: true,
            },
            columns: vec![rid.clone()],
        });
        table.indexes.push(Index {
            name: self.namer.index(table.logical(), "_rid"),
            columns: vec![rid],
        });

        for prop in self.manifest.flatprops(self.model.id) {
            if prop.list.is_none() || self.manifest.root_list(prop.id) != Some(array.id) {
                continue;
            }
            let base = self.manifest.list_column(prop.id);
            self.add_property(&mut table, prop, base);
        }
        table
    }

    fn file_table(&self, prop: &Property) -> Table {
        let mut table = self.table(TableType::File(prop.column()));
        table.columns = vec![
            column(self.namer, "_id", SqlType::Uuid).not_null(),
            column(self.namer, "_block", SqlType::Bytea),
        ];
        table.constraints.push(primary_key(self.namer, &table, "_id"));
        table
    }

    fn changelog_table(&self) -> Table {
        let mut table = self.table(TableType::Changelog);
        table.columns = vec![
            column(self.namer, "_id", SqlType::BigSerial).not_null(),
            column(self.namer, "_revision", SqlType::Text),
            column(self.namer, "_txn", SqlType::Uuid),
            column(self.namer, "_rid", SqlType::Uuid),
            column(self.namer, "datetime", SqlType::Timestamp),
            column(self.namer, "action", SqlType::Text),
            column(self.namer, "data", SqlType::Jsonb),
        ];
        table.constraints.push(primary_key(self.namer, &table, "_id"));
        table
    }

    fn redirect_table(&self) -> Table {
        let mut table = self.table(TableType::Redirect);
        table.columns = vec![
            column(self.namer, "_id", SqlType::Uuid).not_null(),
            column(self.namer, "redirect", SqlType::Uuid),
        ];
        table.constraints.push(primary_key(self.namer, &table, "_id"));
        table.indexes.push(Index {
            name: self.namer.index(table.logical(), "redirect"),
            columns: vec![self.namer.column("redirect")],
        });
        table
    }

    /// Columns, constraints and indexes of one property; `base` is the
    /// logical column name on `table`
    fn add_property(&self, table: &mut Table, prop: &Property, base: String) {
        if prop.lang.is_some() || self.in_ref(prop) {
            return;
        }
        match &prop.dtype {
            DataType::Object(_)
            | DataType::BackRef(_)
            | DataType::ArrayBackRef(_)
            | DataType::Denorm(_)
            | DataType::Inherit(_) => {}
            DataType::Array(array) | DataType::PartialArray(array) => {
                // root arrays keep their whole value, items live in the list table
                if array.model.is_none() && prop.list.is_none() {
                    table.columns.push(column(self.namer, &base, SqlType::Jsonb));
                }
            }
            DataType::Text(text) => {
                let langs = text.langs.iter().map(|(lang, _)| lang.clone()).collect();
                table
                    .columns
                    .push(column(self.namer, &base, SqlType::Jsonb).with_role(Role::Text { langs }));
            }
            DataType::Ref(r) | DataType::ExternalRef(r) => {
                let target = self.manifest.target(prop.id);
                let target_table = target
                    .map(|t| self.namer.table(&t.name, &TableType::Main))
                    .unwrap_or_default();
                let external = matches!(prop.dtype, DataType::ExternalRef(_))
                    || target.map_or(true, |t| t.backend.is_some());
                if r.stores_id() {
                    let logical = format!("{}._id", base);
                    let keys = r
                        .refprops
                        .iter()
                        .map(|key| self.manifest.prop(*key))
                        .map(|key| {
                            let key_type = sql_type(key).unwrap_or(SqlType::Text);
                            (self.namer.column(&key.column()), key_type)
                        })
                        .collect();
                    table.columns.push(column(self.namer, &logical, SqlType::Uuid).with_role(Role::RefId {
                        prop: base.clone(),
                        target: target_table.clone(),
                        keys,
                    }));
                    if !external {
                        self.add_foreign_key(table, &logical, &target_table);
                    }
                    self.add_index(table, &logical);
                } else {
                    for key in &r.refprops {
                        let key = self.manifest.prop(*key);
                        let logical = format!("{}.{}", base, key.name);
                        let key_type = sql_type(key).unwrap_or(SqlType::Text);
                        table.columns.push(column(self.namer, &logical, key_type.clone()).with_role(
                            Role::RefKey {
                                prop: base.clone(),
                                key: key.name.clone(),
                                target: target_table.clone(),
                                target_column: self.namer.column(&key.column()),
                                key_type,
                            },
                        ));
                    }
                }
            }
            DataType::File(file) => {
                let mut attributes = vec![
                    ("_id", SqlType::Text),
                    ("_content_type", SqlType::Text),
                    ("_size", SqlType::BigInt),
                ];
                if file.backend.is_none() {
                    attributes.extend([("_bsize", SqlType::BigInt), ("_blocks", SqlType::Jsonb)]);
                }
                for (name, sql_type) in attributes {
                    let logical = format!("{}.{}", base, name);
                    table.columns.push(column(self.namer, &logical, sql_type));
                }
            }
            _ => {
                let Some(sql_type) = sql_type(prop) else {
                    return;
                };
                let mut col = column(self.namer, &base, sql_type);
                if prop.required {
                    col = col.not_null();
                }
                table.columns.push(col);
                if prop.unique {
                    let name = self.namer.unique(table.logical(), &base);
                    table.constraints.push(Constraint {
                        name,
                        kind: ConstraintKind::Unique,
                        columns: vec![self.namer.column(&base)],
                    });
                }
            }
        }
    }

    fn in_ref(&self, prop: &Property) -> bool {
        prop.parent.map_or(false, |parent| {
            matches!(
                self.manifest.prop(parent).kind(),
                TypeKind::Ref | TypeKind::ExternalRef
            )
        })
    }

    fn add_foreign_key(&self, table: &mut Table, logical: &str, target: &str) {
        table.constraints.push(Constraint {
            name: self.namer.foreign_key(table.logical(), logical),
            kind: ConstraintKind::ForeignKey {
                table: target.to_string(),
                columns: vec![self.namer.column("_id")],
                cascade: false,
            },
            columns: vec![self.namer.column(logical)],
        });
    }

    fn add_index(&self, table: &mut Table, logical: &str) {
        table.indexes.push(Index {
            name: self.namer.index(table.logical(), logical),
            columns: vec![self.namer.column(logical)],
        });
    }
}

fn column(namer: &Namer, logical: &str, sql_type: SqlType) -> Column {
    Column::new(namer.column(logical), sql_type).commented(logical)
}

fn primary_key(namer: &Namer, table: &Table, column: &str) -> Constraint {
    Constraint {
        name: namer.primary_key(table.logical()),
        kind: ConstraintKind::PrimaryKey,
        columns: vec![namer.column(column)],
    }
}

/// Storage type of a scalar property
pub fn sql_type(prop: &Property) -> Option<SqlType> {
    Some(match &prop.dtype {
        DataType::String | DataType::Url | DataType::Uri => SqlType::Text,
        DataType::Integer => SqlType::BigInt,
        DataType::Number => SqlType::Double,
        DataType::Boolean => SqlType::Boolean,
        DataType::Binary => SqlType::Bytea,
        DataType::Json => SqlType::Jsonb,
        DataType::Uuid | DataType::PrimaryKey => SqlType::Uuid,
        DataType::Date => SqlType::Date,
        DataType::Time => SqlType::Time,
        DataType::DateTime => SqlType::Timestamp,
        DataType::Geometry(geometry) => SqlType::Geometry {
            kind: geometry.geometry_type.as_ref().map(|k| k.to_lowercase()),
            srid: geometry.srid,
        },
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_schema::load_yaml;

    #[test]
    fn test_reserved_models_have_no_side_tables() {
        let manifest = load_yaml(
            r#"
models:
  _ns:
    properties:
      title: string
"#,
        )
        .unwrap();
        let snapshot = desired_schema(&manifest, &Namer::default());
        let names: Vec<&str> = snapshot.tables.iter().map(|t| t.logical()).collect();
        assert_eq!(names, ["_ns"]);
    }

    #[test]
    fn test_main_table_lists_primary_keys() {
        let manifest = load_yaml(
            r#"
models:
  example/Country:
    pkeys: [code]
    properties:
      code: integer
      name: string
"#,
        )
        .unwrap();
        let snapshot = desired_schema(&manifest, &Namer::default());
        assert_eq!(snapshot.table_by_logical("example/Country").unwrap().pkeys, ["code"]);
        assert!(snapshot
            .table_by_logical("example/Country/:changelog")
            .unwrap()
            .pkeys
            .is_empty());
    }
}
