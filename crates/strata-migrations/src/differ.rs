//! Schema differ
//!
//! Tables and columns are matched by the logical names kept in their
//! comments, then through the rename map, then by restoring a soft-deleted
//! `__name`. Whatever stays unmatched on the database side is soft-deleted;
//! objects that already carry the `__` marker are left alone, so a second
//! run over an unchanged manifest produces no actions.
//!
//! Actions are collected in phases and concatenated in this order: table
//! creation and renames, dropped keys, column changes with data transfers,
//! new keys, soft-deleted columns, soft-deleted tables. Foreign keys of new
//! tables are added with the other keys so that creation order between
//! models does not matter.

use crate::action::{qualified, quote_literal, Action, ColumnChange, MigrationPlan};
use crate::cast::{cast_expr, cast_safety, cast_value, CastSafety};
use crate::error::{MigrationError, Result};
use crate::rename::RenameMap;
use crate::snapshot::{Column, Constraint, ConstraintKind, Index, Role, Snapshot, SqlType, Table};
use std::collections::{HashMap, HashSet};
use strata_core::{is_soft_deleted, quote_ident, removed_name, restored_name, Namer, TableType};
use tracing::{debug, warn};

/// Compares a database snapshot with the desired one
pub struct Differ<'a> {
    namer: &'a Namer,
    schema: &'a str,
    renames: Option<&'a RenameMap>,
    default_lang: Option<&'a str>,
}

#[derive(Default)]
struct Phases {
    tables: Vec<Action>,
    drop_keys: Vec<Action>,
    columns: Vec<Action>,
    add_keys: Vec<Action>,
    drop_columns: Vec<Action>,
    drop_tables: Vec<Action>,
    warnings: Vec<String>,
}

impl Phases {
    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Physical names of one table before and after the migration
#[derive(Default)]
struct Renamed {
    tables: HashMap<String, String>,
    columns: HashMap<String, String>,
}

impl<'a> Differ<'a> {
    pub fn new(namer: &'a Namer, schema: &'a str) -> Self {
        Self {
            namer,
            schema,
            renames: None,
            default_lang: None,
        }
    }

    pub fn with_renames(mut self, renames: &'a RenameMap) -> Self {
        self.renames = Some(renames);
        self
    }

    /// Language a plain string moves into when it becomes a text, and the
    /// one read back when a text becomes a plain string
    pub fn with_default_lang(mut self, lang: Option<&'a str>) -> Self {
        self.default_lang = lang;
        self
    }

    pub fn diff(&self, current: &Snapshot, desired: &Snapshot) -> Result<MigrationPlan> {
        let mut phases = Phases::default();
        let mut matched = HashSet::new();
        let mut table_names = HashMap::new();
        let mut pairs = Vec::new();

        for table in &desired.tables {
            match self.match_table(current, table, &matched) {
                Some(index) => {
                    matched.insert(index);
                    let old = &current.tables[index];
                    if old.name != table.name {
                        table_names.insert(old.name.clone(), table.name.clone());
                        self.rename_table(old, table, &mut phases);
                    } else if old.comment.as_deref() != Some(table.logical()) {
                        phases.tables.push(Action::AlterTableComment {
                            table: table.name.clone(),
                            comment: table.logical().to_string(),
                        });
                    }
                    pairs.push((old, table));
                }
                None => self.create_table(table, &mut phases),
            }
        }

        let snapshots = Snapshots { current, desired };
        for (old, new) in pairs {
            self.diff_table(snapshots, old, new, &table_names, &mut phases)?;
        }

        let mut taken: HashSet<String> = current.tables.iter().map(|t| t.logical().to_string()).collect();
        for (index, table) in current.tables.iter().enumerate() {
            if matched.contains(&index) || table_is_soft_deleted(table.logical()) {
                continue;
            }
            let removed = soft_table_name(table.logical(), &taken);
            taken.insert(removed.clone());
            phases.drop_tables.push(Action::DropTable {
                table: table.name.clone(),
                name: self.namer.compress(&removed),
                comment: removed,
            });
        }

        let Phases {
            tables,
            drop_keys,
            columns,
            add_keys,
            drop_columns,
            drop_tables,
            warnings,
        } = phases;
        let actions: Vec<Action> = [tables, drop_keys, columns, add_keys, drop_columns, drop_tables]
            .into_iter()
            .flatten()
            .collect();
        debug!("Migration plan has {} actions, {} warnings", actions.len(), warnings.len());

        Ok(MigrationPlan {
            schema: self.schema.to_string(),
            actions,
            warnings,
        })
    }

    fn match_table(&self, current: &Snapshot, table: &Table, matched: &HashSet<usize>) -> Option<usize> {
        let free = || {
            current
                .tables
                .iter()
                .enumerate()
                .filter(move |(i, _)| !matched.contains(i))
        };
        let logical = table.logical();
        free()
            .find(|(_, t)| !table_is_soft_deleted(t.logical()) && t.logical() == logical)
            .or_else(|| {
                free().find(|(_, t)| {
                    !table_is_soft_deleted(t.logical()) && self.renamed_table(t.logical()).as_deref() == Some(logical)
                })
            })
            .or_else(|| {
                free().find(|(_, t)| table_is_soft_deleted(t.logical()) && restored_table_name(t.logical()) == logical)
            })
            .map(|(i, _)| i)
    }

    /// Logical name a database table gets through the rename map
    fn renamed_table(&self, logical: &str) -> Option<String> {
        let (model, kind) = TableType::parse(logical);
        let new = self.renames?.table(&model)?;
        Some(kind.table_name(new))
    }

    fn rename_table(&self, old: &Table, new: &Table, phases: &mut Phases) {
        debug!("Renaming table {} to {}", old.logical(), new.logical());
        phases.tables.push(Action::RenameTable {
            from: old.name.clone(),
            to: new.name.clone(),
            comment: new.logical().to_string(),
        });
        if TableType::parse(new.logical()).1 == TableType::Changelog {
            // PostgreSQL truncates implicit sequence names its own way
            let from = old
                .column_by_logical("_id")
                .and_then(|c| c.sequence.clone())
                .unwrap_or_else(|| self.namer.sequence(&old.name, "_id"));
            phases.tables.push(Action::RenameSequence {
                from,
                to: self.namer.sequence(&new.name, "_id"),
            });
        }
    }

    fn create_table(&self, table: &Table, phases: &mut Phases) {
        let mut created = table.clone();
        created.indexes.clear();
        created
            .constraints
            .retain(|c| !matches!(c.kind, ConstraintKind::ForeignKey { .. }));
        phases.tables.push(Action::CreateTable(created));

        for constraint in &table.constraints {
            if matches!(constraint.kind, ConstraintKind::ForeignKey { .. }) {
                phases.add_keys.push(Action::AddConstraint {
                    table: table.name.clone(),
                    constraint: constraint.clone(),
                });
            }
        }
        for index in &table.indexes {
            phases.add_keys.push(Action::AddIndex {
                table: table.name.clone(),
                index: index.clone(),
            });
        }
    }

    fn diff_table(
        &self,
        snapshots: Snapshots<'_>,
        old: &Table,
        new: &Table,
        table_names: &HashMap<String, String>,
        phases: &mut Phases,
    ) -> Result<()> {
        let old_model = TableType::parse(old.logical()).0;
        let mapped = |column: &Column| -> String {
            self.renames
                .and_then(|r| r.column(&old_model, column.logical()))
                .unwrap_or(column.logical())
                .to_string()
        };
        let live = |column: &Column| !is_soft_deleted(column.logical());

        let mut renamed = Renamed {
            tables: table_names.clone(),
            columns: HashMap::new(),
        };
        let mut consumed = HashSet::new();
        let mut taken: HashSet<String> = old.columns.iter().map(|c| c.logical().to_string()).collect();
        let mut table = TableDiff {
            differ: self,
            snapshots,
            old,
            new,
            phases,
        };

        for column in &new.columns {
            let found = old
                .columns
                .iter()
                .enumerate()
                .find(|(i, c)| !consumed.contains(i) && live(*c) && mapped(*c) == column.logical());
            if let Some((index, existing)) = found {
                consumed.insert(index);
                table.diff_column(existing, column, &mut renamed, &mut taken)?;
                continue;
            }

            let restorable = old.columns.iter().enumerate().find(|(i, c)| {
                !consumed.contains(i)
                    && !live(*c)
                    && restored_name(c.logical()) == column.logical()
                    && c.sql_type.same_storage(&column.sql_type)
            });
            if let Some((index, removed)) = restorable {
                consumed.insert(index);
                debug!("Restoring column {} of {}", column.logical(), new.logical());
                renamed.columns.insert(removed.name.clone(), column.name.clone());
                table.phases.columns.push(Action::RenameColumn {
                    table: new.name.clone(),
                    from: removed.name.clone(),
                    to: column.name.clone(),
                    comment: column.logical().to_string(),
                });
                continue;
            }

            table.add_column(column)?;
        }

        for (index, column) in old.columns.iter().enumerate() {
            if consumed.contains(&index) || !live(column) {
                continue;
            }
            let removed = soft_column_name(column.logical(), &taken);
            taken.insert(removed.clone());
            let name = self.namer.column(&removed);
            renamed.columns.insert(column.name.clone(), name.clone());
            table.phases.drop_columns.push(Action::DropColumn {
                table: new.name.clone(),
                column: column.name.clone(),
                name,
                comment: removed,
            });
        }

        table.diff_constraints(&renamed);
        table.diff_indexes(&renamed);
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct Snapshots<'d> {
    current: &'d Snapshot,
    desired: &'d Snapshot,
}

/// Column and key changes of one matched table
struct TableDiff<'d, 'a> {
    differ: &'d Differ<'a>,
    snapshots: Snapshots<'d>,
    old: &'d Table,
    new: &'d Table,
    phases: &'d mut Phases,
}

impl TableDiff<'_, '_> {
    fn qualified(&self, table: &str) -> String {
        qualified(self.differ.schema, table)
    }

    fn default_lang<'l>(&self, langs: &'l [String]) -> Option<&'l str> {
        self.differ
            .default_lang
            .and_then(|lang| langs.iter().find(|l| l.as_str() == lang))
            .or_else(|| langs.first())
            .map(String::as_str)
    }

    fn transfer(&mut self, sql: String) {
        self.phases.columns.push(Action::TransferData { sql });
    }

    fn push_column(&mut self, column: &Column) {
        self.phases.columns.push(Action::AddColumn {
            table: self.new.name.clone(),
            column: column.clone(),
        });
    }

    /// Live database column with the given logical name
    fn existing(&self, logical: &str) -> Option<&Column> {
        self.old
            .columns
            .iter()
            .find(|c| c.logical() == logical && !is_soft_deleted(c.logical()))
            .filter(|_| self.new.column_by_logical(logical).is_none())
    }

    fn diff_column(
        &mut self,
        old: &Column,
        new: &Column,
        renamed: &mut Renamed,
        taken: &mut HashSet<String>,
    ) -> Result<()> {
        let table = self.new.name.clone();

        // jsonb <-> text keeps the old column aside and copies values over
        let reshaped = matches!(
            (&old.sql_type, &new.sql_type, &new.role),
            (SqlType::Text, SqlType::Jsonb, Role::Text { .. }) | (SqlType::Jsonb, SqlType::Text, _)
        );
        if reshaped {
            let removed = soft_column_name(old.logical(), taken);
            taken.insert(removed.clone());
            let source = self.differ.namer.column(&removed);
            self.phases.columns.push(Action::DropColumn {
                table: table.clone(),
                column: old.name.clone(),
                name: source.clone(),
                comment: removed,
            });
            renamed.columns.insert(old.name.clone(), source.clone());
            return match &new.role {
                Role::Text { langs } => {
                    self.string_to_text(new, &source, langs);
                    Ok(())
                }
                _ => {
                    self.text_to_string(new, &source);
                    Ok(())
                }
            };
        }

        if old.name != new.name {
            renamed.columns.insert(old.name.clone(), new.name.clone());
            self.phases.columns.push(Action::RenameColumn {
                table: table.clone(),
                from: old.name.clone(),
                to: new.name.clone(),
                comment: new.logical().to_string(),
            });
        } else if old.comment.as_deref() != Some(new.logical()) {
            self.phases.columns.push(Action::AlterColumnComment {
                table: table.clone(),
                column: new.name.clone(),
                comment: new.logical().to_string(),
            });
        }

        if !old.sql_type.same_storage(&new.sql_type) {
            match cast_safety(&old.sql_type, &new.sql_type) {
                CastSafety::Impossible => {
                    return Err(MigrationError::UnableToCastColumnTypes {
                        table: self.new.logical().to_string(),
                        column: new.logical().to_string(),
                        from: old.sql_type.to_string(),
                        to: new.sql_type.to_string(),
                    });
                }
                CastSafety::Unsafe => self.phases.warn(format!(
                    "Casting {}.{} from {} to {} may fail for some values",
                    self.new.logical(),
                    new.logical(),
                    old.sql_type,
                    new.sql_type
                )),
                CastSafety::Safe => {}
            }
            self.phases.columns.push(Action::AlterColumn {
                table: table.clone(),
                column: new.name.clone(),
                change: ColumnChange::Type {
                    sql_type: new.sql_type.clone(),
                    using: cast_expr(&new.name, &old.sql_type, &new.sql_type),
                },
            });
        }

        if old.nullable != new.nullable {
            self.phases.columns.push(Action::AlterColumn {
                table,
                column: new.name.clone(),
                change: ColumnChange::Nullable(new.nullable),
            });
        }

        if let (Role::Text { langs: stored }, Role::Text { langs }) = (&old.role, &new.role) {
            self.diff_langs(new, stored, langs);
        }
        Ok(())
    }

    /// Removed languages move under a `__lang` key, re-added ones move back
    fn diff_langs(&mut self, column: &Column, stored: &[String], langs: &[String]) {
        let table = self.qualified(&self.new.name);
        let col = quote_ident(&column.name);
        let moves: Vec<(String, String)> = stored
            .iter()
            .filter(|lang| !is_soft_deleted(lang) && !langs.contains(lang))
            .map(|lang| (lang.clone(), format!("__{}", lang)))
            .chain(
                langs
                    .iter()
                    .filter(|lang| !stored.contains(lang) && stored.contains(&format!("__{}", lang)))
                    .map(|lang| (format!("__{}", lang), lang.clone())),
            )
            .collect();
        for (from, to) in moves {
            debug!("Moving {}.{} language {} to {}", self.new.logical(), column.logical(), from, to);
            let from = quote_literal(&from);
            self.transfer(format!(
                "UPDATE {table} SET {col} = ({col} - {from}) || jsonb_build_object({to}, {col} -> {from}) WHERE {col} -> {from} IS NOT NULL",
                to = quote_literal(&to),
            ));
        }
    }

    fn string_to_text(&mut self, column: &Column, source: &str, langs: &[String]) {
        let mut added = column.clone();
        added.default = Some("'{}'::jsonb".to_string());
        self.push_column(&added);
        match self.default_lang(langs) {
            Some(lang) => {
                let sql = format!(
                    "UPDATE {} SET {} = jsonb_build_object({}, {src}) WHERE {src} IS NOT NULL",
                    self.qualified(&self.new.name),
                    quote_ident(&column.name),
                    quote_literal(lang),
                    src = quote_ident(source),
                );
                self.transfer(sql);
            }
            None => self.phases.warn(format!(
                "{}.{} has no language to keep the old value under",
                self.new.logical(),
                column.logical()
            )),
        }
    }

    fn text_to_string(&mut self, column: &Column, source: &str) {
        self.push_column(column);
        let src = quote_ident(source);
        let first = format!("(SELECT value FROM jsonb_each_text({}) ORDER BY key LIMIT 1)", src);
        let from_object = match self.differ.default_lang {
            Some(lang) => format!("COALESCE({} ->> {}, {})", src, quote_literal(lang), first),
            None => first,
        };
        let value = format!(
            "CASE jsonb_typeof({src}) WHEN 'object' THEN {} ELSE {src} #>> '{{}}' END",
            from_object,
        );
        let value = match &column.sql_type {
            SqlType::Text => value,
            other => format!("CAST({} AS {})", value, other),
        };
        self.transfer(format!(
            "UPDATE {} SET {} = {}",
            self.qualified(&self.new.name),
            quote_ident(&column.name),
            value
        ));
    }

    /// Add a column, copying data from another representation of the same
    /// property when the database still has one
    fn add_column(&mut self, column: &Column) -> Result<()> {
        self.push_column(column);
        match &column.role {
            Role::RefId { prop, target, keys } => self.into_ref_id(column, prop, target, keys),
            Role::RefKey {
                prop,
                key,
                target,
                target_column,
                key_type,
            } => self.into_ref_key(column, prop, key, target, target_column, key_type),
            Role::Text { langs } => {
                self.from_lang_columns(column, langs);
                Ok(())
            }
            Role::Plain => self.from_ref(column),
        }
    }

    fn into_ref_id(&mut self, column: &Column, prop: &str, target: &str, keys: &[(String, SqlType)]) -> Result<()> {
        let table = self.qualified(&self.new.name);
        let target = self.qualified(target);
        let to = quote_ident(&column.name);

        if let Some(scalar) = self.existing(prop) {
            let (key, key_type) = match keys {
                [key] => key,
                _ => {
                    return Err(MigrationError::MigrateScalarToRefTooManyKeys {
                        table: self.new.logical().to_string(),
                        column: prop.to_string(),
                        keys: keys.iter().map(|(k, _)| k.clone()).collect(),
                    })
                }
            };
            if !scalar.sql_type.same_storage(key_type) {
                return Err(MigrationError::MigrateScalarToRefTypeMissmatch {
                    table: self.new.logical().to_string(),
                    column: prop.to_string(),
                    from: scalar.sql_type.to_string(),
                    to: key_type.to_string(),
                });
            }
            let sql = format!(
                "UPDATE {table} AS t SET {to} = r.\"_id\" FROM {target} AS r WHERE t.{} = r.{}",
                quote_ident(&scalar.name),
                quote_ident(key),
            );
            self.transfer(sql);
            return Ok(());
        }

        let prefix = format!("{}.", prop);
        let inline: Vec<(String, String)> = self
            .old
            .columns
            .iter()
            .filter(|c| !is_soft_deleted(c.logical()))
            .filter_map(|c| {
                let key = c.logical().strip_prefix(&prefix)?;
                (key != "_id").then(|| (c.name.clone(), self.differ.namer.column(key)))
            })
            .collect();
        if !inline.is_empty() {
            let on: Vec<String> = inline
                .iter()
                .map(|(local, remote)| format!("t.{} = r.{}", quote_ident(local), quote_ident(remote)))
                .collect();
            self.transfer(format!(
                "UPDATE {table} AS t SET {to} = r.\"_id\" FROM {target} AS r WHERE {}",
                on.join(" AND ")
            ));
        }
        Ok(())
    }

    fn into_ref_key(
        &mut self,
        column: &Column,
        prop: &str,
        key: &str,
        target: &str,
        target_column: &str,
        key_type: &SqlType,
    ) -> Result<()> {
        let table = self.qualified(&self.new.name);
        let to = quote_ident(&column.name);

        if let Some(id) = self.existing(&format!("{}._id", prop)) {
            let sql = format!(
                "UPDATE {table} AS t SET {to} = r.{} FROM {} AS r WHERE t.{} = r.\"_id\"",
                quote_ident(target_column),
                self.qualified(target),
                quote_ident(&id.name),
            );
            self.transfer(sql);
            return Ok(());
        }

        if let Some(scalar) = self.existing(prop) {
            let keys: Vec<String> = self
                .new
                .columns
                .iter()
                .filter_map(|c| match &c.role {
                    Role::RefKey { prop: p, key, .. } if p == prop => Some(key.clone()),
                    _ => None,
                })
                .collect();
            if keys.len() > 1 {
                return Err(MigrationError::MigrateScalarToRefTooManyKeys {
                    table: self.new.logical().to_string(),
                    column: prop.to_string(),
                    keys,
                });
            }
            if !scalar.sql_type.same_storage(key_type) {
                return Err(MigrationError::MigrateScalarToRefTypeMissmatch {
                    table: self.new.logical().to_string(),
                    column: format!("{}.{}", prop, key),
                    from: scalar.sql_type.to_string(),
                    to: key_type.to_string(),
                });
            }
            let sql = format!("UPDATE {table} SET {to} = {}", quote_ident(&scalar.name));
            self.transfer(sql);
        }
        Ok(())
    }

    /// Plain columns named `<prop>@<lang>` merge into one text
    fn from_lang_columns(&mut self, column: &Column, langs: &[String]) {
        let parts: Vec<String> = langs
            .iter()
            .filter_map(|lang| {
                let source = self.existing(&format!("{}@{}", column.logical(), lang))?;
                Some(format!("{}, {}", quote_literal(lang), quote_ident(&source.name)))
            })
            .collect();
        if parts.is_empty() {
            return;
        }
        let sql = format!(
            "UPDATE {} SET {} = jsonb_strip_nulls(jsonb_build_object({}))",
            self.qualified(&self.new.name),
            quote_ident(&column.name),
            parts.join(", ")
        );
        self.transfer(sql);
    }

    /// A reference collapsing back into a plain value keeps the key of the
    /// row it pointed at: the target's primary key for a stored `_id`, the
    /// inline key column otherwise
    fn from_ref(&mut self, column: &Column) -> Result<()> {
        let prefix = format!("{}.", column.logical());
        let sources: Vec<&Column> = self
            .old
            .columns
            .iter()
            .filter(|c| !is_soft_deleted(c.logical()) && c.logical().starts_with(&prefix))
            .filter(|c| self.new.column_by_logical(c.logical()).is_none())
            .collect();

        let id = format!("{}_id", prefix);
        if let Some(source) = sources.iter().find(|c| c.logical() == id) {
            return self.from_ref_id(column, source);
        }
        match sources.as_slice() {
            [] => Ok(()),
            [source] => {
                let value = self.convert(quote_ident(&source.name), &source.sql_type, column)?;
                self.transfer(format!(
                    "UPDATE {} SET {} = {}",
                    self.qualified(&self.new.name),
                    quote_ident(&column.name),
                    value
                ));
                Ok(())
            }
            _ => Err(MigrationError::MigrateScalarToRefTooManyKeys {
                table: self.new.logical().to_string(),
                column: column.logical().to_string(),
                keys: sources.iter().map(|c| c.logical().to_string()).collect(),
            }),
        }
    }

    fn from_ref_id(&mut self, column: &Column, id: &Column) -> Result<()> {
        let table = self.qualified(&self.new.name);
        let to = quote_ident(&column.name);
        let Some((target, keys)) = self.ref_target(id) else {
            debug!("{}.{} has no known target, keeping its _id", self.new.logical(), column.logical());
            let value = self.convert(quote_ident(&id.name), &id.sql_type, column)?;
            self.transfer(format!("UPDATE {table} SET {to} = {value}"));
            return Ok(());
        };
        let (key, key_type) = match keys.as_slice() {
            [] => (self.differ.namer.column("_id"), SqlType::Uuid),
            [(key, key_type)] => (key.clone(), key_type.clone()),
            _ => {
                return Err(MigrationError::MigrateScalarToRefTooManyKeys {
                    table: self.new.logical().to_string(),
                    column: column.logical().to_string(),
                    keys: keys.iter().map(|(k, _)| k.clone()).collect(),
                })
            }
        };
        let value = self.convert(format!("r.{}", quote_ident(&key)), &key_type, column)?;
        self.transfer(format!(
            "UPDATE {table} AS t SET {to} = {value} FROM {} AS r WHERE t.{} = r.\"_id\"",
            self.qualified(&target),
            quote_ident(&id.name),
        ));
        Ok(())
    }

    /// Table a stored `_id` points to and its primary key columns, as the
    /// migration leaves them
    fn ref_target(&self, id: &Column) -> Option<(String, Vec<(String, SqlType)>)> {
        let target = self.old.constraints.iter().find_map(|c| match &c.kind {
            ConstraintKind::ForeignKey { table, .. } if c.columns == [id.name.as_str()] => Some(table),
            _ => None,
        })?;
        let logical = self
            .snapshots
            .current
            .table(target)
            .map_or(target.as_str(), Table::logical);
        let desired = self.snapshots.desired;
        let table = desired.table_by_logical(logical).or_else(|| {
            let renamed = self.differ.renamed_table(logical)?;
            desired.table_by_logical(&renamed)
        })?;
        let keys = table
            .pkeys
            .iter()
            .filter_map(|key| {
                let key_column = table.column(key)?;
                Some((key.clone(), key_column.sql_type.clone()))
            })
            .collect();
        Some((table.name.clone(), keys))
    }

    /// `value` of type `from` as it goes into `column`
    fn convert(&mut self, value: String, from: &SqlType, column: &Column) -> Result<String> {
        match cast_safety(from, &column.sql_type) {
            CastSafety::Impossible => Err(MigrationError::UnableToCastColumnTypes {
                table: self.new.logical().to_string(),
                column: column.logical().to_string(),
                from: from.to_string(),
                to: column.sql_type.to_string(),
            }),
            CastSafety::Safe if from.same_storage(&column.sql_type) => Ok(value),
            CastSafety::Safe => Ok(cast_value(&value, from, &column.sql_type)),
            CastSafety::Unsafe => {
                self.phases.warn(format!(
                    "Casting {}.{} from {} to {} may fail for some values",
                    self.new.logical(),
                    column.logical(),
                    from,
                    column.sql_type
                ));
                Ok(cast_value(&value, from, &column.sql_type))
            }
        }
    }

    fn diff_constraints(&mut self, renamed: &Renamed) {
        let table = self.new.name.clone();
        let mut consumed = HashSet::new();
        let desired_names: HashSet<&str> = self.new.constraints.iter().map(|c| c.name.as_str()).collect();

        for constraint in &self.new.constraints {
            let same_name = self
                .old
                .constraints
                .iter()
                .enumerate()
                .find(|(i, c)| !consumed.contains(i) && c.name == constraint.name);
            if let Some((index, existing)) = same_name {
                consumed.insert(index);
                if same_constraint(existing, constraint, renamed) {
                    continue;
                }
                self.phases.drop_keys.push(Action::DropConstraint {
                    table: table.clone(),
                    name: existing.name.clone(),
                });
            } else {
                let same_definition = self.old.constraints.iter().enumerate().find(|(i, c)| {
                    !consumed.contains(i) && !desired_names.contains(c.name.as_str()) && same_constraint(c, constraint, renamed)
                });
                if let Some((index, existing)) = same_definition {
                    consumed.insert(index);
                    self.phases.add_keys.push(Action::RenameConstraint {
                        table: table.clone(),
                        from: existing.name.clone(),
                        to: constraint.name.clone(),
                    });
                    continue;
                }
            }
            self.phases.add_keys.push(Action::AddConstraint {
                table: table.clone(),
                constraint: constraint.clone(),
            });
        }

        for (index, existing) in self.old.constraints.iter().enumerate() {
            if !consumed.contains(&index) {
                self.phases.drop_keys.push(Action::DropConstraint {
                    table: table.clone(),
                    name: existing.name.clone(),
                });
            }
        }
    }

    fn diff_indexes(&mut self, renamed: &Renamed) {
        let table = self.new.name.clone();
        let mut consumed = HashSet::new();
        let desired_names: HashSet<&str> = self.new.indexes.iter().map(|i| i.name.as_str()).collect();

        for index in &self.new.indexes {
            let same_name = self
                .old
                .indexes
                .iter()
                .enumerate()
                .find(|(i, ix)| !consumed.contains(i) && ix.name == index.name);
            if let Some((position, existing)) = same_name {
                consumed.insert(position);
                if same_index(existing, index, renamed) {
                    continue;
                }
                self.phases.drop_keys.push(Action::DropIndex {
                    name: existing.name.clone(),
                });
            } else {
                let same_definition = self.old.indexes.iter().enumerate().find(|(i, ix)| {
                    !consumed.contains(i) && !desired_names.contains(ix.name.as_str()) && same_index(ix, index, renamed)
                });
                if let Some((position, existing)) = same_definition {
                    consumed.insert(position);
                    self.phases.add_keys.push(Action::RenameIndex {
                        from: existing.name.clone(),
                        to: index.name.clone(),
                    });
                    continue;
                }
            }
            self.phases.add_keys.push(Action::AddIndex {
                table: table.clone(),
                index: index.clone(),
            });
        }

        for (position, existing) in self.old.indexes.iter().enumerate() {
            if !consumed.contains(&position) {
                self.phases.drop_keys.push(Action::DropIndex {
                    name: existing.name.clone(),
                });
            }
        }
    }
}

fn renamed_columns(columns: &[String], renamed: &Renamed) -> Vec<String> {
    columns
        .iter()
        .map(|c| renamed.columns.get(c).unwrap_or(c).clone())
        .collect()
}

fn same_constraint(old: &Constraint, new: &Constraint, renamed: &Renamed) -> bool {
    if renamed_columns(&old.columns, renamed) != new.columns {
        return false;
    }
    match (&old.kind, &new.kind) {
        (
            ConstraintKind::ForeignKey {
                table: old_table,
                columns: old_columns,
                cascade: old_cascade,
            },
            ConstraintKind::ForeignKey { table, columns, cascade },
        ) => {
            renamed.tables.get(old_table).unwrap_or(old_table) == table
                && old_columns == columns
                && old_cascade == cascade
        }
        (old, new) => old == new,
    }
}

fn same_index(old: &Index, new: &Index, renamed: &Renamed) -> bool {
    renamed_columns(&old.columns, renamed) == new.columns
}

fn table_is_soft_deleted(logical: &str) -> bool {
    is_soft_deleted(&TableType::parse(logical).0)
}

fn restored_table_name(logical: &str) -> String {
    let (model, kind) = TableType::parse(logical);
    kind.table_name(&restored_name(&model))
}

/// Soft-delete name of a table; side tables keep their suffix so that
/// `City/:changelog` becomes `__City/:changelog`
fn soft_table_name(logical: &str, taken: &HashSet<String>) -> String {
    let (model, kind) = TableType::parse(logical);
    let model = removed_name(&model, |candidate| taken.contains(&kind.table_name(candidate)));
    kind.table_name(&model)
}

fn soft_column_name(logical: &str, taken: &HashSet<String>) -> String {
    removed_name(logical, |candidate| taken.contains(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_table_name_keeps_suffix() {
        let taken = HashSet::from(["example/__City/:changelog".to_string()]);
        assert_eq!(soft_table_name("example/City", &taken), "example/__City");
        assert_eq!(soft_table_name("example/City/:changelog", &taken), "example/___City/:changelog");
        assert!(table_is_soft_deleted("example/__City/:list/tags"));
        assert_eq!(restored_table_name("example/___City/:redirect"), "example/City/:redirect");
    }

    #[test]
    fn test_soft_column_name_cascades() {
        let taken = HashSet::from(["__country._id".to_string()]);
        assert_eq!(soft_column_name("country._id", &taken), "___country._id");
        assert_eq!(soft_column_name("name", &taken), "__name");
    }
}
