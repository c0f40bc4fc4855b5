//! Relational builder environment
//!
//! One [`PgQueryBuilder`] is created per query. It owns every accumulator
//! the handlers fill in (joins, columns, conditions, sort keys) and turns
//! them into a single `SELECT` in [`QueryBuilder::build`].

use crate::registry::DISPATCHER;
use crate::sql::{FromItem, Join, JoinKind, OrderBy, Select, SelectItem, SqlExpr, SqlRenderer};
use sea_orm::{DbBackend, Statement};
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::{Namer, TableType};
use strata_query::selected::default_selection;
use strata_query::{
    compile, BuiltQuery, Dispatcher, Expr, Operand, QueryBuilder, QueryEnv, QueryError, QueryParams,
    Result, Selected,
};
use strata_schema::dtype::{DataType, RefType, TypeKind};
use strata_schema::resolver::{resolve_in, resolve_path};
use strata_schema::{ForeignProperty, Manifest, ModelId, PropId, PropertyRef};
use tracing::debug;

pub const BACKEND: &str = "postgresql";

/// Built SQL with its positional values
#[derive(Debug, Clone, PartialEq)]
pub struct PgPlan {
    pub sql: String,
    pub values: Vec<sea_orm::Value>,
}

impl PgPlan {
    pub fn statement(&self) -> Statement {
        Statement::from_sql_and_values(DbBackend::Postgres, self.sql.clone(), self.values.clone())
    }
}

/// List side table a property value lives in
#[derive(Debug, Clone)]
pub(crate) struct Listed {
    pub table: String,
    /// Alias of the table owning the list rows
    pub owner: String,
    pub name: String,
}

/// Column a comparison or sort key works on
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub expr: SqlExpr,
    pub kind: TypeKind,
    pub place: String,
    pub listed: Option<Listed>,
}

pub struct PgQueryBuilder {
    manifest: Arc<Manifest>,
    model: ModelId,
    pub(crate) params: QueryParams,
    pub(crate) namer: Namer,
    pub(crate) table: String,
    joins: Vec<Join>,
    join_aliases: HashMap<Vec<PropId>, String>,
    aliases: usize,
    columns: Vec<SelectItem>,
    pub(crate) selected: Option<Vec<(String, Selected)>>,
    conditions: Vec<SqlExpr>,
    pub(crate) sort: Vec<OrderBy>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) aggregate: bool,
    pub(crate) distinct: bool,
}

impl PgQueryBuilder {
    pub fn new(manifest: Arc<Manifest>, model: ModelId) -> Self {
        let namer = Namer::default();
        let table = namer.table(&manifest.model(model).name, &TableType::Main);
        Self {
            manifest,
            model,
            params: QueryParams::default(),
            namer,
            table,
            joins: Vec::new(),
            join_aliases: HashMap::new(),
            aliases: 0,
            columns: Vec::new(),
            selected: None,
            conditions: Vec::new(),
            sort: Vec::new(),
            limit: None,
            offset: None,
            aggregate: false,
            distinct: false,
        }
    }

    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_namer(mut self, namer: Namer) -> Self {
        self.table = namer.table(&self.manifest.model(self.model).name, &TableType::Main);
        self.namer = namer;
        self
    }

    /// Compile `expr` against this environment
    pub fn compile(self, expr: Option<&Expr>) -> Result<BuiltQuery<PgPlan>> {
        compile(self, expr)
    }

    pub(crate) fn manifest_arc(&self) -> Arc<Manifest> {
        Arc::clone(&self.manifest)
    }

    pub(crate) fn next_alias(&mut self, base: &str) -> String {
        self.aliases += 1;
        format!("{}_{}", base, self.aliases)
    }

    /// Add a column to the select list, reusing an identical one
    pub(crate) fn add_column(&mut self, expr: SqlExpr, alias: Option<String>) -> usize {
        if let Some(index) = self.columns.iter().position(|item| item.expr == expr) {
            return index;
        }
        self.columns.push(SelectItem { expr, alias });
        self.columns.len() - 1
    }

    pub(crate) fn add_selected(&mut self, key: String, selected: Selected) {
        let items = self.selected.get_or_insert_with(Vec::new);
        match items.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = selected,
            None => items.push((key, selected)),
        }
    }

    pub(crate) fn add_join(&mut self, join: Join) {
        self.joins.push(join);
    }

    /// Alias of the table a reference is read from, joining what is needed
    pub(crate) fn alias_for(&mut self, pref: &PropertyRef) -> Result<String> {
        match pref.chain() {
            Some(chain) => self.join_chain(chain),
            None => Ok(self.table.clone()),
        }
    }

    /// Outer join every hop of `chain`; hops shared with an earlier chain
    /// reuse its join
    pub(crate) fn join_chain(&mut self, chain: &ForeignProperty) -> Result<String> {
        let mut alias = self.table.clone();
        let mut path = Vec::with_capacity(chain.len());
        for hop in chain.hops() {
            path.push(hop.left);
            if let Some(existing) = self.join_aliases.get(&path) {
                alias = existing.clone();
                continue;
            }
            alias = self.join_hop(&alias, hop.left, hop.right)?;
            self.join_aliases.insert(path.clone(), alias.clone());
        }
        Ok(alias)
    }

    fn join_hop(&mut self, source: &str, left: PropId, right: PropId) -> Result<String> {
        let manifest = self.manifest_arc();
        let prop = manifest.prop(left);
        if prop.list.is_some() {
            return Err(QueryError::not_implemented(
                BACKEND,
                format!("join through {} inside a list", prop.place),
            ));
        }
        let target = manifest.owner(right);
        let table = self.namer.table(&target.name, &TableType::Main);
        let alias = self.next_alias(target.basename());

        let on = match &prop.dtype {
            DataType::Ref(r) | DataType::ExternalRef(r) => {
                ref_join_on(&manifest, source, &alias, &prop.column(), r)
            }
            DataType::BackRef(b) | DataType::ArrayBackRef(b) => {
                let refprop = b.refprop.ok_or_else(|| {
                    QueryError::invalid_value("join", format!("{} is not linked", prop.place))
                })?;
                let forward = manifest.prop(refprop);
                let r = forward.dtype.as_ref_type().ok_or_else(|| {
                    QueryError::invalid_value("join", format!("{} is not a ref", forward.place))
                })?;
                ref_join_on(&manifest, &alias, source, &forward.column(), r)
            }
            DataType::Inherit(_) => SqlExpr::eq(
                SqlExpr::column(alias.as_str(), "_id"),
                SqlExpr::column(source, "_id"),
            ),
            _ => {
                return Err(QueryError::invalid_value(
                    "join",
                    format!("cannot join through {} property {}", prop.kind(), prop.place),
                ))
            }
        };

        debug!("Join {} as {} through {}", table, alias, prop.place);
        self.joins.push(Join {
            kind: JoinKind::LeftOuter,
            item: FromItem::aliased(table, alias.as_str()),
            on,
        });
        Ok(alias)
    }

    /// Physical list table holding the elements of `list`
    pub(crate) fn list_table(&self, list: PropId) -> String {
        let list_prop = self.manifest.prop(list);
        let owner = self.manifest.owner(list);
        self.namer.table(&owner.name, &TableType::List(list_prop.column()))
    }

    /// Column name of a property on the table it is stored in
    pub(crate) fn column_name(&self, prop: PropId) -> String {
        let property = self.manifest.prop(prop);
        if property.list.is_some() {
            self.manifest.list_column(prop)
        } else {
            property.column()
        }
    }

    /// Value column of a property; localized strings are read out of the
    /// JSONB column of their text
    pub(crate) fn value_column(&self, table: &str, prop: PropId) -> SqlExpr {
        let property = self.manifest.prop(prop);
        match (&property.lang, property.parent) {
            (Some(lang), Some(parent)) => SqlExpr::JsonText {
                table: table.to_string(),
                column: self.column_name(parent),
                key: lang.clone(),
            },
            _ => SqlExpr::column(table, self.column_name(prop)),
        }
    }

    /// Resolve what a comparison or sort key is applied to
    pub(crate) fn target(&mut self, pref: &PropertyRef) -> Result<Target> {
        let manifest = self.manifest_arc();
        let alias = self.alias_for(pref)?;

        let (prop, suffix, kind) = match pref.local() {
            PropertyRef::Reserved(reserved) => (
                reserved.prop,
                Some(reserved.name.clone()),
                reserved.kind,
            ),
            PropertyRef::Property(prop) | PropertyRef::Nested(strata_schema::NestedProperty { prop, .. }) => {
                let property = manifest.prop(*prop);
                match &property.dtype {
                    DataType::Denorm(denorm) => {
                        let rel = denorm.rel_prop.ok_or_else(|| unlinked(&property.place))?;
                        let parent = property.parent.ok_or_else(|| unlinked(&property.place))?;
                        let chain = through(pref.chain(), parent, rel)?;
                        return self.target(&PropertyRef::Foreign {
                            chain,
                            leaf: Box::new(PropertyRef::Property(rel)),
                        });
                    }
                    DataType::Inherit(_) => {
                        let inner = resolve_in(&manifest, *prop, &[])?;
                        return self.target(&rebase(pref.chain(), inner));
                    }
                    DataType::Ref(r) | DataType::ExternalRef(r) => {
                        if r.stores_id() {
                            (*prop, Some("_id".to_string()), TypeKind::PrimaryKey)
                        } else if let [key] = r.refprops.as_slice() {
                            let key = manifest.prop(*key);
                            (*prop, Some(key.name.clone()), key.kind())
                        } else {
                            return Err(QueryError::invalid_value(
                                "compare",
                                format!("{} has a composite key, compare its parts", property.place),
                            ));
                        }
                    }
                    DataType::Text(text) => {
                        let (langs, _) = self.params.choose_langs(text);
                        let (_, lang) = langs
                            .first()
                            .or_else(|| text.langs.first())
                            .ok_or_else(|| unlinked(&property.place))?;
                        (*lang, None, TypeKind::String)
                    }
                    // scalar arrays compare their items
                    DataType::Array(array) | DataType::PartialArray(array) if array.model.is_none() => {
                        let items = array.items.ok_or_else(|| unlinked(&property.place))?;
                        return self.target(&rebase(pref.chain(), PropertyRef::Property(items)));
                    }
                    DataType::Object(_)
                    | DataType::Array(_)
                    | DataType::PartialArray(_)
                    | DataType::File(_)
                    | DataType::BackRef(_)
                    | DataType::ArrayBackRef(_) => {
                        return Err(QueryError::invalid_value(
                            "compare",
                            format!("cannot compare {} property {}", property.kind(), property.place),
                        ))
                    }
                    _ => (*prop, None, property.kind()),
                }
            }
            PropertyRef::Foreign { .. } => {
                return Err(QueryError::invalid_value("compare", "unresolved foreign property"))
            }
        };

        let property = manifest.prop(prop);
        // nested array items live in the list table of the outermost array
        let (table, listed) = match manifest.root_list(prop) {
            Some(root) => {
                let table = self.list_table(root);
                let listed = Listed {
                    table: table.clone(),
                    owner: alias,
                    name: manifest.prop(root).name.clone(),
                };
                (table, Some(listed))
            }
            None => (alias, None),
        };
        let expr = match suffix {
            Some(name) => SqlExpr::column(table, format!("{}.{}", self.column_name(prop), name)),
            None => self.value_column(&table, prop),
        };
        Ok(Target {
            expr,
            kind,
            place: property.place.clone(),
            listed,
        })
    }

    /// Outer join a distinct `_rid` sub-query of a list table filtered by
    /// `condition`; returns the sub-query alias
    pub(crate) fn listed_subquery(&mut self, listed: &Listed, condition: SqlExpr) -> String {
        let alias = self.next_alias(&listed.name);
        let query = Select {
            distinct: true,
            columns: vec![SelectItem {
                expr: SqlExpr::column(listed.table.as_str(), "_rid"),
                alias: None,
            }],
            from: Some(FromItem::table(listed.table.as_str())),
            filter: Some(condition),
            ..Default::default()
        };
        self.joins.push(Join {
            kind: JoinKind::LeftOuter,
            item: FromItem::Subquery {
                query: Box::new(query),
                alias: alias.clone(),
            },
            on: SqlExpr::eq(
                SqlExpr::column(alias.as_str(), "_rid"),
                SqlExpr::column(listed.owner.as_str(), "_id"),
            ),
        });
        alias
    }

    /// Everything `select()` without arguments returns
    pub(crate) fn select_all(&mut self) -> Result<()> {
        let manifest = self.manifest_arc();
        let model = manifest.model(self.model);
        self.selected = Some(Vec::new());
        self.add_selected(
            "_type".to_string(),
            Selected::constant(serde_json::Value::String(model.name.clone())),
        );
        for prop in default_selection(&manifest, self.model, &self.params) {
            let selected = self.select_prop(&PropertyRef::Property(prop))?;
            self.add_selected(manifest.prop(prop).name.clone(), selected);
        }
        Ok(())
    }
}

fn unlinked(place: &str) -> QueryError {
    QueryError::invalid_value("resolve", format!("{} is not linked", place))
}

/// `ON` condition joining the table holding a ref to the ref's target
fn ref_join_on(manifest: &Manifest, holder: &str, target: &str, column: &str, r: &RefType) -> SqlExpr {
    if r.stores_id() {
        return SqlExpr::eq(
            SqlExpr::column(holder, format!("{}._id", column)),
            SqlExpr::column(target, "_id"),
        );
    }
    let parts = r
        .refprops
        .iter()
        .map(|key| {
            let key = manifest.prop(*key);
            SqlExpr::eq(
                SqlExpr::column(holder, format!("{}.{}", column, key.name)),
                SqlExpr::column(target, key.column()),
            )
        })
        .collect();
    SqlExpr::all(parts).unwrap_or(SqlExpr::Null)
}

/// Chain reaching `right` through the ref-like property `left`, which is
/// either local or the last property `chain` landed on
pub(crate) fn through(chain: Option<&ForeignProperty>, left: PropId, right: PropId) -> Result<ForeignProperty> {
    match chain {
        None => Ok(ForeignProperty::new(left, right)),
        Some(chain) if chain.right() == left => Ok(chain.push(right)),
        Some(_) => Err(QueryError::not_implemented(
            BACKEND,
            "denormalized property of a reference nested in a joined object",
        )),
    }
}

/// Put a locally resolved reference behind an existing join chain
pub(crate) fn rebase(chain: Option<&ForeignProperty>, inner: PropertyRef) -> PropertyRef {
    match (chain, inner) {
        (None, inner) => inner,
        (Some(chain), PropertyRef::Foreign { chain: rest, leaf }) => PropertyRef::Foreign {
            chain: chain.extend(&rest),
            leaf,
        },
        (Some(chain), leaf) => PropertyRef::Foreign {
            chain: chain.clone(),
            leaf: Box::new(leaf),
        },
    }
}

impl QueryEnv for PgQueryBuilder {
    type Native = SqlExpr;

    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn model(&self) -> ModelId {
        self.model
    }

    fn dispatcher(&self) -> &'static Dispatcher<Self, Operand<SqlExpr>> {
        &DISPATCHER
    }

    fn resolve_path(&mut self, path: &[String]) -> Result<Operand<SqlExpr>> {
        Ok(Operand::Prop(resolve_path(&self.manifest, self.model, path)?))
    }
}

impl QueryBuilder for PgQueryBuilder {
    type Plan = PgPlan;

    fn push_where(&mut self, condition: SqlExpr) {
        self.conditions.push(condition);
    }

    fn build(mut self) -> Result<BuiltQuery<PgPlan>> {
        if self.selected.is_none() {
            self.select_all()?;
        }
        let select = Select {
            distinct: self.distinct,
            columns: self.columns,
            from: Some(FromItem::table(self.table.as_str())),
            joins: self.joins,
            filter: SqlExpr::all(self.conditions),
            // aggregates return one row, ordering it is meaningless
            order_by: if self.aggregate { Vec::new() } else { self.sort },
            limit: self.limit,
            offset: self.offset,
            ..Default::default()
        };
        let (sql, values) = SqlRenderer::render(&select);
        debug!(
            "Built {} query for {}: {}",
            BACKEND,
            self.manifest.model(self.model).name,
            sql
        );
        Ok(BuiltQuery {
            plan: PgPlan { sql, values },
            selected: self.selected.unwrap_or_default(),
            aggregate: self.aggregate,
        })
    }
}
