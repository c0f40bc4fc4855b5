//! Dataframe builder environment
//!
//! Records are flat: one column per leaf property, named after the
//! property source (or its place when it has none). Text languages are
//! separate columns (`name@lt`), refs keep their key in the column of the
//! ref itself.

use crate::mask::{Column, Mask};
use crate::registry::DISPATCHER;
use std::sync::Arc;
use strata_query::selected::default_selection;
use strata_query::{
    compile, BuiltQuery, Dispatcher, Expr, Item, Operand, QueryBuilder, QueryEnv, QueryError,
    QueryParams, Result, Selected,
};
use strata_schema::dtype::{DataType, TypeKind};
use strata_schema::resolver::resolve_path;
use strata_schema::{Manifest, ModelId, NestedProperty, PropId, PropertyRef};
use tracing::debug;

pub const BACKEND: &str = "frame";

/// What to do with a frame: `frame[mask].sort_values(..)`, shape rows,
/// `drop_duplicates()`, `loc[offset:]`, `head(n)`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FramePlan {
    pub source: String,
    pub mask: Option<Mask>,
    /// Sort columns, `true` when descending
    pub sort: Vec<(Column, bool)>,
    pub distinct: bool,
    pub offset: Option<u64>,
    pub head: Option<u64>,
    pub count: bool,
}

pub struct FrameQueryBuilder {
    manifest: Arc<Manifest>,
    model: ModelId,
    pub(crate) params: QueryParams,
    pub(crate) selected: Option<Vec<(String, Selected)>>,
    masks: Vec<Mask>,
    pub(crate) sort: Vec<(Column, bool)>,
    pub(crate) distinct: bool,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) count: bool,
}

/// Column a comparison or sort key reads
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub column: Column,
    pub place: String,
}

impl FrameQueryBuilder {
    pub fn new(manifest: Arc<Manifest>, model: ModelId) -> Self {
        Self {
            manifest,
            model,
            params: QueryParams::default(),
            selected: None,
            masks: Vec::new(),
            sort: Vec::new(),
            distinct: false,
            limit: None,
            offset: None,
            count: false,
        }
    }

    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }

    pub fn compile(self, expr: Option<&Expr>) -> Result<BuiltQuery<FramePlan>> {
        compile(self, expr)
    }

    pub(crate) fn manifest_arc(&self) -> Arc<Manifest> {
        Arc::clone(&self.manifest)
    }

    pub(crate) fn add_selected(&mut self, key: String, selected: Selected) {
        let items = self.selected.get_or_insert_with(Vec::new);
        match items.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = selected,
            None => items.push((key, selected)),
        }
    }

    fn column_name(&self, prop: PropId) -> String {
        self.manifest.prop(prop).source_name().to_string()
    }

    pub(crate) fn target(&self, pref: &PropertyRef) -> Result<Target> {
        if pref.chain().is_some() {
            return Err(foreign(&self.manifest, pref));
        }
        let manifest = &self.manifest;
        let (name, kind, prop) = match pref {
            PropertyRef::Reserved(reserved) => (
                format!("{}.{}", self.column_name(reserved.prop), reserved.name),
                reserved.kind,
                reserved.prop,
            ),
            PropertyRef::Property(prop) | PropertyRef::Nested(NestedProperty { prop, .. }) => {
                let property = manifest.prop(*prop);
                if property.list.is_some() {
                    return Err(listed(&property.place));
                }
                match &property.dtype {
                    DataType::Ref(r) | DataType::ExternalRef(r) => {
                        let kind = match r.refprops.as_slice() {
                            _ if r.stores_id() => TypeKind::PrimaryKey,
                            [key] => manifest.prop(*key).kind(),
                            _ => {
                                return Err(QueryError::invalid_value(
                                    "compare",
                                    format!("{} has a composite key, compare its parts", property.place),
                                ))
                            }
                        };
                        (self.column_name(*prop), kind, *prop)
                    }
                    DataType::Text(text) => {
                        let (langs, _) = self.params.choose_langs(text);
                        let (_, lang) = langs
                            .first()
                            .or_else(|| text.langs.first())
                            .ok_or_else(|| {
                                QueryError::invalid_value("compare", format!("{} has no languages", property.place))
                            })?;
                        (self.column_name(*lang), TypeKind::String, *lang)
                    }
                    DataType::Array(_) | DataType::PartialArray(_) => return Err(listed(&property.place)),
                    DataType::Denorm(_) | DataType::Inherit(_) | DataType::BackRef(_) | DataType::ArrayBackRef(_) => {
                        return Err(QueryError::not_implemented(
                            BACKEND,
                            format!("{} property {}", property.kind(), property.place),
                        ))
                    }
                    DataType::Object(_) | DataType::File(_) => {
                        return Err(QueryError::invalid_value(
                            "compare",
                            format!("cannot compare {} property {}", property.kind(), property.place),
                        ))
                    }
                    _ => (self.column_name(*prop), property.kind(), *prop),
                }
            }
            PropertyRef::Foreign { .. } => return Err(foreign(manifest, pref)),
        };
        Ok(Target {
            column: Column::new(name, kind),
            place: manifest.prop(prop).place.clone(),
        })
    }

    pub(crate) fn select_prop(&self, pref: &PropertyRef) -> Result<Selected> {
        if pref.chain().is_some() {
            return Err(foreign(&self.manifest, pref));
        }
        match pref {
            PropertyRef::Reserved(reserved) => {
                let key = format!("{}.{}", self.column_name(reserved.prop), reserved.name);
                Ok(Selected::column(Item::Key(key), None))
            }
            PropertyRef::Property(prop) | PropertyRef::Nested(NestedProperty { prop, .. }) => {
                self.select_property(*prop)
            }
            PropertyRef::Foreign { .. } => Err(foreign(&self.manifest, pref)),
        }
    }

    fn select_property(&self, prop: PropId) -> Result<Selected> {
        let manifest = &self.manifest;
        let property = manifest.prop(prop);
        if property.list.is_some() {
            return Err(listed(&property.place));
        }
        match &property.dtype {
            DataType::Text(text) => {
                let (langs, collapse) = self.params.choose_langs(text);
                let items = langs
                    .into_iter()
                    .map(|(lang, id)| (lang, Selected::column(Item::Key(self.column_name(id)), Some(id))))
                    .collect();
                Ok(Selected::langs(prop, items, collapse))
            }
            DataType::Object(object) => {
                let mut children = Vec::with_capacity(object.properties.len());
                for (name, sub) in &object.properties {
                    children.push((name.clone(), self.select_property(*sub)?));
                }
                Ok(Selected::map(Some(prop), children))
            }
            DataType::Ref(r) | DataType::ExternalRef(r) => {
                let column = Item::Key(self.column_name(prop));
                let child = match r.refprops.as_slice() {
                    _ if r.stores_id() => ("_id".to_string(), Selected::column(column, None)),
                    [key] => {
                        let key = manifest.prop(*key);
                        (key.name.clone(), Selected::column(column, Some(key.id)))
                    }
                    _ => {
                        return Err(QueryError::not_implemented(
                            BACKEND,
                            format!("composite key ref {}", property.place),
                        ))
                    }
                };
                Ok(Selected::map(Some(prop), vec![child]))
            }
            DataType::Array(_) | DataType::PartialArray(_) => Err(listed(&property.place)),
            DataType::File(_)
            | DataType::BackRef(_)
            | DataType::ArrayBackRef(_)
            | DataType::Denorm(_)
            | DataType::Inherit(_) => Err(QueryError::not_implemented(
                BACKEND,
                format!("selecting {} property {}", property.kind(), property.place),
            )),
            _ => Ok(Selected::column(Item::Key(self.column_name(prop)), Some(prop))),
        }
    }

    /// `select()` without arguments; lists are not part of a flat frame
    pub(crate) fn select_all(&mut self) -> Result<()> {
        let manifest = self.manifest_arc();
        self.selected = Some(Vec::new());
        self.add_selected(
            "_type".to_string(),
            Selected::constant(serde_json::Value::String(manifest.model(self.model).name.clone())),
        );
        for prop in default_selection(&manifest, self.model, &self.params) {
            let property = manifest.prop(prop);
            if matches!(property.dtype, DataType::Array(_) | DataType::PartialArray(_))
                || property.list.is_some()
            {
                debug!("Leaving listed property {} out of {} selection", property.place, BACKEND);
                continue;
            }
            let selected = self.select_property(prop)?;
            self.add_selected(property.name.clone(), selected);
        }
        Ok(())
    }
}

fn foreign(manifest: &Manifest, pref: &PropertyRef) -> QueryError {
    let place = pref
        .chain()
        .map(|chain| chain.display(manifest))
        .unwrap_or_else(|| manifest.prop(pref.prop()).place.clone());
    QueryError::not_implemented(BACKEND, format!("foreign property {}", place))
}

fn listed(place: &str) -> QueryError {
    QueryError::not_implemented(BACKEND, format!("listed property {}", place))
}

impl QueryEnv for FrameQueryBuilder {
    type Native = Mask;

    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn model(&self) -> ModelId {
        self.model
    }

    fn dispatcher(&self) -> &'static Dispatcher<Self, Operand<Mask>> {
        &DISPATCHER
    }

    fn resolve_path(&mut self, path: &[String]) -> Result<Operand<Mask>> {
        Ok(Operand::Prop(resolve_path(&self.manifest, self.model, path)?))
    }
}

impl QueryBuilder for FrameQueryBuilder {
    type Plan = FramePlan;

    fn push_where(&mut self, condition: Mask) {
        self.masks.push(condition);
    }

    fn build(mut self) -> Result<BuiltQuery<FramePlan>> {
        if self.selected.is_none() {
            self.select_all()?;
        }
        let selected = self.selected.take().unwrap_or_default();
        let mask = match self.masks.len() {
            0 => None,
            1 => self.masks.pop(),
            _ => Some(Mask::And(self.masks)),
        };
        let plan = FramePlan {
            source: self.manifest.model(self.model).name.clone(),
            mask,
            sort: if self.count { Vec::new() } else { self.sort },
            distinct: self.distinct,
            offset: self.offset,
            head: self.limit,
            count: self.count,
        };
        debug!("Built {} query for {}: {:?}", BACKEND, plan.source, plan.mask);
        Ok(BuiltQuery {
            plan,
            selected,
            aggregate: self.count,
        })
    }
}
