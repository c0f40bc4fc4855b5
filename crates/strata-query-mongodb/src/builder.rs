//! Document builder environment
//!
//! Rows are stored one document per object. Properties keep their dotted
//! place as the document path, texts are sub-documents keyed by language
//! and the object id lives in `__id` so Mongo's own `_id` stays untouched.

use crate::registry::DISPATCHER;
use bson::{doc, Bson, Document};
use std::sync::Arc;
use strata_query::selected::default_selection;
use strata_query::{
    compile, BuiltQuery, Dispatcher, Expr, Item, Operand, QueryBuilder, QueryEnv, QueryError,
    QueryParams, Result, Selected,
};
use strata_schema::dtype::{DataType, TypeKind};
use strata_schema::resolver::resolve_path;
use strata_schema::{Manifest, ModelId, PropId, PropertyRef};
use tracing::debug;

pub const BACKEND: &str = "mongo";

/// Arguments of a `find` (or `count_documents`) call
#[derive(Debug, Clone, PartialEq)]
pub struct MongoPlan {
    pub collection: String,
    pub filter: Document,
    pub projection: Document,
    pub sort: Document,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// `count()`: count matching documents instead of returning them
    pub count: bool,
}

/// Document path a comparison or sort key works on
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub key: String,
    pub kind: TypeKind,
    pub place: String,
    pub listed: bool,
}

pub struct MongoQueryBuilder {
    manifest: Arc<Manifest>,
    model: ModelId,
    pub(crate) params: QueryParams,
    pub(crate) selected: Option<Vec<(String, Selected)>>,
    conditions: Vec<Document>,
    pub(crate) sort: Document,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) count: bool,
}

impl MongoQueryBuilder {
    pub fn new(manifest: Arc<Manifest>, model: ModelId) -> Self {
        Self {
            manifest,
            model,
            params: QueryParams::default(),
            selected: None,
            conditions: Vec::new(),
            sort: Document::new(),
            limit: None,
            offset: None,
            count: false,
        }
    }

    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }

    pub fn compile(self, expr: Option<&Expr>) -> Result<BuiltQuery<MongoPlan>> {
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

    /// Document path of a property value
    pub(crate) fn document_key(&self, prop: PropId) -> String {
        let property = self.manifest.prop(prop);
        match (&property.lang, property.parent) {
            (Some(lang), Some(parent)) => format!("{}.{}", self.manifest.prop(parent).column(), lang),
            _ if property.place == "_id" => "__id".to_string(),
            _ => property.column(),
        }
    }

    /// Resolve what a comparison or sort key is applied to
    pub(crate) fn target(&self, pref: &PropertyRef) -> Result<Target> {
        if pref.chain().is_some() {
            return Err(foreign(&self.manifest, pref));
        }
        let (key, kind, prop) = match pref {
            PropertyRef::Reserved(reserved) => (
                format!("{}.{}", self.document_key(reserved.prop), reserved.name),
                reserved.kind,
                reserved.prop,
            ),
            PropertyRef::Property(prop) | PropertyRef::Nested(strata_schema::NestedProperty { prop, .. }) => {
                let property = self.manifest.prop(*prop);
                match &property.dtype {
                    DataType::Ref(r) | DataType::ExternalRef(r) => {
                        let column = property.column();
                        if r.stores_id() {
                            (format!("{}._id", column), TypeKind::PrimaryKey, *prop)
                        } else if let [key] = r.refprops.as_slice() {
                            let key = self.manifest.prop(*key);
                            (format!("{}.{}", column, key.name), key.kind(), *prop)
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
                            .ok_or_else(|| QueryError::invalid_value("compare", format!("{} has no languages", property.place)))?;
                        (self.document_key(*lang), TypeKind::String, *lang)
                    }
                    DataType::Array(array) | DataType::PartialArray(array) if array.model.is_none() => {
                        let items = array.items.ok_or_else(|| {
                            QueryError::invalid_value("compare", format!("{} has no items", property.place))
                        })?;
                        return self.target(&PropertyRef::Property(items));
                    }
                    DataType::Denorm(_) | DataType::Inherit(_) => {
                        return Err(QueryError::not_implemented(
                            BACKEND,
                            format!("{} property {}", property.kind(), property.place),
                        ))
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
                    _ => (self.document_key(*prop), property.kind(), *prop),
                }
            }
            PropertyRef::Foreign { .. } => return Err(foreign(&self.manifest, pref)),
        };
        let property = self.manifest.prop(prop);
        Ok(Target {
            key,
            kind,
            place: property.place.clone(),
            listed: property.list.is_some(),
        })
    }

    /// Selected tree of a property read out of the document
    pub(crate) fn select_prop(&self, pref: &PropertyRef) -> Result<Selected> {
        if pref.chain().is_some() {
            return Err(foreign(&self.manifest, pref));
        }
        match pref {
            PropertyRef::Reserved(reserved) if reserved.name == "_content" => Ok(Selected::deferred(reserved.prop)),
            PropertyRef::Reserved(reserved) => {
                let key = format!("{}.{}", self.document_key(reserved.prop), reserved.name);
                Ok(Selected::column(Item::Key(key), None))
            }
            PropertyRef::Property(prop) | PropertyRef::Nested(strata_schema::NestedProperty { prop, .. }) => {
                self.select_property(*prop)
            }
            PropertyRef::Foreign { .. } => Err(foreign(&self.manifest, pref)),
        }
    }

    fn select_property(&self, prop: PropId) -> Result<Selected> {
        let manifest = &self.manifest;
        let property = manifest.prop(prop);
        let column = property.column();
        match &property.dtype {
            DataType::Text(text) => {
                let (langs, collapse) = self.params.choose_langs(text);
                let items = langs
                    .into_iter()
                    .map(|(lang, id)| (lang, Selected::column(Item::Key(self.document_key(id)), Some(id))))
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
                let mut children = Vec::new();
                if r.stores_id() {
                    children.push((
                        "_id".to_string(),
                        Selected::column(Item::Key(format!("{}._id", column)), None),
                    ));
                } else {
                    for key in &r.refprops {
                        let key = manifest.prop(*key);
                        children.push((
                            key.name.clone(),
                            Selected::column(Item::Key(format!("{}.{}", column, key.name)), Some(key.id)),
                        ));
                    }
                }
                for (name, sub) in &r.properties {
                    if children.iter().any(|(existing, _)| existing == name) {
                        continue;
                    }
                    children.push((name.clone(), self.select_property(*sub)?));
                }
                Ok(Selected::map(Some(prop), children))
            }
            DataType::File(_) => {
                let mut children: Vec<(String, Selected)> = ["_id", "_content_type", "_size"]
                    .iter()
                    .map(|name| {
                        (
                            name.to_string(),
                            Selected::column(Item::Key(format!("{}.{}", column, name)), None),
                        )
                    })
                    .collect();
                children.push(("_content".to_string(), Selected::deferred(prop)));
                Ok(Selected::map(Some(prop), children))
            }
            DataType::Array(array) | DataType::PartialArray(array) if array.model.is_some() => Err(
                QueryError::not_implemented(BACKEND, format!("intermediate table array {}", property.place)),
            ),
            DataType::BackRef(_) | DataType::ArrayBackRef(_) | DataType::Denorm(_) | DataType::Inherit(_) => {
                Err(QueryError::not_implemented(
                    BACKEND,
                    format!("selecting {} property {}", property.kind(), property.place),
                ))
            }
            _ => Ok(Selected::column(Item::Key(self.document_key(prop)), Some(prop))),
        }
    }

    /// Everything `select()` without arguments returns
    pub(crate) fn select_all(&mut self) -> Result<()> {
        let manifest = self.manifest_arc();
        self.selected = Some(Vec::new());
        self.add_selected(
            "_type".to_string(),
            Selected::constant(serde_json::Value::String(manifest.model(self.model).name.clone())),
        );
        for prop in default_selection(&manifest, self.model, &self.params) {
            let selected = self.select_property(prop)?;
            self.add_selected(manifest.prop(prop).name.clone(), selected);
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

/// Include every selected key once; a key already covered by a shorter
/// one is left out, Mongo rejects overlapping paths
fn projection(selected: &[(String, Selected)]) -> Document {
    let mut keys: Vec<String> = selected
        .iter()
        .flat_map(|(_, sel)| sel.items())
        .filter_map(|item| match item {
            Item::Key(key) => Some(key.clone()),
            Item::Index(_) => None,
        })
        .collect();
    keys.sort();
    keys.dedup();

    let mut included: Vec<&str> = Vec::with_capacity(keys.len());
    for key in &keys {
        let covered = included
            .iter()
            .any(|prefix| key.starts_with(prefix) && key[prefix.len()..].starts_with('.'));
        if !covered {
            included.push(key);
        }
    }

    let mut projection = doc! { "_id": 0 };
    for key in included {
        projection.insert(key, 1);
    }
    projection
}

impl QueryEnv for MongoQueryBuilder {
    type Native = Document;

    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn model(&self) -> ModelId {
        self.model
    }

    fn dispatcher(&self) -> &'static Dispatcher<Self, Operand<Document>> {
        &DISPATCHER
    }

    fn resolve_path(&mut self, path: &[String]) -> Result<Operand<Document>> {
        Ok(Operand::Prop(resolve_path(&self.manifest, self.model, path)?))
    }
}

impl QueryBuilder for MongoQueryBuilder {
    type Plan = MongoPlan;

    fn push_where(&mut self, condition: Document) {
        self.conditions.push(condition);
    }

    fn build(mut self) -> Result<BuiltQuery<MongoPlan>> {
        if self.selected.is_none() {
            self.select_all()?;
        }
        let selected = self.selected.take().unwrap_or_default();
        let filter = match self.conditions.len() {
            0 => Document::new(),
            1 => self.conditions.remove(0),
            _ => doc! { "$and": self.conditions.into_iter().map(Bson::Document).collect::<Vec<_>>() },
        };
        let collection = self.manifest.model(self.model).name.clone();
        let plan = MongoPlan {
            collection,
            filter,
            projection: projection(&selected),
            sort: if self.count { Document::new() } else { self.sort },
            skip: self.offset,
            limit: self.limit,
            count: self.count,
        };
        debug!("Built {} query for {}: {}", BACKEND, plan.collection, plan.filter);
        Ok(BuiltQuery {
            plan,
            selected,
            aggregate: self.count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_skips_covered_paths() {
        let selected = vec![
            ("country".to_string(), Selected::column(Item::Key("country".into()), None)),
            ("id".to_string(), Selected::column(Item::Key("country._id".into()), None)),
            ("code".to_string(), Selected::column(Item::Key("countryCode".into()), None)),
            ("count".to_string(), Selected::column(Item::Index(0), None)),
        ];
        assert_eq!(
            projection(&selected),
            doc! { "_id": 0, "country": 1, "countryCode": 1 }
        );
    }
}
