//! Logical schema: models and properties
//!
//! Models and properties live in one arena owned by [`Manifest`] and refer
//! to each other through [`ModelId`] and [`PropId`]. The arena is built by
//! the loader, linked once, and read-only afterwards.

use crate::dtype::{DataType, TypeKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropId(pub usize);

/// Names of the reserved columns every main table carries
pub const RESERVED_PROPERTIES: [(&str, TypeKind); 5] = [
    ("_txn", TypeKind::Uuid),
    ("_created", TypeKind::DateTime),
    ("_updated", TypeKind::DateTime),
    ("_id", TypeKind::PrimaryKey),
    ("_revision", TypeKind::String),
];

/// Reserved names a `File` property exposes
pub const FILE_ATTRIBUTES: [&str; 6] = [
    "_id",
    "_content_type",
    "_size",
    "_content",
    "_bsize",
    "_blocks",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Private,
    Protected,
    Public,
    Open,
}

impl Default for Access {
    fn default() -> Self {
        Access::Public
    }
}

/// Binding of a model or property to an external source
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    #[serde(default)]
    pub prepare: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Base {
    pub model: String,
    pub model_id: Option<ModelId>,
    pub pkeys: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub id: ModelId,
    /// Qualified name, `datasets/gov/example/City`
    pub name: String,
    pub pkeys: Vec<PropId>,
    pub base: Option<Base>,
    pub external: Option<Source>,
    /// Backend the model is stored in, `None` for the default one
    pub backend: Option<String>,
    /// Top level declared properties in declaration order
    pub properties: Vec<(String, PropId)>,
    /// Every declared property in declaration order (objects, array items,
    /// text languages and ref sub-properties included)
    pub flatprops: Vec<PropId>,
    /// Leaf properties grouped by their name
    pub leafprops: HashMap<String, Vec<PropId>>,
    /// Reserved properties (`_id`, `_revision`, ...)
    pub reserved: Vec<(String, PropId)>,
    pub(crate) index: HashMap<String, PropId>,
    pub(crate) given_pkeys: Vec<String>,
}

impl Model {
    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Namespace part of the name (`datasets/gov/example`), empty for
    /// top level models
    pub fn dataset(&self) -> &str {
        match self.name.rfind('/') {
            Some(pos) => &self.name[..pos],
            None => "",
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.basename().starts_with('_')
    }

    /// Declared or reserved property by its place
    pub fn flatprop(&self, place: &str) -> Option<PropId> {
        self.index.get(place).copied()
    }

    /// Top level declared property by its name
    pub fn property(&self, name: &str) -> Option<PropId> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    pub fn reserved_prop(&self, name: &str) -> Option<PropId> {
        self.reserved
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    pub fn id_prop(&self) -> Option<PropId> {
        self.reserved_prop("_id")
    }

    pub fn leaves(&self, name: &str) -> &[PropId] {
        self.leafprops.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Property {
    pub id: PropId,
    pub model: ModelId,
    pub name: String,
    /// Dotted path inside the model (`notes[].note`, `name@lt`)
    pub place: String,
    pub dtype: DataType,
    pub access: Access,
    pub enum_values: Option<Vec<serde_json::Value>>,
    pub unit: Option<String>,
    /// Enclosing array property, if any
    pub list: Option<PropId>,
    /// Enclosing composite property (object, array, text or ref)
    pub parent: Option<PropId>,
    pub external: Option<Source>,
    /// Language of a `Text` component
    pub lang: Option<String>,
    pub unique: bool,
    pub required: bool,
    pub reserved: bool,
}

impl Property {
    pub fn kind(&self) -> TypeKind {
        self.dtype.kind()
    }

    /// Column name of the property on its owning table
    pub fn column(&self) -> String {
        self.place.replace("[]", "")
    }

    /// Name of the source column in an external source, falling back to
    /// the place
    pub fn source_name(&self) -> &str {
        self.external
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or(&self.place)
    }

    pub fn is_leaf(&self) -> bool {
        self.lang.is_none()
            && !matches!(
                self.kind(),
                TypeKind::Object | TypeKind::Array | TypeKind::PartialArray
            )
    }
}

/// Linked model/property graph
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    models: Vec<Model>,
    props: Vec<Property>,
    by_name: HashMap<String, ModelId>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self, id: ModelId) -> &Model {
        &self.models[id.0]
    }

    pub fn prop(&self, id: PropId) -> &Property {
        &self.props[id.0]
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.iter()
    }

    pub fn model_id(&self, name: &str) -> Option<ModelId> {
        self.by_name.get(name).copied()
    }

    pub fn model_by_name(&self, name: &str) -> Option<&Model> {
        self.model_id(name).map(|id| self.model(id))
    }

    /// Model owning a property
    pub fn owner(&self, prop: PropId) -> &Model {
        self.model(self.prop(prop).model)
    }

    /// Model a `Ref`/`BackRef` points at, once linked
    pub fn target(&self, prop: PropId) -> Option<&Model> {
        self.prop(prop)
            .dtype
            .target_model()
            .and_then(|name| self.model_by_name(name))
    }

    /// Properties of a model in declaration order
    pub fn flatprops(&self, model: ModelId) -> impl Iterator<Item = &Property> {
        self.model(model).flatprops.iter().map(|id| self.prop(*id))
    }

    /// Top level declared properties of a model
    pub fn top_props(&self, model: ModelId) -> impl Iterator<Item = &Property> {
        self.model(model).properties.iter().map(|(_, id)| self.prop(*id))
    }

    /// Place of a list item property relative to its list table: the
    /// `notes[].` prefix is dropped, a scalar item keeps the list name
    pub fn list_column(&self, prop: PropId) -> String {
        let property = self.prop(prop);
        match property.list {
            Some(list) => {
                let list_place = &self.prop(list).place;
                let items = format!("{}[]", list_place);
                match property.place.strip_prefix(&format!("{}.", items)) {
                    Some(rest) => rest.replace("[]", ""),
                    None if property.place == items => self.prop(list).name.clone(),
                    None => property.column(),
                }
            }
            None => property.column(),
        }
    }

    /// Outermost array enclosing a property, the one owning the list table
    pub fn root_list(&self, prop: PropId) -> Option<PropId> {
        let mut current = self.prop(prop).list?;
        while let Some(outer) = self.prop(current).list {
            current = outer;
        }
        Some(current)
    }

    /// URI property of a model, used for `prioritize_uri`
    pub fn uri_prop(&self, model: ModelId) -> Option<PropId> {
        self.model(model)
            .properties
            .iter()
            .map(|(_, id)| *id)
            .find(|id| self.prop(*id).kind() == TypeKind::Uri)
    }

    pub(crate) fn add_model(&mut self, mut model: Model) -> ModelId {
        let id = ModelId(self.models.len());
        model.id = id;
        self.by_name.insert(model.name.clone(), id);
        self.models.push(model);
        id
    }

    pub(crate) fn add_prop(&mut self, mut prop: Property) -> PropId {
        let id = PropId(self.props.len());
        prop.id = id;
        let model = &mut self.models[prop.model.0];
        model.index.insert(prop.place.clone(), id);
        if prop.reserved {
            model.reserved.push((prop.name.clone(), id));
        } else {
            model.flatprops.push(id);
        }
        self.props.push(prop);
        id
    }

    pub(crate) fn model_mut(&mut self, id: ModelId) -> &mut Model {
        &mut self.models[id.0]
    }

    pub(crate) fn prop_mut(&mut self, id: PropId) -> &mut Property {
        &mut self.props[id.0]
    }

    pub(crate) fn prop_count(&self) -> usize {
        self.props.len()
    }
}
