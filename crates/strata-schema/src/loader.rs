//! Manifest document loader
//!
//! Reads a YAML or JSON description of models and builds a linked
//! [`Manifest`]:
//!
//! ```yaml
//! models:
//!   datasets/gov/example/City:
//!     pkeys: [id]
//!     properties:
//!       id: integer unique
//!       name@lt: string
//!       name@en: string
//!       country:
//!         type: ref
//!         model: Country
//!         refprops: [id]
//!         level: 3
//!       tags[]: string
//! ```
//!
//! Keys preserve declaration order. `name@lang` keys are grouped into one
//! `text` property, `name[]` keys declare an array of the given item type,
//! and a ref model without a namespace is looked up in the owner's dataset.

use crate::dtype::{
    ArrayType, BackRefType, DataType, DenormType, FileType, GeometryType, InheritType,
    ObjectType, RefType, TextType, TypeKind,
};
use crate::error::{Result, SchemaError};
use crate::link;
use crate::manifest::{
    Access, Base, Manifest, Model, ModelId, PropId, Property, Source, RESERVED_PROPERTIES,
};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use tracing::debug;

/// Map that keeps its keys in document order
#[derive(Debug, Clone)]
pub struct OrderedMap<T>(pub Vec<(String, T)>);

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        OrderedMap(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = OrderedMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }

            fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(OrderedMap(Vec::new()))
            }
        }

        deserializer.deserialize_any(OrderedVisitor(PhantomData))
    }
}

/// A single name or a list of names
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Names {
    One(String),
    Many(Vec<String>),
}

impl Names {
    fn into_vec(self) -> Vec<String> {
        match self {
            Names::One(name) => name
                .split(',')
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
            Names::Many(names) => names,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ManifestDoc {
    #[serde(default)]
    pub models: OrderedMap<ModelDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum BaseDoc {
    Name(String),
    Full {
        model: String,
        #[serde(default)]
        pkeys: Option<Names>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SourceDoc {
    Name(String),
    Full(Source),
}

impl SourceDoc {
    fn into_source(self) -> Source {
        match self {
            SourceDoc::Name(name) => Source {
                name,
                prepare: None,
            },
            SourceDoc::Full(source) => source,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelDoc {
    #[serde(default)]
    pub pkeys: Option<Names>,
    #[serde(default)]
    pub base: Option<BaseDoc>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub external: Option<SourceDoc>,
    #[serde(default)]
    pub properties: OrderedMap<PropertyEntry>,
}

/// Property given either as a type string (`integer unique`) or in full
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PropertyEntry {
    Short(String),
    Full(Box<PropertyDoc>),
}

impl PropertyEntry {
    fn into_doc(self) -> PropertyDoc {
        match self {
            PropertyEntry::Short(type_) => PropertyDoc {
                type_: Some(type_),
                ..PropertyDoc::default()
            },
            PropertyEntry::Full(doc) => *doc,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PropertyDoc {
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub refprops: Option<Names>,
    /// Forward ref used by a back reference
    #[serde(default)]
    pub refprop: Option<String>,
    #[serde(default)]
    pub level: Option<u8>,
    #[serde(default)]
    pub langs: Vec<String>,
    #[serde(default)]
    pub items: Option<Box<PropertyEntry>>,
    /// `[left, right]` refs of an intermediate array model
    #[serde(default)]
    pub refs: Option<Names>,
    #[serde(default)]
    pub properties: OrderedMap<PropertyEntry>,
    #[serde(rename = "enum", default)]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub access: Option<Access>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub srid: Option<u32>,
    #[serde(default)]
    pub geometry: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub prepare: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
}

/// Parsed head of a type string: `geometry(point;3346) unique required`
#[derive(Debug, PartialEq)]
struct TypeSpec {
    kind: TypeKind,
    geometry: GeometryType,
    unique: bool,
    required: bool,
}

fn parse_type(raw: &str) -> Result<TypeSpec> {
    let mut words = raw.split_whitespace();
    let head = words
        .next()
        .ok_or_else(|| SchemaError::invalid_manifest("empty property type"))?;
    let kind = TypeKind::from_name(head)
        .ok_or_else(|| SchemaError::invalid_manifest(format!("unknown type {:?}", head)))?;

    let mut geometry = GeometryType::default();
    if let (Some(open), Some(close)) = (head.find('('), head.rfind(')')) {
        for arg in head[open + 1..close].split(';').map(str::trim) {
            if arg.is_empty() {
                continue;
            }
            match arg.parse::<u32>() {
                Ok(srid) => geometry.srid = Some(srid),
                Err(_) => geometry.geometry_type = Some(arg.to_lowercase()),
            }
        }
    }

    let mut spec = TypeSpec {
        kind,
        geometry,
        unique: false,
        required: false,
    };
    for flag in words {
        match flag {
            "unique" => spec.unique = true,
            "required" => spec.required = true,
            other => {
                return Err(SchemaError::invalid_manifest(format!(
                    "unknown type flag {:?} in {:?}",
                    other, raw
                )))
            }
        }
    }
    Ok(spec)
}

/// Merge `name@lang` keys into `text` properties and `name[]` keys into
/// arrays, keeping the position of the first occurrence
fn group_properties(entries: Vec<(String, PropertyEntry)>) -> Result<Vec<(String, PropertyDoc)>> {
    let mut grouped: Vec<(String, PropertyDoc)> = Vec::with_capacity(entries.len());
    for (key, entry) in entries {
        let doc = entry.into_doc();
        if let Some((name, lang)) = key.split_once('@') {
            match grouped.iter_mut().find(|(n, _)| n == name) {
                Some((_, text)) => {
                    if text.type_.as_deref() != Some("text") {
                        return Err(SchemaError::invalid_manifest(format!(
                            "{:?} is declared with a language but {:?} is not a text",
                            key, name
                        )));
                    }
                    text.langs.push(lang.to_string());
                }
                None => grouped.push((
                    name.to_string(),
                    PropertyDoc {
                        type_: Some("text".to_string()),
                        langs: vec![lang.to_string()],
                        access: doc.access,
                        required: doc.required,
                        ..PropertyDoc::default()
                    },
                )),
            }
        } else if let Some(name) = key.strip_suffix("[]") {
            grouped.push((
                name.to_string(),
                PropertyDoc {
                    type_: Some("array".to_string()),
                    access: doc.access,
                    items: Some(Box::new(PropertyEntry::Full(Box::new(doc)))),
                    ..PropertyDoc::default()
                },
            ));
        } else if let Some((_, existing)) = grouped.iter_mut().find(|(n, _)| *n == key) {
            // explicit `text` declared after its languages
            if doc.type_.as_deref() == Some("text") && existing.type_.as_deref() == Some("text") {
                let langs = std::mem::take(&mut existing.langs);
                *existing = doc;
                for lang in langs {
                    if !existing.langs.contains(&lang) {
                        existing.langs.push(lang);
                    }
                }
            } else {
                return Err(SchemaError::invalid_manifest(format!(
                    "property {:?} is declared twice",
                    key
                )));
            }
        } else {
            grouped.push((key, doc));
        }
    }
    Ok(grouped)
}

fn qualify(dataset: &str, name: &str) -> String {
    if name.contains('/') || dataset.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dataset, name)
    }
}

/// Position of a property being built
#[derive(Clone, Copy)]
struct Scope {
    model: ModelId,
    parent: Option<PropId>,
    list: Option<PropId>,
    access: Option<Access>,
    in_ref: bool,
}

struct Builder {
    manifest: Manifest,
}

impl Builder {
    fn model(&mut self, name: String, doc: ModelDoc) -> Result<()> {
        if self.manifest.model_id(&name).is_some() {
            return Err(SchemaError::invalid_manifest(format!(
                "model {:?} is declared twice",
                name
            )));
        }
        let dataset = match name.rfind('/') {
            Some(pos) => name[..pos].to_string(),
            None => String::new(),
        };

        let base = doc.base.map(|base| match base {
            BaseDoc::Name(model) => Base {
                model: qualify(&dataset, &model),
                model_id: None,
                pkeys: Vec::new(),
            },
            BaseDoc::Full { model, pkeys } => Base {
                model: qualify(&dataset, &model),
                model_id: None,
                pkeys: pkeys.map(Names::into_vec).unwrap_or_default(),
            },
        });

        let model_id = self.manifest.add_model(Model {
            id: ModelId(0),
            name: name.clone(),
            pkeys: Vec::new(),
            base,
            external: doc.external.map(SourceDoc::into_source),
            backend: doc.backend,
            properties: Vec::new(),
            flatprops: Vec::new(),
            leafprops: HashMap::new(),
            reserved: Vec::new(),
            index: HashMap::new(),
            given_pkeys: doc.pkeys.map(Names::into_vec).unwrap_or_default(),
        });

        for (reserved, kind) in RESERVED_PROPERTIES {
            let dtype = DataType::scalar(kind).ok_or_else(|| {
                SchemaError::invalid_manifest(format!("{} is not a scalar type", kind))
            })?;
            let access = match reserved {
                "_id" | "_revision" => Access::Public,
                _ => Access::Private,
            };
            self.manifest.add_prop(Property {
                id: PropId(0),
                model: model_id,
                name: reserved.to_string(),
                place: reserved.to_string(),
                dtype,
                access,
                enum_values: None,
                unit: None,
                list: None,
                parent: None,
                external: None,
                lang: None,
                unique: reserved == "_id",
                required: true,
                reserved: true,
            });
        }

        let scope = Scope {
            model: model_id,
            parent: None,
            list: None,
            access: None,
            in_ref: false,
        };
        for (prop_name, prop_doc) in group_properties(doc.properties.0)? {
            let place = prop_name.clone();
            let id = self.property(scope, &dataset, prop_name.clone(), place, prop_doc)?;
            self.manifest
                .model_mut(model_id)
                .properties
                .push((prop_name, id));
        }

        let given = self.manifest.model(model_id).given_pkeys.clone();
        let mut pkeys = Vec::with_capacity(given.len());
        for key in given {
            let id = self
                .manifest
                .model(model_id)
                .flatprop(&key)
                .ok_or_else(|| SchemaError::field_not_found(&name, &key))?;
            pkeys.push(id);
        }

        let mut leafprops: HashMap<String, Vec<PropId>> = HashMap::new();
        for prop in self.manifest.flatprops(model_id) {
            if prop.is_leaf() {
                leafprops.entry(prop.name.clone()).or_default().push(prop.id);
            }
        }

        let model = self.manifest.model_mut(model_id);
        model.pkeys = pkeys;
        model.leafprops = leafprops;
        Ok(())
    }

    fn property(
        &mut self,
        scope: Scope,
        dataset: &str,
        name: String,
        place: String,
        doc: PropertyDoc,
    ) -> Result<PropId> {
        let spec = match doc.type_.as_deref() {
            Some(raw) => parse_type(raw)?,
            None if scope.in_ref => TypeSpec {
                kind: TypeKind::Denorm,
                geometry: GeometryType::default(),
                unique: false,
                required: false,
            },
            None => {
                return Err(SchemaError::invalid_manifest(format!(
                    "property {:?} has no type",
                    place
                )))
            }
        };

        let dtype = match spec.kind {
            TypeKind::Geometry => DataType::Geometry(GeometryType {
                srid: doc.srid.or(spec.geometry.srid),
                geometry_type: doc
                    .geometry
                    .clone()
                    .map(|g| g.to_lowercase())
                    .or(spec.geometry.geometry_type),
            }),
            TypeKind::Object => DataType::Object(ObjectType::default()),
            TypeKind::Array | TypeKind::PartialArray => {
                let array = ArrayType {
                    model: doc.model.as_deref().map(|m| qualify(dataset, m)),
                    given_refs: match doc.refs.clone().map(Names::into_vec) {
                        Some(refs) if refs.len() == 2 => Some((refs[0].clone(), refs[1].clone())),
                        Some(refs) => {
                            return Err(SchemaError::invalid_manifest(format!(
                                "array {:?} needs exactly two refs, got {:?}",
                                place, refs
                            )))
                        }
                        None => None,
                    },
                    ..ArrayType::default()
                };
                if spec.kind == TypeKind::Array {
                    DataType::Array(array)
                } else {
                    DataType::PartialArray(array)
                }
            }
            TypeKind::Ref | TypeKind::ExternalRef => {
                let target = doc.model.as_deref().ok_or_else(|| {
                    SchemaError::invalid_manifest(format!("ref {:?} has no model", place))
                })?;
                if let Some(level) = doc.level {
                    if level > 4 {
                        return Err(SchemaError::invalid_manifest(format!(
                            "ref {:?} has invalid level {}",
                            place, level
                        )));
                    }
                }
                let mut ref_type = RefType::new(qualify(dataset, target));
                ref_type.given_refprops = doc.refprops.clone().map(Names::into_vec).unwrap_or_default();
                ref_type.explicit = !ref_type.given_refprops.is_empty();
                ref_type.level = doc.level;
                if spec.kind == TypeKind::Ref {
                    DataType::Ref(ref_type)
                } else {
                    DataType::ExternalRef(ref_type)
                }
            }
            TypeKind::BackRef | TypeKind::ArrayBackRef => {
                let target = doc.model.as_deref().ok_or_else(|| {
                    SchemaError::invalid_manifest(format!("backref {:?} has no model", place))
                })?;
                let given = doc.refprop.clone().or_else(|| {
                    doc.refprops
                        .clone()
                        .and_then(|names| names.into_vec().into_iter().next())
                });
                let backref = BackRefType {
                    model: qualify(dataset, target),
                    refprop: None,
                    explicit: given.is_some(),
                    given_refprop: given,
                };
                if spec.kind == TypeKind::BackRef {
                    DataType::BackRef(backref)
                } else {
                    DataType::ArrayBackRef(backref)
                }
            }
            TypeKind::Denorm => DataType::Denorm(DenormType {
                rel_prop: None,
                explicit: doc.type_.is_some(),
            }),
            TypeKind::Inherit => DataType::Inherit(InheritType::default()),
            TypeKind::File => DataType::File(FileType {
                backend: doc.backend.clone(),
            }),
            TypeKind::Text => DataType::Text(TextType::default()),
            scalar => DataType::scalar(scalar).ok_or_else(|| {
                SchemaError::invalid_manifest(format!("type {} needs attributes", scalar))
            })?,
        };

        let access = doc.access.or(scope.access).unwrap_or_default();
        let id = self.manifest.add_prop(Property {
            id: PropId(0),
            model: scope.model,
            name: name.clone(),
            place: place.clone(),
            dtype,
            access,
            enum_values: doc.enum_values.clone(),
            unit: doc.unit.clone(),
            list: scope.list,
            parent: scope.parent,
            external: doc.source.clone().map(|name| Source {
                name,
                prepare: doc.prepare.clone(),
            }),
            lang: None,
            unique: doc.unique || spec.unique,
            required: doc.required || spec.required,
            reserved: false,
        });

        let child = Scope {
            model: scope.model,
            parent: Some(id),
            list: scope.list,
            access: Some(access),
            in_ref: false,
        };

        match spec.kind {
            TypeKind::Object => {
                let mut subs = Vec::new();
                for (sub, sub_doc) in group_properties(doc.properties.0)? {
                    let sub_place = format!("{}.{}", place, sub);
                    let sub_id = self.property(child, dataset, sub.clone(), sub_place, sub_doc)?;
                    subs.push((sub, sub_id));
                }
                if let DataType::Object(object) = &mut self.manifest.prop_mut(id).dtype {
                    object.properties = subs;
                }
            }
            TypeKind::Array | TypeKind::PartialArray => {
                let items_doc = doc
                    .items
                    .map(|items| (*items).into_doc())
                    .ok_or_else(|| {
                        SchemaError::invalid_manifest(format!("array {:?} has no items", place))
                    })?;
                let items_scope = Scope {
                    list: Some(id),
                    ..child
                };
                let items_place = format!("{}[]", place);
                let items = self.property(items_scope, dataset, name, items_place, items_doc)?;
                match &mut self.manifest.prop_mut(id).dtype {
                    DataType::Array(array) | DataType::PartialArray(array) => {
                        array.items = Some(items)
                    }
                    _ => {}
                }
            }
            TypeKind::Ref | TypeKind::ExternalRef => {
                let ref_scope = Scope {
                    in_ref: true,
                    ..child
                };
                let mut subs = Vec::new();
                for (sub, sub_doc) in group_properties(doc.properties.0)? {
                    let sub_place = format!("{}.{}", place, sub);
                    let sub_id = self.property(ref_scope, dataset, sub.clone(), sub_place, sub_doc)?;
                    subs.push((sub, sub_id));
                }
                if let DataType::Ref(r) | DataType::ExternalRef(r) =
                    &mut self.manifest.prop_mut(id).dtype
                {
                    r.properties = subs;
                }
            }
            TypeKind::Text => {
                let mut langs = Vec::with_capacity(doc.langs.len());
                for lang in &doc.langs {
                    let lang_id = self.manifest.add_prop(Property {
                        id: PropId(0),
                        model: scope.model,
                        name: name.clone(),
                        place: format!("{}@{}", place, lang),
                        dtype: DataType::String,
                        access,
                        enum_values: None,
                        unit: None,
                        list: scope.list,
                        parent: Some(id),
                        external: None,
                        lang: Some(lang.clone()),
                        unique: false,
                        required: false,
                        reserved: false,
                    });
                    langs.push((lang.clone(), lang_id));
                }
                if let DataType::Text(text) = &mut self.manifest.prop_mut(id).dtype {
                    text.langs = langs;
                }
            }
            _ => {}
        }

        Ok(id)
    }
}

/// Build and link a manifest from its parsed document
pub fn build(doc: ManifestDoc) -> Result<Manifest> {
    let mut builder = Builder {
        manifest: Manifest::new(),
    };
    for (name, model) in doc.models.0 {
        builder.model(name, model)?;
    }
    let mut manifest = builder.manifest;
    link::link(&mut manifest)?;
    debug!(
        "Loaded manifest with {} models and {} properties",
        manifest.models().count(),
        manifest.prop_count()
    );
    Ok(manifest)
}

pub fn load_yaml(text: &str) -> Result<Manifest> {
    let doc: ManifestDoc = serde_yaml::from_str(text)?;
    build(doc)
}

pub fn load_json(text: &str) -> Result<Manifest> {
    let doc: ManifestDoc = serde_json::from_str(text)?;
    build(doc)
}

/// Load a manifest file, JSON when the extension says so, YAML otherwise
pub fn load_file(path: &Path) -> Result<Manifest> {
    let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.display().to_string(),
        source,
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => load_json(&text),
        _ => load_yaml(&text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_flags_and_geometry() {
        let spec = parse_type("integer unique required").unwrap();
        assert_eq!(spec.kind, TypeKind::Integer);
        assert!(spec.unique && spec.required);

        let spec = parse_type("geometry(point;3346)").unwrap();
        assert_eq!(spec.kind, TypeKind::Geometry);
        assert_eq!(spec.geometry.srid, Some(3346));
        assert_eq!(spec.geometry.geometry_type.as_deref(), Some("point"));

        assert!(parse_type("integer sometimes").is_err());
        assert!(parse_type("whatever").is_err());
    }

    #[test]
    fn test_ordered_map_keeps_order() {
        let map: OrderedMap<i32> = serde_yaml::from_str("b: 1\na: 2\nc: 3\n").unwrap();
        let keys: Vec<_> = map.0.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["b", "a", "c"]);
    }

    #[test]
    fn test_lang_keys_are_grouped_into_text() {
        let entries = vec![
            ("name@lt".to_string(), PropertyEntry::Short("string".into())),
            ("code".to_string(), PropertyEntry::Short("integer".into())),
            ("name@en".to_string(), PropertyEntry::Short("string".into())),
        ];
        let grouped = group_properties(entries).unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "name");
        assert_eq!(grouped[0].1.langs, ["lt", "en"]);
    }

    #[test]
    fn test_qualify_uses_owner_dataset() {
        assert_eq!(qualify("datasets/gov", "City"), "datasets/gov/City");
        assert_eq!(qualify("datasets/gov", "other/City"), "other/City");
        assert_eq!(qualify("", "City"), "City");
    }
}
