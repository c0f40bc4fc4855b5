//! Data type registry
//!
//! Every property carries one [`DataType`]. Composite variants hold their
//! own attributes (languages, ref level, items, ...). [`TypeKind`] is the
//! attribute-free tag used for dispatch and reporting.

use crate::manifest::PropId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute-free data type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    PrimaryKey,
    String,
    Integer,
    Number,
    Boolean,
    Binary,
    Json,
    Url,
    Uri,
    Uuid,
    Date,
    Time,
    DateTime,
    Geometry,
    Object,
    Array,
    PartialArray,
    Ref,
    ExternalRef,
    BackRef,
    ArrayBackRef,
    Denorm,
    Inherit,
    File,
    Text,
}

impl TypeKind {
    pub const ALL: [TypeKind; 25] = [
        TypeKind::PrimaryKey,
        TypeKind::String,
        TypeKind::Integer,
        TypeKind::Number,
        TypeKind::Boolean,
        TypeKind::Binary,
        TypeKind::Json,
        TypeKind::Url,
        TypeKind::Uri,
        TypeKind::Uuid,
        TypeKind::Date,
        TypeKind::Time,
        TypeKind::DateTime,
        TypeKind::Geometry,
        TypeKind::Object,
        TypeKind::Array,
        TypeKind::PartialArray,
        TypeKind::Ref,
        TypeKind::ExternalRef,
        TypeKind::BackRef,
        TypeKind::ArrayBackRef,
        TypeKind::Denorm,
        TypeKind::Inherit,
        TypeKind::File,
        TypeKind::Text,
    ];

    /// Manifest spelling of the type
    pub fn name(&self) -> &'static str {
        match self {
            TypeKind::PrimaryKey => "pk",
            TypeKind::String => "string",
            TypeKind::Integer => "integer",
            TypeKind::Number => "number",
            TypeKind::Boolean => "boolean",
            TypeKind::Binary => "binary",
            TypeKind::Json => "json",
            TypeKind::Url => "url",
            TypeKind::Uri => "uri",
            TypeKind::Uuid => "uuid",
            TypeKind::Date => "date",
            TypeKind::Time => "time",
            TypeKind::DateTime => "datetime",
            TypeKind::Geometry => "geometry",
            TypeKind::Object => "object",
            TypeKind::Array => "array",
            TypeKind::PartialArray => "partial_array",
            TypeKind::Ref => "ref",
            TypeKind::ExternalRef => "external_ref",
            TypeKind::BackRef => "backref",
            TypeKind::ArrayBackRef => "array_backref",
            TypeKind::Denorm => "denorm",
            TypeKind::Inherit => "inherit",
            TypeKind::File => "file",
            TypeKind::Text => "text",
        }
    }

    pub fn from_name(name: &str) -> Option<TypeKind> {
        // `geometry(point;3346)` style attributes are parsed by the loader
        let base = name.split('(').next().unwrap_or(name).trim();
        match base {
            "partial" => return Some(TypeKind::PartialArray),
            "generic" => return Some(TypeKind::Ref),
            _ => {}
        }
        TypeKind::ALL.iter().copied().find(|kind| kind.name() == base)
    }

    /// More general kind this one specialises, used by the dispatcher for
    /// longest-match resolution
    pub fn parent(&self) -> Option<TypeKind> {
        match self {
            TypeKind::Url | TypeKind::Uri => Some(TypeKind::String),
            TypeKind::ExternalRef => Some(TypeKind::Ref),
            TypeKind::ArrayBackRef => Some(TypeKind::BackRef),
            TypeKind::PartialArray => Some(TypeKind::Array),
            _ => None,
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, TypeKind::Date | TypeKind::Time | TypeKind::DateTime)
    }

    /// Whether values of this kind sit in a single scalar column
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            TypeKind::PrimaryKey
                | TypeKind::String
                | TypeKind::Integer
                | TypeKind::Number
                | TypeKind::Boolean
                | TypeKind::Binary
                | TypeKind::Json
                | TypeKind::Url
                | TypeKind::Uri
                | TypeKind::Uuid
                | TypeKind::Date
                | TypeKind::Time
                | TypeKind::DateTime
                | TypeKind::Geometry
        )
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeometryType {
    pub srid: Option<u32>,
    /// `point`, `linestring`, `polygon`, ... (`None` for any geometry)
    pub geometry_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectType {
    /// Sub-properties in declaration order
    pub properties: Vec<(String, PropId)>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArrayType {
    pub items: Option<PropId>,
    /// Intermediate model joining the container and item models
    pub model: Option<String>,
    pub left_prop: Option<PropId>,
    pub right_prop: Option<PropId>,
    /// Names of `left_prop`/`right_prop` as given in the manifest
    pub given_refs: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefType {
    /// Target model name
    pub model: String,
    /// Target properties the reference is keyed by (filled by the link pass)
    pub refprops: Vec<PropId>,
    /// Refprop names as given in the manifest
    pub given_refprops: Vec<String>,
    /// `true` when refprops were given explicitly
    pub explicit: bool,
    /// 3 stores target keys inline, 4 (the default) stores the target `_id`
    pub level: Option<u8>,
    /// Denormalized and key sub-properties declared under the reference
    pub properties: Vec<(String, PropId)>,
    /// Inherited from a base model
    pub inherited: bool,
}

impl RefType {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            refprops: Vec::new(),
            given_refprops: Vec::new(),
            explicit: false,
            level: None,
            properties: Vec::new(),
            inherited: false,
        }
    }

    /// Level 4 and above keep the opaque `_id` of the target
    pub fn stores_id(&self) -> bool {
        self.level.map_or(true, |level| level >= 4)
    }

    pub fn sub_property(&self, name: &str) -> Option<PropId> {
        self.properties
            .iter()
            .find(|(sub, _)| sub == name)
            .map(|(_, id)| *id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackRefType {
    pub model: String,
    /// Forward `Ref` property in the target model pointing back at the owner
    pub refprop: Option<PropId>,
    pub given_refprop: Option<String>,
    pub explicit: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DenormType {
    /// Property of the referenced model the value is copied from
    pub rel_prop: Option<PropId>,
    /// Explicitly declared as `denorm` in the manifest
    pub explicit: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InheritType {
    /// Property of the base model this one stands for
    pub base_prop: Option<PropId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileType {
    /// Backend holding the blocks, `None` means the model's own backend
    pub backend: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextType {
    /// Per-language string sub-properties in declaration order
    pub langs: Vec<(String, PropId)>,
}

impl TextType {
    pub fn lang(&self, lang: &str) -> Option<PropId> {
        self.langs.iter().find(|(l, _)| l == lang).map(|(_, id)| *id)
    }

    pub fn lang_names(&self) -> Vec<&str> {
        self.langs.iter().map(|(l, _)| l.as_str()).collect()
    }
}

/// Data type of a property together with its attributes
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    PrimaryKey,
    String,
    Integer,
    Number,
    Boolean,
    Binary,
    Json,
    Url,
    Uri,
    Uuid,
    Date,
    Time,
    DateTime,
    Geometry(GeometryType),
    Object(ObjectType),
    Array(ArrayType),
    PartialArray(ArrayType),
    Ref(RefType),
    ExternalRef(RefType),
    BackRef(BackRefType),
    ArrayBackRef(BackRefType),
    Denorm(DenormType),
    Inherit(InheritType),
    File(FileType),
    Text(TextType),
}

impl DataType {
    pub fn kind(&self) -> TypeKind {
        match self {
            DataType::PrimaryKey => TypeKind::PrimaryKey,
            DataType::String => TypeKind::String,
            DataType::Integer => TypeKind::Integer,
            DataType::Number => TypeKind::Number,
            DataType::Boolean => TypeKind::Boolean,
            DataType::Binary => TypeKind::Binary,
            DataType::Json => TypeKind::Json,
            DataType::Url => TypeKind::Url,
            DataType::Uri => TypeKind::Uri,
            DataType::Uuid => TypeKind::Uuid,
            DataType::Date => TypeKind::Date,
            DataType::Time => TypeKind::Time,
            DataType::DateTime => TypeKind::DateTime,
            DataType::Geometry(_) => TypeKind::Geometry,
            DataType::Object(_) => TypeKind::Object,
            DataType::Array(_) => TypeKind::Array,
            DataType::PartialArray(_) => TypeKind::PartialArray,
            DataType::Ref(_) => TypeKind::Ref,
            DataType::ExternalRef(_) => TypeKind::ExternalRef,
            DataType::BackRef(_) => TypeKind::BackRef,
            DataType::ArrayBackRef(_) => TypeKind::ArrayBackRef,
            DataType::Denorm(_) => TypeKind::Denorm,
            DataType::Inherit(_) => TypeKind::Inherit,
            DataType::File(_) => TypeKind::File,
            DataType::Text(_) => TypeKind::Text,
        }
    }

    /// Attribute-free type for scalar kinds
    pub fn scalar(kind: TypeKind) -> Option<DataType> {
        Some(match kind {
            TypeKind::PrimaryKey => DataType::PrimaryKey,
            TypeKind::String => DataType::String,
            TypeKind::Integer => DataType::Integer,
            TypeKind::Number => DataType::Number,
            TypeKind::Boolean => DataType::Boolean,
            TypeKind::Binary => DataType::Binary,
            TypeKind::Json => DataType::Json,
            TypeKind::Url => DataType::Url,
            TypeKind::Uri => DataType::Uri,
            TypeKind::Uuid => DataType::Uuid,
            TypeKind::Date => DataType::Date,
            TypeKind::Time => DataType::Time,
            TypeKind::DateTime => DataType::DateTime,
            TypeKind::Geometry => DataType::Geometry(GeometryType::default()),
            _ => return None,
        })
    }

    pub fn as_ref_type(&self) -> Option<&RefType> {
        match self {
            DataType::Ref(r) | DataType::ExternalRef(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_backref(&self) -> Option<&BackRefType> {
        match self {
            DataType::BackRef(b) | DataType::ArrayBackRef(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayType> {
        match self {
            DataType::Array(a) | DataType::PartialArray(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextType> {
        match self {
            DataType::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectType> {
        match self {
            DataType::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Model the data type points at, if it is a reference of any kind
    pub fn target_model(&self) -> Option<&str> {
        match self {
            DataType::Ref(r) | DataType::ExternalRef(r) => Some(&r.model),
            DataType::BackRef(b) | DataType::ArrayBackRef(b) => Some(&b.model),
            _ => None,
        }
    }
}
