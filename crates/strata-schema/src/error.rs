use crate::dtype::TypeKind;
use thiserror::Error;

/// Errors raised while loading, linking and resolving the logical schema
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Property {property:?} not found in {model:?}")]
    FieldNotInResource { model: String, property: String },

    #[error("Language {lang:?} is not declared for {property:?}, declared: {declared:?}")]
    LangNotDeclared {
        property: String,
        lang: String,
        declared: Vec<String>,
    },

    #[error("{model}.{property} references unknown model {target:?}")]
    ModelReferenceNotFound {
        model: String,
        property: String,
        target: String,
    },

    #[error("Invalid denorm property {model}.{property}: {reason}")]
    InvalidDenormProperty {
        model: String,
        property: String,
        reason: String,
    },

    #[error("{model}.{property}: refprop {refprop:?} is {expected} in the target model, got {found}")]
    RefPropTypeMissmatch {
        model: String,
        property: String,
        refprop: String,
        expected: TypeKind,
        found: TypeKind,
    },

    #[error("Back reference {model}.{property}: {target} has no reference to {model}")]
    NoBackRefReferencesFound {
        model: String,
        property: String,
        target: String,
    },

    #[error("Back reference {model}.{property}: {target} has several references to {model} ({candidates:?}), set refprop explicitly")]
    MultipleBackRefReferencesFound {
        model: String,
        property: String,
        target: String,
        candidates: Vec<String>,
    },

    #[error("Back reference {model}.{property}: reference {refprop:?} sits inside a list")]
    OneToManyBackRefNotSupported {
        model: String,
        property: String,
        refprop: String,
    },

    #[error("Invalid intermediate model for {model}.{property}: {details}")]
    InvalidIntermediateModel {
        model: String,
        property: String,
        details: String,
    },

    #[error("Invalid manifest: {details}")]
    InvalidManifest { details: String },

    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse manifest: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchemaError {
    pub fn field_not_found(model: impl Into<String>, property: impl Into<String>) -> Self {
        SchemaError::FieldNotInResource {
            model: model.into(),
            property: property.into(),
        }
    }

    pub fn invalid_manifest(details: impl Into<String>) -> Self {
        SchemaError::InvalidManifest {
            details: details.into(),
        }
    }

    /// Stable error kind name
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaError::FieldNotInResource { .. } => "FieldNotInResource",
            SchemaError::LangNotDeclared { .. } => "LangNotDeclared",
            SchemaError::ModelReferenceNotFound { .. } => "ModelReferenceNotFound",
            SchemaError::InvalidDenormProperty { .. } => "InvalidDenormProperty",
            SchemaError::RefPropTypeMissmatch { .. } => "RefPropTypeMissmatch",
            SchemaError::NoBackRefReferencesFound { .. } => "NoBackRefReferencesFound",
            SchemaError::MultipleBackRefReferencesFound { .. } => "MultipleBackRefReferencesFound",
            SchemaError::OneToManyBackRefNotSupported { .. } => "OneToManyBackRefNotSupported",
            SchemaError::InvalidIntermediateModel { .. } => "InvalidIntermediateModel",
            SchemaError::InvalidManifest { .. }
            | SchemaError::Io { .. }
            | SchemaError::Yaml(_)
            | SchemaError::Json(_) => "InvalidManifest",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchemaError>;
