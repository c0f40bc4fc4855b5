use strata_schema::SchemaError;
use thiserror::Error;

/// Errors raised while building a query plan or shaping its results
#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// No handler registered for the function and argument types
    #[error("Unknown method {name}({}) for {env}", args.join(", "))]
    UnknownMethod {
        env: &'static str,
        name: String,
        args: Vec<String>,
    },

    #[error("Invalid value for {operator}: {details}")]
    InvalidValue { operator: String, details: String },

    #[error("Empty string given to {operator}({property})")]
    EmptyStringSearch { operator: String, property: String },

    #[error("Null given to {operator}({property}), only eq and ne accept null")]
    NoneValueComparison { operator: String, property: String },

    #[error("{feature} is not supported by {backend}")]
    NotImplementedFeature { backend: String, feature: String },

    #[error("Item {id} of {model} does not exist")]
    ItemDoesNotExist { model: String, id: String },
}

impl QueryError {
    pub fn invalid_value(operator: impl Into<String>, details: impl Into<String>) -> Self {
        QueryError::InvalidValue {
            operator: operator.into(),
            details: details.into(),
        }
    }

    pub fn not_implemented(backend: impl Into<String>, feature: impl Into<String>) -> Self {
        QueryError::NotImplementedFeature {
            backend: backend.into(),
            feature: feature.into(),
        }
    }

    /// Stable error kind name
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::Schema(err) => err.kind(),
            QueryError::UnknownMethod { .. } => "UnknownMethod",
            QueryError::InvalidValue { .. } => "InvalidValue",
            QueryError::EmptyStringSearch { .. } => "EmptyStringSearch",
            QueryError::NoneValueComparison { .. } => "NoneValueComparison",
            QueryError::NotImplementedFeature { .. } => "NotImplementedFeature",
            QueryError::ItemDoesNotExist { .. } => "ItemDoesNotExist",
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
