use strata_schema::SchemaError;
use thiserror::Error;

/// Errors that abort a migration before anything is applied
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Cannot cast {table}.{column} from {from} to {to}")]
    UnableToCastColumnTypes {
        table: String,
        column: String,
        from: String,
        to: String,
    },

    #[error("Cannot migrate {table}.{column} into a reference keyed by {} properties ({})", keys.len(), keys.join(", "))]
    MigrateScalarToRefTooManyKeys {
        table: String,
        column: String,
        keys: Vec<String>,
    },

    #[error("Cannot migrate {table}.{column} of type {from} into a reference keyed by a {to} property")]
    MigrateScalarToRefTypeMissmatch {
        table: String,
        column: String,
        from: String,
        to: String,
    },

    #[error("Invalid rename map {path}: {details}")]
    InvalidRenameMap { path: String, details: String },
}

impl MigrationError {
    /// Stable error kind name
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationError::Schema(err) => err.kind(),
            MigrationError::Database(_) => "DatabaseError",
            MigrationError::UnableToCastColumnTypes { .. } => "UnableToCastColumnTypes",
            MigrationError::MigrateScalarToRefTooManyKeys { .. } => "MigrateScalarToRefTooManyKeys",
            MigrationError::MigrateScalarToRefTypeMissmatch { .. } => "MigrateScalarToRefTypeMissmatch",
            MigrationError::InvalidRenameMap { .. } => "InvalidRenameMap",
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;
