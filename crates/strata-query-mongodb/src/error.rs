use strata_query::QueryError;
use thiserror::Error;

/// Errors raised while running a built plan against a collection
#[derive(Error, Debug)]
pub enum MongoError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("MongoDB request failed: {0}")]
    Driver(#[from] mongodb::error::Error),
}

impl MongoError {
    pub fn kind(&self) -> &'static str {
        match self {
            MongoError::Query(err) => err.kind(),
            MongoError::Driver(_) => "BackendError",
        }
    }
}

pub type Result<T> = std::result::Result<T, MongoError>;
