//! # strata-query-mongodb
//!
//! Compiles query expressions into MongoDB `find` arguments: a filter
//! document, a projection and a sort document. Joins are not available,
//! so foreign properties raise `NotImplementedFeature`.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_query::expr::{call, lit, path};
//! use strata_query_mongodb::{fetch, MongoQueryBuilder};
//!
//! # async fn example(db: mongodb::Database, manifest: Arc<strata_schema::Manifest>, city: strata_schema::ModelId) -> strata_query_mongodb::Result<()> {
//! let expr = call("eq", vec![path("country.code"), lit("lt")]);
//! let built = MongoQueryBuilder::new(Arc::clone(&manifest), city).compile(Some(&expr))?;
//! let rows = fetch(&db, &manifest, &built).await?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod error;
mod fetch;
mod filter;
mod registry;
mod select;

pub use builder::{MongoPlan, MongoQueryBuilder, BACKEND};
pub use error::{MongoError, Result};
pub use fetch::{fetch, flatten};
