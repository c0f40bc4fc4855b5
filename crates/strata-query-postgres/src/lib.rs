//! # strata-query-postgres
//!
//! Compiles query expressions into a single PostgreSQL `SELECT`.
//!
//! Foreign properties become `LEFT OUTER JOIN`s, one per distinct hop
//! prefix. Values inside arrays are matched through their list side table
//! so a row is returned at most once, however many items match.
//!
//! ```ignore
//! let plan = PgQueryBuilder::new(manifest, city).compile(Some(&expr))?;
//! let rows = db.query_all(plan.plan.statement()).await?;
//! ```

mod builder;
mod compare;
mod funcs;
mod registry;
mod select;
pub mod sql;

pub use builder::{PgPlan, PgQueryBuilder, BACKEND};
pub use sql::{Select, SqlExpr, SqlRenderer};
