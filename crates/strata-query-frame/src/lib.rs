//! # strata-query-frame
//!
//! Query builder for tabular sources read into memory (CSV, XLSX and
//! similar). A query compiles into a [`FramePlan`]: a boolean [`Mask`],
//! sort columns, `drop_duplicates`, `loc[offset:]` and `head(n)`.
//! [`execute`] runs the plan over JSON records and shapes the result.
//!
//! Joins and listed properties have no counterpart in a flat frame and
//! are reported as `NotImplementedFeature`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata_query::expr::{call, lit, path};
//! use strata_query_frame::{execute, FrameQueryBuilder};
//!
//! # fn run(manifest: Arc<strata_schema::Manifest>, city: strata_schema::ModelId, records: Vec<strata_query_frame::Record>) -> strata_query::Result<()> {
//! let expr = call("gt", vec![path("population"), lit(1000)]);
//! let built = FrameQueryBuilder::new(Arc::clone(&manifest), city).compile(Some(&expr))?;
//! for row in execute(&manifest, &built, &records) {
//!     println!("{}", serde_json::Value::Object(row));
//! }
//! # Ok(())
//! # }
//! ```

mod builder;
mod execute;
mod handlers;
pub mod mask;
mod registry;
mod select;

pub use builder::{FramePlan, FrameQueryBuilder, BACKEND};
pub use execute::{execute, get_one, Record};
pub use mask::{Column, Mask};
