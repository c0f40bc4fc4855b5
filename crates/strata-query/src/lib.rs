//! # strata-query
//!
//! Backend neutral part of query building.
//!
//! An expression tree ([`expr`]) is evaluated inside a builder
//! environment. Every function call is resolved by a [`dispatch::Dispatcher`]
//! on the types of its arguments, so each backend only registers the
//! `(function, property type, value type)` combinations it supports.
//! Builders return a backend plan together with a [`selected`] tree the
//! [`shaper`] uses to turn backend rows into response objects.

pub mod builder;
pub mod cast;
pub mod dispatch;
pub mod error;
pub mod expr;
pub mod operand;
pub mod params;
pub mod patch;
pub mod selected;
pub mod shaper;

pub use builder::{compile, register_common, BuiltQuery, QueryBuilder};
pub use dispatch::{call, call_resolved, Args, Dispatcher, QueryEnv, TypeTag};
pub use error::{QueryError, Result};
pub use expr::{Expr, Node, Value};
pub use operand::Operand;
pub use params::QueryParams;
pub use selected::{Item, Prep, Selected};
