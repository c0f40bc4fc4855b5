//! # strata-schema
//!
//! Logical schema shared by the query builders and the migrator.
//!
//! - [`dtype`]: the data type registry
//! - [`manifest`]: models and properties in one arena
//! - [`loader`]: YAML/JSON manifest documents
//! - [`link`]: cross-model consistency checks run after loading
//! - [`resolver`]: dotted path resolution and foreign property chains

pub mod dtype;
pub mod error;
pub mod link;
pub mod loader;
pub mod manifest;
pub mod resolver;

pub use dtype::{DataType, TypeKind};
pub use error::{Result, SchemaError};
pub use loader::{load_file, load_json, load_yaml};
pub use manifest::{Access, Manifest, Model, ModelId, PropId, Property};
pub use resolver::{ForeignProperty, Hop, NestedProperty, PropertyRef, ReservedProperty};
