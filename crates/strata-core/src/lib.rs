//! Core utilities shared by every strata crate
//!
//! - [`config`]: layered settings (defaults, optional file, `STRATA_*` env vars)
//! - [`naming`]: logical table names, physical identifier compression and
//!   soft-delete names
//! - [`logging`]: `tracing-subscriber` initialisation for binaries

pub mod config;
pub mod error;
pub mod logging;
pub mod naming;

pub use config::{MigrationSettings, QueryDefaults, Settings};
pub use error::{ConfigError, ConfigResult, LoggingError};
pub use naming::{
    compress_name, is_soft_deleted, quote_ident, removed_name, restored_name, Namer, TableType,
    NAMEDATALEN,
};
