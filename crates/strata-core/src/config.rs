//! Configuration management
//!
//! Settings are layered: built-in defaults, then an optional settings file
//! (any format the `config` crate understands), then `STRATA_*` environment
//! variables. Nested keys use a double underscore, for example
//! `STRATA_QUERY__DEFAULT_LANGS=lt,en` or `STRATA_MIGRATION__SCHEMA=data`.

use crate::error::{ConfigError, ConfigResult};
use crate::naming::NAMEDATALEN;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub query: QueryDefaults,
    pub migration: MigrationSettings,
}

/// Defaults applied to every query build
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryDefaults {
    /// Language fallback order used when a request does not ask for one
    pub default_langs: Vec<String>,
    /// Expose `_uri` instead of `_id` for references whose target declares a URI property
    pub prioritize_uri: bool,
    /// Whether the storage backend keeps file blocks next to the metadata
    pub file_blocks: bool,
    pub max_identifier_length: usize,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            default_langs: Vec::new(),
            prioritize_uri: false,
            file_blocks: true,
            max_identifier_length: NAMEDATALEN,
        }
    }
}

/// Settings for the schema migrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MigrationSettings {
    /// Optional JSON rename map (`{"old": {"": "new", "old_col": "new_col"}}`)
    pub rename_map: Option<PathBuf>,
    pub max_identifier_length: usize,
    /// Database schema the managed tables live in
    pub schema: String,
    /// Language used when a localized column collapses into a plain string
    pub default_lang: Option<String>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            rename_map: None,
            max_identifier_length: NAMEDATALEN,
            schema: "public".to_string(),
            default_lang: None,
        }
    }
}

impl Settings {
    /// Load settings from an optional file and the environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            debug!("Loading settings from {}", path.display());
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("STRATA")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("query.default_langs")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (section, length) in [
            ("query", self.query.max_identifier_length),
            ("migration", self.migration.max_identifier_length),
        ] {
            // room for `_<8 hex>_` plus at least one char on each side
            if length < 12 {
                return Err(ConfigError::Invalid {
                    details: format!(
                        "{}.max_identifier_length must be at least 12, got {}",
                        section, length
                    ),
                });
            }
        }
        if self.migration.schema.trim().is_empty() {
            return Err(ConfigError::Invalid {
                details: "migration.schema must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
