//! Tracing subscriber setup for strata binaries

use crate::error::LoggingError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Crates whose logs follow the requested level
const STRATA_CRATES: &[&str] = &[
    "strata_cli",
    "strata_core",
    "strata_schema",
    "strata_query",
    "strata_query_postgres",
    "strata_query_mongodb",
    "strata_query_frame",
    "strata_migrations",
];

/// Build the filter used when `RUST_LOG` is not set
pub fn default_filter(level: &str) -> String {
    let mut directives: Vec<String> = STRATA_CRATES
        .iter()
        .map(|krate| format!("{}={}", krate, level))
        .collect();
    directives.extend(["sqlx=warn", "sea_orm=warn"].iter().map(|s| s.to_string()));
    directives.join(",")
}

/// Install the global tracing subscriber.
///
/// `format` is either `full` (targets included) or `compact`.
pub fn init(level: &str, format: &str) -> Result<(), LoggingError> {
    let fmt_layer = match format {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        "compact" => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .boxed(),
        other => return Err(LoggingError::UnknownFormat(other.to_string())),
    };

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env()?
    } else {
        EnvFilter::new(default_filter(level))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_mentions_all_crates() {
        let filter = default_filter("debug");
        assert!(filter.contains("strata_migrations=debug"));
        assert!(filter.contains("sea_orm=warn"));
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let err = init("info", "pretty").unwrap_err();
        assert!(matches!(err, LoggingError::UnknownFormat(ref f) if f == "pretty"));
        assert_eq!(err.to_string(), "Unknown log format \"pretty\", expected compact or full");
    }
}
