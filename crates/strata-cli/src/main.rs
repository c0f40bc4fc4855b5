//! Strata CLI - schema migrations and naming helpers

mod commands;

use clap::{Parser, Subcommand};
use commands::{CompressNameCommand, MigrateCommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "STRATA_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "STRATA_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the database schema in line with a manifest
    Migrate(MigrateCommand),
    /// Print the physical name a long identifier compresses to
    CompressName(CompressNameCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    strata_core::logging::init(&cli.log_level, &cli.log_format)?;

    match cli.command {
        Commands::Migrate(migrate_cmd) => migrate_cmd.execute(),
        Commands::CompressName(compress_cmd) => compress_cmd.execute(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_migrate() {
        let cli = Cli::try_parse_from([
            "strata",
            "migrate",
            "--manifest",
            "manifest.yml",
            "--database-url",
            "postgres://localhost/strata",
            "--plan",
        ])
        .unwrap();
        let Commands::Migrate(cmd) = cli.command else {
            panic!("expected migrate");
        };
        assert!(cmd.plan);
        assert_eq!(cmd.manifest.to_str(), Some("manifest.yml"));
        assert!(cmd.rename.is_none());
    }

    #[test]
    fn test_parse_compress_name() {
        let cli = Cli::try_parse_from(["strata", "--log-level", "debug", "compress-name", "abc", "--max", "20"]).unwrap();
        assert_eq!(cli.log_level, "debug");
        let Commands::CompressName(cmd) = cli.command else {
            panic!("expected compress-name");
        };
        assert_eq!(cmd.name, "abc");
        assert_eq!(cmd.max, 20);
    }
}
