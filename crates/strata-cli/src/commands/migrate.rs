use clap::Args;
use colored::Colorize;
use sea_orm::{ConnectOptions, Database};
use std::path::PathBuf;
use std::sync::Arc;
use strata_core::Settings;
use strata_migrations::{MigrationPlan, Migrator, RenameMap};
use tracing::{debug, info};

#[derive(Args)]
pub struct MigrateCommand {
    /// Manifest (YAML or JSON) describing the desired models
    #[arg(long)]
    pub manifest: PathBuf,

    /// Database connection URL
    #[arg(long, env = "STRATA_DATABASE_URL")]
    pub database_url: String,

    /// JSON rename map, overrides `migration.rename_map` from settings
    #[arg(long)]
    pub rename: Option<PathBuf>,

    /// Settings file
    #[arg(long, env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Only print the plan, do not apply it
    #[arg(long)]
    pub plan: bool,
}

impl MigrateCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let settings = Settings::load(self.config.as_deref())?;
        let manifest = strata_schema::load_file(&self.manifest)?;
        debug!(
            "Loaded manifest {} with {} models",
            self.manifest.display(),
            manifest.models().count()
        );

        let mut opt = ConnectOptions::new(self.database_url.clone());
        opt.max_connections(5).min_connections(1);
        let db = Database::connect(opt).await?;
        info!("Connected to database");

        let mut migrator = Migrator::postgres(Arc::new(db), settings.migration)?;
        if let Some(path) = &self.rename {
            migrator = migrator.with_renames(RenameMap::load(path)?);
        }

        let plan = migrator.plan(&manifest).await?;
        print_plan(&plan);
        if self.plan || plan.is_empty() {
            return Ok(());
        }

        migrator.apply(&plan).await?;
        println!("{}", "✓ Migration applied".bright_green().bold());
        Ok(())
    }
}

fn print_plan(plan: &MigrationPlan) {
    if plan.is_empty() {
        println!("{}", "Schema is up to date".bright_green());
        return;
    }
    for warning in &plan.warnings {
        println!("{} {}", "warning:".yellow().bold(), warning);
    }
    print!("{}", plan.to_sql());
}
