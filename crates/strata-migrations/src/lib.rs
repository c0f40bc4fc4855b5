//! # strata-migrations
//!
//! Keeps a PostgreSQL schema in line with a manifest. The database side is
//! read into a [`Snapshot`] by a [`SchemaInspector`], the manifest side is
//! built by [`desired_schema`], and the [`Differ`] turns the difference into
//! a [`MigrationPlan`] that a [`PlanExecutor`] applies in one transaction.
//!
//! Nothing is ever deleted: removed tables and columns are renamed with a
//! `__` prefix and keep their data.

mod action;
mod cast;
mod desired;
mod differ;
mod error;
mod executor;
mod inspect;
mod rename;
mod snapshot;

pub use action::{Action, ColumnChange, MigrationPlan};
pub use cast::{cast_safety, CastSafety};
pub use desired::{desired_schema, sql_type};
pub use differ::Differ;
pub use error::{MigrationError, Result};
pub use executor::{PlanExecutor, PostgresExecutor};
pub use inspect::{PostgresInspector, SchemaInspector};
pub use rename::RenameMap;
pub use snapshot::{Column, Constraint, ConstraintKind, Index, Role, Snapshot, SqlType, Table};

use sea_orm::DatabaseConnection;
use std::sync::Arc;
use strata_core::{MigrationSettings, Namer};
use strata_schema::Manifest;
use tracing::{debug, info};

/// Plans and applies migrations for one database
pub struct Migrator {
    inspector: Arc<dyn SchemaInspector>,
    executor: Arc<dyn PlanExecutor>,
    settings: MigrationSettings,
    renames: RenameMap,
}

impl Migrator {
    pub fn new(
        inspector: Arc<dyn SchemaInspector>,
        executor: Arc<dyn PlanExecutor>,
        settings: MigrationSettings,
    ) -> Result<Self> {
        let renames = match &settings.rename_map {
            Some(path) => RenameMap::load(path)?,
            None => RenameMap::default(),
        };
        Ok(Self {
            inspector,
            executor,
            settings,
            renames,
        })
    }

    /// Migrator reading and writing through one PostgreSQL connection
    pub fn postgres(db: Arc<DatabaseConnection>, settings: MigrationSettings) -> Result<Self> {
        Self::new(
            Arc::new(PostgresInspector::new(Arc::clone(&db))),
            Arc::new(PostgresExecutor::new(db)),
            settings,
        )
    }

    pub fn with_renames(mut self, renames: RenameMap) -> Self {
        self.renames = renames;
        self
    }

    /// Compute the actions the manifest needs without touching the database
    pub async fn plan(&self, manifest: &Manifest) -> Result<MigrationPlan> {
        let schema = self.settings.schema.as_str();
        let namer = Namer::new(self.settings.max_identifier_length);

        let mut current = self.inspector.inspect(schema).await?;
        let desired = desired_schema(manifest, &namer);
        self.load_text_langs(&mut current, &desired).await?;

        Differ::new(&namer, schema)
            .with_renames(&self.renames)
            .with_default_lang(self.settings.default_lang.as_deref())
            .diff(&current, &desired)
    }

    /// Plan and apply; returns the applied plan
    pub async fn migrate(&self, manifest: &Manifest) -> Result<MigrationPlan> {
        let plan = self.plan(manifest).await?;
        self.apply(&plan).await?;
        Ok(plan)
    }

    /// Apply a previously computed plan
    pub async fn apply(&self, plan: &MigrationPlan) -> Result<()> {
        info!("Migration plan has {} actions", plan.actions.len());
        self.executor.apply(plan).await
    }

    /// Languages stored in existing text columns, so removed ones can be
    /// moved aside
    async fn load_text_langs(&self, current: &mut Snapshot, desired: &Snapshot) -> Result<()> {
        for table in &desired.tables {
            let Some(existing) = current.tables.iter_mut().find(|t| t.logical() == table.logical()) else {
                continue;
            };
            for column in &table.columns {
                if !matches!(column.role, Role::Text { .. }) {
                    continue;
                }
                let Some(stored) = existing
                    .columns
                    .iter_mut()
                    .find(|c| c.logical() == column.logical() && c.sql_type == SqlType::Jsonb)
                else {
                    continue;
                };
                let langs = self
                    .inspector
                    .text_langs(&self.settings.schema, &existing.name, &stored.name)
                    .await?;
                debug!("{}.{} stores languages {:?}", table.logical(), column.logical(), langs);
                stored.role = Role::Text { langs };
            }
        }
        Ok(())
    }
}
