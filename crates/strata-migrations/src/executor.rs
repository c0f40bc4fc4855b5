use crate::action::MigrationPlan;
use crate::error::Result;
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, Statement, TransactionTrait};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Applies a plan as one unit: either every statement runs or none does
#[async_trait]
pub trait PlanExecutor: Send + Sync {
    async fn apply(&self, plan: &MigrationPlan) -> Result<()>;
}

pub struct PostgresExecutor {
    db: Arc<DatabaseConnection>,
}

impl PostgresExecutor {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PlanExecutor for PostgresExecutor {
    async fn apply(&self, plan: &MigrationPlan) -> Result<()> {
        if plan.is_empty() {
            info!("Schema {} is up to date", plan.schema);
            return Ok(());
        }

        let statements = plan.statements();
        info!(
            "Applying {} actions ({} statements) to schema {}",
            plan.actions.len(),
            statements.len(),
            plan.schema
        );

        let txn = self.db.begin().await?;
        for statement in statements {
            debug!("{}", statement);
            let stmt = Statement::from_string(DatabaseBackend::Postgres, statement);
            if let Err(e) = txn.execute(stmt).await {
                error!("Migration failed, rolling back: {}", e);
                txn.rollback().await?;
                return Err(e.into());
            }
        }
        txn.commit().await?;

        info!("Migration of schema {} committed", plan.schema);
        Ok(())
    }
}
