use async_trait::async_trait;
use sea_orm::{DatabaseBackend, DbErr, MockDatabase, MockExecResult};
use std::io::Write;
use std::sync::{Arc, Mutex};
use strata_core::{MigrationSettings, Namer};
use strata_migrations::{
    desired_schema, Action, MigrationPlan, Migrator, PlanExecutor, PostgresExecutor, Result, SchemaInspector,
    Snapshot,
};
use strata_schema::{load_yaml, Manifest};

struct FixedInspector {
    snapshot: Snapshot,
    langs: Vec<String>,
}

#[async_trait]
impl SchemaInspector for FixedInspector {
    async fn inspect(&self, _schema: &str) -> Result<Snapshot> {
        Ok(self.snapshot.clone())
    }

    async fn text_langs(&self, _schema: &str, _table: &str, _column: &str) -> Result<Vec<String>> {
        Ok(self.langs.clone())
    }
}

#[derive(Default)]
struct RecordingExecutor {
    applied: Mutex<Vec<MigrationPlan>>,
}

#[async_trait]
impl PlanExecutor for RecordingExecutor {
    async fn apply(&self, plan: &MigrationPlan) -> Result<()> {
        self.applied.lock().unwrap().push(plan.clone());
        Ok(())
    }
}

fn manifest(yaml: &str) -> Manifest {
    load_yaml(yaml).unwrap()
}

fn migrator(current: &Manifest, langs: &[&str], settings: MigrationSettings) -> (Migrator, Arc<RecordingExecutor>) {
    let inspector = FixedInspector {
        snapshot: desired_schema(current, &Namer::default()),
        langs: langs.iter().map(|l| l.to_string()).collect(),
    };
    let executor = Arc::new(RecordingExecutor::default());
    let migrator = Migrator::new(Arc::new(inspector), executor.clone(), settings).unwrap();
    (migrator, executor)
}

const TEXT_NAME: &str = "models:\n  example/City:\n    properties:\n      name@lt: string\n      name@en: string\n";

#[tokio::test]
async fn test_migrate_applies_plan() {
    let unique = manifest("models:\n  example/Test:\n    properties:\n      someInteger: integer unique\n");
    let plain = manifest("models:\n  example/Test:\n    properties:\n      someInteger: integer\n");

    let (migrator, executor) = migrator(&unique, &[], MigrationSettings::default());
    let plan = migrator.migrate(&plain).await.unwrap();
    assert_eq!(plan.actions.len(), 1);

    let applied = executor.applied.lock().unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0], plan);
}

#[tokio::test]
async fn test_plan_reads_stored_languages() {
    let only_lt = manifest("models:\n  example/City:\n    properties:\n      name@lt: string\n");
    let (migrator, executor) = migrator(&manifest(TEXT_NAME), &["en", "lt"], MigrationSettings::default());

    let plan = migrator.plan(&only_lt).await.unwrap();
    assert_eq!(plan.actions.len(), 1);
    let Action::TransferData { sql } = &plan.actions[0] else {
        panic!("expected TransferData, got {}", plan.actions[0]);
    };
    assert!(sql.contains("jsonb_build_object('__en'"));
    assert!(executor.applied.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rename_map_from_settings() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"example/Old": {{"": "example/New"}}}}"#).unwrap();
    let settings = MigrationSettings {
        rename_map: Some(file.path().to_path_buf()),
        ..MigrationSettings::default()
    };

    let old = manifest("models:\n  example/Old:\n    properties:\n      title: string\n");
    let new = manifest("models:\n  example/New:\n    properties:\n      title: string\n");
    let (migrator, _) = migrator(&old, &[], settings);
    let plan = migrator.plan(&new).await.unwrap();
    assert!(plan
        .actions
        .iter()
        .all(|action| !matches!(action, Action::CreateTable(_) | Action::DropTable { .. })));
    assert_eq!(plan.actions[0].name(), "RenameTable");
}

#[tokio::test]
async fn test_invalid_rename_map() {
    let settings = MigrationSettings {
        rename_map: Some("/nonexistent/rename.json".into()),
        ..MigrationSettings::default()
    };
    let executor = Arc::new(RecordingExecutor::default());
    let inspector = Arc::new(FixedInspector {
        snapshot: Snapshot::default(),
        langs: Vec::new(),
    });
    let err = Migrator::new(inspector, executor, settings).err().unwrap();
    assert_eq!(err.kind(), "InvalidRenameMap");
}

fn drop_unique_plan() -> MigrationPlan {
    MigrationPlan {
        schema: "public".into(),
        actions: vec![Action::DropConstraint {
            table: "example/Test".into(),
            name: "uq_example/Test_someInteger".into(),
        }],
        warnings: Vec::new(),
    }
}

#[tokio::test]
async fn test_executor_runs_plan_in_transaction() {
    let db = Arc::new(
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection(),
    );
    PostgresExecutor::new(Arc::clone(&db))
        .apply(&drop_unique_plan())
        .await
        .unwrap();

    let db = Arc::try_unwrap(db).ok().unwrap();
    let log = db.into_transaction_log();
    assert_eq!(log.len(), 1);
    let sql: Vec<&str> = log[0].statements().iter().map(|s| s.sql.as_str()).collect();
    assert!(sql.contains(&r#"ALTER TABLE "public"."example/Test" DROP CONSTRAINT "uq_example/Test_someInteger""#));
}

#[tokio::test]
async fn test_executor_rolls_back_on_error() {
    let db = Arc::new(
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_errors([DbErr::Custom("constraint does not exist".into())])
            .into_connection(),
    );
    let err = PostgresExecutor::new(db)
        .apply(&drop_unique_plan())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "DatabaseError");
}

#[tokio::test]
async fn test_executor_skips_empty_plan() {
    let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
    PostgresExecutor::new(Arc::clone(&db))
        .apply(&MigrationPlan::default())
        .await
        .unwrap();
    let db = Arc::try_unwrap(db).ok().unwrap();
    assert!(db.into_transaction_log().is_empty());
}
