//! End-to-end scenarios for the Job Engine running against an
//! in-memory Control Store and a fake `SqlTransport`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use migration_core::{Column, ColumnType, Schema, Table};
use migration_db::{
    ControlStore, MigrationState, MigrationStatus, MigrationStore, TemplateStore, TenantMigrationStore, TenantStore,
};
use migration_engine::{EngineConfig, Error, JobEngine, RetryPolicy};
use migration_transport::SqlTransport;

struct FakeTransport {
    always_fails_for: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl FakeTransport {
    fn new() -> Self {
        Self {
            always_fails_for: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn fail_for(self: &Arc<Self>, tenant: &str) {
        self.always_fails_for.lock().unwrap().push(tenant.to_string());
    }
}

#[async_trait]
impl SqlTransport for FakeTransport {
    async fn execute_batch(&self, database_name: &str, _auth_token: &str, _stmts: &[String]) -> migration_transport::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fails_for.lock().unwrap().iter().any(|t| t == database_name) {
            return Err(migration_transport::TransportError::ServerError {
                status: 400,
                message: "simulated failure".to_string(),
            });
        }
        Ok(())
    }

    async fn query_count(&self, _db: &str, _token: &str, _sql: &str) -> migration_transport::Result<i64> {
        Ok(0)
    }
}

fn schema_with_column(name: &str) -> Schema {
    Schema::new().with_table(
        Table::new("users")
            .with_column(Column::new("id", ColumnType::Integer))
            .with_column(Column::new(name, ColumnType::Text))
            .with_pk(vec!["id".to_string()]),
    )
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        batch_size: 2,
        retry_policy: RetryPolicy { base_ms: 1, max_attempts: 2 },
        api_key: "test-key".to_string(),
    }
}

async fn wait_for_completion(store: &ControlStore, migration_id: i64) -> migration_db::MigrationRecord {
    for _ in 0..200 {
        let record = {
            let conn = store.connection().lock().unwrap();
            MigrationStore::new(&conn).get(migration_id).unwrap()
        };
        if record.status == MigrationStatus::Complete {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("migration {} never completed", migration_id);
}

#[tokio::test]
async fn job_with_no_lagging_tenants_completes_as_a_no_op() {
    let store = ControlStore::open_in_memory().unwrap();
    let template_id = {
        let conn = store.connection().lock().unwrap();
        let schema = schema_with_column("email");
        let id = TemplateStore::new(&conn).create("billing", &schema.serialize(), &schema.checksum()).unwrap();
        id
    };
    let migration_id = {
        let conn = store.connection().lock().unwrap();
        MigrationStore::new(&conn).create(template_id, 1, 2, &["ALTER TABLE [users] ADD COLUMN [email]".to_string()]).unwrap()
    };

    let transport = Arc::new(FakeTransport::new());
    let engine = JobEngine::new(store.clone(), transport, fast_config());
    engine.start_migration_job(migration_id).unwrap();

    let record = wait_for_completion(&store, migration_id).await;
    assert_eq!(record.state, Some(MigrationState::Success));
    assert_eq!(record.total_dbs, 0);
}

#[tokio::test]
async fn canary_failure_aborts_the_fleet_without_advancing_the_template() {
    let store = ControlStore::open_in_memory().unwrap();
    let template_id = {
        let conn = store.connection().lock().unwrap();
        let schema = schema_with_column("email");
        TemplateStore::new(&conn).create("billing", &schema.serialize(), &schema.checksum()).unwrap()
    };
    let migration_id = {
        let conn = store.connection().lock().unwrap();
        let tenants = TenantStore::new(&conn);
        tenants.create("alpha", template_id, 1).unwrap();
        tenants.create("beta", template_id, 1).unwrap();
        MigrationStore::new(&conn).create(template_id, 1, 2, &["ALTER TABLE [users] ADD COLUMN [email]".to_string()]).unwrap()
    };

    let transport = Arc::new(FakeTransport::new());
    transport.fail_for("alpha");
    let engine = JobEngine::new(store.clone(), transport, fast_config());
    engine.start_migration_job(migration_id).unwrap();

    let record = wait_for_completion(&store, migration_id).await;
    assert_eq!(record.state, Some(MigrationState::Failed));
    assert_eq!(record.completed_dbs, 0);
    assert_eq!(record.failed_dbs, 1);

    let conn = store.connection().lock().unwrap();
    let template = TemplateStore::new(&conn).get_by_id(template_id).unwrap();
    assert_eq!(template.current_version, 1);
}

#[tokio::test]
async fn one_failing_tenant_among_several_yields_a_partial_success() {
    let store = ControlStore::open_in_memory().unwrap();
    let template_id = {
        let conn = store.connection().lock().unwrap();
        let schema = schema_with_column("email");
        TemplateStore::new(&conn).create("billing", &schema.serialize(), &schema.checksum()).unwrap()
    };
    let migration_id = {
        let conn = store.connection().lock().unwrap();
        let tenants = TenantStore::new(&conn);
        tenants.create("alpha", template_id, 1).unwrap();
        tenants.create("beta", template_id, 1).unwrap();
        tenants.create("gamma", template_id, 1).unwrap();
        MigrationStore::new(&conn).create(template_id, 1, 2, &["ALTER TABLE [users] ADD COLUMN [email]".to_string()]).unwrap()
    };

    let transport = Arc::new(FakeTransport::new());
    transport.fail_for("gamma");
    let engine = JobEngine::new(store.clone(), transport, fast_config());
    engine.start_migration_job(migration_id).unwrap();

    let record = wait_for_completion(&store, migration_id).await;
    assert_eq!(record.state, Some(MigrationState::Partial));
    assert_eq!(record.completed_dbs, 2);
    assert_eq!(record.failed_dbs, 1);

    let conn = store.connection().lock().unwrap();
    let template = TemplateStore::new(&conn).get_by_id(template_id).unwrap();
    assert_eq!(template.current_version, 2);
}

#[tokio::test]
async fn retrying_a_failed_migration_picks_up_the_previously_failed_tenant() {
    let store = ControlStore::open_in_memory().unwrap();
    let template_id = {
        let conn = store.connection().lock().unwrap();
        let schema = schema_with_column("email");
        TemplateStore::new(&conn).create("billing", &schema.serialize(), &schema.checksum()).unwrap()
    };
    let migration_id = {
        let conn = store.connection().lock().unwrap();
        TenantStore::new(&conn).create("alpha", template_id, 1).unwrap();
        MigrationStore::new(&conn).create(template_id, 1, 2, &["ALTER TABLE [users] ADD COLUMN [email]".to_string()]).unwrap()
    };

    let transport = Arc::new(FakeTransport::new());
    transport.fail_for("alpha");
    let engine = JobEngine::new(store.clone(), transport.clone(), fast_config());
    engine.start_migration_job(migration_id).unwrap();
    let record = wait_for_completion(&store, migration_id).await;
    assert_eq!(record.state, Some(MigrationState::Failed));

    {
        let conn = store.connection().lock().unwrap();
        let failed = TenantMigrationStore::new(&conn).failed_tenant_ids(migration_id).unwrap();
        assert_eq!(failed.len(), 1);
    }

    transport.always_fails_for.lock().unwrap().clear();
    let retried = engine.retry_failed_databases(migration_id).unwrap();
    assert_eq!(retried, 1);

    // Poll until the job transitions back to complete after the retry.
    for _ in 0..200 {
        let record = {
            let conn = store.connection().lock().unwrap();
            MigrationStore::new(&conn).get(migration_id).unwrap()
        };
        if record.status == MigrationStatus::Complete && record.state == Some(MigrationState::Success) {
            let conn = store.connection().lock().unwrap();
            let template = TemplateStore::new(&conn).get_by_id(template_id).unwrap();
            assert_eq!(template.current_version, 2);
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("retried migration never reached success");
}

#[tokio::test]
async fn startup_resume_relaunches_jobs_left_running() {
    let store = ControlStore::open_in_memory().unwrap();
    let template_id = {
        let conn = store.connection().lock().unwrap();
        let schema = schema_with_column("email");
        TemplateStore::new(&conn).create("billing", &schema.serialize(), &schema.checksum()).unwrap()
    };
    let migration_id = {
        let conn = store.connection().lock().unwrap();
        TenantStore::new(&conn).create("alpha", template_id, 1).unwrap();
        let migrations = MigrationStore::new(&conn);
        let id = migrations.create(template_id, 1, 2, &["ALTER TABLE [users] ADD COLUMN [email]".to_string()]).unwrap();
        // Simulate a process restart mid-job: status is 'running' with
        // no terminal state yet recorded.
        migrations.start(id, 1).unwrap();
        id
    };

    let transport = Arc::new(FakeTransport::new());
    let engine = JobEngine::new(store.clone(), transport, fast_config());
    engine.resume_running_migrations().await;

    let record = wait_for_completion(&store, migration_id).await;
    assert_eq!(record.state, Some(MigrationState::Success));
}

#[tokio::test]
async fn migrate_diffs_plans_persists_and_launches_a_job() {
    let store = ControlStore::open_in_memory().unwrap();
    let template_id = {
        let conn = store.connection().lock().unwrap();
        let schema = schema_with_column("email");
        TemplateStore::new(&conn).create("billing", &schema.serialize(), &schema.checksum()).unwrap()
    };

    let transport = Arc::new(FakeTransport::new());
    let engine = JobEngine::new(store.clone(), transport, fast_config());

    let target = Schema::new().with_table(
        Table::new("users")
            .with_column(Column::new("id", ColumnType::Integer))
            .with_column(Column::new("email", ColumnType::Text))
            .with_column(Column::new("phone", ColumnType::Text))
            .with_pk(vec!["id".to_string()]),
    );
    let migration_id = engine.migrate("billing", &target, &[], None).await.unwrap();

    let conn = store.connection().lock().unwrap();
    let migration = MigrationStore::new(&conn).get(migration_id).unwrap();
    assert_eq!(migration.from_version, 1);
    assert_eq!(migration.to_version, 2);
    assert!(migration.stmts.iter().any(|s| s.contains("[phone]")));

    let version = TemplateStore::new(&conn).get_version(template_id, 2).unwrap();
    assert_eq!(Schema::deserialize(&version.schema_bytes).unwrap().table("users").unwrap().columns.len(), 3);
}

#[tokio::test]
async fn migrate_with_an_identical_target_schema_returns_no_changes() {
    let store = ControlStore::open_in_memory().unwrap();
    {
        let conn = store.connection().lock().unwrap();
        let schema = schema_with_column("email");
        TemplateStore::new(&conn).create("billing", &schema.serialize(), &schema.checksum()).unwrap();
    };

    let transport = Arc::new(FakeTransport::new());
    let engine = JobEngine::new(store.clone(), transport, fast_config());

    let target = schema_with_column("email");
    let err = engine.migrate("billing", &target, &[], None).await.unwrap_err();
    assert!(matches!(err, Error::NoChanges));
}

#[tokio::test]
async fn migrate_against_an_unknown_template_returns_template_not_found() {
    let store = ControlStore::open_in_memory().unwrap();
    let transport = Arc::new(FakeTransport::new());
    let engine = JobEngine::new(store.clone(), transport, fast_config());

    let target = schema_with_column("email");
    let err = engine.migrate("nonexistent", &target, &[], None).await.unwrap_err();
    assert!(matches!(err, Error::TemplateNotFound(_)));
}
