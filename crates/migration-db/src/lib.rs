//! The Control Store (C1): durable SQLite-backed ledger of templates,
//! versions, migrations, and per-tenant outcomes. All timestamps are
//! UTC ISO-8601 strings; foreign keys are enforced (spec §4.1).

pub mod connection;
pub mod error;
pub mod migrations;
pub mod models;

pub use connection::ControlStore;
pub use error::{Error, Result};
pub use models::{
    MigrationRecord, MigrationState, MigrationStatus, MigrationStore, TemplateRecord,
    TemplateStore, TemplateVersionRecord, TenantMigrationRecord, TenantMigrationStatus,
    TenantMigrationStore, TenantRecord, TenantStore,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_bytes() -> (Vec<u8>, String) {
        let schema = migration_core::Schema::new().with_table(
            migration_core::Table::new("users")
                .with_column(migration_core::Column::new("id", migration_core::ColumnType::Integer))
                .with_pk(vec!["id".to_string()]),
        );
        (schema.serialize(), schema.checksum())
    }

    #[test]
    fn create_template_persists_initial_version() {
        let store = ControlStore::open_in_memory().unwrap();
        let conn = store.connection().lock().unwrap();
        let templates = TemplateStore::new(&conn);
        let (bytes, checksum) = schema_bytes();
        let id = templates.create("billing", &bytes, &checksum).unwrap();

        let record = templates.get_by_name("billing").unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.current_version, 1);

        let version = templates.get_version(id, 1).unwrap();
        assert_eq!(version.checksum, checksum);
    }

    #[test]
    fn creating_duplicate_template_name_fails() {
        let store = ControlStore::open_in_memory().unwrap();
        let conn = store.connection().lock().unwrap();
        let templates = TemplateStore::new(&conn);
        let (bytes, checksum) = schema_bytes();
        templates.create("billing", &bytes, &checksum).unwrap();
        let err = templates.create("billing", &bytes, &checksum).unwrap_err();
        assert!(matches!(err, Error::TemplateExists(_)));
    }

    #[test]
    fn get_pending_tenants_excludes_already_recorded_and_up_to_date() {
        let store = ControlStore::open_in_memory().unwrap();
        let conn = store.connection().lock().unwrap();
        let (bytes, checksum) = schema_bytes();
        let templates = TemplateStore::new(&conn);
        let template_id = templates.create("billing", &bytes, &checksum).unwrap();

        let tenants = TenantStore::new(&conn);
        let t1 = tenants.create("alpha", template_id, 1).unwrap();
        let t2 = tenants.create("beta", template_id, 1).unwrap();
        let _t3_up_to_date = tenants.create("gamma", template_id, 2).unwrap();

        let migrations = MigrationStore::new(&conn);
        let mig_id = migrations
            .create(template_id, 1, 2, &["ALTER TABLE [users] ADD COLUMN [email]".to_string()])
            .unwrap();

        let tenant_migrations = TenantMigrationStore::new(&conn);
        tenant_migrations
            .record(mig_id, t1, TenantMigrationStatus::Success, None)
            .unwrap();

        let pending = tenants.get_pending_tenants(mig_id, template_id, 2).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, t2);
    }

    #[test]
    fn record_tenant_migration_upserts_and_increments_attempts() {
        let store = ControlStore::open_in_memory().unwrap();
        let conn = store.connection().lock().unwrap();
        let (bytes, checksum) = schema_bytes();
        let templates = TemplateStore::new(&conn);
        let template_id = templates.create("billing", &bytes, &checksum).unwrap();
        let tenants = TenantStore::new(&conn);
        let tenant_id = tenants.create("alpha", template_id, 1).unwrap();
        let migrations = MigrationStore::new(&conn);
        let mig_id = migrations.create(template_id, 1, 2, &[]).unwrap();

        let store = TenantMigrationStore::new(&conn);
        store
            .record(mig_id, tenant_id, TenantMigrationStatus::Failed, Some("boom"))
            .unwrap();
        store
            .record(mig_id, tenant_id, TenantMigrationStatus::Success, None)
            .unwrap();

        let failed = store.failed_tenant_ids(mig_id).unwrap();
        assert!(failed.is_empty());
    }

    #[test]
    fn open_on_disk_path_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.db");
        {
            let store = ControlStore::open(&path).unwrap();
            let conn = store.connection().lock().unwrap();
            let (bytes, checksum) = schema_bytes();
            TemplateStore::new(&conn).create("billing", &bytes, &checksum).unwrap();
        }
        let store = ControlStore::open(&path).unwrap();
        let conn = store.connection().lock().unwrap();
        assert!(TemplateStore::new(&conn).get_by_name("billing").unwrap().is_some());
    }

    #[test]
    fn get_by_from_version_finds_the_step_that_advances_past_it() {
        let store = ControlStore::open_in_memory().unwrap();
        let conn = store.connection().lock().unwrap();
        let (bytes, checksum) = schema_bytes();
        let templates = TemplateStore::new(&conn);
        let template_id = templates.create("billing", &bytes, &checksum).unwrap();
        let migrations = MigrationStore::new(&conn);
        migrations.create(template_id, 1, 2, &["ALTER TABLE [users] ADD COLUMN [a]".to_string()]).unwrap();
        migrations.create(template_id, 2, 3, &["ALTER TABLE [users] ADD COLUMN [b]".to_string()]).unwrap();

        let step = migrations.get_by_from_version(template_id, 2).unwrap().unwrap();
        assert_eq!(step.to_version, 3);
        assert!(migrations.get_by_from_version(template_id, 99).unwrap().is_none());
    }

    #[test]
    fn batch_update_tenant_versions_is_a_no_op_for_empty_input() {
        let store = ControlStore::open_in_memory().unwrap();
        let conn = store.connection().lock().unwrap();
        let tenants = TenantStore::new(&conn);
        tenants.batch_update_versions(&[], 5).unwrap();
    }

    #[test]
    fn migration_update_status_stamps_completed_at_only_on_complete() {
        let store = ControlStore::open_in_memory().unwrap();
        let conn = store.connection().lock().unwrap();
        let (bytes, checksum) = schema_bytes();
        let templates = TemplateStore::new(&conn);
        let template_id = templates.create("billing", &bytes, &checksum).unwrap();
        let migrations = MigrationStore::new(&conn);
        let mig_id = migrations.create(template_id, 1, 2, &[]).unwrap();
        migrations.start(mig_id, 3).unwrap();
        migrations
            .update_status(mig_id, MigrationStatus::Running, None, 1, 0)
            .unwrap();
        let record = migrations.get(mig_id).unwrap();
        assert!(record.completed_at.is_none());

        migrations
            .update_status(mig_id, MigrationStatus::Complete, Some(MigrationState::Success), 3, 0)
            .unwrap();
        let record = migrations.get(mig_id).unwrap();
        assert!(record.completed_at.is_some());
        assert_eq!(record.state, Some(MigrationState::Success));
    }
}
