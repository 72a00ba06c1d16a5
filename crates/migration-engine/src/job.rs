//! The Job Engine (C7): lock-guarded, canary-then-batched-fan-out
//! execution of one migration job against the tenant fleet, plus the
//! retry-failed-databases and startup-resume operations (spec §4.7).

use std::collections::BTreeMap;
use std::sync::Arc;

use migration_core::{build_probe_queries, diff, plan, probe_violation, static_validate_fk, RenameMerge, Schema};
use migration_db::{
    ControlStore, MigrationRecord, MigrationState, MigrationStatus, MigrationStore, TenantMigrationStatus,
    TenantMigrationStore, TenantRecord, TenantStore, TemplateStore,
};
use migration_transport::SqlTransport;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::lock::{LockGuard, LockManager};

/// Orchestrates migration jobs against the tenant fleet. Cheap to
/// clone: the Control Store and transport are themselves `Arc`-backed.
#[derive(Clone)]
pub struct JobEngine {
    store: ControlStore,
    transport: Arc<dyn SqlTransport>,
    lock_manager: Arc<LockManager>,
    config: EngineConfig,
}

struct TenantOutcome {
    tenant: TenantRecord,
    success: bool,
    error: Option<String>,
}

impl JobEngine {
    pub fn new(store: ControlStore, transport: Arc<dyn SqlTransport>, config: EngineConfig) -> Self {
        Self {
            store,
            transport,
            lock_manager: Arc::new(LockManager::new()),
            config,
        }
    }

    fn migration(&self, migration_id: i64) -> Result<MigrationRecord> {
        let conn = self.store.connection().lock().expect("control store mutex poisoned");
        MigrationStore::new(&conn).get(migration_id).map_err(Error::from)
    }

    /// `POST /templates/{name}/migrate` (spec §2, §6): diff the stored
    /// current version against `target`, validate (static FK plus an
    /// optional probe against one live tenant), persist the new version
    /// and migration row in one transaction, and launch the job. A
    /// rollback is just this same pipeline with a prior version's schema
    /// as `target` (spec §6's `/rollback` row).
    pub async fn migrate(
        &self,
        template_name: &str,
        target: &Schema,
        merges: &[RenameMerge],
        probe_tenant: Option<&str>,
    ) -> Result<i64> {
        let (template_id, from_version, old_schema) = {
            let conn = self.store.connection().lock().expect("control store mutex poisoned");
            let templates = TemplateStore::new(&conn);
            let template = templates
                .get_by_name(template_name)?
                .ok_or_else(|| Error::TemplateNotFound(template_name.to_string()))?;
            let version = templates.get_version(template.id, template.current_version)?;
            let old_schema = Schema::deserialize(&version.schema_bytes)
                .map_err(|e| Error::SchemaCorrupt(template_name.to_string(), e.to_string()))?;
            (template.id, template.current_version, old_schema)
        };

        let diffs = diff(&old_schema, target);
        if diffs.is_empty() {
            return Err(Error::NoChanges);
        }

        let mut errors = static_validate_fk(target);

        if let Some(tenant) = probe_tenant {
            for probe in build_probe_queries(&old_schema, target, &diffs) {
                match self.transport.query_count(tenant, &self.config.api_key, &probe.sql).await {
                    Ok(count) if count > 0 => errors.push(probe_violation(&probe, count)),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(template = template_name, sql = %probe.sql, error = %e, "probe query failed, skipping");
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(Error::ValidationFailed(errors));
        }

        let stmts = plan(&old_schema, target, &diffs, merges);
        let to_version = from_version + 1;
        let schema_bytes = target.serialize();
        let checksum = target.checksum();

        let migration_id = self.store.transaction(|tx| {
            TemplateStore::new(tx).append_version(template_id, to_version, &schema_bytes, &checksum)?;
            MigrationStore::new(tx).create(template_id, from_version, to_version, &stmts)
        })?;

        info!(migration_id, template_id, from_version, to_version, "migration planned and persisted");
        self.start_migration_job(migration_id)?;
        Ok(migration_id)
    }

    /// Setup + detach (spec §4.7.2 steps 1-2): acquire the template
    /// lock synchronously, then run the rest of the job in a detached
    /// `tokio::spawn` task rooted in no request-scoped context, so
    /// cancelling the caller's request can never cancel the job.
    pub fn start_migration_job(&self, migration_id: i64) -> Result<()> {
        let migration = self.migration(migration_id)?;
        let guard = LockGuard::acquire(Arc::clone(&self.lock_manager), migration.template_id)
            .ok_or(Error::AtomicbaseBusy)?;
        info!(migration_id, template_id = migration.template_id, "migration job lock acquired");

        let engine = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            engine.run_job_body(migration).await;
        });
        Ok(())
    }

    async fn run_job_body(&self, migration: MigrationRecord) {
        let migration_id = migration.id;
        let template_id = migration.template_id;

        let pending = match self.pending_tenants(migration_id, template_id, migration.to_version) {
            Ok(p) => p,
            Err(e) => {
                error!(migration_id, error = %e, "failed to enumerate pending tenants");
                let _ = self.finish(migration_id, MigrationState::Failed, 0, 0);
                return;
            }
        };

        if let Err(e) = self.start(migration_id, pending.len() as i64) {
            error!(migration_id, error = %e, "failed to mark migration running");
            return;
        }

        if pending.is_empty() {
            info!(migration_id, "no tenants behind target version, job is a no-op");
            let _ = self.finish(migration_id, MigrationState::Success, 0, 0);
            let _ = self.advance_template(template_id, migration.to_version);
            return;
        }

        let min_version = pending.iter().map(|t| t.template_version).min().unwrap();
        let cache = match self.statement_cache(&migration, min_version) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                error!(migration_id, error = %e, "statement cache incomplete, aborting job");
                let _ = self.finish(migration_id, MigrationState::Failed, 0, 0);
                return;
            }
        };

        let executor = Executor::new(self.transport.as_ref(), self.config.retry_policy);

        info!(migration_id, tenant = %pending[0].name, "starting canary");
        let canary = &pending[0];
        let outcome = executor
            .apply(&canary.name, &self.config.api_key, canary.template_version, migration.to_version, &cache)
            .await;

        if !outcome.success {
            warn!(migration_id, tenant = %canary.name, error = ?outcome.error_message, "canary failed, aborting job");
            self.record_outcome(migration_id, canary, false, outcome.error_message.as_deref());
            let _ = self.finish(migration_id, MigrationState::Failed, 0, 1);
            return;
        }
        self.record_outcome(migration_id, canary, true, None);
        let _ = self.batch_advance(&[canary.id], migration.to_version);

        let mut completed: i64 = 1;
        let mut failed: i64 = 0;

        for slice in pending[1..].chunks(self.config.batch_size) {
            let mut handles = Vec::with_capacity(slice.len());
            for tenant in slice {
                let tenant = tenant.clone();
                let transport = Arc::clone(&self.transport);
                let policy = self.config.retry_policy;
                let token = self.config.api_key.clone();
                let target = migration.to_version;
                let cache = Arc::clone(&cache);
                handles.push(tokio::spawn(async move {
                    let executor = Executor::new(transport.as_ref(), policy);
                    let outcome = executor.apply(&tenant.name, &token, tenant.template_version, target, &cache).await;
                    TenantOutcome {
                        tenant,
                        success: outcome.success,
                        error: outcome.error_message,
                    }
                }));
            }

            let mut succeeded_ids = Vec::new();
            for handle in handles {
                match handle.await {
                    Ok(outcome) => {
                        self.record_outcome(migration_id, &outcome.tenant, outcome.success, outcome.error.as_deref());
                        if outcome.success {
                            completed += 1;
                            succeeded_ids.push(outcome.tenant.id);
                        } else {
                            failed += 1;
                        }
                    }
                    Err(e) => {
                        error!(migration_id, error = %e, "tenant migration task panicked");
                        failed += 1;
                    }
                }
            }
            let _ = self.batch_advance(&succeeded_ids, migration.to_version);
        }

        let state = if failed == 0 { MigrationState::Success } else { MigrationState::Partial };
        info!(migration_id, completed, failed, ?state, "migration job finished");
        let _ = self.finish(migration_id, state, completed, failed);
        // Both success and partial advance the template: at least one
        // tenant is now current, so the template's published current
        // version has genuinely moved (spec §4.7.2 step 8).
        let _ = self.advance_template(template_id, migration.to_version);
    }

    fn pending_tenants(&self, migration_id: i64, template_id: i64, target_version: i64) -> Result<Vec<TenantRecord>> {
        let conn = self.store.connection().lock().expect("control store mutex poisoned");
        TenantStore::new(&conn)
            .get_pending_tenants(migration_id, template_id, target_version)
            .map_err(Error::from)
    }

    fn start(&self, migration_id: i64, total_dbs: i64) -> Result<()> {
        let conn = self.store.connection().lock().expect("control store mutex poisoned");
        MigrationStore::new(&conn).start(migration_id, total_dbs).map_err(Error::from)
    }

    fn finish(&self, migration_id: i64, state: MigrationState, completed: i64, failed: i64) -> Result<()> {
        let conn = self.store.connection().lock().expect("control store mutex poisoned");
        MigrationStore::new(&conn)
            .update_status(migration_id, MigrationStatus::Complete, Some(state), completed, failed)
            .map_err(Error::from)
    }

    fn advance_template(&self, template_id: i64, version: i64) -> Result<()> {
        let conn = self.store.connection().lock().expect("control store mutex poisoned");
        TemplateStore::new(&conn).advance_current_version(template_id, version).map_err(Error::from)
    }

    fn batch_advance(&self, ids: &[i64], version: i64) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.store.connection().lock().expect("control store mutex poisoned");
        TenantStore::new(&conn).batch_update_versions(ids, version).map_err(Error::from)
    }

    fn record_outcome(&self, migration_id: i64, tenant: &TenantRecord, success: bool, error: Option<&str>) {
        let conn = self.store.connection().lock().expect("control store mutex poisoned");
        let status = if success { TenantMigrationStatus::Success } else { TenantMigrationStatus::Failed };
        if let Err(e) = TenantMigrationStore::new(&conn).record(migration_id, tenant.id, status, error) {
            warn!(migration_id, tenant_id = tenant.id, error = %e, "failed to write tenant migration outcome");
        }
    }

    /// Build the per-version statement map for `[min_version,
    /// migration.to_version)`. `migration.from_version` is covered by
    /// the migration's own `stmts`; any earlier step must be found
    /// among previously created migrations for the same template — a
    /// gap means the ledger cannot reconstruct the tenant's upgrade
    /// path, which is fatal (spec §4.7.2 step 4).
    fn statement_cache(&self, migration: &MigrationRecord, min_version: i64) -> Result<BTreeMap<i64, Vec<String>>> {
        let mut cache = BTreeMap::new();
        cache.insert(migration.from_version, migration.stmts.clone());
        if min_version < migration.from_version {
            let conn = self.store.connection().lock().expect("control store mutex poisoned");
            let store = MigrationStore::new(&conn);
            let mut version = migration.from_version - 1;
            while version >= min_version {
                let step = store
                    .get_by_from_version(migration.template_id, version)?
                    .ok_or(Error::MigrationNotFound(version))?;
                cache.insert(step.from_version, step.stmts);
                if version == 0 {
                    break;
                }
                version -= 1;
            }
        }
        Ok(cache)
    }

    /// `RetryFailedDatabases` (spec §4.7.3): clear the failed outcomes
    /// for one migration and restart the job so those tenants (and any
    /// still-untouched ones) are picked up again.
    pub fn retry_failed_databases(&self, migration_id: i64) -> Result<usize> {
        let migration = self.migration(migration_id)?;
        if self.lock_manager.is_running(migration.template_id) {
            return Err(Error::AtomicbaseBusy);
        }
        let retried = {
            let conn = self.store.connection().lock().expect("control store mutex poisoned");
            TenantMigrationStore::new(&conn).delete_failed(migration_id)?
        };
        self.start_migration_job(migration_id)?;
        Ok(retried)
    }

    /// Startup resume (spec §4.7.4): re-launch every migration the
    /// ledger still shows as `running`, e.g. after a process restart
    /// mid-job. Re-validation against the live tenant set is not
    /// repeated here; see the design notes on this limitation.
    pub async fn resume_running_migrations(&self) {
        let running = {
            let conn = self.store.connection().lock().expect("control store mutex poisoned");
            match MigrationStore::new(&conn).list_running() {
                Ok(rows) => rows,
                Err(e) => {
                    error!(error = %e, "failed to list running migrations at startup");
                    return;
                }
            }
        };
        for migration in running {
            info!(migration_id = migration.id, "resuming migration job left running at startup");
            if let Err(e) = self.start_migration_job(migration.id) {
                warn!(migration_id = migration.id, error = %e, "failed to resume migration job");
            }
        }
    }
}
