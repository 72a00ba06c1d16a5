//! The Sync Path (C8): a synchronous, single-tenant catch-up applied
//! outside the Job Engine, e.g. when a tenant connects and is found to
//! be behind the template's current version (spec §4.8).

use std::sync::Arc;

use migration_core::{render_schema_bootstrap, Schema};
use migration_db::{ControlStore, MigrationStore, TenantStore, TemplateStore};
use migration_transport::{ProvisioningTransport, SqlTransport};
use tracing::info;

use crate::error::{Error, Result};

pub struct SyncPath {
    store: ControlStore,
    transport: Arc<dyn SqlTransport>,
    provisioning: Arc<dyn ProvisioningTransport>,
    api_key: String,
}

impl SyncPath {
    pub fn new(
        store: ControlStore,
        transport: Arc<dyn SqlTransport>,
        provisioning: Arc<dyn ProvisioningTransport>,
        api_key: impl Into<String>,
    ) -> Self {
        Self { store, transport, provisioning, api_key: api_key.into() }
    }

    /// Provision a brand-new tenant at its template's current version
    /// (spec §6's Sync Path create flow). Unlike `sync_database`, there
    /// is no prior migration-ledger history to walk: the tenant is
    /// bootstrapped directly from the template's current schema.
    pub async fn create_tenant_database(&self, tenant_name: &str, template_name: &str) -> Result<()> {
        let (template_id, version, schema_bytes) = {
            let conn = self.store.connection().lock().expect("control store mutex poisoned");
            if TenantStore::new(&conn).get_by_name(tenant_name)?.is_some() {
                return Err(Error::DatabaseExists(tenant_name.to_string()));
            }
            let template = TemplateStore::new(&conn)
                .get_by_name(template_name)?
                .ok_or_else(|| Error::TemplateNotFound(template_name.to_string()))?;
            let version = TemplateStore::new(&conn).get_version(template.id, template.current_version)?;
            (template.id, template.current_version, version.schema_bytes)
        };

        let schema = Schema::deserialize(&schema_bytes)
            .map_err(|e| Error::SchemaCorrupt(template_name.to_string(), e.to_string()))?;
        let stmts = render_schema_bootstrap(&schema);

        info!(tenant = tenant_name, template = template_name, version, "provisioning tenant database");

        self.provisioning.create_database(tenant_name).await?;
        self.transport.execute_batch(tenant_name, &self.api_key, &stmts).await?;

        let conn = self.store.connection().lock().expect("control store mutex poisoned");
        TenantStore::new(&conn).create(tenant_name, template_id, version)?;
        Ok(())
    }

    /// Bring one tenant database up to its template's current version.
    /// Returns `Error::DatabaseInSync` if it is already there. Unlike
    /// the Job Engine, a failure here is returned to the caller
    /// unchanged — no retry loop and no ledger-tracked job state at
    /// this layer (spec §4.8, last sentence).
    pub async fn sync_database(&self, tenant_name: &str) -> Result<()> {
        let (tenant_id, template_id, current_version, target_version, stmts) = {
            let conn = self.store.connection().lock().expect("control store mutex poisoned");
            let tenant = TenantStore::new(&conn)
                .get_by_name(tenant_name)?
                .ok_or_else(|| Error::DatabaseNotFound(tenant_name.to_string()))?;
            let template = TemplateStore::new(&conn).get_by_id(tenant.template_id)?;
            if tenant.template_version >= template.current_version {
                return Err(Error::DatabaseInSync);
            }
            let stmts = Self::concatenate_steps(&MigrationStore::new(&conn), tenant.template_id, tenant.template_version, template.current_version)?;
            (tenant.id, tenant.template_id, tenant.template_version, template.current_version, stmts)
        };

        info!(tenant = tenant_name, template_id, current_version, target_version, "syncing tenant to current template version");

        self.transport
            .execute_batch(tenant_name, &self.api_key, &stmts)
            .await
            .map_err(|e| Error::SyncFailed(e.to_string()))?;

        let conn = self.store.connection().lock().expect("control store mutex poisoned");
        TenantStore::new(&conn).batch_update_versions(&[tenant_id], target_version)?;
        Ok(())
    }

    /// Concatenate every single-version step's statements across
    /// `[from, to)` into one flat list, since the remote `ExecuteBatch`
    /// capability is invoked exactly once for the whole catch-up
    /// (spec §4.8 step 3).
    fn concatenate_steps(store: &MigrationStore<'_>, template_id: i64, from: i64, to: i64) -> Result<Vec<String>> {
        let mut stmts = Vec::new();
        let mut version = from;
        while version < to {
            let step = store
                .get_by_from_version(template_id, version)?
                .ok_or(Error::MigrationNotFound(version))?;
            stmts.extend(step.stmts);
            version += 1;
        }
        Ok(stmts)
    }
}
