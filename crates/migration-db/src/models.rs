//! Ledger records and their persistence operations (spec §3, §4.1).

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// A named, versioned schema definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: i64,
    pub name: String,
    pub current_version: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// One immutable serialized schema snapshot of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVersionRecord {
    pub template_id: i64,
    pub version: i64,
    pub schema_bytes: Vec<u8>,
    pub checksum: String,
    pub created_at: String,
}

/// One live database provisioned from a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: i64,
    pub name: String,
    pub template_id: i64,
    pub template_version: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Pending,
    Running,
    Complete,
}

impl MigrationStatus {
    fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Running => "running",
            MigrationStatus::Complete => "complete",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "running" => MigrationStatus::Running,
            "complete" => MigrationStatus::Complete,
            _ => MigrationStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Success,
    Partial,
    Failed,
}

impl MigrationState {
    fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Success => "success",
            MigrationState::Partial => "partial",
            MigrationState::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "partial" => MigrationState::Partial,
            "failed" => MigrationState::Failed,
            _ => MigrationState::Success,
        }
    }
}

/// One job ledger entry: a single attempt to move the whole fleet from
/// `from_version` to `to_version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: i64,
    pub template_id: i64,
    pub from_version: i64,
    pub to_version: i64,
    pub stmts: Vec<String>,
    pub status: MigrationStatus,
    pub state: Option<MigrationState>,
    pub total_dbs: i64,
    pub completed_dbs: i64,
    pub failed_dbs: i64,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantMigrationStatus {
    Success,
    Failed,
}

impl TenantMigrationStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TenantMigrationStatus::Success => "success",
            TenantMigrationStatus::Failed => "failed",
        }
    }
}

/// One tenant's outcome within one migration job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantMigrationRecord {
    pub migration_id: i64,
    pub tenant_id: i64,
    pub status: TenantMigrationStatus,
    pub error: Option<String>,
    pub attempts: i64,
    pub updated_at: String,
}

fn row_to_migration(row: &rusqlite::Row) -> rusqlite::Result<MigrationRecord> {
    let stmts_json: String = row.get(4)?;
    let stmts: Vec<String> = serde_json::from_str(&stmts_json).unwrap_or_default();
    let status: String = row.get(5)?;
    let state: Option<String> = row.get(6)?;
    Ok(MigrationRecord {
        id: row.get(0)?,
        template_id: row.get(1)?,
        from_version: row.get(2)?,
        to_version: row.get(3)?,
        stmts,
        status: MigrationStatus::parse(&status),
        state: state.map(|s| MigrationState::parse(&s)),
        total_dbs: row.get(7)?,
        completed_dbs: row.get(8)?,
        failed_dbs: row.get(9)?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

const MIGRATION_COLUMNS: &str = "id, template_id, from_version, to_version, stmts, status, state, \
     total_dbs, completed_dbs, failed_dbs, started_at, completed_at, created_at";

/// Operations on `templates` and `templates_history`.
pub struct TemplateStore<'a> {
    conn: &'a Connection,
}

impl<'a> TemplateStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a template at version 1 along with its initial
    /// TemplateVersion row, in one transaction-bounded call.
    pub fn create(&self, name: &str, schema_bytes: &[u8], checksum: &str) -> Result<i64> {
        if self.get_by_name(name)?.is_some() {
            return Err(Error::TemplateExists(name.to_string()));
        }
        let ts = now();
        self.conn.execute(
            "INSERT INTO templates (name, current_version, created_at, updated_at) VALUES (?, 1, ?, ?)",
            params![name, ts, ts],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn.execute(
            "INSERT INTO templates_history (template_id, version, schema_bytes, checksum, created_at) \
             VALUES (?, 1, ?, ?, ?)",
            params![id, schema_bytes, checksum, ts],
        )?;
        Ok(id)
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<TemplateRecord>> {
        self.conn
            .query_row(
                "SELECT id, name, current_version, created_at, updated_at FROM templates WHERE name = ?",
                params![name],
                |row| {
                    Ok(TemplateRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        current_version: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    pub fn get_by_id(&self, id: i64) -> Result<TemplateRecord> {
        self.conn
            .query_row(
                "SELECT id, name, current_version, created_at, updated_at FROM templates WHERE id = ?",
                params![id],
                |row| {
                    Ok(TemplateRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        current_version: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| Error::TemplateNotFound(id.to_string()))
    }

    /// Append a new, immutable TemplateVersion row. Caller assigns
    /// `version = template.current_version + 1`.
    pub fn append_version(
        &self,
        template_id: i64,
        version: i64,
        schema_bytes: &[u8],
        checksum: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO templates_history (template_id, version, schema_bytes, checksum, created_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![template_id, version, schema_bytes, checksum, now()],
        )?;
        Ok(())
    }

    pub fn advance_current_version(&self, template_id: i64, version: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE templates SET current_version = ?, updated_at = ? WHERE id = ?",
            params![version, now(), template_id],
        )?;
        Ok(())
    }

    pub fn get_version(&self, template_id: i64, version: i64) -> Result<TemplateVersionRecord> {
        self.conn
            .query_row(
                "SELECT template_id, version, schema_bytes, checksum, created_at \
                 FROM templates_history WHERE template_id = ? AND version = ?",
                params![template_id, version],
                |row| {
                    Ok(TemplateVersionRecord {
                        template_id: row.get(0)?,
                        version: row.get(1)?,
                        schema_bytes: row.get(2)?,
                        checksum: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or(Error::VersionNotFound {
                template: template_id.to_string(),
                version,
            })
    }

    /// List every TemplateVersion for a template, oldest first.
    pub fn history(&self, template_id: i64) -> Result<Vec<TemplateVersionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT template_id, version, schema_bytes, checksum, created_at \
             FROM templates_history WHERE template_id = ? ORDER BY version ASC",
        )?;
        let rows = stmt.query_map(params![template_id], |row| {
            Ok(TemplateVersionRecord {
                template_id: row.get(0)?,
                version: row.get(1)?,
                schema_bytes: row.get(2)?,
                checksum: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }
}

/// Operations on `tenants`.
pub struct TenantStore<'a> {
    conn: &'a Connection,
}

impl<'a> TenantStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn create(&self, name: &str, template_id: i64, template_version: i64) -> Result<i64> {
        let ts = now();
        self.conn.execute(
            "INSERT INTO tenants (name, template_id, template_version, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![name, template_id, template_version, ts, ts],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<TenantRecord>> {
        self.conn
            .query_row(
                "SELECT id, name, template_id, template_version, created_at, updated_at \
                 FROM tenants WHERE name = ?",
                params![name],
                |row| {
                    Ok(TenantRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        template_id: row.get(2)?,
                        template_version: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
    }

    /// Tenants with `template_version < target` that have no outcome row
    /// yet for `migration_id`, ordered by name (spec §4.1,
    /// deterministic for test reproducibility).
    pub fn get_pending_tenants(
        &self,
        migration_id: i64,
        template_id: i64,
        target_version: i64,
    ) -> Result<Vec<TenantRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.name, t.template_id, t.template_version, t.created_at, t.updated_at \
             FROM tenants t \
             WHERE t.template_id = ? AND t.template_version < ? \
               AND NOT EXISTS ( \
                 SELECT 1 FROM tenant_migrations tm \
                 WHERE tm.migration_id = ? AND tm.tenant_id = t.id \
               ) \
             ORDER BY t.name ASC",
        )?;
        let rows = stmt.query_map(params![template_id, target_version, migration_id], |row| {
            Ok(TenantRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                template_id: row.get(2)?,
                template_version: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    /// Update `template_version` for a batch of tenants in one
    /// statement; an empty `ids` is a no-op (spec §4.1).
    pub fn batch_update_versions(&self, ids: &[i64], version: i64) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "UPDATE tenants SET template_version = ?, updated_at = ? WHERE id IN ({})",
            placeholders
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&version];
        let ts = now();
        bound.push(&ts);
        for id in ids {
            bound.push(id);
        }
        stmt.execute(bound.as_slice())?;
        Ok(())
    }
}

/// Operations on `migrations`.
pub struct MigrationStore<'a> {
    conn: &'a Connection,
}

impl<'a> MigrationStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn create(&self, template_id: i64, from: i64, to: i64, stmts: &[String]) -> Result<i64> {
        let stmts_json = serde_json::to_string(stmts)?;
        self.conn.execute(
            "INSERT INTO migrations (template_id, from_version, to_version, stmts, status, created_at) \
             VALUES (?, ?, ?, ?, 'pending', ?)",
            params![template_id, from, to, stmts_json, now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<MigrationRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM migrations WHERE id = ?", MIGRATION_COLUMNS),
                params![id],
                row_to_migration,
            )
            .optional()?
            .ok_or(Error::MigrationNotFound(id))
    }

    pub fn list_running(&self) -> Result<Vec<MigrationRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM migrations WHERE status = 'running'",
            MIGRATION_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_migration)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    /// The single-version-step migration that moves a template from
    /// `from_version` to `from_version + 1`, if one has ever been
    /// created. Used by the Job Engine to assemble the per-version
    /// statement cache for tenants lagging behind the current job's
    /// own `from_version` (spec §4.7.2 step 4).
    pub fn get_by_from_version(&self, template_id: i64, from_version: i64) -> Result<Option<MigrationRecord>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM migrations WHERE template_id = ? AND from_version = ? \
                     ORDER BY id DESC LIMIT 1",
                    MIGRATION_COLUMNS
                ),
                params![template_id, from_version],
                row_to_migration,
            )
            .optional()
            .map_err(Error::from)
    }

    pub fn start(&self, id: i64, total_dbs: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE migrations SET status = 'running', total_dbs = ?, started_at = ? WHERE id = ?",
            params![total_dbs, now(), id],
        )?;
        Ok(())
    }

    pub fn update_status(
        &self,
        id: i64,
        status: MigrationStatus,
        state: Option<MigrationState>,
        completed: i64,
        failed: i64,
    ) -> Result<()> {
        let completed_at = if status == MigrationStatus::Complete {
            Some(now())
        } else {
            None
        };
        self.conn.execute(
            "UPDATE migrations SET status = ?, state = ?, completed_dbs = ?, failed_dbs = ?, completed_at = COALESCE(?, completed_at) \
             WHERE id = ?",
            params![
                status.as_str(),
                state.map(|s| s.as_str()),
                completed,
                failed,
                completed_at,
                id
            ],
        )?;
        Ok(())
    }
}

/// Operations on `tenant_migrations`.
pub struct TenantMigrationStore<'a> {
    conn: &'a Connection,
}

impl<'a> TenantMigrationStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Upsert on `(migration_id, tenant_id)`: create the row on first
    /// recording; on conflict overwrite status/error and bump attempts
    /// (spec §4.1).
    pub fn record(
        &self,
        migration_id: i64,
        tenant_id: i64,
        status: TenantMigrationStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tenant_migrations (migration_id, tenant_id, status, error, attempts, updated_at) \
             VALUES (?, ?, ?, ?, 1, ?) \
             ON CONFLICT(migration_id, tenant_id) DO UPDATE SET \
               status = excluded.status, error = excluded.error, \
               attempts = tenant_migrations.attempts + 1, updated_at = excluded.updated_at",
            params![migration_id, tenant_id, status.as_str(), error, now()],
        )?;
        Ok(())
    }

    pub fn failed_tenant_ids(&self, migration_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT tenant_id FROM tenant_migrations WHERE migration_id = ? AND status = 'failed'",
        )?;
        let rows = stmt.query_map(params![migration_id], |row| row.get::<_, i64>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    /// Delete the failed rows so the tenants reappear in
    /// `get_pending_tenants` (spec §4.7.3 retry API).
    pub fn delete_failed(&self, migration_id: i64) -> Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM tenant_migrations WHERE migration_id = ? AND status = 'failed'",
            params![migration_id],
        )?;
        Ok(n)
    }
}
