//! Bootstrap DDL for the Control Store's own five tables (spec §4.1).
//! Not to be confused with the migration *ledger* these tables back —
//! this is the store's internal schema, applied once at startup.

use rusqlite::Connection;

use crate::error::Result;

pub struct MigrationManager;

impl MigrationManager {
    pub fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );",
        )?;

        let current = Self::current_version(conn)?.unwrap_or(0);
        if current < 1 {
            Self::apply_migration_1(conn)?;
        }
        Ok(())
    }

    fn apply_migration_1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                current_version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS templates_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                template_id INTEGER NOT NULL REFERENCES templates(id) ON DELETE CASCADE,
                version INTEGER NOT NULL,
                schema_bytes BLOB NOT NULL,
                checksum TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(template_id, version)
            );

            CREATE TABLE IF NOT EXISTS tenants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                template_id INTEGER NOT NULL REFERENCES templates(id) ON DELETE RESTRICT,
                template_version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                template_id INTEGER NOT NULL REFERENCES templates(id) ON DELETE RESTRICT,
                from_version INTEGER NOT NULL,
                to_version INTEGER NOT NULL,
                stmts TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                state TEXT,
                total_dbs INTEGER NOT NULL DEFAULT 0,
                completed_dbs INTEGER NOT NULL DEFAULT 0,
                failed_dbs INTEGER NOT NULL DEFAULT 0,
                started_at TEXT,
                completed_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tenant_migrations (
                migration_id INTEGER NOT NULL REFERENCES migrations(id) ON DELETE CASCADE,
                tenant_id INTEGER NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                error TEXT,
                attempts INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (migration_id, tenant_id)
            );

            CREATE INDEX IF NOT EXISTS idx_migrations_template_id ON migrations(template_id);
            CREATE INDEX IF NOT EXISTS idx_migrations_status ON migrations(status);
            CREATE INDEX IF NOT EXISTS idx_tenant_migrations_status ON tenant_migrations(status);

            INSERT OR REPLACE INTO schema_migrations (version) VALUES (1);
            ",
        )?;
        Ok(())
    }

    pub fn current_version(conn: &Connection) -> Result<Option<u32>> {
        let mut stmt = conn.prepare("SELECT MAX(version) FROM schema_migrations")?;
        Ok(stmt.query_row([], |row| row.get(0)).ok())
    }
}
