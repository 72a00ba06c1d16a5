//! External capabilities the core delegates to (spec §6): the remote
//! SQL-execution transport and the tenant-provisioning transport.
//! Deliberately kept out of `migration-core` — both require async I/O,
//! which that crate never does.

pub mod error;
pub mod http;

pub use error::{Result, TransportError};
pub use http::HttpSqlTransport;

use async_trait::async_trait;

/// `ExecuteBatch(databaseName, authToken, stmts[])`: the server executes
/// all statements in a single transaction; any statement failure rolls
/// back the whole batch and returns an error describing the failure.
#[async_trait]
pub trait SqlTransport: Send + Sync {
    async fn execute_batch(&self, database_name: &str, auth_token: &str, stmts: &[String]) -> Result<()>;

    /// Run a single scalar-count query against one tenant, backing the
    /// Validator's data-dependent probe (spec §4.5).
    async fn query_count(&self, database_name: &str, auth_token: &str, sql: &str) -> Result<i64>;
}

/// Tenant-database lifecycle, used only by the Sync-path create flow
/// (spec §6).
#[async_trait]
pub trait ProvisioningTransport: Send + Sync {
    async fn create_database(&self, name: &str) -> Result<()>;
    async fn delete_database(&self, name: &str) -> Result<()>;
}
