//! Engine-wide configuration values (spec §5): batch size, retry
//! policy, and the API key passed to every tenant transport call.
//! Loading these from a file or environment is an external
//! collaborator's job; this crate only defines the resolved values.

use crate::executor::RetryPolicy;

/// Tenants touched per batched fan-out slice (spec §4.7.2 step 7).
pub const DEFAULT_BATCH_SIZE: usize = 25;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub retry_policy: RetryPolicy,
    /// The single organization-wide API key passed to every tenant's
    /// `SqlTransport` call. The Control Store's `TenantRecord` carries
    /// no per-tenant secret (spec §3.1); §4.6's "(name, token,
    /// currentVersion)" tuple resolves to this shared credential rather
    /// than ledger-stored per-tenant data.
    pub api_key: String,
}

impl EngineConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry_policy: RetryPolicy::default(),
            api_key: api_key.into(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}
