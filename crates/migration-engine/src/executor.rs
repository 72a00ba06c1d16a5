//! The Executor (C6): applies a tenant's concatenated statement list via
//! the remote batch capability, with retry and exponential backoff
//! (spec §4.6).

use std::time::Duration;

use migration_transport::{SqlTransport, TransportError};
use tracing::{info, warn};

const RETRYABLE_SUBSTRINGS: &[&str] = &[
    "connection refused",
    "connection reset",
    "timeout",
    "temporary failure",
    "no such host",
    "i/o timeout",
];

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base_ms: 100, max_attempts: 5 }
    }
}

/// The result of applying one tenant's statement batch.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub error_message: Option<String>,
}

fn is_retryable(err: &TransportError) -> bool {
    if matches!(err, TransportError::Timeout) {
        return true;
    }
    let message = err.to_string().to_lowercase();
    RETRYABLE_SUBSTRINGS.iter().any(|needle| message.contains(needle))
}

/// Concatenate statements for versions `[current, target)` from a
/// precomputed per-version cache and apply them to one tenant, retrying
/// retryable transport errors with exponential backoff.
pub struct Executor<'a> {
    transport: &'a dyn SqlTransport,
    policy: RetryPolicy,
}

impl<'a> Executor<'a> {
    pub fn new(transport: &'a dyn SqlTransport, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// `statements_by_version` must contain an entry for every version
    /// in `[current_version, target_version)`; a gap is a caller bug
    /// surfaced as a fatal error by `migration-engine`'s job setup, not
    /// here — by the time the Executor runs, the cache is complete.
    pub async fn apply(
        &self,
        tenant_name: &str,
        auth_token: &str,
        current_version: i64,
        target_version: i64,
        statements_by_version: &std::collections::BTreeMap<i64, Vec<String>>,
    ) -> ExecutionOutcome {
        let mut stmts = Vec::new();
        for version in current_version..target_version {
            if let Some(v_stmts) = statements_by_version.get(&version) {
                stmts.extend(v_stmts.iter().cloned());
            }
        }
        if stmts.is_empty() {
            return ExecutionOutcome { success: true, error_message: None };
        }
        self.execute_with_retry(tenant_name, auth_token, &stmts).await
    }

    async fn execute_with_retry(
        &self,
        tenant_name: &str,
        auth_token: &str,
        stmts: &[String],
    ) -> ExecutionOutcome {
        let mut last_error: Option<TransportError> = None;
        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let backoff_ms = self.policy.base_ms * 2u64.pow(attempt - 1);
                warn!(tenant = tenant_name, attempt, backoff_ms, "retrying tenant migration batch");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            match self.transport.execute_batch(tenant_name, auth_token, stmts).await {
                Ok(()) => {
                    info!(tenant = tenant_name, attempt, "tenant migration batch applied");
                    return ExecutionOutcome { success: true, error_message: None };
                }
                Err(e) => {
                    if !is_retryable(&e) {
                        return ExecutionOutcome { success: false, error_message: Some(e.to_string()) };
                    }
                    last_error = Some(e);
                }
            }
        }
        ExecutionOutcome {
            success: false,
            error_message: last_error.map(|e| e.to_string()),
        }
    }
}
