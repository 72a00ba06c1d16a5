//! Job orchestration, remote execution, and sync-path logic for the
//! migration control plane (C6-C8). Built on `migration-core`'s pure
//! planning/validation primitives, `migration-db`'s durable ledger, and
//! `migration-transport`'s remote capabilities.

pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod lock;
pub mod sync;

pub use config::EngineConfig;
pub use error::{Error, ErrorCode, Result};
pub use executor::{ExecutionOutcome, Executor, RetryPolicy};
pub use job::JobEngine;
pub use lock::{LockGuard, LockManager};
pub use sync::SyncPath;
