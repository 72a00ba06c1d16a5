//! Error taxonomy for the engine layer (spec §7). Each variant carries
//! a stable machine code; the Planner itself never errors (misuse is a
//! programming error), so no `PlannerError` variant exists here.

use migration_core::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    TemplateNotFound,
    TemplateExists,
    AtomicbaseBusy,
    ValidationFailed,
    NoChanges,
    MigrationNotFound,
    VersionNotFound,
    DatabaseNotFound,
    DatabaseExists,
    DatabaseInSync,
    TransportError,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("template already exists: {0}")]
    TemplateExists(String),

    #[error("template is already migrating")]
    AtomicbaseBusy,

    #[error("validation failed: {0:?}")]
    ValidationFailed(Vec<ValidationError>),

    #[error("no changes: target schema is identical to the current one")]
    NoChanges,

    #[error("migration not found: {0}")]
    MigrationNotFound(i64),

    #[error("tenant database is already at the template's current version")]
    DatabaseInSync,

    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    #[error("a tenant database named {0} is already registered")]
    DatabaseExists(String),

    #[error("sync failed: {0}")]
    SyncFailed(String),

    #[error("stored schema bytes for template {0} are corrupt: {1}")]
    SchemaCorrupt(String, String),

    #[error(transparent)]
    Store(#[from] migration_db::Error),

    #[error(transparent)]
    Transport(#[from] migration_transport::TransportError),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::TemplateNotFound(_) => ErrorCode::TemplateNotFound,
            Error::TemplateExists(_) => ErrorCode::TemplateExists,
            Error::AtomicbaseBusy => ErrorCode::AtomicbaseBusy,
            Error::ValidationFailed(_) => ErrorCode::ValidationFailed,
            Error::NoChanges => ErrorCode::NoChanges,
            Error::MigrationNotFound(_) => ErrorCode::MigrationNotFound,
            Error::DatabaseInSync => ErrorCode::DatabaseInSync,
            Error::DatabaseNotFound(_) => ErrorCode::DatabaseNotFound,
            Error::DatabaseExists(_) => ErrorCode::DatabaseExists,
            Error::SyncFailed(_) => ErrorCode::TransportError,
            Error::SchemaCorrupt(..) => ErrorCode::Internal,
            Error::Store(migration_db::Error::TemplateNotFound(_)) => ErrorCode::TemplateNotFound,
            Error::Store(migration_db::Error::VersionNotFound { .. }) => ErrorCode::VersionNotFound,
            Error::Store(migration_db::Error::MigrationNotFound(_)) => ErrorCode::MigrationNotFound,
            Error::Store(_) => ErrorCode::Internal,
            Error::Transport(_) => ErrorCode::TransportError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
