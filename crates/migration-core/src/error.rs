//! Error type for the pure, synchronous half of the control plane
//! (schema model, differ, planner, DDL serializer, static validation).

use crate::validator::ValidationError;

/// Machine-readable error classification surfaced to callers (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    NoChanges,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0:?}")]
    ValidationFailed(Vec<ValidationError>),

    #[error("no changes: target schema is identical to the current one")]
    NoChanges,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ValidationFailed(_) => ErrorCode::ValidationFailed,
            Error::NoChanges => ErrorCode::NoChanges,
            Error::Serde(_) => ErrorCode::Internal,
        }
    }
}
