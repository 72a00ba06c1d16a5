//! Errors surfaced by the remote SQL-execution and provisioning
//! capabilities (spec §6). `Timeout` is the transport's own typed
//! timeout signal the Executor's retry classifier checks for directly,
//! alongside the substring-matching fallback for opaque server errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("server returned {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("connection timeout")]
    Timeout,

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
