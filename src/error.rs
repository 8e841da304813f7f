use thiserror::Error;

use crate::schema::FieldError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid configuration")]
    Validation(Vec<FieldError>),

    #[error("unknown backend type: {0}")]
    UnknownBackendType(String),

    #[error("backend not found: {0}")]
    BackendNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("{message}")]
    Backend { message: String, transient: bool },

    #[error("object not in content store: {0}")]
    ContentNotFound(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GatewayError {
    /// Adapter failure worth retrying (timeouts, connection resets, 429/5xx).
    pub fn backend_transient(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            transient: true,
        }
    }

    /// Adapter failure that retrying cannot fix (auth, missing object, bad request).
    pub fn backend_permanent(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            transient: false,
        }
    }

    /// Whether the retry loop should attempt this operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { transient: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
