use thiserror::Error;

use crate::models::ChangeKind;

/// Failures reported by a persistence backend or change stream.
///
/// The variants carry enough classification for [`PersistenceError::is_retryable`]
/// to decide without looking at anything but the value itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl PersistenceError {
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Classify an HTTP status returned by the hosted data store.
    pub fn from_status<S: Into<String>>(status: u16, msg: S) -> Self {
        let message = msg.into();
        match status {
            401 | 403 => Self::Unauthorized(message),
            404 => Self::NotFound(message),
            400 | 409 | 422 => Self::Validation(message),
            _ => Self::Http { status, message },
        }
    }

    /// Network failures, timeouts, HTTP 5xx and HTTP 429 are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::Validation(_)
            | Self::NotFound(_)
            | Self::Unauthorized(_)
            | Self::Storage(_)
            | Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for PersistenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut => Self::Timeout(err.to_string()),
            sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                Self::Network(err.to_string())
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// A change-stream payload that could not be turned into a domain entity.
#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("{0:?} event carried no row payload")]
    MissingPayload(ChangeKind),

    #[error("row payload has no string `id` field")]
    MissingId,

    #[error("row payload does not match entity shape: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Malformed row: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Sync engine for owner '{0}' has been shut down")]
    Cancelled(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl SyncError {
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Whether the underlying failure was transient (and has already been retried).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Persistence(err) if err.is_retryable())
    }

    pub fn is_pii_safe(&self) -> bool {
        match self {
            Self::Persistence(_) | Self::Normalize(_) | Self::Anyhow(_) => false,
            Self::Cancelled(_) | Self::InvalidInput(_) | Self::Config(_) => true,
        }
    }

    /// Message suitable for a user-facing notification.
    pub fn to_safe_string(&self) -> String {
        if self.is_pii_safe() {
            return self.to_string();
        }
        match self {
            Self::Persistence(err) if err.is_retryable() => {
                "Could not reach the server, please try again".to_string()
            }
            Self::Persistence(PersistenceError::Unauthorized(_)) => {
                "Your session has expired, please sign in again".to_string()
            }
            Self::Persistence(PersistenceError::Validation(_)) => {
                "The server rejected the change".to_string()
            }
            Self::Persistence(_) => "Saving failed".to_string(),
            Self::Normalize(_) => "Received malformed data from the server".to_string(),
            _ => "Operation failed".to_string(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
