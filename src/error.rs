/*!
 * Error types for PartySync
 */

use partysync_core_resilience::{ErrorKind, ResilienceError, RetryConfigError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DataError>;

/// Failure reported by a local store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (closed, locked, missing)
    #[error("Local store unavailable: {0}")]
    Unavailable(String),

    /// A read or write was attempted and failed
    #[error("Local store operation failed: {0}")]
    Operation(String),
}

/// Error surfaced by repository operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    /// The remote call failed terminally or was short-circuited
    #[error("Remote operation failed: {0}")]
    Remote(#[source] ResilienceError),

    /// The remote write succeeded but the local store could not follow
    #[error("{0}")]
    LocalStore(#[from] StoreError),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DataError {
    /// Classified kind for choosing a message and retry affordance
    pub fn kind(&self) -> ErrorKind {
        match self {
            DataError::Remote(err) => err.kind(),
            DataError::LocalStore(_) | DataError::Cancelled | DataError::Config(_) => {
                ErrorKind::Unknown
            }
        }
    }

    /// Message suitable for showing to an end user
    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }

    /// Whether the circuit breaker rejected the call without an attempt
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, DataError::Remote(ResilienceError::CircuitOpen))
    }

    /// Whether retrying later could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            DataError::Remote(ResilienceError::Rejected { .. }) => false,
            DataError::Remote(_) => true,
            DataError::LocalStore(StoreError::Unavailable(_)) => true,
            DataError::LocalStore(StoreError::Operation(_))
            | DataError::Cancelled
            | DataError::Config(_) => false,
        }
    }
}

impl From<ResilienceError> for DataError {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::Cancelled => DataError::Cancelled,
            other => DataError::Remote(other),
        }
    }
}

impl From<RetryConfigError> for DataError {
    fn from(err: RetryConfigError) -> Self {
        DataError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for DataError {
    fn from(err: toml::de::Error) -> Self {
        DataError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::Config(format!("JSON error: {}", err))
    }
}
