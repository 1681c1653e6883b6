//! Error types for the resilience crate

use std::fmt;
use std::io;
use thiserror::Error;

/// Classified kind of a remote failure
///
/// Derived deterministically from a [`TransportError`] by the
/// [`ErrorClassifier`](crate::classifier::ErrorClassifier). Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Host could not be resolved or the device is offline
    NoNetwork,
    /// The operation exceeded its deadline
    Timeout,
    /// Remote side failed (5xx, 408, 429, refused connection, TLS failure)
    ServerError,
    /// The request itself was rejected (401, 403, 404)
    ClientError,
    /// Anything that could not be classified
    Unknown,
}

impl ErrorKind {
    /// Message suitable for showing to an end user
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::NoNetwork => {
                "No internet connection. Please check your network settings and try again."
            }
            ErrorKind::Timeout => {
                "Connection timed out. The server might be busy, please try again later."
            }
            ErrorKind::ServerError => {
                "Server error. Our team has been notified and is working on a fix."
            }
            ErrorKind::ClientError => "Something went wrong with your request. Please try again.",
            ErrorKind::Unknown => "An unexpected error occurred. Please try again later.",
        }
    }

    /// Short lowercase label used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoNetwork => "no_network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ClientError => "client_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure raised by a single remote call
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// DNS / host resolution failed
    #[error("Host resolution failed: {0}")]
    HostUnresolved(String),

    /// The call did not complete before its deadline
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Transport-level connect failure
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Remote answered with a non-success status
    #[error("Status {code}: {message}")]
    Status { code: u16, message: String },

    /// TLS handshake or certificate failure
    #[error("TLS failure: {0}")]
    Tls(String),

    /// Anything else, described by its message
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Build a status error
    pub fn status<S: Into<String>>(code: u16, message: S) -> Self {
        TransportError::Status {
            code,
            message: message.into(),
        }
    }

    /// Message text carried by the error, lowercased for keyword matching
    pub(crate) fn lowercase_message(&self) -> String {
        match self {
            TransportError::HostUnresolved(m)
            | TransportError::DeadlineExceeded(m)
            | TransportError::Connect(m)
            | TransportError::Tls(m)
            | TransportError::Other(m) => m.to_lowercase(),
            TransportError::Status { message, .. } => message.to_lowercase(),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        use io::ErrorKind::*;
        let message = err.to_string();
        match err.kind() {
            TimedOut => TransportError::DeadlineExceeded(message),
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected
            | BrokenPipe => TransportError::Connect(message),
            _ if is_dns_message(&message) => TransportError::HostUnresolved(message),
            _ => TransportError::Other(message),
        }
    }
}

fn is_dns_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("no such host")
        || lower.contains("dns error")
}

/// Terminal outcome of a guarded, possibly retried operation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// Circuit breaker is open; no attempt was made
    #[error("Circuit breaker is open, request rejected without an attempt")]
    CircuitOpen,

    /// First failure was not recoverable, so it was not retried
    #[error("Non-recoverable {kind} failure after {attempts} attempt(s): {source}")]
    Rejected {
        kind: ErrorKind,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Recoverable failures continued until the retry budget ran out
    #[error("Retries exhausted after {attempts} attempt(s), last {kind} failure: {source}")]
    RetriesExhausted {
        kind: ErrorKind,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The caller cancelled the retry sequence
    #[error("Operation cancelled")]
    Cancelled,
}

impl ResilienceError {
    /// Classified kind carried by every terminal outcome
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::CircuitOpen => ErrorKind::ServerError,
            ResilienceError::Rejected { kind, .. }
            | ResilienceError::RetriesExhausted { kind, .. } => *kind,
            ResilienceError::Cancelled => ErrorKind::Unknown,
        }
    }

    /// Number of attempts actually made before this outcome
    pub fn attempts(&self) -> u32 {
        match self {
            ResilienceError::Rejected { attempts, .. }
            | ResilienceError::RetriesExhausted { attempts, .. } => *attempts,
            ResilienceError::CircuitOpen | ResilienceError::Cancelled => 0,
        }
    }

    /// Last underlying transport failure, if an attempt was made
    pub fn last_failure(&self) -> Option<&TransportError> {
        match self {
            ResilienceError::Rejected { source, .. }
            | ResilienceError::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether this outcome was produced without invoking the operation
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen)
    }
}
