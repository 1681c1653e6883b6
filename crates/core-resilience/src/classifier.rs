//! Error classification and per-kind backoff policy
//!
//! The classifier is stateless: it maps a [`TransportError`] to an
//! [`ErrorKind`], says whether that kind is worth retrying, and computes the
//! delay before the next attempt. It is advisory only; the
//! [`RetryExecutor`](crate::retry::RetryExecutor) decides whether to retry.
//!
//! # Rules (checked in order)
//!
//! ```text
//! host / DNS resolution failure          → NoNetwork
//! deadline exceeded                      → Timeout
//! connect failure, 5xx / 408 / 429       → ServerError
//! TLS / certificate failure              → ServerError
//! 401 / 403 / 404 or their wording       → ClientError
//! server-error wording ("server", "500") → ServerError
//! anything else                          → Unknown
//! ```
//!
//! # Backoff
//!
//! ```text
//! Timeout     → base * multiplier^attempt       (exponential)
//! NoNetwork   → base * network_multiplier * (attempt + 1)
//! ServerError → base * (attempt + 1)            (linear)
//! otherwise   → base                            (fixed, never retried anyway)
//! ```

use crate::error::{ErrorKind, TransportError};
use std::time::Duration;

const CLIENT_ERROR_MARKERS: &[&str] = &[
    "401",
    "unauthorized",
    "403",
    "forbidden",
    "404",
    "not found",
];

const SERVER_ERROR_MARKERS: &[&str] = &["server", "500", "502", "503", "504"];

/// Extra factor applied to the base delay when the host cannot be reached
pub const DEFAULT_NETWORK_MULTIPLIER: u32 = 3;

/// Stateless failure classifier
///
/// # Example
/// ```
/// use partysync_core_resilience::{ErrorClassifier, ErrorKind, TransportError};
/// use std::time::Duration;
///
/// let classifier = ErrorClassifier::default();
/// let kind = classifier.categorize(&TransportError::status(503, "unavailable"));
/// assert_eq!(kind, ErrorKind::ServerError);
/// assert!(classifier.is_recoverable(kind));
/// assert_eq!(classifier.retry_delay(kind, 1), Duration::from_millis(2000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorClassifier {
    base_delay: Duration,
    exponential_base: f64,
    network_multiplier: u32,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            exponential_base: 2.0,
            network_multiplier: DEFAULT_NETWORK_MULTIPLIER,
        }
    }
}

impl ErrorClassifier {
    /// Create a classifier with a custom base delay and network multiplier
    pub fn new(base_delay: Duration, network_multiplier: u32) -> Self {
        Self {
            base_delay,
            network_multiplier,
            ..Default::default()
        }
    }

    /// Map a failure to its kind
    pub fn categorize(&self, failure: &TransportError) -> ErrorKind {
        match failure {
            TransportError::HostUnresolved(_) => ErrorKind::NoNetwork,
            TransportError::DeadlineExceeded(_) => ErrorKind::Timeout,
            TransportError::Connect(_) => ErrorKind::ServerError,
            TransportError::Status { code, .. } if is_retryable_status(*code) => {
                ErrorKind::ServerError
            }
            TransportError::Tls(_) => ErrorKind::ServerError,
            TransportError::Status { code: 401 | 403 | 404, .. } => ErrorKind::ClientError,
            other => categorize_message(&other.lowercase_message()),
        }
    }

    /// Whether a failure of this kind is worth another attempt
    pub fn is_recoverable(&self, kind: ErrorKind) -> bool {
        matches!(
            kind,
            ErrorKind::NoNetwork | ErrorKind::Timeout | ErrorKind::ServerError
        )
    }

    /// Delay before the attempt following `attempt` (0-based) using this
    /// classifier's own base delay
    pub fn retry_delay(&self, kind: ErrorKind, attempt: u32) -> Duration {
        self.backoff(kind, attempt, self.base_delay, self.exponential_base)
    }

    /// Delay for `kind` at `attempt` (0-based) with an explicit base delay and
    /// exponential multiplier, as supplied by a retry configuration
    pub fn backoff(&self, kind: ErrorKind, attempt: u32, base: Duration, multiplier: f64) -> Duration {
        match kind {
            ErrorKind::Timeout => {
                let factor = multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
                scale(base, factor)
            }
            ErrorKind::NoNetwork => base
                .saturating_mul(self.network_multiplier)
                .saturating_mul(attempt.saturating_add(1)),
            ErrorKind::ServerError => base.saturating_mul(attempt.saturating_add(1)),
            ErrorKind::ClientError | ErrorKind::Unknown => base,
        }
    }
}

fn is_retryable_status(code: u16) -> bool {
    (500..600).contains(&code) || code == 408 || code == 429
}

fn categorize_message(message: &str) -> ErrorKind {
    if CLIENT_ERROR_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorKind::ClientError
    } else if SERVER_ERROR_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorKind::ServerError
    } else {
        ErrorKind::Unknown
    }
}

/// Multiply a duration by a float factor, saturating instead of panicking
fn scale(base: Duration, factor: f64) -> Duration {
    let millis = base.as_millis() as f64 * factor;
    if !millis.is_finite() || millis >= u64::MAX as f64 {
        Duration::from_millis(u64::MAX)
    } else {
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_in_rule_order() {
        let c = ErrorClassifier::default();
        assert_eq!(
            c.categorize(&TransportError::HostUnresolved("api.example".into())),
            ErrorKind::NoNetwork
        );
        assert_eq!(
            c.categorize(&TransportError::DeadlineExceeded("15s".into())),
            ErrorKind::Timeout
        );
        assert_eq!(
            c.categorize(&TransportError::Connect("refused".into())),
            ErrorKind::ServerError
        );
        assert_eq!(
            c.categorize(&TransportError::Tls("bad certificate".into())),
            ErrorKind::ServerError
        );
        assert_eq!(
            c.categorize(&TransportError::Other("something odd".into())),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_retryable_statuses_are_server_errors() {
        let c = ErrorClassifier::default();
        for code in [500, 502, 503, 504, 599, 408, 429] {
            assert_eq!(
                c.categorize(&TransportError::status(code, "")),
                ErrorKind::ServerError,
                "status {}",
                code
            );
        }
    }

    #[test]
    fn test_client_errors_by_status_and_wording() {
        let c = ErrorClassifier::default();
        for code in [401, 403, 404] {
            assert_eq!(
                c.categorize(&TransportError::status(code, "")),
                ErrorKind::ClientError
            );
        }
        assert_eq!(
            c.categorize(&TransportError::Other("User Unauthorized".into())),
            ErrorKind::ClientError
        );
        assert_eq!(
            c.categorize(&TransportError::Other("group not found".into())),
            ErrorKind::ClientError
        );
        assert_eq!(
            c.categorize(&TransportError::Other("HTTP 403".into())),
            ErrorKind::ClientError
        );
    }

    #[test]
    fn test_other_status_falls_back_to_message() {
        let c = ErrorClassifier::default();
        assert_eq!(
            c.categorize(&TransportError::status(400, "bad request")),
            ErrorKind::Unknown
        );
        assert_eq!(
            c.categorize(&TransportError::status(400, "forbidden field")),
            ErrorKind::ClientError
        );
        assert_eq!(
            c.categorize(&TransportError::Other("internal server error".into())),
            ErrorKind::ServerError
        );
    }

    #[test]
    fn test_recoverability() {
        let c = ErrorClassifier::default();
        assert!(c.is_recoverable(ErrorKind::NoNetwork));
        assert!(c.is_recoverable(ErrorKind::Timeout));
        assert!(c.is_recoverable(ErrorKind::ServerError));
        assert!(!c.is_recoverable(ErrorKind::ClientError));
        assert!(!c.is_recoverable(ErrorKind::Unknown));
    }

    #[test]
    fn test_retry_delay_per_kind() {
        let c = ErrorClassifier::default();
        // exponential
        assert_eq!(c.retry_delay(ErrorKind::Timeout, 0), Duration::from_millis(1000));
        assert_eq!(c.retry_delay(ErrorKind::Timeout, 2), Duration::from_millis(4000));
        // linear, scaled by network multiplier
        assert_eq!(c.retry_delay(ErrorKind::NoNetwork, 0), Duration::from_millis(3000));
        assert_eq!(c.retry_delay(ErrorKind::NoNetwork, 1), Duration::from_millis(6000));
        // plain linear
        assert_eq!(c.retry_delay(ErrorKind::ServerError, 2), Duration::from_millis(3000));
        // fixed
        assert_eq!(c.retry_delay(ErrorKind::ClientError, 5), Duration::from_millis(1000));
        assert_eq!(c.retry_delay(ErrorKind::Unknown, 5), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_uses_supplied_base_and_multiplier() {
        let c = ErrorClassifier::default();
        let delay = c.backoff(ErrorKind::Timeout, 2, Duration::from_millis(1000), 2.0);
        assert_eq!(delay, Duration::from_millis(4000));

        let delay = c.backoff(ErrorKind::Timeout, 2, Duration::from_millis(100), 3.0);
        assert_eq!(delay, Duration::from_millis(900));
    }

    #[test]
    fn test_backoff_saturates() {
        let c = ErrorClassifier::default();
        let delay = c.backoff(ErrorKind::Timeout, 4000, Duration::from_secs(1), 2.0);
        assert_eq!(delay, Duration::from_millis(u64::MAX));
    }
}
