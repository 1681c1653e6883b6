//! PartySync Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks that keep remote data access
//! usable on an unreliable network:
//!
//! - **Error Classifier**: Maps raw transport failures to a small set of kinds and picks a backoff per kind
//! - **Circuit Breaker**: Fails fast once a dependency keeps failing, probes again after a cool-down
//! - **Retry Executor**: Drives an async operation through breaker checks, classified retries and jittered delays
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Storage systems (databases, key-value stores)
//! - Network protocols (HTTP, gRPC)
//! - Application-specific value types
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Repository / Caller             │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Atomic failure run, single probe)     │
//! └─────────────┬───────────────────────────┘
//!               │ admitted
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry Executor                    │  ← Attempts + backoff timers
//! │  (Per-attempt timeout, cancellation)    │
//! └─────────────┬───────────────────────────┘
//!               │ failure
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Error Classifier                  │  ← Kind, recoverability, delay
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage Example
//!
//! ```
//! use partysync_core_resilience::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
//! let executor = RetryExecutor::new(breaker.clone(), ErrorClassifier::default());
//! let config = RetryConfig::builder().max_retries(0).build().unwrap();
//!
//! let err = executor
//!     .execute_with_retry("groups.get", &config, &CancellationToken::new(), || async {
//!         Err::<(), _>(TransportError::status(404, "no such group"))
//!     })
//!     .await
//!     .unwrap_err();
//!
//! assert_eq!(err.kind(), ErrorKind::ClientError);
//! assert_eq!(breaker.status(), "CLOSED (failures: 1/5)");
//! # }
//! ```

pub mod circuit_breaker;
pub mod classifier;
pub mod error;
pub mod retry;

// Re-export main types
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classifier::{ErrorClassifier, DEFAULT_NETWORK_MULTIPLIER};
pub use error::{ErrorKind, ResilienceError, TransportError};
pub use retry::{
    AttemptObserver, Pending, RetryConfig, RetryConfigBuilder, RetryConfigError, RetryExecutor,
};
pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use crate::classifier::ErrorClassifier;
    pub use crate::error::{ErrorKind, ResilienceError, TransportError};
    pub use crate::retry::{AttemptObserver, Pending, RetryConfig, RetryExecutor};
    pub use tokio_util::sync::CancellationToken;
}
