/*!
 * PartySync - Resilient cache-first data access
 *
 * A data layer for clients on unreliable networks:
 * - Classified transport failures with per-kind backoff
 * - Circuit breaking per operation class with a single half-open probe
 * - Cancellable retry sequences driven by tokio timers
 * - Bounded TTL response cache in front of a local store
 * - Remote-first writes so local state never runs ahead of the server
 * - Per-endpoint request metrics with optional Prometheus export
 *
 * The transport-agnostic pieces live in `partysync-core-resilience` and are
 * re-exported here.
 */

pub mod cache;
pub mod config;
pub mod error;
pub mod layer;
pub mod logging;
pub mod metrics;
pub mod repository;
pub mod source;

// Re-export commonly used types
pub use cache::{CacheStats, ResponseCache};
pub use config::{DataLayerConfig, LogLevel};
pub use error::{DataError, Result, StoreError};
pub use layer::DataLayer;
pub use metrics::{EndpointStats, MetricsCollector, MetricsSink, OperationMetric, PrometheusSink};
pub use repository::CacheFirstRepository;
pub use source::{InMemoryLocalStore, LocalDataSource, RemoteDataSource};

pub use partysync_core_resilience::{
    Admission, CancellationToken, CircuitBreaker, CircuitBreakerConfig, CircuitState,
    ErrorClassifier, ErrorKind, Pending, ResilienceError, RetryConfig, RetryExecutor,
    TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
