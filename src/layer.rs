/*!
 * Data layer composition root
 *
 * Owns the pieces that are shared across repositories (classifier, metrics
 * collector, Prometheus registry) and hands out repositories that each get
 * their own circuit breaker. Response caches are keyed by repository name as
 * well as key/value type, so two repositories over the same types never
 * serve each other's entries.
 */

use dashmap::DashMap;
use partysync_core_resilience::{
    AttemptObserver, CircuitBreaker, ErrorClassifier, RetryConfig, RetryExecutor,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{CacheStats, ResponseCache};
use crate::config::DataLayerConfig;
use crate::error::{DataError, Result};
use crate::metrics::{MetricsCollector, PrometheusSink};
use crate::repository::CacheFirstRepository;
use crate::source::{LocalDataSource, RemoteDataSource};

type SharedCache = Arc<dyn Any + Send + Sync>;

/// Repository name plus the concrete cache type
type CacheSlot = (String, TypeId);

/// Explicitly constructed owner of the shared resilience state
pub struct DataLayer {
    config: DataLayerConfig,
    retry: RetryConfig,
    classifier: ErrorClassifier,
    metrics: Arc<MetricsCollector>,
    caches: DashMap<CacheSlot, SharedCache>,
    registry: Option<Registry>,
}

impl fmt::Debug for DataLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLayer")
            .field("config", &self.config)
            .field("caches", &self.caches.len())
            .field("prometheus", &self.registry.is_some())
            .finish()
    }
}

impl DataLayer {
    /// Build from configuration; with `metrics.prometheus` set a private
    /// registry is created
    pub fn new(config: DataLayerConfig) -> Result<Self> {
        let registry = config.metrics.prometheus.then(Registry::new);
        Self::build(config, registry)
    }

    /// Build from configuration, exporting metrics on `registry`
    pub fn with_registry(config: DataLayerConfig, registry: Registry) -> Result<Self> {
        Self::build(config, Some(registry))
    }

    fn build(config: DataLayerConfig, registry: Option<Registry>) -> Result<Self> {
        config.validate()?;
        let retry = config.retry.to_retry_config()?;

        let mut metrics = MetricsCollector::new(
            config.metrics.window,
            Duration::from_millis(config.metrics.slow_request_ms),
        );
        if let Some(registry) = &registry {
            let sink = PrometheusSink::new(registry)
                .map_err(|e| DataError::Config(format!("Failed to register metrics: {}", e)))?;
            metrics = metrics.with_sink(Arc::new(sink));
        }

        info!(
            max_retries = retry.max_retries,
            failure_threshold = config.circuit_breaker.failure_threshold,
            cache_enabled = config.cache.enabled,
            "Data layer initialized"
        );

        Ok(Self {
            classifier: config.retry.to_classifier(),
            retry,
            config,
            metrics: Arc::new(metrics),
            caches: DashMap::new(),
            registry,
        })
    }

    pub fn config(&self) -> &DataLayerConfig {
        &self.config
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn registry(&self) -> Option<&Registry> {
        self.registry.as_ref()
    }

    /// Prometheus text exposition of the exported metrics
    pub fn metrics_text(&self) -> Option<String> {
        let registry = self.registry.as_ref()?;
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .ok()?;
        String::from_utf8(buffer).ok()
    }

    /// The response cache of the repository named `repository`
    ///
    /// Repository handles built under the same name share it. `None` when
    /// caching is disabled.
    pub fn cache<K, V>(&self, repository: &str) -> Option<Arc<ResponseCache<K, V>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        if !self.config.cache.enabled {
            return None;
        }
        let shared = self
            .caches
            .entry(cache_slot::<K, V>(repository))
            .or_insert_with(|| {
                debug!(
                    repository,
                    capacity = self.config.cache.capacity,
                    value_type = std::any::type_name::<V>(),
                    "Creating response cache"
                );
                Arc::new(ResponseCache::<K, V>::new(
                    self.config.cache.capacity,
                    self.config.cache.ttl(),
                )) as SharedCache
            })
            .clone();
        shared.downcast::<ResponseCache<K, V>>().ok()
    }

    /// Repository named `name` with its own circuit breaker
    ///
    /// Metric endpoints are `<name>.get`, `<name>.save` and `<name>.delete`.
    pub fn repository<K, V>(
        &self,
        name: impl Into<String>,
        remote: Arc<dyn RemoteDataSource<K, V>>,
        local: Arc<dyn LocalDataSource<K, V>>,
    ) -> CacheFirstRepository<K, V>
    where
        K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let breaker = Arc::new(CircuitBreaker::new(
            self.config.circuit_breaker.to_breaker_config(),
        ));
        let observer: Arc<dyn AttemptObserver> = self.metrics.clone();
        let executor = RetryExecutor::new(breaker, self.classifier).with_observer(observer);

        let name: String = name.into();
        let cache = self.cache::<K, V>(&name);
        let repository = CacheFirstRepository::new(name, remote, local, executor)
            .with_retry_config(self.retry.clone());
        match cache {
            Some(cache) => repository.with_cache(cache, self.config.cache.ttl()),
            None => repository,
        }
    }

    /// Stats for the cache of `repository`, if one has been created
    pub fn cache_stats<K, V>(&self, repository: &str) -> Option<CacheStats>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let shared = self
            .caches
            .get(&cache_slot::<K, V>(repository))?
            .clone();
        shared
            .downcast::<ResponseCache<K, V>>()
            .ok()
            .map(|cache| cache.stats())
    }
}

fn cache_slot<K: 'static, V: 'static>(repository: &str) -> CacheSlot {
    (repository.to_string(), TypeId::of::<ResponseCache<K, V>>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryLocalStore;
    use async_trait::async_trait;
    use partysync_core_resilience::TransportError;

    struct EchoRemote;

    #[async_trait]
    impl RemoteDataSource<u64, String> for EchoRemote {
        async fn get_item(&self, key: &u64) -> std::result::Result<String, TransportError> {
            Ok(format!("item-{}", key))
        }

        async fn save_item(&self, _: &u64, _: &String) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        async fn delete_item(&self, _: &u64) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    fn echo_repository(layer: &DataLayer, name: &str) -> CacheFirstRepository<u64, String> {
        layer.repository::<u64, String>(
            name,
            Arc::new(EchoRemote),
            Arc::new(InMemoryLocalStore::<u64, String>::new()),
        )
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = DataLayerConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(matches!(DataLayer::new(config), Err(DataError::Config(_))));

        let mut config = DataLayerConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(matches!(DataLayer::new(config), Err(DataError::Config(_))));
    }

    #[test]
    fn test_cache_shared_per_repository_name() {
        let layer = DataLayer::new(DataLayerConfig::default()).unwrap();

        let a = layer.cache::<u64, String>("groups").unwrap();
        let b = layer.cache::<u64, String>("groups").unwrap();
        let users = layer.cache::<u64, String>("users").unwrap();
        let other_type = layer.cache::<u64, u32>("groups").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &users));
        a.insert(1, "x".into());
        assert_eq!(b.len(), 1);
        assert!(users.is_empty());
        assert!(other_type.is_empty());
        assert_eq!(layer.cache_stats::<u64, String>("groups").unwrap().size, 1);
        assert_eq!(layer.cache_stats::<u64, String>("users").unwrap().size, 0);
        assert!(layer.cache_stats::<String, String>("groups").is_none());
    }

    #[test]
    fn test_cache_disabled() {
        let mut config = DataLayerConfig::default();
        config.cache.enabled = false;
        let layer = DataLayer::new(config).unwrap();
        assert!(layer.cache::<u64, String>("groups").is_none());
    }

    /// Remote answering `<prefix>-<key>`
    struct PrefixRemote(&'static str);

    #[async_trait]
    impl RemoteDataSource<u64, String> for PrefixRemote {
        async fn get_item(&self, key: &u64) -> std::result::Result<String, TransportError> {
            Ok(format!("{}-{}", self.0, key))
        }

        async fn save_item(&self, _: &u64, _: &String) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        async fn delete_item(&self, _: &u64) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_same_key_in_two_repositories_stays_separate() {
        let layer = DataLayer::new(DataLayerConfig::fast_preset()).unwrap();
        let users = layer.repository::<u64, String>(
            "users",
            Arc::new(PrefixRemote("user")),
            Arc::new(InMemoryLocalStore::<u64, String>::new()),
        );
        let groups = layer.repository::<u64, String>(
            "groups",
            Arc::new(PrefixRemote("group")),
            Arc::new(InMemoryLocalStore::<u64, String>::new()),
        );

        assert_eq!(users.get(&7, false).await.unwrap(), "user-7");
        assert_eq!(groups.get(&7, false).await.unwrap(), "group-7");
        assert_eq!(users.get(&7, false).await.unwrap(), "user-7");

        assert_eq!(users.cache_stats().unwrap().hits, 1);
        assert_eq!(groups.cache_stats().unwrap().size, 1);
        assert_eq!(layer.metrics().stats("groups.get").unwrap().total_requests, 1);
    }

    #[tokio::test]
    async fn test_repository_handles_with_same_name_share_cache() {
        let layer = DataLayer::new(DataLayerConfig::fast_preset()).unwrap();
        let first = echo_repository(&layer, "users");
        let second = echo_repository(&layer, "users");

        first.get(&7, false).await.unwrap();
        assert_eq!(second.cache_stats().unwrap().size, 1);
        assert_eq!(layer.metrics().stats("users.get").unwrap().total_requests, 1);
    }

    #[tokio::test]
    async fn test_prometheus_export() {
        let config = DataLayerConfig {
            metrics: crate::config::MetricsSettings {
                prometheus: true,
                ..Default::default()
            },
            ..DataLayerConfig::fast_preset()
        };
        let layer = DataLayer::new(config).unwrap();
        assert!(layer.registry().is_some());

        let repo = echo_repository(&layer, "groups");
        repo.get(&1, true).await.unwrap();

        let text = layer.metrics_text().unwrap();
        assert!(text.contains("partysync_requests_total"));
        assert!(text.contains("endpoint=\"groups.get\""));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        let config = DataLayerConfig::default();
        DataLayer::with_registry(config.clone(), registry.clone()).unwrap();

        let err = DataLayer::with_registry(config, registry).unwrap_err();
        assert!(err.to_string().contains("Failed to register metrics"));
    }

    #[test]
    fn test_metrics_text_without_prometheus() {
        let layer = DataLayer::new(DataLayerConfig::default()).unwrap();
        assert!(layer.metrics_text().is_none());
    }
}
