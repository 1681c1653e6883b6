/*!
 * Cache-first repository
 *
 * Reads go cache → local store → remote, with the remote result written back
 * to both faster tiers. Writes go remote first; the local store and cache only
 * ever hold values the remote has acknowledged.
 *
 * Every remote call runs through the repository's [`RetryExecutor`], so one
 * circuit breaker guards one repository (operation class).
 */

use futures::stream::BoxStream;
use partysync_core_resilience::{
    CancellationToken, CircuitState, Pending, RetryConfig, RetryExecutor,
};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{CacheStats, ResponseCache};
use crate::error::{DataError, Result};
use crate::source::{LocalDataSource, RemoteDataSource};

/// Metric endpoint names for one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub get: String,
    pub save: String,
    pub delete: String,
}

impl Endpoints {
    fn for_repository(name: &str) -> Self {
        Self {
            get: format!("{}.get", name),
            save: format!("{}.save", name),
            delete: format!("{}.delete", name),
        }
    }
}

/// Repository over a remote source of truth with local and in-memory tiers
pub struct CacheFirstRepository<K, V> {
    name: Arc<str>,
    endpoints: Arc<Endpoints>,
    remote: Arc<dyn RemoteDataSource<K, V>>,
    local: Arc<dyn LocalDataSource<K, V>>,
    cache: Option<Arc<ResponseCache<K, V>>>,
    cache_ttl: Duration,
    executor: RetryExecutor,
    retry: RetryConfig,
}

impl<K, V> Clone for CacheFirstRepository<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            endpoints: Arc::clone(&self.endpoints),
            remote: Arc::clone(&self.remote),
            local: Arc::clone(&self.local),
            cache: self.cache.clone(),
            cache_ttl: self.cache_ttl,
            executor: self.executor.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<K, V> fmt::Debug for CacheFirstRepository<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheFirstRepository")
            .field("name", &self.name)
            .field("cached", &self.cache.is_some())
            .field("cache_ttl", &self.cache_ttl)
            .field("executor", &self.executor)
            .field("retry", &self.retry)
            .finish()
    }
}

impl<K, V> CacheFirstRepository<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a repository without an in-memory cache, using the default retry policy
    pub fn new(
        name: impl Into<String>,
        remote: Arc<dyn RemoteDataSource<K, V>>,
        local: Arc<dyn LocalDataSource<K, V>>,
        executor: RetryExecutor,
    ) -> Self {
        let name: String = name.into();
        Self {
            endpoints: Arc::new(Endpoints::for_repository(&name)),
            name: name.into(),
            remote,
            local,
            cache: None,
            cache_ttl: crate::cache::DEFAULT_TTL,
            executor,
            retry: RetryConfig::default(),
        }
    }

    /// Put a shared response cache in front of the local store
    pub fn with_cache(mut self, cache: Arc<ResponseCache<K, V>>, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Fetch a value, preferring the cache and local store unless `force_refresh`
    pub async fn get(&self, key: &K, force_refresh: bool) -> Result<V> {
        self.get_with_cancel(key, force_refresh, &CancellationToken::new())
            .await
    }

    /// [`get`](Self::get) whose remote retries stop when `cancel` fires
    pub async fn get_with_cancel(
        &self,
        key: &K,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<V> {
        if !force_refresh {
            if let Some(value) = self.cache.as_ref().and_then(|cache| cache.get(key)) {
                debug!(repository = %self.name, ?key, "Cache hit");
                return Ok(value);
            }

            match self.local.get_item(key).await {
                Ok(Some(value)) => {
                    debug!(repository = %self.name, ?key, "Local store hit");
                    self.populate_cache(key, &value);
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(repository = %self.name, ?key, error = %e, "Local read failed, falling back to remote");
                }
            }
        }

        debug!(repository = %self.name, ?key, force_refresh, "Fetching from remote");
        let remote = &self.remote;
        let value = self
            .executor
            .execute_with_retry(&self.endpoints.get, &self.retry, cancel, move || {
                remote.get_item(key)
            })
            .await?;

        if let Err(e) = self.local.save_item(key, &value).await {
            warn!(repository = %self.name, ?key, error = %e, "Local write-back failed");
        }
        self.populate_cache(key, &value);
        Ok(value)
    }

    /// Write remote first, then the local store and cache
    pub async fn save(&self, key: &K, value: V) -> Result<()> {
        self.save_with_cancel(key, value, &CancellationToken::new())
            .await
    }

    /// [`save`](Self::save) whose remote retries stop when `cancel` fires
    pub async fn save_with_cancel(
        &self,
        key: &K,
        value: V,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let remote = &self.remote;
        let pending_value = &value;
        self.executor
            .execute_with_retry(&self.endpoints.save, &self.retry, cancel, move || {
                remote.save_item(key, pending_value)
            })
            .await?;

        if let Err(e) = self.local.save_item(key, &value).await {
            // the cache must not serve a value the local store does not hold
            self.invalidate(key);
            warn!(repository = %self.name, ?key, error = %e, "Remote save acknowledged but local write failed");
            return Err(DataError::LocalStore(e));
        }
        self.populate_cache(key, &value);
        debug!(repository = %self.name, ?key, "Saved");
        Ok(())
    }

    /// Delete remote first, then locally
    pub async fn delete(&self, key: &K) -> Result<()> {
        self.delete_with_cancel(key, &CancellationToken::new())
            .await
    }

    pub async fn delete_with_cancel(&self, key: &K, cancel: &CancellationToken) -> Result<()> {
        let remote = &self.remote;
        self.executor
            .execute_with_retry(&self.endpoints.delete, &self.retry, cancel, move || {
                remote.delete_item(key)
            })
            .await?;

        self.invalidate(key);
        self.local.delete_item(key).await.map_err(|e| {
            warn!(repository = %self.name, ?key, error = %e, "Remote delete acknowledged but local delete failed");
            DataError::LocalStore(e)
        })
    }

    /// Run [`get`](Self::get) on the runtime and return a cancellable handle
    pub fn spawn_get(&self, key: K, force_refresh: bool) -> Pending<V, DataError> {
        let repo = self.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            repo.get_with_cancel(&key, force_refresh, &token).await
        });
        Pending::new(handle, cancel)
    }

    /// Run [`save`](Self::save) on the runtime and return a cancellable handle
    pub fn spawn_save(&self, key: K, value: V) -> Pending<(), DataError> {
        let repo = self.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle =
            tokio::spawn(async move { repo.save_with_cancel(&key, value, &token).await });
        Pending::new(handle, cancel)
    }

    /// Run [`delete`](Self::delete) on the runtime and return a cancellable handle
    pub fn spawn_delete(&self, key: K) -> Pending<(), DataError> {
        let repo = self.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { repo.delete_with_cancel(&key, &token).await });
        Pending::new(handle, cancel)
    }

    /// Live view of a key, served by the local store only
    pub fn observe(&self, key: &K) -> BoxStream<'static, V> {
        self.local.observe_item(key)
    }

    /// Drop a key from the in-memory cache; returns whether it was cached
    pub fn invalidate(&self, key: &K) -> bool {
        self.cache
            .as_ref()
            .is_some_and(|cache| cache.invalidate(key))
    }

    pub fn circuit_status(&self) -> String {
        self.executor.breaker().status()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.executor.breaker().state()
    }

    /// Manually close this repository's circuit
    pub fn reset_circuit(&self) {
        self.executor.breaker().reset();
    }

    /// `None` when the repository runs without a cache
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    fn populate_cache(&self, key: &K, value: &V) {
        if let Some(cache) = &self.cache {
            if !cache.put(key.clone(), value.clone(), self.cache_ttl) {
                debug!(repository = %self.name, ?key, "Cache full, value not cached");
            }
        }
    }
}
