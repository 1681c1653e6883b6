/*!
 * Data source abstractions
 *
 * The repository talks to two collaborators: an authoritative remote source
 * whose failures are classified and retried, and a local store that holds the
 * last acknowledged state and pushes changes to observers.
 */

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{BoxStream, StreamExt};
use partysync_core_resilience::TransportError;
use std::fmt;
use std::hash::Hash;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::error::StoreError;

/// Authoritative remote source of truth
///
/// Each call is one logical attempt; retries are the caller's business.
#[async_trait]
pub trait RemoteDataSource<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn get_item(&self, key: &K) -> Result<V, TransportError>;

    async fn save_item(&self, key: &K, value: &V) -> Result<(), TransportError>;

    async fn delete_item(&self, key: &K) -> Result<(), TransportError>;
}

/// Local persistent store with change notification
#[async_trait]
pub trait LocalDataSource<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// `Ok(None)` on a miss
    async fn get_item(&self, key: &K) -> Result<Option<V>, StoreError>;

    async fn save_item(&self, key: &K, value: &V) -> Result<(), StoreError>;

    async fn delete_item(&self, key: &K) -> Result<(), StoreError>;

    /// Live view of one key: yields the current value (if any) and every later write
    fn observe_item(&self, key: &K) -> BoxStream<'static, V>;
}

/// Local store kept in process memory
///
/// Every key owns a watch channel, so observers see the latest value and all
/// subsequent writes. Deleting a key keeps its channel alive for existing
/// observers.
pub struct InMemoryLocalStore<K, V> {
    items: DashMap<K, watch::Sender<Option<V>>>,
}

impl<K, V> fmt::Debug for InMemoryLocalStore<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryLocalStore")
            .field("keys", &self.items.len())
            .finish()
    }
}

impl<K, V> Default for InMemoryLocalStore<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            items: DashMap::new(),
        }
    }
}

impl<K, V> InMemoryLocalStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
        }
    }

    /// Number of keys currently holding a value
    pub fn len(&self) -> usize {
        self.items
            .iter()
            .filter(|entry| entry.value().borrow().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sender(&self, key: &K) -> watch::Sender<Option<V>> {
        self.items
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }
}

#[async_trait]
impl<K, V> LocalDataSource<K, V> for InMemoryLocalStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get_item(&self, key: &K) -> Result<Option<V>, StoreError> {
        let value = match self.items.get(key) {
            Some(sender) => sender.borrow().clone(),
            None => None,
        };
        Ok(value)
    }

    async fn save_item(&self, key: &K, value: &V) -> Result<(), StoreError> {
        self.sender(key).send_replace(Some(value.clone()));
        Ok(())
    }

    async fn delete_item(&self, key: &K) -> Result<(), StoreError> {
        if let Some(sender) = self.items.get(key) {
            sender.send_replace(None);
        }
        Ok(())
    }

    fn observe_item(&self, key: &K) -> BoxStream<'static, V> {
        WatchStream::new(self.sender(key).subscribe())
            .filter_map(|value| async move { value })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_save_get_delete() {
        let store: InMemoryLocalStore<String, u32> = InMemoryLocalStore::new();
        let key = "g1".to_string();

        assert_eq!(store.get_item(&key).await.unwrap(), None);
        store.save_item(&key, &7).await.unwrap();
        assert_eq!(store.get_item(&key).await.unwrap(), Some(7));
        assert_eq!(store.len(), 1);

        store.delete_item(&key).await.unwrap();
        assert_eq!(store.get_item(&key).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_observe_sees_current_then_updates() {
        let store: InMemoryLocalStore<&'static str, String> = InMemoryLocalStore::new();
        store.save_item(&"g1", &"first".to_string()).await.unwrap();

        let mut stream = store.observe_item(&"g1");
        assert_eq!(stream.next().await.as_deref(), Some("first"));

        store.save_item(&"g1", &"second".to_string()).await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert_eq!(next.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_observe_before_first_write() {
        let store: InMemoryLocalStore<u64, u64> = InMemoryLocalStore::new();
        let mut stream = store.observe_item(&1);

        store.save_item(&1, &42).await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert_eq!(next, Some(42));
    }

    #[tokio::test]
    async fn test_delete_skips_observers() {
        let store: InMemoryLocalStore<u64, u64> = InMemoryLocalStore::new();
        store.save_item(&1, &1).await.unwrap();
        let mut stream = store.observe_item(&1);
        assert_eq!(stream.next().await, Some(1));

        store.delete_item(&1).await.unwrap();
        store.save_item(&1, &2).await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert_eq!(next, Some(2));
    }
}
