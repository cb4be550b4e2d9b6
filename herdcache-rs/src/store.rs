//! Defines the fast cache store which is kept in sync with the data source.
//!
//! The coordinator only needs a handful of operations from a cache: point reads, bulk reads,
//! writes with a TTL, deletes and an existence check. Anything beyond that (eviction, expiry,
//! serialization of values) is the business of the store implementation.
//!
//! Two implementations are provided: [MemoryStore](MemoryStore) for a single process (and for
//! tests) and [RedisStore](crate::redis::RedisStore) for caches shared by several processes.
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

/// Describes the cache which is populated by a [Coordinator](crate::coordinator::Coordinator).
///
/// Note that a store must never contain an "absent" marker. A missing entry is reported as
/// **None** and the coordinator never writes a **None** into the store.
#[async_trait]
pub trait CacheStore<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync,
{
    /// Reads the value stored for the given key.
    async fn get(&self, key: &K) -> anyhow::Result<Option<V>>;

    /// Reads the values for all given keys.
    ///
    /// The result must contain exactly one entry per key in the order of the given keys. The
    /// default implementation performs one **get** after another. Stores which support bulk
    /// reads natively should override this.
    async fn get_many(&self, keys: &[K]) -> anyhow::Result<Vec<Option<V>>> {
        let mut result = Vec::with_capacity(keys.len());
        for key in keys {
            result.push(self.get(key).await?);
        }

        Ok(result)
    }

    /// Stores the given value for the given key with the given time to live.
    async fn set(&self, key: &K, value: &V, ttl: Duration) -> anyhow::Result<()>;

    /// Removes the value stored for the given key (if any).
    async fn delete(&self, key: &K) -> anyhow::Result<()>;

    /// Determines if a value is stored for the given key.
    async fn exists(&self, key: &K) -> anyhow::Result<bool>;
}

/// Provides a plain in-process map as cache store.
///
/// This store never evicts anything and ignores the TTL passed to **set**. It is intended for
/// single process setups where the cached data is bounded by the domain anyway, and for tests.
///
/// # Examples
/// ```
/// # use herdcache::store::{CacheStore, MemoryStore};
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let store = MemoryStore::<u32, String>::new();
/// store.set(&42, &"V".to_owned(), Duration::from_secs(60)).await?;
///
/// assert_eq!(store.get(&42).await?, Some("V".to_owned()));
/// assert_eq!(store.exists(&7).await?, false);
/// # Ok(())
/// # }
/// ```
pub struct MemoryStore<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K, V> MemoryStore<K, V>
where
    K: Eq + Hash,
{
    /// Creates a new and empty store.
    pub fn new() -> Self {
        MemoryStore {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> anyhow::Result<usize> {
        Ok(self.entries()?.len())
    }

    /// Determines if the store is empty.
    pub fn is_empty(&self) -> anyhow::Result<bool> {
        Ok(self.len()? == 0)
    }

    fn entries(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<K, V>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("The memory store has been poisoned by a panic!"))
    }
}

impl<K, V> Default for MemoryStore<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> CacheStore<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &K) -> anyhow::Result<Option<V>> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn get_many(&self, keys: &[K]) -> anyhow::Result<Vec<Option<V>>> {
        let entries = self.entries()?;
        Ok(keys.iter().map(|key| entries.get(key).cloned()).collect())
    }

    async fn set(&self, key: &K, value: &V, _ttl: Duration) -> anyhow::Result<()> {
        let _ = self.entries()?.insert(key.clone(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &K) -> anyhow::Result<()> {
        let _ = self.entries()?.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &K) -> anyhow::Result<bool> {
        Ok(self.entries()?.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use crate::store::{CacheStore, MemoryStore};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn bulk_reads_are_positional() {
        crate::testing::test_async(async {
            let store = MemoryStore::<u32, String>::new();
            store
                .set(&1, &"one".to_owned(), Duration::from_secs(1))
                .await
                .unwrap();
            store
                .set(&3, &"three".to_owned(), Duration::from_secs(1))
                .await
                .unwrap();

            let values = store.get_many(&[1, 2, 3, 4]).await.unwrap();
            assert_eq!(
                values,
                vec![Some("one".to_owned()), None, Some("three".to_owned()), None]
            );
        });
    }

    #[test]
    fn deleted_entries_are_gone() {
        crate::testing::test_async(async {
            let store = MemoryStore::<&str, i32>::new();
            store
                .set(&"key", &42, Duration::from_secs(1))
                .await
                .unwrap();
            assert!(store.exists(&"key").await.unwrap());

            store.delete(&"key").await.unwrap();
            assert!(!store.exists(&"key").await.unwrap());
            assert!(store.is_empty().unwrap());
        });
    }

    #[test]
    fn poisoned_stores_report_errors_instead_of_being_empty() {
        let store = Arc::new(MemoryStore::<u32, String>::new());
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _entries = poisoner.entries.lock().unwrap();
            panic!("Poisoning the store...");
        })
        .join();

        assert!(store.len().is_err());
        assert!(store.is_empty().is_err());
        crate::testing::test_async(async {
            assert!(store.exists(&1).await.is_err());
        });
    }
}
