//! Contains the read and populate steps shared by the coordinated and the uncoordinated path.
//!
//! Nothing in here performs any locking. The [Coordinator](crate::coordinator::Coordinator) wraps
//! these steps in its locking protocol, the [NoLockAccessor](crate::no_lock::NoLockAccessor) calls
//! them as they are.
use std::sync::Arc;

use crate::error::ensure_batch_len;
use crate::settings::{Settings, WritePolicy};
use crate::source::DataSource;
use crate::store::CacheStore;

pub(crate) struct Populator<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    store: Arc<dyn CacheStore<K, V>>,
    source: Arc<dyn DataSource<K, V>>,
}

impl<K, V> Populator<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    pub(crate) fn new(store: Arc<dyn CacheStore<K, V>>, source: Arc<dyn DataSource<K, V>>) -> Self {
        Populator { store, source }
    }

    pub(crate) async fn read(&self, key: &K) -> anyhow::Result<Option<V>> {
        self.store.get(key).await
    }

    pub(crate) async fn read_many(&self, keys: &[K]) -> anyhow::Result<Vec<Option<V>>> {
        let values = self.store.get_many(keys).await?;
        ensure_batch_len("get_many", keys.len(), &values)?;

        Ok(values)
    }

    /// Fetches the value for the given key from the data source and writes it into the cache.
    pub(crate) async fn populate(&self, key: &K, settings: &Settings) -> anyhow::Result<Option<V>> {
        let value = self.source.populate(key).await?;
        if let Some(value) = &value {
            self.write(key, value, settings).await?;
        }

        Ok(value)
    }

    /// Fetches the values for the given positions from the data source, writes them into the
    /// cache and merges them into **values** at their original positions.
    pub(crate) async fn populate_positions(
        &self,
        keys: &[K],
        positions: &[usize],
        values: &mut [Option<V>],
        settings: &Settings,
    ) -> anyhow::Result<()> {
        let populated = self.source.populate_batch(keys, positions).await?;
        ensure_batch_len("populate_batch", positions.len(), &populated)?;

        for (position, value) in positions.iter().copied().zip(populated) {
            if let Some(value) = &value {
                self.write(&keys[position], value, settings).await?;
            }
            values[position] = value;
        }

        Ok(())
    }

    async fn write(&self, key: &K, value: &V, settings: &Settings) -> anyhow::Result<()> {
        if settings.write_policy == WritePolicy::Replace && self.store.exists(key).await? {
            self.store.delete(key).await?;
        }

        self.store.set(key, value, settings.cache_ttl).await
    }
}

/// Determines the positions which are still missing.
pub(crate) fn absent_positions<V>(values: &[Option<V>]) -> Vec<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, value)| value.is_none())
        .map(|(position, _)| position)
        .collect()
}
