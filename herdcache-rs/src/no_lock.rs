//! Provides uncoordinated access to a cache and its data source.
//!
//! The [NoLockAccessor](NoLockAccessor) reads the cache and, on a miss, directly populates it from
//! the data source. It neither takes the in-process lock nor the distributed lock, it never
//! retries and never waits. Therefore concurrent misses for the same key each hit the data
//! source (the thundering herd the coordinator exists to prevent). This is acceptable for
//! sources which are cheap enough or for callers which must never wait for another caller.
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::populate::Populator;
use crate::settings::Settings;
use crate::source::DataSource;
use crate::store::CacheStore;

/// Reads through a cache without any coordination.
///
/// Obtained via [Coordinator::no_lock](crate::coordinator::Coordinator::no_lock) it shares the
/// collaborators and the (reloadable) settings of the coordinator.
///
/// # Examples
/// ```
/// # use async_trait::async_trait;
/// # use herdcache::no_lock::NoLockAccessor;
/// # use herdcache::settings::Settings;
/// # use herdcache::source::DataSource;
/// # use herdcache::store::MemoryStore;
/// # use std::sync::Arc;
/// struct Doubler;
///
/// #[async_trait]
/// impl DataSource<u32, u32> for Doubler {
///     async fn populate(&self, key: &u32) -> anyhow::Result<Option<u32>> {
///         Ok(Some(key * 2))
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let accessor = NoLockAccessor::<u32, u32>::new(
///     Arc::new(MemoryStore::<u32, u32>::new()),
///     Arc::new(Doubler),
///     Settings::default(),
/// );
/// assert_eq!(accessor.find(&21).await?, Some(42));
/// # Ok(())
/// # }
/// ```
pub struct NoLockAccessor<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    populator: Arc<Populator<K, V>>,
    settings: Arc<ArcSwap<Settings>>,
}

impl<K, V> Clone for NoLockAccessor<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn clone(&self) -> Self {
        NoLockAccessor {
            populator: self.populator.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<K, V> NoLockAccessor<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a standalone accessor for the given store and data source.
    pub fn new(
        store: Arc<dyn CacheStore<K, V>>,
        source: Arc<dyn DataSource<K, V>>,
        settings: Settings,
    ) -> Self {
        NoLockAccessor {
            populator: Arc::new(Populator::new(store, source)),
            settings: Arc::new(ArcSwap::from_pointee(settings)),
        }
    }

    pub(crate) fn shared(populator: Arc<Populator<K, V>>, settings: Arc<ArcSwap<Settings>>) -> Self {
        NoLockAccessor {
            populator,
            settings,
        }
    }

    /// Reads the value for the given key and populates it on a miss.
    ///
    /// Errors of the store or the data source are returned as they are.
    pub async fn find(&self, key: &K) -> anyhow::Result<Option<V>> {
        if let Some(value) = self.populator.read(key).await? {
            return Ok(Some(value));
        }

        let settings = self.settings.load_full();
        self.populator.populate(key, &settings).await
    }
}
