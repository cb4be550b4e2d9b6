//! Defines the slow but authoritative data source behind a cache.
//!
//! A data source is only ever invoked by the populate path: either by the coordinator, once it
//! holds both the in-process write lock and the distributed lock of its scope, or by the
//! [NoLockAccessor](crate::no_lock::NoLockAccessor) which doesn't coordinate at all.
use async_trait::async_trait;

use crate::error::CoordinatorError;

/// Describes the authoritative data source which is used to populate a cache.
///
/// Only **populate** has to be provided. Sources which are used with
/// [batch_find](crate::coordinator::Coordinator::batch_find) also have to implement
/// **populate_batch**, otherwise the first batch lookup with a miss fails with
/// [CoordinatorError::Unsupported](CoordinatorError::Unsupported).
///
/// # Examples
/// ```
/// # use async_trait::async_trait;
/// # use herdcache::source::DataSource;
/// struct Squares;
///
/// #[async_trait]
/// impl DataSource<u64, u64> for Squares {
///     async fn populate(&self, key: &u64) -> anyhow::Result<Option<u64>> {
///         Ok(Some(key * key))
///     }
///
///     async fn populate_batch(
///         &self,
///         keys: &[u64],
///         positions: &[usize],
///     ) -> anyhow::Result<Vec<Option<u64>>> {
///         Ok(positions.iter().map(|pos| Some(keys[*pos] * keys[*pos])).collect())
///     }
/// }
/// ```
#[async_trait]
pub trait DataSource<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync,
{
    /// Fetches the value for the given key or **None** if the source doesn't know it.
    ///
    /// Errors are passed on to the caller of the coordinator as they are. They are never retried.
    async fn populate(&self, key: &K) -> anyhow::Result<Option<V>>;

    /// Fetches the values for the keys at the given positions.
    ///
    /// The result must contain exactly one entry per position, in the order of **positions**.
    /// Keys at other positions are already cached and must not be fetched.
    async fn populate_batch(
        &self,
        _keys: &[K],
        _positions: &[usize],
    ) -> anyhow::Result<Vec<Option<V>>> {
        Err(CoordinatorError::Unsupported("populate_batch").into())
    }
}
