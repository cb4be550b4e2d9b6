//! Provides the hook which is applied to results right before they are handed out.
//!
//! Results are passed through the hook while the caller still holds shared access to the scope.
//! Therefore the hook sees the cache in the same state the result was read from. This can be used
//! to enrich or post-process cached values without storing the enriched version.
//!
//! Note that the [NoLockAccessor](crate::no_lock::NoLockAccessor) bypasses hooks just like it
//! bypasses every other part of the coordination.

/// Post-processes the results of a [Coordinator](crate::coordinator::Coordinator).
///
/// Both methods default to the identity, therefore only the relevant one has to be implemented.
pub trait ReturnHook<V>: Send + Sync {
    /// Invoked with the result of a single lookup.
    fn before_return(&self, value: Option<V>) -> Option<V> {
        value
    }

    /// Invoked with the result of a batch lookup.
    ///
    /// The hook must keep the length and order of the given values.
    fn before_batch_return(&self, values: Vec<Option<V>>) -> Vec<Option<V>> {
        values
    }
}

/// Hands out all results as they are.
#[derive(Default, Clone, Copy, Debug)]
pub struct PassThrough;

impl<V> ReturnHook<V> for PassThrough {}
