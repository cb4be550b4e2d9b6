#[cfg(test)]
use mock_instant::thread_local::Instant;
#[cfg(not(test))]
use std::time::Instant;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::lock::{DistributedLock, LockToken};

/// Provides a [DistributedLock](DistributedLock) which lives within the current process.
///
/// This is the lock of choice if a cache is only used by a single process, as the in-process
/// read/write lock of the coordinator then already provides all required exclusivity. Sharing one
/// instance (via **Arc**) between several coordinators of the same scope also permits to simulate
/// several processes which share a cache.
///
/// # Examples
/// ```
/// # use herdcache::lock::{DistributedLock, LocalLock};
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let lock = LocalLock::new();
///
/// let token = lock.try_acquire("lock_test", Duration::from_secs(10)).await?.unwrap();
/// assert!(lock.try_acquire("lock_test", Duration::from_secs(10)).await?.is_none());
///
/// assert!(lock.release(token).await?);
/// assert!(lock.try_acquire("lock_test", Duration::from_secs(10)).await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct LocalLock {
    holders: Mutex<HashMap<String, Holder>>,
}

struct Holder {
    value: String,
    expires: Instant,
}

impl LocalLock {
    /// Creates a new lock table without any held locks.
    pub fn new() -> Self {
        LocalLock {
            holders: Mutex::new(HashMap::new()),
        }
    }

    /// Determines if the lock with the given name is currently held (and not yet expired).
    pub fn is_held(&self, name: &str) -> bool {
        self.holders()
            .map(|holders| {
                holders
                    .get(name)
                    .map(|holder| holder.expires > Instant::now())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    fn holders(&self) -> anyhow::Result<MutexGuard<'_, HashMap<String, Holder>>> {
        self.holders
            .lock()
            .map_err(|_| anyhow::anyhow!("The lock table has been poisoned by a panic!"))
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> anyhow::Result<Option<LockToken>> {
        let mut holders = self.holders()?;
        let now = Instant::now();

        if let Some(holder) = holders.get(name) {
            if holder.expires > now {
                return Ok(None);
            }
        }

        let token = LockToken::new(name);
        let _ = holders.insert(
            name.to_owned(),
            Holder {
                value: token.value().to_owned(),
                expires: now + ttl,
            },
        );

        Ok(Some(token))
    }

    async fn release(&self, token: LockToken) -> anyhow::Result<bool> {
        let mut holders = self.holders()?;
        let owned = holders
            .get(token.name())
            .map(|holder| holder.value == token.value() && holder.expires > Instant::now())
            .unwrap_or(false);

        if owned {
            let _ = holders.remove(token.name());
        }

        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use crate::lock::{DistributedLock, LocalLock};
    use mock_instant::thread_local::MockClock;
    use std::time::Duration;

    #[test]
    fn locks_are_exclusive_per_name() {
        crate::testing::test_async(async {
            let lock = LocalLock::new();
            let ttl = Duration::from_secs(10);

            let first = lock.try_acquire("lock_exclusive_a", ttl).await.unwrap();
            assert!(first.is_some());
            assert!(lock
                .try_acquire("lock_exclusive_a", ttl)
                .await
                .unwrap()
                .is_none());

            // Another name is a different lock...
            assert!(lock
                .try_acquire("lock_exclusive_b", ttl)
                .await
                .unwrap()
                .is_some());

            assert!(lock.release(first.unwrap()).await.unwrap());
            assert!(!lock.is_held("lock_exclusive_a"));
        });
    }

    #[test]
    fn expired_locks_are_taken_over_and_not_released_by_the_former_holder() {
        crate::testing::test_async(async {
            let lock = LocalLock::new();
            let ttl = Duration::from_secs(1);

            let stale = lock
                .try_acquire("lock_expiry", ttl)
                .await
                .unwrap()
                .unwrap();

            // Let the TTL elapse while the first holder is still "populating"...
            MockClock::advance(Duration::from_secs(2));
            assert!(!lock.is_held("lock_expiry"));

            // ...so that a second holder can take over...
            let current = lock
                .try_acquire("lock_expiry", ttl)
                .await
                .unwrap()
                .unwrap();

            // ...and the first holder must not remove the lock of the second one.
            assert!(!lock.release(stale).await.unwrap());
            assert!(lock.is_held("lock_expiry"));
            assert!(lock.release(current).await.unwrap());
        });
    }
}
