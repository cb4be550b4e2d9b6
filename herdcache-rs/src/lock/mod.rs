//! Defines the TTL bounded mutex which is shared by all processes using the same cache.
//!
//! A lock is identified by its name (see [Scope::lock_name](crate::scope::Scope::lock_name)). It
//! is acquired by atomically creating an entry which expires after the given TTL, so that a
//! crashed holder cannot block all other processes forever.
//!
//! Each successful acquisition yields a [LockToken](LockToken) which carries a random value.
//! Releasing a lock only deletes the entry if it still carries this value. Without this check, a
//! holder whose TTL expired while it was still populating would delete the lock of the next
//! holder. **release** reports such a case by returning **false**.
//!
//! A [HeldLock](HeldLock) wraps an acquired token and releases it once it is dropped, so that a
//! caller which is cancelled while populating doesn't block everyone else until the TTL expires.
//!
//! [LocalLock](local::LocalLock) provides an in-process implementation,
//! [RedisLock](crate::redis::RedisLock) one which is backed by Redis.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub mod local;

pub use local::LocalLock;

/// Proves the ownership of an acquired lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockToken {
    name: String,
    value: String,
}

impl LockToken {
    /// Creates a new token with a random value for the lock with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        LockToken {
            name: name.into(),
            value: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Returns the name of the lock this token belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the random value which identifies the holder.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Describes a mutex which is shared across process boundaries and expires after a given TTL.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Tries to acquire the lock with the given name.
    ///
    /// This must never wait for the lock to become available. If another holder owns the lock,
    /// **None** is returned immediately.
    async fn try_acquire(&self, name: &str, ttl: Duration) -> anyhow::Result<Option<LockToken>>;

    /// Releases a previously acquired lock.
    ///
    /// Returns **false** if the lock was no longer owned by the given token, as it either expired
    /// or has been acquired by someone else in the meantime. In this case, nothing is deleted.
    async fn release(&self, token: LockToken) -> anyhow::Result<bool>;
}

/// Keeps an acquired lock until it is either released explicitly or dropped.
///
/// Dropping a **HeldLock** which hasn't been released spawns a task onto the current tokio
/// runtime which performs the release. Outside of a runtime, the lock is left to expire.
pub struct HeldLock {
    lock: Arc<dyn DistributedLock>,
    token: Option<LockToken>,
}

impl HeldLock {
    /// Wraps the given token which has been acquired from the given lock.
    pub fn new(lock: Arc<dyn DistributedLock>, token: LockToken) -> Self {
        HeldLock {
            lock,
            token: Some(token),
        }
    }

    /// Returns the name of the held lock.
    pub fn name(&self) -> &str {
        self.token.as_ref().map(LockToken::name).unwrap_or_default()
    }

    /// Releases the lock (see [DistributedLock::release](DistributedLock::release)).
    pub async fn release(mut self) -> anyhow::Result<bool> {
        match self.token.clone() {
            Some(token) => {
                let result = self.lock.release(token).await;
                self.token = None;
                result
            }
            None => Ok(false),
        }
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        let token = match self.token.take() {
            Some(token) => token,
            None => return,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let lock = self.lock.clone();
                let _ = runtime.spawn(async move {
                    let name = token.name().to_owned();
                    match lock.release(token).await {
                        Ok(_) => log::debug!("Released the abandoned lock {}.", name),
                        Err(error) => log::warn!(
                            "Failed to release the abandoned lock {}. \
                             It will expire on its own: {:#}",
                            name,
                            error
                        ),
                    }
                });
            }
            Err(_) => log::warn!(
                "The lock {} was abandoned outside of a runtime and will expire on its own.",
                token.name()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::lock::{DistributedLock, HeldLock, LocalLock};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn dropped_locks_are_released() {
        crate::testing::test_async(async {
            let lock = Arc::new(LocalLock::new());
            let token = lock
                .try_acquire("lock_dropped", Duration::from_secs(10))
                .await
                .unwrap()
                .unwrap();

            let held = HeldLock::new(lock.clone(), token);
            assert_eq!(held.name(), "lock_dropped");
            drop(held);

            tokio::time::sleep(Duration::from_millis(5)).await;
            assert!(!lock.is_held("lock_dropped"));
        });
    }

    #[test]
    fn released_locks_are_not_released_again() {
        crate::testing::test_async(async {
            let lock = Arc::new(LocalLock::new());
            let token = lock
                .try_acquire("lock_released", Duration::from_secs(10))
                .await
                .unwrap()
                .unwrap();

            assert!(HeldLock::new(lock.clone(), token).release().await.unwrap());

            // Someone else acquires the lock, which must survive the former guard...
            let next = lock
                .try_acquire("lock_released", Duration::from_secs(10))
                .await
                .unwrap();
            assert!(next.is_some());
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert!(lock.is_held("lock_released"));
        });
    }
}
