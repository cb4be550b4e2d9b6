//! Provides a cache store and a distributed lock which are both backed by Redis.
//!
//! Using Redis for both permits several processes to share one cache while still populating each
//! miss only once. The connection is a **redis::aio::ConnectionManager** which reconnects on its
//! own and can be cloned cheaply, so that every operation uses its own handle.
//!
//! Values are not serialized by this crate. Keys and values only have to be convertible to and
//! from Redis values (**ToRedisArgs** / **FromRedisValue**), which is already the case for
//! strings, numbers and byte vectors.
//!
//! # Locking
//! A lock is acquired via `SET <name> <token> NX EX <ttl>`. It is released by a small Lua script
//! which only deletes the key if it still contains the token of the caller. Redis only supports
//! TTLs in whole seconds here, therefore a TTL is rounded up to at least one second.
//!
//! # Example
//! ```no_run
//! # use herdcache::redis::{RedisLock, RedisStore};
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let client = redis::Client::open("redis://127.0.0.1:6379")?;
//! let connection = client.get_connection_manager().await?;
//!
//! let store = RedisStore::<String, String>::new(connection.clone());
//! let lock = RedisLock::new(connection);
//! # Ok(())
//! # }
//! ```
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, FromRedisValue, Script, ToRedisArgs};

use crate::error::ensure_batch_len;
use crate::lock::{DistributedLock, LockToken};
use crate::store::CacheStore;

/// Deletes the lock key only if it still carries the token of the caller.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Converts a TTL into the whole seconds expected by **EX** (at least one).
fn ttl_seconds(ttl: Duration) -> u64 {
    let seconds = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    seconds.max(1)
}

/// Connects to the Redis server at the given URL.
///
/// The returned connection manager can be cloned and shared by a [RedisStore](RedisStore) and a
/// [RedisLock](RedisLock).
pub async fn connect(url: &str) -> anyhow::Result<ConnectionManager> {
    log::info!("Connecting to Redis at {}...", url);
    let client = redis::Client::open(url)
        .map_err(|error| anyhow::anyhow!("Invalid Redis URL {}: {}", url, error))?;
    let connection = client
        .get_connection_manager()
        .await
        .map_err(|error| anyhow::anyhow!("Cannot connect to Redis at {}: {}", url, error))?;

    Ok(connection)
}

/// Provides a [CacheStore](CacheStore) which reads and writes plain Redis keys.
pub struct RedisStore<K, V> {
    connection: ConnectionManager,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> RedisStore<K, V> {
    /// Creates a new store which uses the given connection.
    pub fn new(connection: ConnectionManager) -> Self {
        RedisStore {
            connection,
            _types: PhantomData,
        }
    }
}

#[async_trait]
impl<K, V> CacheStore<K, V> for RedisStore<K, V>
where
    K: ToRedisArgs + Send + Sync,
    V: ToRedisArgs + FromRedisValue + Send + Sync,
{
    async fn get(&self, key: &K) -> anyhow::Result<Option<V>> {
        let mut connection = self.connection.clone();
        let value: Option<V> = connection.get(key).await?;

        Ok(value)
    }

    async fn get_many(&self, keys: &[K]) -> anyhow::Result<Vec<Option<V>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut connection = self.connection.clone();
        let values: Vec<Option<V>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut connection)
            .await?;
        ensure_batch_len("MGET", keys.len(), &values)?;

        Ok(values)
    }

    async fn set(&self, key: &K, value: &V, ttl: Duration) -> anyhow::Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection.set_ex(key, value, ttl_seconds(ttl)).await?;

        Ok(())
    }

    async fn delete(&self, key: &K) -> anyhow::Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection.del(key).await?;

        Ok(())
    }

    async fn exists(&self, key: &K) -> anyhow::Result<bool> {
        let mut connection = self.connection.clone();
        let exists: bool = connection.exists(key).await?;

        Ok(exists)
    }
}

/// Provides a [DistributedLock](DistributedLock) which is stored in Redis.
pub struct RedisLock {
    connection: ConnectionManager,
    release_script: Script,
}

impl RedisLock {
    /// Creates a new lock which uses the given connection.
    pub fn new(connection: ConnectionManager) -> Self {
        RedisLock {
            connection,
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> anyhow::Result<Option<LockToken>> {
        let token = LockToken::new(name);
        let mut connection = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(token.value())
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async(&mut connection)
            .await?;

        Ok(reply.map(|_| token))
    }

    async fn release(&self, token: LockToken) -> anyhow::Result<bool> {
        let mut connection = self.connection.clone();
        let deleted: i64 = self
            .release_script
            .key(token.name())
            .arg(token.value())
            .invoke_async(&mut connection)
            .await?;

        Ok(deleted == 1)
    }
}
