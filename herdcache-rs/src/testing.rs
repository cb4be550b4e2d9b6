//! Provides helpers and stub collaborators which are shared by the tests of all modules.
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::lock::{DistributedLock, LockToken};
use crate::source::DataSource;
use crate::store::{CacheStore, MemoryStore};

/// Executes async code within a single threaded tokio runtime.
pub fn test_async<F: std::future::Future>(future: F) {
    use tokio::runtime;

    let rt = runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let _ = rt.block_on(future);
}

/// Executes async code within a multi threaded tokio runtime.
pub fn test_async_multi_threaded<F: std::future::Future>(future: F) {
    use tokio::runtime;

    let rt = runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    let _ = rt.block_on(future);
}

type Lookup = Box<dyn Fn(&u32) -> anyhow::Result<Option<String>> + Send + Sync>;

/// Provides a data source which counts its invocations and optionally simulates latency.
pub struct CountingSource {
    lookup: Lookup,
    latency: Duration,
    populates: AtomicUsize,
    batches: Mutex<Vec<Vec<usize>>>,
}

impl CountingSource {
    /// Creates a source which computes its values using the given function.
    pub fn new(
        lookup: impl Fn(&u32) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    ) -> Self {
        CountingSource {
            lookup: Box::new(lookup),
            latency: Duration::ZERO,
            populates: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Creates a source which yields "V" followed by the key for every key.
    pub fn echo() -> Self {
        CountingSource::new(|key| Ok(Some(format!("V{}", key))))
    }

    /// Makes each call sleep for the given duration before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Returns the number of single populate calls.
    pub fn populates(&self) -> usize {
        self.populates.load(Ordering::SeqCst)
    }

    /// Returns the positions requested by each batch populate call.
    pub fn batches(&self) -> Vec<Vec<usize>> {
        self.batches.lock().unwrap().clone()
    }

    async fn wait(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl DataSource<u32, String> for CountingSource {
    async fn populate(&self, key: &u32) -> anyhow::Result<Option<String>> {
        let _ = self.populates.fetch_add(1, Ordering::SeqCst);
        self.wait().await;
        (self.lookup)(key)
    }

    async fn populate_batch(
        &self,
        keys: &[u32],
        positions: &[usize],
    ) -> anyhow::Result<Vec<Option<String>>> {
        self.batches.lock().unwrap().push(positions.to_vec());
        self.wait().await;
        positions
            .iter()
            .map(|position| (self.lookup)(&keys[*position]))
            .collect()
    }
}

/// Provides a lock which is always held by someone else.
#[derive(Default)]
pub struct DenyingLock {
    attempts: AtomicUsize,
}

impl DenyingLock {
    /// Returns the number of acquisition attempts.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistributedLock for DenyingLock {
    async fn try_acquire(&self, _name: &str, _ttl: Duration) -> anyhow::Result<Option<LockToken>> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn release(&self, _token: LockToken) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Provides a lock which is always granted but reports each release as lost (as if its TTL had
/// expired during the populate).
#[derive(Default)]
pub struct ExpiringLock {
    releases: AtomicUsize,
}

impl ExpiringLock {
    /// Returns the number of release calls.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistributedLock for ExpiringLock {
    async fn try_acquire(&self, name: &str, _ttl: Duration) -> anyhow::Result<Option<LockToken>> {
        Ok(Some(LockToken::new(name)))
    }

    async fn release(&self, _token: LockToken) -> anyhow::Result<bool> {
        let _ = self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }
}

/// Provides a lock whose backend is unreachable.
#[derive(Default)]
pub struct FailingLock {
    attempts: AtomicUsize,
}

impl FailingLock {
    /// Returns the number of acquisition attempts.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistributedLock for FailingLock {
    async fn try_acquire(&self, _name: &str, _ttl: Duration) -> anyhow::Result<Option<LockToken>> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("lock backend unavailable"))
    }

    async fn release(&self, _token: LockToken) -> anyhow::Result<bool> {
        Err(anyhow::anyhow!("lock backend unavailable"))
    }
}

/// Provides a store whose reads or writes can be switched to fail.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore<u32, String>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl FailingStore {
    /// Makes **get** and **exists** fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes **set** and **delete** fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of read attempts (**get** and **exists**).
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Returns the number of write attempts (**set** and **delete**).
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, counter: &AtomicUsize, fail: &AtomicBool) -> anyhow::Result<()> {
        let _ = counter.fetch_add(1, Ordering::SeqCst);
        if fail.load(Ordering::SeqCst) {
            Err(anyhow::anyhow!("cache store unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore<u32, String> for FailingStore {
    async fn get(&self, key: &u32) -> anyhow::Result<Option<String>> {
        self.check(&self.reads, &self.fail_reads)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &u32, value: &String, ttl: Duration) -> anyhow::Result<()> {
        self.check(&self.writes, &self.fail_writes)?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &u32) -> anyhow::Result<()> {
        self.check(&self.writes, &self.fail_writes)?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &u32) -> anyhow::Result<bool> {
        self.check(&self.reads, &self.fail_reads)?;
        self.inner.exists(key).await
    }
}

/// Provides a store which records all modifying operations.
///
/// Keys which are marked as stale are reported by **exists** but are not readable via **get**,
/// just like an entry which is about to expire.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore<u32, String>,
    stale: Mutex<HashSet<u32>>,
    operations: Mutex<Vec<String>>,
}

impl RecordingStore {
    /// Marks the given key as stale.
    pub fn with_stale(self, key: u32) -> Self {
        let _ = self.stale.lock().unwrap().insert(key);
        self
    }

    /// Returns the recorded operations, like "exists 1", "delete 1" or "set 1 V1".
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }

    fn record(&self, operation: String) {
        self.operations.lock().unwrap().push(operation);
    }
}

#[async_trait]
impl CacheStore<u32, String> for RecordingStore {
    async fn get(&self, key: &u32) -> anyhow::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &u32, value: &String, ttl: Duration) -> anyhow::Result<()> {
        self.record(format!("set {} {}", key, value));
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &u32) -> anyhow::Result<()> {
        self.record(format!("delete {}", key));
        let _ = self.stale.lock().unwrap().remove(key);
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &u32) -> anyhow::Result<bool> {
        self.record(format!("exists {}", key));
        let stale = self.stale.lock().unwrap().contains(key);
        Ok(stale || self.inner.exists(key).await?)
    }
}
