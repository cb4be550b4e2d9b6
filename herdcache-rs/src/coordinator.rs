//! Coordinates the population of a cache so that concurrent misses hit the data source only once.
//!
//! A [Coordinator](Coordinator) sits between its callers, a fast [CacheStore](CacheStore) and a
//! slow [DataSource](DataSource). Hits are served from the store under shared access. A miss
//! is resolved under exclusive access of the coordinator and, on top of that, while holding the
//! [DistributedLock](DistributedLock) of its [Scope](Scope). Therefore a miss is populated once per
//! process by the in-process lock and once across all processes sharing the store by the
//! distributed lock.
//!
//! # Protocol
//! Each attempt of a lookup runs through these steps:
//! 1. Read the cache under shared access. A hit is returned right away.
//! 2. Re-read the cache under exclusive access, as another caller might have populated the value
//!    while we were waiting. A hit is returned after downgrading to shared access.
//! 3. Try to acquire the distributed lock of the scope. Once acquired, the cache is read once
//!    more (another process might have populated it meanwhile), the data source is queried, the
//!    result is written into the cache and the lock is released. The value is returned after
//!    downgrading to shared access.
//! 4. If the lock is denied, the attempt is abandoned. After sleeping for the configured backoff
//!    the whole attempt is restarted from step 1.
//!
//! Exclusive access is always downgraded atomically (see **RwLockWriteGuard::downgrade**), so
//! that waiting readers never observe a moment without any lock being held. Note that exclusive
//! access spans the whole populate. All other callers of the same coordinator wait for the data
//! source, even if they are looking for a different key. Only one writer is queued at a time, all
//! others re-check the cache once they are admitted and find the freshly populated value.
//!
//! # Retries and cancellation
//! A lookup retries lock denials until the value shows up in the cache. Such a wait can be
//! bounded via **max_wait** (see [Settings](Settings)) or interrupted via a
//! **CancellationToken**. An interrupted wait is not an error: a single lookup yields **None**,
//! a batch lookup yields an empty **Vec**. Errors of the store, the data source or the lock
//! backend are never retried and are returned as they are.
//!
//! # Examples
//! ```
//! # use async_trait::async_trait;
//! # use herdcache::coordinator::Coordinator;
//! # use herdcache::scope::Scope;
//! # use herdcache::source::DataSource;
//! # use herdcache::store::MemoryStore;
//! # use std::sync::Arc;
//! struct Greetings;
//!
//! #[async_trait]
//! impl DataSource<String, String> for Greetings {
//!     async fn populate(&self, key: &String) -> anyhow::Result<Option<String>> {
//!         Ok(Some(format!("Hello {}", key)))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let coordinator = Coordinator::<String, String>::builder(Scope::new("greetings"))
//!     .store(Arc::new(MemoryStore::<String, String>::new()))
//!     .source(Arc::new(Greetings))
//!     .build()?;
//!
//! assert_eq!(
//!     coordinator.find(&"World".to_owned()).await?,
//!     Some("Hello World".to_owned())
//! );
//! assert_eq!(coordinator.stats().populates(), 1);
//! # Ok(())
//! # }
//! ```
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::builder::Builder;
use crate::config::Config;
use crate::error::ensure_batch_len;
use crate::fmt::format_duration;
use crate::hooks::ReturnHook;
use crate::lock::{DistributedLock, HeldLock};
use crate::no_lock::NoLockAccessor;
use crate::populate::{absent_positions, Populator};
use crate::scope::Scope;
use crate::settings::Settings;
use crate::source::DataSource;
use crate::stats::Stats;
use crate::store::CacheStore;

/// Represents the outcome of a single attempt.
enum Attempt<T> {
    Done(T),
    Denied,
}

/// Provides single-flight lookups for a cache within one scope.
///
/// A coordinator is created once per scope (most probably via [builder](Coordinator::builder))
/// and shared via **Arc** for the lifetime of the process.
pub struct Coordinator<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    scope: Scope,
    lock_name: String,
    populator: Arc<Populator<K, V>>,
    lock: Arc<dyn DistributedLock>,
    hook: Arc<dyn ReturnHook<V>>,
    settings: Arc<ArcSwap<Settings>>,
    guard: RwLock<()>,
    cancellation: CancellationToken,
    stats: Stats,
}

impl<K, V> Coordinator<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a builder for a coordinator of the given scope.
    pub fn builder(scope: Scope) -> Builder<K, V> {
        Builder::new(scope)
    }

    pub(crate) fn new(
        scope: Scope,
        store: Arc<dyn CacheStore<K, V>>,
        source: Arc<dyn DataSource<K, V>>,
        lock: Arc<dyn DistributedLock>,
        hook: Arc<dyn ReturnHook<V>>,
        settings: Settings,
        cancellation: CancellationToken,
    ) -> Self {
        Coordinator {
            lock_name: scope.lock_name(),
            scope,
            populator: Arc::new(Populator::new(store, source)),
            lock,
            hook,
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            guard: RwLock::new(()),
            cancellation,
            stats: Stats::default(),
        }
    }

    /// Returns the scope of this coordinator.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Returns the name of the distributed lock used by this coordinator.
    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    /// Returns the metrics recorded by this coordinator.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Returns a copy of the currently effective settings.
    pub fn settings(&self) -> Settings {
        Settings::clone(&self.settings.load())
    }

    /// Replaces the settings of this coordinator.
    ///
    /// The new settings apply to all lookups which start after this call. Lookups in flight keep
    /// the settings they started with for their current attempt.
    pub fn update_settings(&self, settings: Settings) {
        let current = self.settings.load_full();
        if *current == settings {
            return;
        }

        if current.lock_ttl != settings.lock_ttl {
            log::info!(
                "Updating lock_ttl of {} from {} to {}.",
                self.scope,
                format_duration(current.lock_ttl),
                format_duration(settings.lock_ttl)
            );
        }
        if current.backoff != settings.backoff {
            log::info!(
                "Updating backoff of {} from {} to {}.",
                self.scope,
                format_duration(current.backoff),
                format_duration(settings.backoff)
            );
        }
        if current.cache_ttl != settings.cache_ttl {
            log::info!(
                "Updating cache_ttl of {} from {} to {}.",
                self.scope,
                format_duration(current.cache_ttl),
                format_duration(settings.cache_ttl)
            );
        }
        if current.max_wait != settings.max_wait {
            log::info!(
                "Updating max_wait of {} from {} to {}.",
                self.scope,
                format_max_wait(&current),
                format_max_wait(&settings)
            );
        }
        if current.write_policy != settings.write_policy {
            log::info!(
                "Updating write_policy of {} from {:?} to {:?}.",
                self.scope,
                current.write_policy,
                settings.write_policy
            );
        }

        self.settings.store(Arc::new(settings));
    }

    /// Re-reads the settings of this coordinator from the given config.
    ///
    /// An invalid config is logged and ignored, so that the current settings remain active.
    pub fn apply_config(&self, config: &Config) {
        match Settings::from_config(&config.current(), &self.scope) {
            Ok(settings) => self.update_settings(settings),
            Err(error) => log::error!(
                "Cannot apply the config for {}, keeping the current settings: {:#}",
                self.scope,
                error
            ),
        }
    }

    /// Returns an accessor which reads through the cache without any coordination.
    ///
    /// The accessor shares the store, the data source and the settings with this coordinator.
    pub fn no_lock(&self) -> NoLockAccessor<K, V> {
        NoLockAccessor::shared(self.populator.clone(), self.settings.clone())
    }

    /// Reads the value for the given key without any coordination.
    ///
    /// See [NoLockAccessor](NoLockAccessor) for the implications.
    pub async fn find_by_no_lock(&self, key: &K) -> anyhow::Result<Option<V>> {
        self.no_lock().find(key).await
    }

    /// Returns the value for the given key, populating it if required.
    ///
    /// Yields **None** if the data source doesn't know the key or if waiting for a contended
    /// lock was interrupted (either by the cancellation token of this coordinator or by
    /// exceeding **max_wait**).
    pub async fn find(&self, key: &K) -> anyhow::Result<Option<V>> {
        self.find_cancellable(key, &self.cancellation).await
    }

    /// Returns the value for the given key just like [find](Coordinator::find), but also gives
    /// up waiting once the given token is cancelled.
    pub async fn find_cancellable(
        &self,
        key: &K,
        cancellation: &CancellationToken,
    ) -> anyhow::Result<Option<V>> {
        let started = Instant::now();
        let mut first_attempt = true;
        loop {
            match self.try_find(key, first_attempt).await? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Denied => {
                    first_attempt = false;
                    if !self.backoff(started, cancellation).await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Returns the values for the given keys, populating all missing ones in a single call of
    /// the data source.
    ///
    /// The result contains one entry per key in the order of the given keys. If waiting for a
    /// contended lock was interrupted, an empty **Vec** is returned instead.
    pub async fn batch_find(&self, keys: &[K]) -> anyhow::Result<Vec<Option<V>>> {
        self.batch_find_cancellable(keys, &self.cancellation).await
    }

    /// Returns the values for the given keys just like [batch_find](Coordinator::batch_find),
    /// but also gives up waiting once the given token is cancelled.
    pub async fn batch_find_cancellable(
        &self,
        keys: &[K],
        cancellation: &CancellationToken,
    ) -> anyhow::Result<Vec<Option<V>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let mut first_attempt = true;
        loop {
            match self.try_batch_find(keys, first_attempt).await? {
                Attempt::Done(values) => return Ok(values),
                Attempt::Denied => {
                    first_attempt = false;
                    if !self.backoff(started, cancellation).await {
                        return Ok(Vec::new());
                    }
                }
            }
        }
    }

    /// Performs a single attempt of a lookup.
    ///
    /// Hits and misses are only recorded for the first attempt of a call. If the future is
    /// dropped while populating, the distributed lock is released by its [HeldLock](HeldLock).
    async fn try_find(
        &self,
        key: &K,
        first_attempt: bool,
    ) -> anyhow::Result<Attempt<Option<V>>> {
        {
            let _shared = self.guard.read().await;
            let value = self.populator.read(key).await?;
            if first_attempt {
                self.stats
                    .record_lookups(usize::from(value.is_some()), usize::from(value.is_none()));
            }
            if let Some(value) = value {
                return Ok(Attempt::Done(self.hook.before_return(Some(value))));
            }
        }

        let exclusive = self.guard.write().await;
        if let Some(value) = self.populator.read(key).await? {
            let _shared = exclusive.downgrade();
            return Ok(Attempt::Done(self.hook.before_return(Some(value))));
        }

        let settings = self.settings.load_full();
        let held = match self.acquire(&settings).await? {
            Some(held) => held,
            None => {
                self.record_denial();
                drop(exclusive.downgrade());
                return Ok(Attempt::Denied);
            }
        };

        let result = self.populate(key, &settings).await;
        self.release(held).await;
        let value = result?;

        let _shared = exclusive.downgrade();
        Ok(Attempt::Done(self.hook.before_return(value)))
    }

    /// Populates the given key while holding the distributed lock.
    async fn populate(&self, key: &K, settings: &Settings) -> anyhow::Result<Option<V>> {
        if let Some(value) = self.populator.read(key).await? {
            return Ok(Some(value));
        }

        let watch = Instant::now();
        let value = self.populator.populate(key, settings).await?;
        self.record_populate(watch, 1);

        Ok(value)
    }

    async fn try_batch_find(
        &self,
        keys: &[K],
        first_attempt: bool,
    ) -> anyhow::Result<Attempt<Vec<Option<V>>>> {
        {
            let _shared = self.guard.read().await;
            let values = self.populator.read_many(keys).await?;
            let absent = absent_positions(&values).len();
            if first_attempt {
                self.stats.record_lookups(keys.len() - absent, absent);
            }
            if absent == 0 {
                return Ok(Attempt::Done(self.batch_hook(values)?));
            }
        }

        let exclusive = self.guard.write().await;
        let mut values = self.populator.read_many(keys).await?;
        if absent_positions(&values).is_empty() {
            let _shared = exclusive.downgrade();
            return Ok(Attempt::Done(self.batch_hook(values)?));
        }

        let settings = self.settings.load_full();
        let held = match self.acquire(&settings).await? {
            Some(held) => held,
            None => {
                self.record_denial();
                drop(exclusive.downgrade());
                return Ok(Attempt::Denied);
            }
        };

        let result = self.populate_batch(keys, &mut values, &settings).await;
        self.release(held).await;
        result?;

        let _shared = exclusive.downgrade();
        Ok(Attempt::Done(self.batch_hook(values)?))
    }

    /// Populates all keys which are still missing while holding the distributed lock.
    async fn populate_batch(
        &self,
        keys: &[K],
        values: &mut Vec<Option<V>>,
        settings: &Settings,
    ) -> anyhow::Result<()> {
        *values = self.populator.read_many(keys).await?;
        let absent = absent_positions(values);
        if absent.is_empty() {
            return Ok(());
        }

        let watch = Instant::now();
        self.populator
            .populate_positions(keys, &absent, values, settings)
            .await?;
        self.record_populate(watch, absent.len());

        Ok(())
    }

    fn batch_hook(&self, values: Vec<Option<V>>) -> anyhow::Result<Vec<Option<V>>> {
        let expected = values.len();
        let values = self.hook.before_batch_return(values);
        ensure_batch_len("before_batch_return", expected, &values)?;

        Ok(values)
    }

    fn record_populate(&self, watch: Instant, keys: usize) {
        let duration = watch.elapsed();
        self.stats.record_populate(duration);
        log::debug!(
            "Populated {} key(s) of {} in {}.",
            keys,
            self.scope,
            format_duration(duration)
        );
    }

    fn record_denial(&self) {
        self.stats.record_lock_denial();
        log::debug!(
            "The lock {} is held by another caller, {} backs off...",
            self.lock_name,
            self.scope
        );
    }

    async fn acquire(&self, settings: &Settings) -> anyhow::Result<Option<HeldLock>> {
        let token = self
            .lock
            .try_acquire(&self.lock_name, settings.lock_ttl)
            .await?;

        Ok(token.map(|token| HeldLock::new(self.lock.clone(), token)))
    }

    async fn release(&self, held: HeldLock) {
        match held.release().await {
            Ok(true) => (),
            Ok(false) => {
                self.stats.record_lock_lost();
                log::warn!(
                    "The lock {} expired before the populate of {} completed. \
                     Another caller might have populated concurrently. \
                     Consider increasing lock_ttl (currently {}).",
                    self.lock_name,
                    self.scope,
                    format_duration(self.settings.load().lock_ttl)
                );
            }
            Err(error) => log::warn!(
                "Failed to release the lock {} of {}. It will expire on its own: {:#}",
                self.lock_name,
                self.scope,
                error
            ),
        }
    }

    /// Sleeps for the configured backoff.
    ///
    /// Returns **false** if the caller should give up, as either one of the cancellation tokens
    /// fired or **max_wait** is exhausted.
    async fn backoff(&self, started: Instant, cancellation: &CancellationToken) -> bool {
        let settings = self.settings.load_full();
        let mut delay = settings.backoff;

        if let Some(max_wait) = settings.max_wait {
            let waited = started.elapsed();
            if waited >= max_wait {
                self.stats.record_interrupted();
                log::debug!(
                    "{} gave up waiting for the lock {} after {}.",
                    self.scope,
                    self.lock_name,
                    format_duration(waited)
                );
                return false;
            }
            delay = delay.min(max_wait - waited);
        }

        tokio::select! {
            _ = self.cancellation.cancelled() => (),
            _ = cancellation.cancelled() => (),
            _ = tokio::time::sleep(delay) => return true,
        }

        self.stats.record_interrupted();
        log::debug!(
            "{} stopped waiting for the lock {} as the wait was cancelled.",
            self.scope,
            self.lock_name
        );
        false
    }
}

fn format_max_wait(settings: &Settings) -> String {
    settings
        .max_wait
        .map(format_duration)
        .unwrap_or_else(|| "unbounded".to_owned())
}
