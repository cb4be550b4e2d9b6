//! Provides a builder which assembles a coordinator from its collaborators.
//!
//! Only the cache store and the data source are mandatory. Everything else falls back to a
//! sensible default:
//! * **lock**: a [LocalLock](crate::lock::LocalLock). This is only sufficient if no other process
//!   populates the same cache store.
//! * **hook**: [PassThrough](crate::hooks::PassThrough).
//! * **settings**: the settings of the scope as found in the given config (see
//!   [config](Builder::config)) or [Settings::default](Settings::default).
//! * **cancellation**: a fresh token which is never cancelled unless requested via
//!   [Coordinator::find_cancellable](Coordinator::find_cancellable).
//!
//! # Example
//! Setting up a coordinator which is shared by several processes via Redis:
//! ```no_run
//! # use async_trait::async_trait;
//! # use herdcache::coordinator::Coordinator;
//! # use herdcache::redis::{RedisLock, RedisStore};
//! # use herdcache::scope::Scope;
//! # use herdcache::source::DataSource;
//! # use std::sync::Arc;
//! # use tokio_util::sync::CancellationToken;
//! struct StudyWorker;
//!
//! #[async_trait]
//! impl DataSource<String, String> for StudyWorker {
//!     async fn populate(&self, key: &String) -> anyhow::Result<Option<String>> {
//!         Ok(Some(key.to_uppercase()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let shutdown = CancellationToken::new();
//!     let config = herdcache::config::install(shutdown.clone()).await;
//!     let connection = redis::Client::open("redis://127.0.0.1:6379")?
//!         .get_connection_manager()
//!         .await?;
//!
//!     let coordinator = Arc::new(
//!         Coordinator::<String, String>::builder(Scope::of::<StudyWorker>())
//!             .store(Arc::new(RedisStore::new(connection.clone())))
//!             .source(Arc::new(StudyWorker))
//!             .lock(Arc::new(RedisLock::new(connection)))
//!             .config(&config)
//!             .cancellation(shutdown.clone())
//!             .build()?,
//!     );
//!
//!     // Keep the settings in sync with config/settings.yml...
//!     herdcache::settings::install(coordinator.clone(), config, shutdown);
//!
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, Handle};
use crate::coordinator::Coordinator;
use crate::error::CoordinatorError;
use crate::fmt::format_duration;
use crate::hooks::{PassThrough, ReturnHook};
use crate::lock::{DistributedLock, LocalLock};
use crate::scope::Scope;
use crate::settings::Settings;
use crate::source::DataSource;
use crate::store::CacheStore;

/// Collects the collaborators and settings of a [Coordinator](Coordinator).
///
/// Use [Coordinator::builder](Coordinator::builder) to obtain one.
pub struct Builder<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    scope: Scope,
    store: Option<Arc<dyn CacheStore<K, V>>>,
    source: Option<Arc<dyn DataSource<K, V>>>,
    lock: Option<Arc<dyn DistributedLock>>,
    hook: Option<Arc<dyn ReturnHook<V>>>,
    settings: Option<Settings>,
    config: Option<Handle>,
    cancellation: Option<CancellationToken>,
}

impl<K, V> Builder<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a new builder for the given scope.
    pub fn new(scope: Scope) -> Self {
        Builder {
            scope,
            store: None,
            source: None,
            lock: None,
            hook: None,
            settings: None,
            config: None,
            cancellation: None,
        }
    }

    /// Specifies the cache store to populate.
    pub fn store(mut self, store: Arc<dyn CacheStore<K, V>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Specifies the data source which is queried on a miss.
    pub fn source(mut self, source: Arc<dyn DataSource<K, V>>) -> Self {
        self.source = Some(source);
        self
    }

    /// Specifies the distributed lock.
    ///
    /// All coordinators of the same scope which populate the same cache store must share a lock
    /// backend (e.g. the same Redis).
    pub fn lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Installs a hook which post-processes all results of **find** and **batch_find**.
    pub fn hook(mut self, hook: Arc<dyn ReturnHook<V>>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Specifies the settings to use.
    ///
    /// This takes precedence over [config](Builder::config).
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Reads the settings of the scope from the current state of the given config.
    ///
    /// Note that this only reads the config once. Use
    /// [settings::install](crate::settings::install) to pick up later changes.
    pub fn config(mut self, config: &Config) -> Self {
        self.config = Some(config.current());
        self
    }

    /// Specifies a token which interrupts all waits of the coordinator once cancelled.
    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Builds the coordinator.
    ///
    /// Fails if either the store or the data source is missing, or if the given config contains
    /// invalid settings for this scope.
    pub fn build(self) -> anyhow::Result<Coordinator<K, V>> {
        let store = self.store.ok_or_else(|| CoordinatorError::Incomplete {
            scope: self.scope.to_string(),
            collaborator: "cache store",
        })?;
        let source = self.source.ok_or_else(|| CoordinatorError::Incomplete {
            scope: self.scope.to_string(),
            collaborator: "data source",
        })?;

        let settings = match (self.settings, self.config) {
            (Some(settings), _) => settings,
            (None, Some(config)) => Settings::from_config(&config, &self.scope)?,
            (None, None) => Settings::default(),
        };

        log::info!(
            "Creating coordinator {} (lock: {}, lock_ttl: {}, backoff: {}, cache_ttl: {})...",
            self.scope,
            self.scope.lock_name(),
            format_duration(settings.lock_ttl),
            format_duration(settings.backoff),
            format_duration(settings.cache_ttl)
        );

        let lock: Arc<dyn DistributedLock> = match self.lock {
            Some(lock) => lock,
            None => Arc::new(LocalLock::new()),
        };
        let hook: Arc<dyn ReturnHook<V>> = match self.hook {
            Some(hook) => hook,
            None => Arc::new(PassThrough),
        };

        Ok(Coordinator::new(
            self.scope,
            store,
            source,
            lock,
            hook,
            settings,
            self.cancellation.unwrap_or_else(CancellationToken::new),
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::coordinator::Coordinator;
    use crate::error::CoordinatorError;
    use crate::scope::Scope;
    use crate::settings::{Settings, WritePolicy};
    use crate::store::MemoryStore;
    use crate::testing::CountingSource;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn missing_collaborators_are_reported() {
        let error = Coordinator::<u32, String>::builder(Scope::new("test"))
            .source(Arc::new(CountingSource::echo()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            error.downcast_ref::<CoordinatorError>(),
            Some(CoordinatorError::Incomplete {
                collaborator: "cache store",
                ..
            })
        ));

        let error = Coordinator::<u32, String>::builder(Scope::new("test"))
            .store(Arc::new(MemoryStore::<u32, String>::new()))
            .build()
            .err()
            .unwrap();
        assert_eq!(
            error.to_string(),
            "Cannot build a coordinator for scope test: no data source was provided"
        );
    }

    #[test]
    fn settings_are_read_from_the_config_of_the_scope() {
        let config = Config::new("test_settings.yml");
        config
            .load_from_string(
                "coordinator:\n  backoff: 5ms\n  scopes:\n    test:\n      write_policy: upsert",
                None,
            )
            .unwrap();

        let coordinator = Coordinator::<u32, String>::builder(Scope::new("test"))
            .store(Arc::new(MemoryStore::<u32, String>::new()))
            .source(Arc::new(CountingSource::echo()))
            .config(&config)
            .build()
            .unwrap();
        assert_eq!(coordinator.settings().backoff, Duration::from_millis(5));
        assert_eq!(coordinator.settings().write_policy, WritePolicy::Upsert);
        assert_eq!(coordinator.lock_name(), "lock_test");

        // Explicit settings win over the config...
        let coordinator = Coordinator::<u32, String>::builder(Scope::new("test"))
            .store(Arc::new(MemoryStore::<u32, String>::new()))
            .source(Arc::new(CountingSource::echo()))
            .config(&config)
            .settings(Settings::default())
            .build()
            .unwrap();
        assert_eq!(coordinator.settings(), Settings::default());
    }
}
