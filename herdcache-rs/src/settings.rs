//! Contains the tunables of a coordinator and loads them from the system config.
//!
//! # Configuration
//! All coordinators read the object **coordinator** of the system config. Each key can be
//! overridden per scope in **coordinator.scopes.<scope name>**:
//!
//! ```yaml
//! coordinator:
//!     # Specifies how long a distributed lock is held at most. This should comfortably exceed
//!     # the slowest expected populate, otherwise a second process may start populating.
//!     lock_ttl: 10s
//!     # Specifies how long to wait before retrying once the distributed lock was denied.
//!     backoff: 100ms
//!     # Specifies the TTL of populated cache entries.
//!     cache_ttl: 1d
//!     # Specifies how long a call may wait for a contended lock in total. 0 waits forever.
//!     max_wait: 0
//!     # Determines how populated values are written: "replace" removes an existing entry
//!     # before storing the new one, "upsert" simply overwrites it.
//!     write_policy: replace
//!     scopes:
//!         StudyWorker:
//!             backoff: 50ms
//! ```
//!
//! Durations support the suffixes of [parse_duration](crate::fmt::parse_duration). Plain integers
//! are treated as seconds.
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use yaml_rust::Yaml;

use crate::config::{Config, Handle};
use crate::coordinator::Coordinator;
use crate::fmt::parse_duration;
use crate::scope::Scope;

/// Specifies the default TTL of a distributed lock.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

/// Specifies the default delay between two attempts once the distributed lock was denied.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

/// Specifies the default TTL of populated cache entries.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Determines how a populated value is written into the cache store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Checks if an entry exists and deletes it before storing the new value.
    ///
    /// This issues one or two additional round trips per write. Stores which derive side effects
    /// (e.g. invalidation messages) from deletes see a delete followed by an insert rather than
    /// an update.
    #[default]
    Replace,

    /// Simply overwrites any existing entry.
    Upsert,
}

impl FromStr for WritePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "replace" => Ok(WritePolicy::Replace),
            "upsert" => Ok(WritePolicy::Upsert),
            _ => Err(anyhow::anyhow!(
                "Unknown write policy '{}'. Expected 'replace' or 'upsert'.",
                value
            )),
        }
    }
}

/// Contains the effective settings of a coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// The TTL of the distributed lock.
    pub lock_ttl: Duration,

    /// The delay between two attempts after the distributed lock was denied.
    pub backoff: Duration,

    /// The TTL passed along when storing populated values.
    pub cache_ttl: Duration,

    /// The maximal total time a call waits for a contended lock. **None** waits until the value
    /// shows up or the wait is cancelled.
    pub max_wait: Option<Duration>,

    /// Determines how populated values are written.
    pub write_policy: WritePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            lock_ttl: DEFAULT_LOCK_TTL,
            backoff: DEFAULT_BACKOFF,
            cache_ttl: DEFAULT_CACHE_TTL,
            max_wait: None,
            write_policy: WritePolicy::Replace,
        }
    }
}

impl Settings {
    /// Determines the settings for the given scope based on the given config.
    ///
    /// Missing keys fall back to their defaults. If any present key is invalid, an error is
    /// returned, so that a caller can keep its current settings instead of applying a partial
    /// config.
    pub fn from_config(handle: &Handle, scope: &Scope) -> anyhow::Result<Settings> {
        let section = handle.query("coordinator");

        Settings::default()
            .apply(section)
            .context("Invalid coordinator settings")?
            .apply(&section["scopes"][scope.name()])
            .with_context(|| format!("Invalid coordinator settings for scope {}", scope))
    }

    fn apply(mut self, section: &Yaml) -> anyhow::Result<Self> {
        if let Some(lock_ttl) = read_duration(section, "lock_ttl")? {
            if lock_ttl.is_zero() {
                return Err(anyhow::anyhow!("'lock_ttl' must not be zero"));
            }
            self.lock_ttl = lock_ttl;
        }

        if let Some(backoff) = read_duration(section, "backoff")? {
            if backoff.is_zero() {
                return Err(anyhow::anyhow!("'backoff' must not be zero"));
            }
            self.backoff = backoff;
        }

        if let Some(cache_ttl) = read_duration(section, "cache_ttl")? {
            if cache_ttl.is_zero() {
                return Err(anyhow::anyhow!("'cache_ttl' must not be zero"));
            }
            self.cache_ttl = cache_ttl;
        }

        if let Some(max_wait) = read_duration(section, "max_wait")? {
            self.max_wait = Some(max_wait).filter(|max_wait| !max_wait.is_zero());
        }

        match &section["write_policy"] {
            Yaml::BadValue | Yaml::Null => (),
            Yaml::String(policy) => self.write_policy = policy.parse()?,
            other => {
                return Err(anyhow::anyhow!(
                    "Invalid value for 'write_policy': {:?}",
                    other
                ))
            }
        }

        Ok(self)
    }
}

/// Reads an optional duration from the given config object.
fn read_duration(section: &Yaml, key: &str) -> anyhow::Result<Option<Duration>> {
    match &section[key] {
        Yaml::BadValue | Yaml::Null => Ok(None),
        Yaml::Integer(seconds) if *seconds >= 0 => Ok(Some(Duration::from_secs(*seconds as u64))),
        Yaml::String(value) => parse_duration(value)
            .map(Some)
            .with_context(|| format!("Invalid value for '{}'", key)),
        other => Err(anyhow::anyhow!("Invalid value for '{}': {:?}", key, other)),
    }
}

/// Keeps the settings of the given coordinator in sync with the given config.
///
/// Applies the current config right away and then spawns a task which re-applies it on every
/// change, until the given token is cancelled.
pub fn install<K, V>(
    coordinator: Arc<Coordinator<K, V>>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let mut config_changed = config.notifier();
    coordinator.apply_config(&config);

    crate::spawn!(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                change = config_changed.recv() => match change {
                    Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        coordinator.apply_config(&config)
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    });
}
