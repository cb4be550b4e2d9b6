//! herdcache coordinates the population of caches so that a miss is populated only once.
//!
//! # Introduction
//! Putting a fast cache in front of a slow data source is simple, as long as the cache is warm.
//! Once a popular entry is missing (it expired, the cache was flushed or a process restarted),
//! every concurrent caller observes the miss and queries the data source itself. This
//! **thundering herd** hits the data source exactly when it is least prepared for it.
//!
//! A [Coordinator](coordinator::Coordinator) prevents this. It serves hits under shared access
//! and resolves misses under exclusive access, so that only one caller per process populates.
//! On top of that, a TTL bounded [DistributedLock](lock::DistributedLock) makes sure that only one
//! process out of all processes sharing the cache store populates at a time. All other callers
//! back off and re-check the cache until the value shows up.
//!
//! # Features
//! * **Single-flight lookups** for single keys ([find](coordinator::Coordinator::find)) and
//!   ordered batches of keys ([batch_find](coordinator::Coordinator::batch_find)). A batch only
//!   queries the data source for the keys which are still missing.
//! * **Atomic lock downgrade**. Exclusive access is turned into shared access without any gap, so
//!   that waiting callers never observe a moment where no lock is held.
//! * **Safe lock release**. Each lock acquisition carries a random token and a lock is only
//!   released by its current holder. An expired lock is reported instead of being deleted
//!   underneath its new holder.
//! * **Bounded and cancellable waits**. Waiting for a contended lock can be bounded via
//!   **max_wait** and interrupted via a **CancellationToken**.
//! * **Reload-aware config facility** which permits to update the settings of all coordinators
//!   during operation (see [config](config) and [settings](settings)).
//! * **Redis support**. [RedisStore](redis::RedisStore) and [RedisLock](redis::RedisLock) permit
//!   several processes to share a cache and its lock.
//!
//! # Modules
//! * **coordinator**: The single-flight protocol itself, see [coordinator](coordinator).
//! * **no_lock**: An uncoordinated bypass for callers which accept the herd, see
//!   [no_lock](no_lock).
//! * **store**, **source**, **lock** and **hooks**: The collaborators of a coordinator.
//! * **redis**: Redis backed implementations of a store and a lock.
//!
//! # Examples
//! A short example on how to set up a coordinator can be found here: [Builder](builder::Builder).
//! A complete simulation of a thundering herd (against Redis) is provided by **herdcache-io**.
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod average;
pub mod builder;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fmt;
pub mod hooks;
pub mod lock;
pub mod no_lock;
mod populate;
pub mod redis;
pub mod scope;
pub mod settings;
pub mod signals;
pub mod source;
pub mod stats;
pub mod store;

/// Contains the version of the herdcache library.
pub const HERDCACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the herdcache build being used.
pub const HERDCACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// This sets up **simplelog** to log to stdout. The date format being used is digestible by
/// established tools like **greylog**. Calling this more than once has no effect.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // We need to do this as otherwise the integration tests might crash as the logging system
    // is initialized several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            eprintln!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned closure to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate herdcache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}

#[cfg(test)]
mod testing;
