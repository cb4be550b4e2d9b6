//! Contains the system configuration.
//!
//! Provides access to the configuration which is loaded from the **config/settings.yml** file.
//! Note that we observe this file for changes and reload it once a change is detected. Therefore
//! each user of the config should attach itself to the [Config::notifier](Config::notifier) and
//! re-process the config once a change message is received. For coordinators this is done by
//! [settings::install](crate::settings::install).
//!
//! Note that the **Config** struct itself can be kept around. However, a handle obtained via
//! **Config::current()** should not be stored, as it will not be updated once a new config has
//! been loaded.
//!
//! # Examples
//!
//! Reading the current config:
//! ```
//! # use herdcache::config::Config;
//! let config = Config::new("settings.yml");
//! config.load_from_string("
//! coordinator:
//!     backoff: 50ms
//! ", None).unwrap();
//!
//! assert_eq!(config.current().query("coordinator.backoff").as_str(), Some("50ms"));
//! assert!(config.current().query("coordinator.unknown").is_badvalue());
//! ```
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;
use yaml_rust::{Yaml, YamlLoader};

/// Provides access to the system configuration.
///
/// Most probably a config instance is created by [install](install). Note that it is highly
/// recommended to register a change listener by calling `Config::notifier()` as we expect all
/// components to pick up config changes without restarting the application.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// Internally this is simply the receiver of a broadcast. The actual message being broadcast
/// can and should be ignored. All that matters is, once a message has been received, the config
/// was changed and needs to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
///
/// Note that this handle should not be stored or kept around for long, as it will not be updated
/// if the underlying config changed.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new config reading the given file.
    ///
    /// Note that this will not install a change listener. This is only done by the
    /// [install](install) function.
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Null, None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    ///
    /// As within docker, the file is presented as volume, we check that it is a file, as an
    /// unmounted docker volume is always presented as directory.
    #[cfg(not(test))]
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Forces the config to read the underlying file.
    ///
    /// Note that this is normally called by the monitor started in [install](install).
    pub async fn load(&self) -> anyhow::Result<()> {
        log::info!("Loading config file {}...", &self.filename);

        if let Ok(metadata) = tokio::fs::metadata(&self.filename).await {
            if !metadata.is_file() {
                log::info!("Config file doesn't exist or is an unmounted docker volume - skipping config load.");
                return Ok(());
            }
        }

        let config_data = match tokio::fs::read_to_string(&self.filename).await {
            Ok(data) => data,
            Err(error) => {
                return Err(anyhow::anyhow!(
                    "Cannot load config file {}: {}",
                    &self.filename,
                    error
                ));
            }
        };

        let last_modified = tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok());

        self.load_from_string(config_data.as_str(), last_modified)
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// This is intended to be used in test environments where we cannot / do not want to load
    /// a config file from disk. A malformed config is rejected and the current config is kept.
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let mut docs = match YamlLoader::load_from_str(data) {
            Ok(docs) => docs,
            Err(error) => {
                return Err(anyhow::anyhow!(
                    "Cannot parse config file {}: {}",
                    &self.filename,
                    error
                ));
            }
        };

        let doc = if docs.is_empty() {
            Yaml::Null
        } else {
            match docs.swap_remove(0) {
                map @ Yaml::Hash(_) => map,
                _ => Yaml::Null,
            }
        };

        // Store update config...
        self.config.store(Arc::new((doc, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Provides access to the root of the currently loaded configuration.
    pub fn root(&self) -> &Yaml {
        &self.config.0
    }

    /// Resolves a dotted path like `coordinator.lock_ttl` against the current configuration.
    ///
    /// Yields **Yaml::BadValue** if any part of the path doesn't exist.
    pub fn query(&self, query: impl AsRef<str>) -> &Yaml {
        query
            .as_ref()
            .split('.')
            .fold(self.root(), |node, key| &node[key])
    }
}

/// Creates a **Config** which reads **config/settings.yml** and keeps it up to date.
///
/// The change listener only watches the "last modified" date of the file and will not perform a
/// structural comparison. Therefore it is the duty of each config user to gracefully handle
/// partial config changes. The listener stops once the given token is cancelled.
pub async fn install(shutdown: CancellationToken) -> Arc<Config> {
    // Create the "config" directory in case it doesn't exist...
    let path = Path::new("config").to_path_buf();
    if let Err(error) = tokio::fs::create_dir_all(path.clone()).await {
        log::warn!(
            "Failed to create config base directory {}: {}",
            path.to_string_lossy(),
            error
        )
    }

    let config = Arc::new(Config::new("config/settings.yml"));

    // Actually try to read the file...
    if let Err(error) = config.load().await {
        log::error!("{}", error);
    }

    // Install a change listener which runs every 2s...
    run_config_change_monitor(config.clone(), shutdown);

    config
}

#[cfg(test)]
fn run_config_change_monitor(_config: Arc<Config>, _shutdown: CancellationToken) {
    // No automatic updates during testing...
}

#[cfg(not(test))]
fn run_config_change_monitor(config: Arc<Config>, shutdown: CancellationToken) {
    crate::spawn!(async move {
        while !shutdown.is_cancelled() {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => (),
            }

            // This will contain the last modified date of the file on disk or be None if the
            // file is absent...
            let last_modified = config.last_modified().await;

            // Contains the timestamp when the file was loaded the last time or be None if no
            // data has been loaded yet...
            let last_loaded = config.config.load().1;

            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => {
                        log::info!("System configuration was re-loaded.");
                    }
                    Err(error) => log::error!("Failed to re-load system config: {}", error),
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use std::time::SystemTime;

    #[test]
    fn ensure_config_update_works() {
        crate::testing::test_async(async {
            let config = Config::new("test_settings.yml");

            // Load an initial config...
            config
                .load_from_string("coordinator:\n  lock_ttl: 10s", Some(SystemTime::now()))
                .unwrap();

            // Setup a task which notifies our oneshot channel once the config changes...
            let mut change_notifier = config.notifier();
            let (tx, rx) = tokio::sync::oneshot::channel();
            crate::spawn!(async move {
                if change_notifier.recv().await.is_ok() {
                    let _ = tx.send(());
                }
            });

            // Ensure that a malformed config is simply ignored...
            assert!(config
                .load_from_string("coordinator: 'invalid", Some(SystemTime::now()))
                .is_err());
            assert_eq!(
                config.current().query("coordinator.lock_ttl").as_str(),
                Some("10s")
            );

            // Change the config...
            config
                .load_from_string("coordinator:\n  lock_ttl: 30s", Some(SystemTime::now()))
                .unwrap();

            // Await oneshot message
            rx.await.unwrap();

            // Ensure that new config is now present...
            assert_eq!(
                config.current().query("coordinator.lock_ttl").as_str(),
                Some("30s")
            );
        });
    }

    #[test]
    fn non_object_configs_are_treated_as_empty() {
        let config = Config::new("test_settings.yml");
        config.load_from_string("42", None).unwrap();
        assert!(config.current().query("coordinator").is_badvalue());
    }
}
