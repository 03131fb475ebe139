//! Owner of the on-disk audio configuration
//!
//! Every mutation is validated, written to disk, swapped in, and then
//! announced to the registered change callbacks.

use crate::error::{ConfigError, Result};
use crate::model::AudioConfig;
use crate::watcher::ConfigWatcher;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tonearm_core::{spawn_detached, sync, BackendConfig};
use tracing::{error, info, warn};

/// Error type callbacks may return; it is logged and dropped
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Invoked with `(old, new)` after every configuration change
pub type ConfigChangeCallback =
    Arc<dyn Fn(&AudioConfig, &AudioConfig) -> std::result::Result<(), CallbackError> + Send + Sync>;

/// Prefix for environment overrides, e.g. `TONEARM__DEFAULT_BACKEND=mpv`
const ENV_PREFIX: &str = "TONEARM";
const ENV_SEPARATOR: &str = "__";

pub struct ConfigManager {
    path: PathBuf,
    config: RwLock<AudioConfig>,
    callbacks: RwLock<Vec<ConfigChangeCallback>>,
    watcher: Mutex<Option<ConfigWatcher>>,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("path", &self.path)
            .field("callbacks", &sync::read(&self.callbacks).len())
            .field("watching", &self.is_watching())
            .finish_non_exhaustive()
    }
}

impl ConfigManager {
    /// Load the configuration at `path`, writing the default one if it is missing
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let config = if path.exists() {
            read_file(&path)?
        } else {
            info!(path = %path.display(), "Config not found, writing defaults");
            let config = AudioConfig::default();
            write_file(&path, &config)?;
            config
        };

        Ok(Self {
            path,
            config: RwLock::new(config),
            callbacks: RwLock::new(Vec::new()),
            watcher: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file, replacing the in-memory configuration
    ///
    /// Callbacks are not notified; use the watcher for that.
    pub fn load_config(&self) -> Result<()> {
        let config = read_file(&self.path)?;
        *sync::write(&self.config) = config;
        Ok(())
    }

    /// Write the in-memory configuration back to disk
    pub fn save_config(&self) -> Result<()> {
        let config = sync::read(&self.config);
        write_file(&self.path, &config)
    }

    /// Copy of the current configuration
    pub fn get_config(&self) -> AudioConfig {
        sync::read(&self.config).clone()
    }

    /// Replace the whole configuration
    pub fn update_config(&self, config: AudioConfig) -> Result<()> {
        self.modify(|current| {
            *current = config;
            Ok(())
        })
    }

    /// Insert or replace the entry for one backend
    pub fn update_backend_config(&self, name: &str, config: BackendConfig) -> Result<()> {
        self.modify(|current| {
            current.backends.insert(name.to_string(), config);
            Ok(())
        })
    }

    /// Point `default_backend` at an existing entry
    pub fn set_default_backend(&self, name: &str) -> Result<()> {
        self.modify(|current| {
            if !current.backends.contains_key(name) {
                return Err(ConfigError::BackendNotFound(name.to_string()));
            }
            current.default_backend = name.to_string();
            Ok(())
        })
    }

    /// Copy of one backend entry
    pub fn get_backend_config(&self, name: &str) -> Result<BackendConfig> {
        sync::read(&self.config)
            .backends
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::BackendNotFound(name.to_string()))
    }

    pub fn get_default_backend(&self) -> String {
        sync::read(&self.config).default_backend.clone()
    }

    pub fn is_hot_reload_enabled(&self) -> bool {
        sync::read(&self.config).hot_reload
    }

    pub fn validate_config(&self, config: &AudioConfig) -> Result<()> {
        config.validate()
    }

    pub fn add_config_change_callback(&self, callback: ConfigChangeCallback) {
        sync::write(&self.callbacks).push(callback);
    }

    /// Reload the file whenever it changes on disk
    ///
    /// Fails if a watch is already active. The watcher only holds a weak
    /// reference, so dropping the last `Arc` ends the watch.
    pub fn start_watching(self: &Arc<Self>) -> Result<()> {
        let mut slot = sync::lock(&self.watcher);
        if slot.is_some() {
            return Err(ConfigError::AlreadyWatching);
        }

        let manager: Weak<Self> = Arc::downgrade(self);
        let watcher = ConfigWatcher::start(&self.path, move || {
            if let Some(manager) = manager.upgrade() {
                manager.reload();
            }
        })?;

        *slot = Some(watcher);
        info!(path = %self.path.display(), "Watching config for changes");
        Ok(())
    }

    /// Stop the file watch; a no-op when not watching
    pub fn stop_watching(&self) {
        if sync::lock(&self.watcher).take().is_some() {
            info!(path = %self.path.display(), "Stopped watching config");
        }
    }

    pub fn is_watching(&self) -> bool {
        sync::lock(&self.watcher).is_some()
    }

    /// Reload after an external edit and notify if anything changed
    fn reload(&self) {
        let new = match read_file(&self.path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable config change");
                return;
            }
        };

        let old = {
            let mut current = sync::write(&self.config);
            if *current == new {
                return;
            }
            std::mem::replace(&mut *current, new.clone())
        };

        info!(default_backend = %new.default_backend, "Config reloaded");
        self.notify(old, new);
    }

    /// Apply `change` to a copy, validate, persist, swap and notify
    fn modify<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut AudioConfig) -> Result<()>,
    {
        let (old, new) = {
            let mut current = sync::write(&self.config);
            let mut next = current.clone();
            change(&mut next)?;
            next.validate()?;
            write_file(&self.path, &next)?;
            let old = std::mem::replace(&mut *current, next.clone());
            (old, next)
        };

        self.notify(old, new);
        Ok(())
    }

    fn notify(&self, old: AudioConfig, new: AudioConfig) {
        let callbacks = sync::read(&self.callbacks).clone();
        if callbacks.is_empty() {
            return;
        }

        let old = Arc::new(old);
        let new = Arc::new(new);
        for callback in callbacks {
            let old = Arc::clone(&old);
            let new = Arc::clone(&new);
            spawn_detached("tonearm-config", move || {
                if let Err(e) = callback(&old, &new) {
                    error!(error = %e, "Config change callback failed");
                }
            });
        }
    }
}

/// Parse and validate a config file (TOML or JSON by extension)
///
/// `TONEARM__`-prefixed environment variables override file values.
pub fn read_file(path: &Path) -> Result<AudioConfig> {
    let config: AudioConfig = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    config.validate()?;
    Ok(config)
}

/// Serialize by extension (JSON for `.json`, TOML otherwise)
pub fn write_file(path: &Path, config: &AudioConfig) -> Result<()> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let contents = if is_json {
        serde_json::to_string_pretty(config).map_err(|e| ConfigError::Serialize(e.to_string()))?
    } else {
        toml::to_string_pretty(config).map_err(|e| ConfigError::Serialize(e.to_string()))?
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, contents)?;
    Ok(())
}
