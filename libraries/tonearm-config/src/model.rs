//! Persisted audio configuration

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tonearm_core::BackendConfig;

/// Backend selected when nothing else is configured
pub const DEFAULT_BACKEND: &str = "native";

/// Top-level audio configuration file
///
/// Scalar fields come first so the TOML form keeps values ahead of tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Registry key of the backend to start with
    pub default_backend: String,

    /// Reload the file when it changes on disk
    #[serde(default = "default_true")]
    pub hot_reload: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_settings: Option<GlobalAudioSettings>,

    /// Per-backend settings keyed by registry name
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

/// Settings shared by every backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalAudioSettings {
    pub default_volume: f64,
    pub buffer_size: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub auto_switch_backend: bool,
    pub retry_attempts: u32,
    /// Human duration such as `"1s"` or `"250ms"`
    pub retry_delay: String,
}

fn default_true() -> bool {
    true
}

impl Default for GlobalAudioSettings {
    fn default() -> Self {
        Self {
            default_volume: 0.8,
            buffer_size: 4096,
            sample_rate: 44100,
            channels: 2,
            auto_switch_backend: true,
            retry_attempts: 3,
            retry_delay: "1s".to_string(),
        }
    }
}

impl GlobalAudioSettings {
    /// Parsed `retry_delay`, `None` when malformed
    pub fn retry_delay(&self) -> Option<Duration> {
        parse_duration(&self.retry_delay)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        let native = BackendConfig::named(DEFAULT_BACKEND);

        let mut mpv = BackendConfig::named("mpv")
            .with_setting("binary", "mpv")
            .with_setting("extra_args", serde_json::json!([]));
        mpv.priority = 7;
        mpv.buffer_size = 8192;

        Self {
            default_backend: DEFAULT_BACKEND.to_string(),
            hot_reload: true,
            global_settings: Some(GlobalAudioSettings::default()),
            backends: BTreeMap::from([
                (native.name.clone(), native),
                (mpv.name.clone(), mpv),
            ]),
        }
    }
}

impl AudioConfig {
    /// Check every rule a loaded or updated configuration must satisfy
    pub fn validate(&self) -> Result<()> {
        if self.default_backend.is_empty() {
            return Err(ConfigError::invalid("default backend cannot be empty"));
        }

        if !self.backends.contains_key(&self.default_backend) {
            return Err(ConfigError::invalid(format!(
                "default backend '{}' not found in backends list",
                self.default_backend
            )));
        }

        if let Some(global) = &self.global_settings {
            if !(0.0..=1.0).contains(&global.default_volume) {
                return Err(ConfigError::invalid("default volume must be between 0 and 1"));
            }
            if global.buffer_size == 0 {
                return Err(ConfigError::invalid("buffer size must be positive"));
            }
            if global.sample_rate == 0 {
                return Err(ConfigError::invalid("sample rate must be positive"));
            }
            if global.channels == 0 {
                return Err(ConfigError::invalid("channels must be positive"));
            }
        }

        for (name, backend) in &self.backends {
            if &backend.name != name {
                return Err(ConfigError::invalid(format!(
                    "backend name mismatch: key='{}', config.name='{}'",
                    name, backend.name
                )));
            }
            if !(0.0..=1.0).contains(&backend.default_volume) {
                return Err(ConfigError::invalid(format!(
                    "backend '{name}' default volume must be between 0 and 1"
                )));
            }
        }

        Ok(())
    }

    /// Entry for `name`, with global settings filled in when no entry exists
    pub fn backend_or_global(&self, name: &str) -> BackendConfig {
        if let Some(config) = self.backends.get(name) {
            return config.clone();
        }

        let mut config = BackendConfig::named(name);
        if let Some(global) = &self.global_settings {
            config.default_volume = global.default_volume;
            config.buffer_size = global.buffer_size;
            config.sample_rate = global.sample_rate;
            config.channels = global.channels;
        }
        config
    }
}

/// Parse `"500ms"`, `"1s"`, `"1.5s"`, `"2m"`; bare numbers are seconds
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let (number, scale) = if let Some(n) = text.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = text.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = text.strip_suffix('m') {
        (n, 60.0)
    } else {
        (text, 1.0)
    };

    let value: f64 = number.trim().parse().ok()?;
    (value.is_finite() && value >= 0.0).then(|| Duration::from_secs_f64(value * scale))
}
