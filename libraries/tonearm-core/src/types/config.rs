/// Per-instance backend configuration
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration handed to a backend constructor
///
/// Passed by reference into `BackendCreator` and copied by the backend if it
/// needs to keep it. Every switch builds a fresh copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Registry key this config belongs to
    pub name: String,

    pub enabled: bool,

    /// Higher is preferred
    pub priority: i32,

    /// Buffer size in samples
    pub buffer_size: usize,

    /// Sample rate in Hz
    pub sample_rate: u32,

    pub channels: u16,

    /// Volume applied at initialization, in `[0, 1]` (0 leaves the backend default)
    pub default_volume: f64,

    /// Engine-specific options
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            priority: 5,
            buffer_size: 4096,
            sample_rate: 44100,
            channels: 2,
            default_volume: 0.8,
            settings: BTreeMap::new(),
        }
    }
}

impl BackendConfig {
    /// Default configuration filed under `name`
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// String setting
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    /// Unsigned integer setting; numeric strings are accepted too
    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        match self.settings.get(key)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Boolean setting
    pub fn setting_bool(&self, key: &str) -> Option<bool> {
        self.settings.get(key).and_then(|v| v.as_bool())
    }

    /// List-of-strings setting
    pub fn setting_list(&self, key: &str) -> Vec<String> {
        self.settings
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_manager_defaults() {
        let config = BackendConfig::default();
        assert!(config.enabled);
        assert_eq!(config.priority, 5);
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channels, 2);
        assert_eq!(config.default_volume, 0.8);
        assert!(config.settings.is_empty());
    }

    #[test]
    fn typed_setting_accessors() {
        let config = BackendConfig::named("mpd")
            .with_setting("host", "10.0.0.2")
            .with_setting("port", "6601")
            .with_setting("cache", true)
            .with_setting("extra_args", serde_json::json!(["--gapless-audio=yes"]));

        assert_eq!(config.setting_str("host"), Some("10.0.0.2"));
        assert_eq!(config.setting_u64("port"), Some(6601));
        assert_eq!(config.setting_bool("cache"), Some(true));
        assert_eq!(config.setting_list("extra_args"), vec!["--gapless-audio=yes"]);
        assert_eq!(config.setting_str("missing"), None);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: BackendConfig = serde_json::from_str(r#"{"name":"mpv","priority":7}"#).unwrap();
        assert_eq!(config.name, "mpv");
        assert_eq!(config.priority, 7);
        assert_eq!(config.sample_rate, 44100);
    }
}
