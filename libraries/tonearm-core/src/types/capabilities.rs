/// Static description of what a backend type can do
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Capabilities of a registered backend type
///
/// Built once when the backend is registered and only ever handed out as copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Codec/container extensions the engine can open (e.g. `"flac"`)
    pub supported_formats: BTreeSet<String>,

    /// Platform identifiers (`std::env::consts::OS` values, `"unix"`, or `"any"`)
    pub supported_platforms: BTreeSet<String>,

    /// Feature flags: `seek`, `volume`, `streaming`, ...
    pub features: BTreeMap<String, bool>,

    /// Upper volume bound
    pub max_volume: f64,

    /// Lower volume bound
    pub min_volume: f64,

    /// Whether seeking is supported
    pub seek_support: bool,

    /// Whether network streams can be played
    pub streaming_support: bool,

    /// Free-form metadata
    pub metadata: BTreeMap<String, String>,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            supported_formats: BTreeSet::new(),
            supported_platforms: BTreeSet::new(),
            features: BTreeMap::new(),
            max_volume: 1.0,
            min_volume: 0.0,
            seek_support: false,
            streaming_support: false,
            metadata: BTreeMap::new(),
        }
    }
}

impl BackendCapabilities {
    /// Empty capabilities with volume bounds `[0, 1]` and the `volume` feature
    pub fn new() -> Self {
        Self::default().with_feature("volume", true)
    }

    pub fn with_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_formats
            .extend(formats.into_iter().map(Into::into));
        self
    }

    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_platforms
            .extend(platforms.into_iter().map(Into::into));
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>, enabled: bool) -> Self {
        self.features.insert(feature.into(), enabled);
        self
    }

    /// Set seek support; keeps the `seek` feature flag in sync
    pub fn with_seek(mut self, supported: bool) -> Self {
        self.seek_support = supported;
        self.with_feature("seek", supported)
    }

    /// Set streaming support; keeps the `streaming` feature flag in sync
    pub fn with_streaming(mut self, supported: bool) -> Self {
        self.streaming_support = supported;
        self.with_feature("streaming", supported)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether a file extension is supported (case-insensitive)
    pub fn supports_format(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        self.supported_formats.contains(&extension)
    }

    /// Whether a feature flag is present and enabled
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.get(feature).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_and_streaming_flags_stay_in_sync() {
        let caps = BackendCapabilities::new()
            .with_formats(["mp3", "flac"])
            .with_seek(true)
            .with_streaming(false);

        assert!(caps.seek_support);
        assert!(caps.has_feature("seek"));
        assert!(!caps.streaming_support);
        assert!(!caps.has_feature("streaming"));
        assert!(caps.has_feature("volume"));
        assert!(!caps.has_feature("native"));
    }

    #[test]
    fn format_lookup_ignores_case_and_dot() {
        let caps = BackendCapabilities::new().with_formats(["mp3"]);
        assert!(caps.supports_format("MP3"));
        assert!(caps.supports_format(".mp3"));
        assert!(!caps.supports_format("wma"));
    }
}
