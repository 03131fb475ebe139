/// Registry entry describing one backend type
use crate::backend::PlayerBackend;
use crate::error::Result;
use crate::types::{BackendCapabilities, BackendConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Constructor for a backend instance
///
/// Invoked with a fresh config for every instance. Errors propagate to the
/// caller unchanged.
pub type BackendCreator =
    Arc<dyn Fn(&BackendConfig) -> Result<Arc<dyn PlayerBackend>> + Send + Sync>;

/// Wildcard platform identifier
pub const ANY_PLATFORM: &str = "any";

/// Description of a registered backend type
///
/// Copies returned to callers never carry the creator.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub capabilities: BackendCapabilities,

    /// Operating systems or families this backend runs on; empty means any
    #[serde(default)]
    pub platforms: BTreeSet<String>,

    /// Higher is preferred
    pub priority: i32,

    /// Result of the last availability probe
    pub available: bool,

    #[serde(skip)]
    pub creator: Option<BackendCreator>,
}

impl std::fmt::Debug for BackendInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendInfo")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("version", &self.version)
            .field("capabilities", &self.capabilities)
            .field("platforms", &self.platforms)
            .field("priority", &self.priority)
            .field("available", &self.available)
            .field("creator", &self.creator.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl BackendInfo {
    /// New entry with no capabilities, priority 0 and no creator
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: "1.0.0".to_string(),
            capabilities: BackendCapabilities::default(),
            platforms: BTreeSet::new(),
            priority: 0,
            available: false,
            creator: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set capabilities; an empty platform list is seeded from them
    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        if self.platforms.is_empty() {
            self.platforms = capabilities.supported_platforms.clone();
        }
        self.capabilities = capabilities;
        self
    }

    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms = platforms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_creator<F>(mut self, creator: F) -> Self
    where
        F: Fn(&BackendConfig) -> Result<Arc<dyn PlayerBackend>> + Send + Sync + 'static,
    {
        self.creator = Some(Arc::new(creator));
        self
    }

    /// Copy suitable for handing out: creator cleared
    #[must_use]
    pub fn without_creator(&self) -> Self {
        Self {
            creator: None,
            ..self.clone()
        }
    }

    /// Whether this backend declares support for the given OS or OS family
    ///
    /// An empty platform set or the `"any"` entry matches everything.
    pub fn supports_platform(&self, os: &str, family: &str) -> bool {
        let platforms = &self.platforms;
        platforms.is_empty()
            || platforms.contains(ANY_PLATFORM)
            || platforms.contains(os)
            || platforms.contains(family)
    }

    /// Platform check against the running host
    pub fn supports_current_platform(&self) -> bool {
        self.supports_platform(std::env::consts::OS, std::env::consts::FAMILY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with_platforms(platforms: &[&str]) -> BackendInfo {
        BackendInfo::new("test", "test backend").with_platforms(platforms.iter().copied())
    }

    #[test]
    fn platforms_follow_capabilities_unless_set() {
        let capabilities = BackendCapabilities::new().with_platforms(["unix"]);

        let seeded = BackendInfo::new("a", "").with_capabilities(capabilities.clone());
        assert!(seeded.platforms.contains("unix"));
        assert!(!seeded.supports_platform("windows", "windows"));

        let explicit = BackendInfo::new("b", "")
            .with_platforms(["windows"])
            .with_capabilities(capabilities);
        assert_eq!(explicit.platforms.len(), 1);
        assert!(explicit.supports_platform("windows", "windows"));
        assert!(!explicit.supports_platform("linux", "unix"));
    }

    #[test]
    fn platform_matching() {
        assert!(info_with_platforms(&[]).supports_platform("linux", "unix"));
        assert!(info_with_platforms(&["any"]).supports_platform("windows", "windows"));
        assert!(info_with_platforms(&["unix"]).supports_platform("macos", "unix"));
        assert!(info_with_platforms(&["linux"]).supports_platform("linux", "unix"));
        assert!(!info_with_platforms(&["linux"]).supports_platform("windows", "windows"));
    }

    #[test]
    fn copies_drop_the_creator() {
        let info = BackendInfo::new("null", "does nothing")
            .with_creator(|_| Err(crate::BackendError::engine("never built")));
        assert!(info.creator.is_some());

        let copy = info.without_creator();
        assert!(copy.creator.is_none());
        assert_eq!(copy.name, "null");
    }

    #[test]
    fn serializes_without_creator() {
        let info = BackendInfo::new("mpv", "mpv media player").with_priority(7);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["name"], "mpv");
        assert_eq!(json["priority"], 7);
        assert!(json.get("creator").is_none());
    }
}
