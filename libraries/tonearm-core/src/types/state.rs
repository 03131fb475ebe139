/// Playback state machine shared by every backend
use serde::{Deserialize, Serialize};

/// State a backend can be in
///
/// Fresh backends start in `Stopped`. Transitions only happen through
/// explicit `BaseBackend::set_state` calls made by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
    Buffering,
    Error,
}

impl PlaybackState {
    /// Convert to string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Buffering => "buffering",
            Self::Error => "error",
        }
    }

    /// Parse from string
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(Self::Stopped),
            "playing" => Some(Self::Playing),
            "paused" => Some(Self::Paused),
            "buffering" => Some(Self::Buffering),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Numeric code used by external collaborators
    pub fn code(&self) -> i32 {
        match self {
            Self::Stopped => 0,
            Self::Playing => 1,
            Self::Paused => 2,
            Self::Buffering => 3,
            Self::Error => 4,
        }
    }

    /// Inverse of [`PlaybackState::code`]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Stopped),
            1 => Some(Self::Playing),
            2 => Some(Self::Paused),
            3 => Some(Self::Buffering),
            4 => Some(Self::Error),
            _ => None,
        }
    }

    /// Label for an external numeric state; unknown codes render as `"unknown"`
    pub fn describe_code(code: i32) -> &'static str {
        Self::from_code(code).map_or("unknown", |state| state.as_str())
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
