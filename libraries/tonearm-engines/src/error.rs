/// Engine-level errors
use thiserror::Error;
use tonearm_core::BackendError;

/// Result type for engine internals
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No default output device
    #[error("Audio device not found")]
    DeviceNotFound,

    #[error("Failed to build output stream: {0}")]
    StreamBuild(String),

    /// The audio thread went away
    #[error("Audio thread is not running")]
    AudioThreadGone,

    #[error("Failed to decode '{path}': {reason}")]
    Decode { path: String, reason: String },

    #[error("Sample rate conversion error: {0}")]
    Resample(String),

    /// Source locator this engine cannot open
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    /// Error reply from an external player
    #[error("{engine} rejected '{command}': {reason}")]
    Rejected {
        engine: &'static str,
        command: String,
        reason: String,
    },

    /// Malformed reply from an external player
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{0} did not become ready in time")]
    Timeout(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn decode(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<cpal::BuildStreamError> for EngineError {
    fn from(err: cpal::BuildStreamError) -> Self {
        Self::StreamBuild(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for EngineError {
    fn from(err: cpal::PlayStreamError) -> Self {
        Self::StreamBuild(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for EngineError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        Self::StreamBuild(err.to_string())
    }
}

impl From<EngineError> for BackendError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Io(e) => BackendError::Io(e),
            EngineError::DeviceNotFound => BackendError::unavailable(err.to_string()),
            other => BackendError::engine(other.to_string()),
        }
    }
}
