/// Configuration errors
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or parsing the file failed
    #[error("Failed to load config: {0}")]
    Load(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    /// The configuration breaks a validation rule
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("backend '{0}' not found in config")]
    BackendNotFound(String),

    #[error("config watcher already running")]
    AlreadyWatching,

    #[error("Config watcher error: {0}")]
    Watch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        Self::Load(err.to_string())
    }
}

impl From<notify::Error> for ConfigError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}
