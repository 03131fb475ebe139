/// Error types for player backends and their management
use thiserror::Error;

/// Result type alias using `BackendError`
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised by backends, the factory and the manager
#[derive(Debug, Error)]
pub enum BackendError {
    /// Registration with an empty name
    #[error("backend name cannot be empty")]
    EmptyName,

    /// Registration without a constructor
    #[error("backend creator cannot be nil")]
    MissingCreator,

    /// No registry entry under this name
    #[error("backend '{0}' not found")]
    NotFound(String),

    /// Registered, but the last availability probe failed
    #[error("backend '{0}' is not available")]
    NotAvailable(String),

    /// Nothing registered is currently available
    #[error("no available backends")]
    NoBackendsAvailable,

    /// Control call without a current backend
    #[error("no player available")]
    NoPlayer,

    /// `initialize` called on a running manager
    #[error("player manager already running")]
    AlreadyRunning,

    /// Switch requested before `initialize`
    #[error("player manager not running")]
    NotRunning,

    /// Volume outside `[0, 1]`
    #[error("volume must be between 0 and 1, got {0}")]
    InvalidVolume(f64),

    /// Removal of a handler that was never registered
    #[error("event handler not found")]
    HandlerNotFound,

    /// The engine or the loaded content cannot seek
    #[error("seek not supported by backend '{0}'")]
    SeekUnsupported(String),

    /// Control call that needs a loaded source
    #[error("no active playback")]
    NoActivePlayback,

    /// A required external dependency is missing
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Engine-specific failure
    #[error("{0}")]
    Engine(String),

    /// I/O errors (sockets, subprocesses, files)
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Create an engine error
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Create an unavailable-dependency error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Whether this error means the requested backend cannot be used right now
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::NotAvailable(_) | Self::NoBackendsAvailable | Self::Unavailable(_)
        )
    }
}
