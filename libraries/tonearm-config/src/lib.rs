//! Tonearm configuration
//!
//! Loads the audio configuration file (TOML or JSON), validates it, persists
//! changes and optionally reloads it when it changes on disk.

pub mod error;
pub mod manager;
pub mod model;
mod watcher;

pub use error::{ConfigError, Result};
pub use manager::{read_file, write_file, CallbackError, ConfigChangeCallback, ConfigManager};
pub use model::{parse_duration, AudioConfig, GlobalAudioSettings, DEFAULT_BACKEND};
