/// Shared data types for player backends
pub mod capabilities;
pub mod config;
pub mod info;
pub mod state;

pub use capabilities::BackendCapabilities;
pub use config::BackendConfig;
pub use info::{BackendCreator, BackendInfo, ANY_PLATFORM};
pub use state::PlaybackState;
