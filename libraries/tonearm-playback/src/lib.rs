//! Tonearm playback
//!
//! [`PlayerFactory`] keeps the registry of backend types and picks the best
//! one for this machine. [`PlayerManager`] owns the live backend, forwards
//! playback control to it and swaps it out on request.

pub mod factory;
pub mod manager;

pub use factory::{BackendSwitchHandler, PlayerFactory};
pub use manager::PlayerManager;
