//! Tonearm core
//!
//! The player backend contract and everything engines share:
//! - [`PlayerBackend`]: the capability set every engine implements
//! - [`BaseBackend`]: state, volume and position bookkeeping with event fan-out
//! - Value types describing backends ([`BackendInfo`], [`BackendConfig`], ...)
//! - [`Event`] and the per-type handler registry

pub mod backend;
pub mod base;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod sync;
pub mod types;

pub use backend::{PlayerBackend, VOLUME_STEP};
pub use base::{BaseBackend, DEFAULT_VOLUME};
pub use dispatch::{dispatch, spawn_detached};
pub use error::{BackendError, Result};
pub use event::{Event, EventHandler, EventHandlers, EventType};
pub use types::*;
