//! The contract every playback engine implements

use crate::base::BaseBackend;
use crate::error::Result;
use crate::event::{EventHandler, EventType};
use crate::types::{BackendCapabilities, BackendConfig, PlaybackState};
use crossbeam_channel::Receiver;
use std::time::Duration;

/// Step applied by `volume_up` / `volume_down`
pub const VOLUME_STEP: f64 = 0.05;

/// A playback engine
///
/// Engines compose a [`BaseBackend`] and return it from [`PlayerBackend::base`];
/// the provided methods delegate bookkeeping to it. Engines override the
/// provided methods whenever the external player must be told about a change
/// (volume, cleanup, health).
///
/// All methods take `&self`: instances are shared as `Arc<dyn PlayerBackend>`
/// and synchronize internally.
pub trait PlayerBackend: Send + Sync {
    /// Shared bookkeeping
    fn base(&self) -> &BaseBackend;

    /// Begin playback of a path or URL
    fn play(&self, source: &str) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;

    /// Stop and reset the position to zero
    fn stop(&self) -> Result<()>;

    fn seek(&self, position: Duration) -> Result<()>;

    /// Liveness probe; must be cheap enough to call on every refresh
    fn is_available(&self) -> bool;

    /// Prepare the instance; called once, right after construction
    fn initialize(&self, config: &BackendConfig) -> Result<()> {
        self.base().initialize(config)
    }

    /// Release engine resources; idempotent
    fn cleanup(&self) -> Result<()> {
        self.base().cleanup();
        Ok(())
    }

    /// Pause when playing, otherwise resume
    fn toggle(&self) -> Result<()> {
        if self.state() == PlaybackState::Playing {
            self.pause()
        } else {
            self.resume()
        }
    }

    fn state(&self) -> PlaybackState {
        self.base().state()
    }

    fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Push channel of state transitions
    fn subscribe_state(&self) -> Receiver<PlaybackState> {
        self.base().subscribe_state()
    }

    /// Current playback position
    fn position(&self) -> Duration {
        self.base().position()
    }

    /// Wall-clock time since playback started
    fn played_time(&self) -> Duration {
        self.base().played_time()
    }

    fn duration(&self) -> Duration {
        self.base().duration()
    }

    /// Push channel of position updates; `None` for engines without ticking
    fn subscribe_time(&self) -> Option<Receiver<Duration>> {
        None
    }

    /// Source passed to the last `play`, cleared by `stop`
    fn current_source(&self) -> Option<String> {
        self.base().current_source()
    }

    fn volume(&self) -> f64 {
        self.base().volume()
    }

    fn set_volume(&self, volume: f64) -> Result<()> {
        self.base().set_volume(volume)
    }

    fn volume_up(&self) -> Result<()> {
        self.set_volume((self.volume() + VOLUME_STEP).min(1.0))
    }

    fn volume_down(&self) -> Result<()> {
        self.set_volume((self.volume() - VOLUME_STEP).max(0.0))
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.base().capabilities()
    }

    fn name(&self) -> &str {
        self.base().name()
    }

    fn version(&self) -> &str {
        self.base().version()
    }

    fn add_event_handler(&self, event_type: EventType, handler: EventHandler) {
        self.base().add_event_handler(event_type, handler);
    }

    fn remove_event_handler(&self, event_type: EventType, handler: &EventHandler) -> Result<()> {
        self.base().remove_event_handler(event_type, handler)
    }

    /// Lightweight self-test
    fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
