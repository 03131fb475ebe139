//! Shared state, volume and position bookkeeping composed into every engine

use crate::dispatch::dispatch;
use crate::error::{BackendError, Result};
use crate::event::{Event, EventHandler, EventHandlers, EventType};
use crate::sync;
use crate::types::{BackendCapabilities, BackendConfig, PlaybackState};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

/// Default volume of a fresh backend
pub const DEFAULT_VOLUME: f64 = 0.8;

/// Capacity of each state/time subscription channel
const SUBSCRIBER_CAPACITY: usize = 32;

#[derive(Debug)]
struct BaseState {
    config: BackendConfig,
    state: PlaybackState,
    volume: f64,
    position: Duration,
    duration: Duration,
    source: Option<String>,
    play_started: Option<Instant>,
}

/// Bookkeeping shared by all engines
///
/// Engines own one of these and return it from `PlayerBackend::base`. Every
/// observable change goes through the setters here so that events and
/// subscriptions stay consistent across engines.
#[derive(Debug)]
pub struct BaseBackend {
    name: String,
    version: String,
    capabilities: BackendCapabilities,
    state: RwLock<BaseState>,
    handlers: RwLock<EventHandlers>,
    state_subscribers: Mutex<Vec<Sender<PlaybackState>>>,
    time_subscribers: Mutex<Vec<Sender<Duration>>>,
}

impl BaseBackend {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        capabilities: BackendCapabilities,
    ) -> Self {
        let name = name.into();
        Self {
            state: RwLock::new(BaseState {
                config: BackendConfig::named(name.clone()),
                state: PlaybackState::Stopped,
                volume: DEFAULT_VOLUME,
                position: Duration::ZERO,
                duration: Duration::ZERO,
                source: None,
                play_started: None,
            }),
            name,
            version: version.into(),
            capabilities,
            handlers: RwLock::new(EventHandlers::new()),
            state_subscribers: Mutex::new(Vec::new()),
            time_subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.capabilities.clone()
    }

    /// Config the backend was initialized with
    pub fn config(&self) -> BackendConfig {
        sync::read(&self.state).config.clone()
    }

    /// Store the config and apply its default volume when nonzero
    ///
    /// No event is raised; nobody can be subscribed yet.
    pub fn initialize(&self, config: &BackendConfig) -> Result<()> {
        let volume = config.default_volume;
        if volume != 0.0 {
            check_volume(volume)?;
        }

        let mut state = sync::write(&self.state);
        state.config = config.clone();
        if volume != 0.0 {
            state.volume = volume;
        }
        tracing::debug!(backend = %self.name, volume = state.volume, "Backend initialized");
        Ok(())
    }

    /// Drop handlers, subscribers and playback bookkeeping
    ///
    /// Safe to call repeatedly.
    pub fn cleanup(&self) {
        sync::write(&self.handlers).clear();
        sync::lock(&self.state_subscribers).clear();
        sync::lock(&self.time_subscribers).clear();

        let mut state = sync::write(&self.state);
        state.state = PlaybackState::Stopped;
        state.position = Duration::ZERO;
        state.source = None;
        state.play_started = None;
    }

    pub fn state(&self) -> PlaybackState {
        sync::read(&self.state).state
    }

    /// Store a new state; raises `state_changed` only on an actual change
    pub fn set_state(&self, new_state: PlaybackState) {
        let old_state = {
            let mut state = sync::write(&self.state);
            std::mem::replace(&mut state.state, new_state)
        };
        if old_state == new_state {
            return;
        }

        tracing::debug!(
            backend = %self.name,
            old = %old_state,
            new = %new_state,
            "Playback state changed"
        );

        notify(&self.state_subscribers, new_state);
        self.emit_event(
            Event::new(EventType::StateChanged, &self.name)
                .with("old_state", old_state.as_str())
                .with("new_state", new_state.as_str()),
        );
    }

    /// Enter `Error` and raise an `error` event carrying `message`
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.set_state(PlaybackState::Error);
        self.emit_event(Event::new(EventType::Error, &self.name).with("message", message));
    }

    pub fn volume(&self) -> f64 {
        sync::read(&self.state).volume
    }

    /// Store a volume in `[0, 1]`; out-of-range values leave the volume untouched
    pub fn set_volume(&self, volume: f64) -> Result<()> {
        check_volume(volume)?;

        let old_volume = {
            let mut state = sync::write(&self.state);
            std::mem::replace(&mut state.volume, volume)
        };

        if (old_volume - volume).abs() > f64::EPSILON {
            self.emit_event(
                Event::new(EventType::VolumeChanged, &self.name)
                    .with("old_volume", old_volume)
                    .with("new_volume", volume),
            );
        }
        Ok(())
    }

    pub fn position(&self) -> Duration {
        sync::read(&self.state).position
    }

    /// Store the position and raise `position_changed` (seconds, floating point)
    pub fn set_position(&self, position: Duration) {
        sync::write(&self.state).position = position;

        notify(&self.time_subscribers, position);
        self.emit_event(
            Event::new(EventType::PositionChanged, &self.name)
                .with("position", position.as_secs_f64()),
        );
    }

    pub fn duration(&self) -> Duration {
        sync::read(&self.state).duration
    }

    pub fn set_duration(&self, duration: Duration) {
        sync::write(&self.state).duration = duration;
    }

    /// Source passed to the last successful `play`
    pub fn current_source(&self) -> Option<String> {
        sync::read(&self.state).source.clone()
    }

    pub fn set_source(&self, source: Option<String>) {
        sync::write(&self.state).source = source;
    }

    /// Start the wall-clock for `played_time`
    pub fn mark_play_started(&self) {
        sync::write(&self.state).play_started = Some(Instant::now());
    }

    /// Wall-clock time since the last `play`, zero when nothing was started
    pub fn played_time(&self) -> Duration {
        sync::read(&self.state)
            .play_started
            .map_or(Duration::ZERO, |started| started.elapsed())
    }

    /// Reset after a stop: position zero, no source, clock cleared
    pub fn reset_playback(&self) {
        {
            let mut state = sync::write(&self.state);
            state.source = None;
            state.play_started = None;
        }
        self.set_position(Duration::ZERO);
    }

    pub fn subscribe_state(&self) -> Receiver<PlaybackState> {
        let (tx, rx) = bounded(SUBSCRIBER_CAPACITY);
        sync::lock(&self.state_subscribers).push(tx);
        rx
    }

    pub fn subscribe_time(&self) -> Receiver<Duration> {
        let (tx, rx) = bounded(SUBSCRIBER_CAPACITY);
        sync::lock(&self.time_subscribers).push(tx);
        rx
    }

    pub fn add_event_handler(&self, event_type: EventType, handler: EventHandler) {
        sync::write(&self.handlers).add(event_type, handler);
    }

    pub fn remove_event_handler(&self, event_type: EventType, handler: &EventHandler) -> Result<()> {
        sync::write(&self.handlers).remove(event_type, handler)
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        sync::read(&self.handlers).count(event_type)
    }

    /// Fan an event out to the handlers registered for its type
    pub fn emit_event(&self, event: Event) {
        let handlers = sync::read(&self.handlers).handlers_for(event.event_type);
        dispatch(handlers, event);
    }
}

fn check_volume(volume: f64) -> Result<()> {
    if (0.0..=1.0).contains(&volume) {
        Ok(())
    } else {
        Err(BackendError::InvalidVolume(volume))
    }
}

/// Push to every live subscriber; full channels skip, closed ones are dropped
fn notify<T: Copy>(subscribers: &Mutex<Vec<Sender<T>>>, value: T) {
    sync::lock(subscribers).retain(|tx| match tx.try_send(value) {
        Ok(()) | Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Disconnected(_)) => false,
    });
}
