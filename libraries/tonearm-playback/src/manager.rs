//! Owner of the live backend
//!
//! At most one backend is current at a time. Control calls clone the current
//! `Arc` under the read lock and delegate outside it; switches hold the write
//! lock for teardown and construction so no control call can observe a
//! half-switched manager.

use crate::factory::PlayerFactory;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tonearm_config::{AudioConfig, ConfigChangeCallback};
use tonearm_core::{
    dispatch, spawn_detached, sync, BackendConfig, BackendError, BackendInfo, Event, EventHandler,
    EventHandlers, EventType, PlaybackState, PlayerBackend, Result,
};
use tracing::{debug, info, warn};

/// Delay between resuming on a new backend and seeking to the old position
const RESTORE_SETTLE: Duration = Duration::from_millis(100);

/// Event source for manager-originated events
const EVENT_SOURCE: &str = "player_manager";

struct Active {
    name: String,
    config: BackendConfig,
    backend: Arc<dyn PlayerBackend>,
}

#[derive(Default)]
struct ManagerState {
    running: bool,
    active: Option<Active>,
}

impl ManagerState {
    fn is_current(&self, backend: &Arc<dyn PlayerBackend>) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| same_backend(&active.backend, backend))
    }
}

pub struct PlayerManager {
    factory: Arc<PlayerFactory>,
    defaults: BackendConfig,
    state: Arc<RwLock<ManagerState>>,
    /// Manager-level handlers, re-attached to every new backend
    handlers: Arc<RwLock<EventHandlers>>,
}

impl std::fmt::Debug for PlayerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerManager")
            .field("running", &self.is_running())
            .field("current", &self.current_backend_name())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl PlayerManager {
    /// Manager using the stock backend defaults
    pub fn new(factory: Arc<PlayerFactory>) -> Self {
        Self::with_defaults(factory, BackendConfig::default())
    }

    /// Manager whose `initialize` and config-less switches use `defaults`
    pub fn with_defaults(factory: Arc<PlayerFactory>, defaults: BackendConfig) -> Self {
        let handlers = Arc::new(RwLock::new(EventHandlers::new()));

        let switch_handlers = Arc::clone(&handlers);
        factory.add_backend_switch_handler(Arc::new(move |from: &str, to: &str| {
            announce_switch(&switch_handlers, from, to);
        }));

        Self {
            factory,
            defaults,
            state: Arc::new(RwLock::new(ManagerState::default())),
            handlers,
        }
    }

    pub fn factory(&self) -> &Arc<PlayerFactory> {
        &self.factory
    }

    // ===== Lifecycle =====

    /// Start on the best available backend
    pub fn initialize(&self) -> Result<()> {
        self.start(None)
    }

    /// Start on `preferred` if it is available, otherwise on the best one
    pub fn initialize_with_preference(&self, preferred: &str) -> Result<()> {
        self.start(Some(preferred))
    }

    fn start(&self, preferred: Option<&str>) -> Result<()> {
        let mut state = sync::write(&self.state);
        if state.running {
            return Err(BackendError::AlreadyRunning);
        }

        self.factory.refresh_availability();

        let name = match preferred {
            Some(name) if self.factory.is_available(name) => name.to_string(),
            Some(name) => {
                warn!(backend = %name, "Preferred backend unavailable, using best available");
                self.factory.get_best_backend()?
            }
            None => self.factory.get_best_backend()?,
        };

        let active = self.launch(&name, self.defaults.clone())?;
        state.active = Some(active);
        state.running = true;
        self.factory.switch_backend("", &name);
        drop(state);

        info!(backend = %name, "Player manager started");
        Ok(())
    }

    /// Stop and release the current backend; a no-op when not running
    pub fn shutdown(&self) -> Result<()> {
        let mut state = sync::write(&self.state);
        if !state.running {
            return Ok(());
        }

        state.running = false;
        self.factory.release_backend();
        if let Some(active) = state.active.take() {
            stop_quietly(&active);
            cleanup_quietly(&active);
            info!(backend = %active.name, "Player manager stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        sync::read(&self.state).running
    }

    /// Replace the current backend with `name`
    ///
    /// Switching to the current backend only re-applies `config` in place.
    /// If the outgoing backend was playing, the new one resumes the same
    /// source at the same position in the background. When the new backend
    /// cannot be built, the outgoing one is kept and resumes instead.
    pub fn switch_backend(&self, name: &str, config: Option<BackendConfig>) -> Result<()> {
        let mut state = sync::write(&self.state);
        if !state.running {
            return Err(BackendError::NotRunning);
        }

        self.factory.get_backend_info(name)?;
        if !self.factory.is_available(name) {
            return Err(BackendError::NotAvailable(name.to_string()));
        }

        if let Some(active) = state.active.as_mut() {
            if active.name == name {
                return update_in_place(active, config);
            }
        }

        let resume = state.active.as_ref().and_then(|active| {
            let backend = &active.backend;
            if backend.state() != PlaybackState::Playing {
                return None;
            }
            backend
                .current_source()
                .map(|source| (source, backend.position()))
        });

        if let Some(active) = &state.active {
            stop_quietly(active);
        }

        let config = config.unwrap_or_else(|| self.defaults.clone());
        let incoming = match self.launch(name, config) {
            Ok(active) => active,
            Err(e) => {
                warn!(backend = %name, error = %e, "Backend switch failed, keeping current backend");
                if let (Some(active), Some((source, position))) = (&state.active, resume) {
                    self.restore(Arc::clone(&active.backend), source, position);
                }
                return Err(e);
            }
        };
        let backend = Arc::clone(&incoming.backend);

        let from = match state.active.replace(incoming) {
            Some(outgoing) => {
                cleanup_quietly(&outgoing);
                outgoing.name
            }
            None => String::new(),
        };
        self.factory.switch_backend(&from, name);
        drop(state);

        info!(from = %from, to = %name, "Switched backend");

        if let Some((source, position)) = resume {
            self.restore(backend, source, position);
        }
        Ok(())
    }

    /// Build, initialize and wire up a backend; nothing is left running on error
    fn launch(&self, name: &str, mut config: BackendConfig) -> Result<Active> {
        config.name = name.to_string();

        let backend = self.factory.create_backend(name, &config)?;
        if let Err(e) = backend.initialize(&config) {
            if let Err(cleanup_err) = backend.cleanup() {
                debug!(backend = %name, error = %cleanup_err, "Cleanup after failed initialize");
            }
            return Err(e);
        }

        for (event_type, handler) in sync::read(&self.handlers).iter() {
            backend.add_event_handler(event_type, Arc::clone(handler));
        }

        Ok(Active {
            name: name.to_string(),
            config,
            backend,
        })
    }

    /// Resume `source` at `position` on `backend` unless another switch wins first
    fn restore(&self, backend: Arc<dyn PlayerBackend>, source: String, position: Duration) {
        let state = Arc::clone(&self.state);
        spawn_detached("tonearm-restore", move || {
            if !sync::read(&state).is_current(&backend) {
                return;
            }

            if let Err(e) = backend.play(&source) {
                warn!(source = %source, error = %e, "Could not resume playback after switch");
                return;
            }

            if position > Duration::ZERO {
                std::thread::sleep(RESTORE_SETTLE);
                if let Err(e) = backend.seek(position) {
                    warn!(error = %e, "Could not restore position after switch");
                }
            }
        });
    }

    // ===== Current backend =====

    fn player(&self) -> Result<Arc<dyn PlayerBackend>> {
        self.current_backend().ok_or(BackendError::NoPlayer)
    }

    pub fn current_backend(&self) -> Option<Arc<dyn PlayerBackend>> {
        sync::read(&self.state)
            .active
            .as_ref()
            .map(|active| Arc::clone(&active.backend))
    }

    pub fn current_backend_name(&self) -> Option<String> {
        sync::read(&self.state)
            .active
            .as_ref()
            .map(|active| active.name.clone())
    }

    /// Config the current backend was built with (or last updated to)
    pub fn current_config(&self) -> Option<BackendConfig> {
        sync::read(&self.state)
            .active
            .as_ref()
            .map(|active| active.config.clone())
    }

    // ===== Playback control =====

    pub fn play(&self, source: &str) -> Result<()> {
        self.player()?.play(source)
    }

    pub fn pause(&self) -> Result<()> {
        self.player()?.pause()
    }

    pub fn resume(&self) -> Result<()> {
        self.player()?.resume()
    }

    pub fn stop(&self) -> Result<()> {
        self.player()?.stop()
    }

    pub fn toggle(&self) -> Result<()> {
        self.player()?.toggle()
    }

    pub fn seek(&self, position: Duration) -> Result<()> {
        self.player()?.seek(position)
    }

    pub fn set_volume(&self, volume: f64) -> Result<()> {
        self.player()?.set_volume(volume)
    }

    pub fn volume_up(&self) -> Result<()> {
        self.player()?.volume_up()
    }

    pub fn volume_down(&self) -> Result<()> {
        self.player()?.volume_down()
    }

    pub fn volume(&self) -> Result<f64> {
        Ok(self.player()?.volume())
    }

    pub fn state(&self) -> Result<PlaybackState> {
        Ok(self.player()?.state())
    }

    pub fn position(&self) -> Result<Duration> {
        Ok(self.player()?.position())
    }

    pub fn duration(&self) -> Result<Duration> {
        Ok(self.player()?.duration())
    }

    pub fn played_time(&self) -> Result<Duration> {
        Ok(self.player()?.played_time())
    }

    pub fn current_source(&self) -> Result<Option<String>> {
        Ok(self.player()?.current_source())
    }

    pub fn is_playing(&self) -> Result<bool> {
        Ok(self.player()?.is_playing())
    }

    pub fn health_check(&self) -> Result<()> {
        self.player()?.health_check()
    }

    // ===== Events =====

    /// Register a handler that survives backend switches
    pub fn add_event_handler(&self, event_type: EventType, handler: EventHandler) {
        let state = sync::read(&self.state);
        sync::write(&self.handlers).add(event_type, Arc::clone(&handler));
        if let Some(active) = &state.active {
            active.backend.add_event_handler(event_type, handler);
        }
    }

    pub fn remove_event_handler(&self, event_type: EventType, handler: &EventHandler) -> Result<()> {
        let state = sync::read(&self.state);
        sync::write(&self.handlers).remove(event_type, handler)?;
        if let Some(active) = &state.active {
            if let Err(e) = active.backend.remove_event_handler(event_type, handler) {
                debug!(backend = %active.name, error = %e, "Handler was not attached to backend");
            }
        }
        Ok(())
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        sync::read(&self.handlers).count(event_type)
    }

    // ===== Factory pass-through =====

    pub fn get_available_backends(&self) -> Vec<String> {
        self.factory.get_available_backends()
    }

    pub fn get_backend_info(&self, name: &str) -> Result<BackendInfo> {
        self.factory.get_backend_info(name)
    }

    pub fn get_all_backends(&self) -> BTreeMap<String, BackendInfo> {
        self.factory.get_all_backends()
    }

    pub fn refresh_backends(&self) {
        self.factory.refresh_availability();
    }

    // ===== Configuration =====

    /// Callback that keeps this manager in line with the audio config
    ///
    /// A new `default_backend` triggers a switch; an edited entry for the
    /// current backend is re-applied in place.
    pub fn config_change_callback(self: &Arc<Self>) -> ConfigChangeCallback {
        let manager = Arc::downgrade(self);
        Arc::new(move |old: &AudioConfig, new: &AudioConfig| {
            let Some(manager) = manager.upgrade() else {
                return Ok(());
            };
            manager.apply_config_change(old, new).map_err(Into::into)
        })
    }

    fn apply_config_change(&self, old: &AudioConfig, new: &AudioConfig) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        let target = new.default_backend.as_str();
        if old.default_backend != target {
            info!(from = %old.default_backend, to = %target, "Default backend changed");
            return self.switch_backend(target, Some(new.backend_or_global(target)));
        }

        let entry_changed = old.backends.get(target) != new.backends.get(target);
        if entry_changed && self.current_backend_name().as_deref() == Some(target) {
            return self.switch_backend(target, Some(new.backend_or_global(target)));
        }

        Ok(())
    }
}

fn update_in_place(active: &mut Active, config: Option<BackendConfig>) -> Result<()> {
    let Some(mut config) = config else {
        return Ok(());
    };

    if config.default_volume > 0.0 {
        active.backend.set_volume(config.default_volume)?;
    }
    config.name = active.name.clone();
    active.config = config;
    debug!(backend = %active.name, "Updated backend config in place");
    Ok(())
}

fn stop_quietly(active: &Active) {
    if let Err(e) = active.backend.stop() {
        warn!(backend = %active.name, error = %e, "Failed to stop backend");
    }
}

fn cleanup_quietly(active: &Active) {
    if let Err(e) = active.backend.cleanup() {
        warn!(backend = %active.name, error = %e, "Failed to clean up backend");
    }
}

/// Same instance, ignoring vtable identity
fn same_backend(a: &Arc<dyn PlayerBackend>, b: &Arc<dyn PlayerBackend>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

fn announce_switch(handlers: &RwLock<EventHandlers>, from: &str, to: &str) {
    let handlers = sync::read(handlers).handlers_for(EventType::BackendSwitched);
    let event = Event::new(EventType::BackendSwitched, EVENT_SOURCE)
        .with("from", from)
        .with("to", to);
    dispatch(handlers, event);
}
