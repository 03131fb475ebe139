//! Registry of backend constructors
//!
//! Selection is by availability first, then priority. The factory also
//! remembers which backend name is active so switch listeners can be told.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tonearm_core::{
    spawn_detached, sync, BackendConfig, BackendError, BackendInfo, PlayerBackend, Result,
};
use tracing::{debug, info, warn};

/// Called with `(from, to)` whenever the active backend changes
pub type BackendSwitchHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

pub struct PlayerFactory {
    backends: RwLock<BTreeMap<String, BackendInfo>>,
    current: RwLock<Option<String>>,
    switch_handlers: RwLock<Vec<BackendSwitchHandler>>,
}

impl std::fmt::Debug for PlayerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerFactory")
            .field("backends", &sync::read(&self.backends).keys().collect::<Vec<_>>())
            .field("current", &*sync::read(&self.current))
            .finish_non_exhaustive()
    }
}

impl Default for PlayerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerFactory {
    /// Factory pre-loaded with the engines built for this platform
    pub fn new() -> Self {
        let factory = Self::empty();
        for info in tonearm_engines::builtin_backends() {
            let name = info.name.clone();
            if let Err(e) = factory.register_backend(info) {
                warn!(backend = %name, error = %e, "Skipping built-in backend");
            }
        }
        factory
    }

    /// Factory with nothing registered
    pub fn empty() -> Self {
        Self {
            backends: RwLock::new(BTreeMap::new()),
            current: RwLock::new(None),
            switch_handlers: RwLock::new(Vec::new()),
        }
    }

    /// Store `info` under its name, replacing any previous entry
    ///
    /// Availability is probed before the entry becomes visible.
    pub fn register_backend(&self, mut info: BackendInfo) -> Result<()> {
        if info.name.is_empty() {
            return Err(BackendError::EmptyName);
        }
        let Some(creator) = info.creator.clone() else {
            return Err(BackendError::MissingCreator);
        };

        info.available = info.supports_current_platform() && probe(&info.name, |config| creator(config));
        debug!(backend = %info.name, available = info.available, "Registered backend");

        sync::write(&self.backends).insert(info.name.clone(), info);
        Ok(())
    }

    /// Build a new instance of `name` with `config`
    ///
    /// The creator runs outside the registry lock; its errors are returned as is.
    pub fn create_backend(&self, name: &str, config: &BackendConfig) -> Result<Arc<dyn PlayerBackend>> {
        let creator = sync::read(&self.backends)
            .get(name)
            .and_then(|info| info.creator.clone())
            .ok_or_else(|| BackendError::NotFound(name.to_string()))?;

        creator(config)
    }

    /// Copy of one entry, without its creator
    pub fn get_backend_info(&self, name: &str) -> Result<BackendInfo> {
        sync::read(&self.backends)
            .get(name)
            .map(BackendInfo::without_creator)
            .ok_or_else(|| BackendError::NotFound(name.to_string()))
    }

    /// Copies of every entry, without creators
    pub fn get_all_backends(&self) -> BTreeMap<String, BackendInfo> {
        sync::read(&self.backends)
            .iter()
            .map(|(name, info)| (name.clone(), info.without_creator()))
            .collect()
    }

    /// Names of available backends, highest priority first (ties by name)
    pub fn get_available_backends(&self) -> Vec<String> {
        let backends = sync::read(&self.backends);
        let mut available: Vec<&BackendInfo> =
            backends.values().filter(|info| info.available).collect();
        available.sort_by(|a, b| b.priority.cmp(&a.priority));
        available.into_iter().map(|info| info.name.clone()).collect()
    }

    /// Highest-priority available backend
    pub fn get_best_backend(&self) -> Result<String> {
        self.get_available_backends()
            .into_iter()
            .next()
            .ok_or(BackendError::NoBackendsAvailable)
    }

    /// Whether `name` is registered and passed its last probe
    pub fn is_available(&self, name: &str) -> bool {
        sync::read(&self.backends)
            .get(name)
            .is_some_and(|info| info.available)
    }

    /// Re-probe every registered backend
    ///
    /// A creator that fails only marks its backend unavailable.
    pub fn refresh_availability(&self) {
        let entries: Vec<(String, bool, Option<tonearm_core::BackendCreator>)> =
            sync::read(&self.backends)
                .values()
                .map(|info| {
                    (
                        info.name.clone(),
                        info.supports_current_platform(),
                        info.creator.clone(),
                    )
                })
                .collect();

        let results: Vec<(String, bool)> = entries
            .into_iter()
            .map(|(name, platform_ok, creator)| {
                let available = match creator {
                    Some(creator) if platform_ok => probe(&name, |config| creator(config)),
                    _ => false,
                };
                (name, available)
            })
            .collect();

        let mut backends = sync::write(&self.backends);
        for (name, available) in results {
            if let Some(info) = backends.get_mut(&name) {
                if info.available != available {
                    info!(backend = %name, available, "Backend availability changed");
                }
                info.available = available;
            }
        }
    }

    pub fn add_backend_switch_handler(&self, handler: BackendSwitchHandler) {
        sync::write(&self.switch_handlers).push(handler);
    }

    /// Record `to` as active and notify switch handlers with `(from, to)`
    ///
    /// Only bookkeeping: instances are built and torn down by the manager.
    pub fn switch_backend(&self, from: &str, to: &str) {
        *sync::write(&self.current) = Some(to.to_string());

        let handlers = sync::read(&self.switch_handlers).clone();
        for handler in handlers {
            let from = from.to_string();
            let to = to.to_string();
            spawn_detached("tonearm-switch", move || handler(&from, &to));
        }
    }

    /// Forget the active backend without notifying switch handlers
    pub fn release_backend(&self) {
        *sync::write(&self.current) = None;
    }

    /// Name recorded by the last [`PlayerFactory::switch_backend`], cleared
    /// by [`PlayerFactory::release_backend`]
    pub fn current_backend(&self) -> Option<String> {
        sync::read(&self.current).clone()
    }
}

/// Build a throwaway instance and ask it whether it can run here
fn probe<F>(name: &str, create: F) -> bool
where
    F: FnOnce(&BackendConfig) -> Result<Arc<dyn PlayerBackend>>,
{
    match create(&BackendConfig::named(name)) {
        Ok(backend) => {
            let available = backend.is_available();
            if let Err(e) = backend.cleanup() {
                debug!(backend = %name, error = %e, "Probe cleanup failed");
            }
            available
        }
        Err(e) => {
            debug!(backend = %name, error = %e, "Probe construction failed");
            false
        }
    }
}
