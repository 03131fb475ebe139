//! In-memory backends for factory and manager tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tonearm_core::{
    BackendCapabilities, BackendError, BackendInfo, BaseBackend, EventType, Event, PlaybackState,
    PlayerBackend, Result, ANY_PLATFORM,
};

/// Duration reported for every mock track
pub const TRACK_LENGTH: Duration = Duration::from_secs(180);

pub struct MockBackend {
    base: BaseBackend,
    available: Arc<AtomicBool>,
}

impl PlayerBackend for MockBackend {
    fn base(&self) -> &BaseBackend {
        &self.base
    }

    fn play(&self, source: &str) -> Result<()> {
        if source.is_empty() {
            return Err(BackendError::engine("empty source"));
        }
        self.base.set_source(Some(source.to_string()));
        self.base.set_duration(TRACK_LENGTH);
        self.base.mark_play_started();
        self.base.set_position(Duration::ZERO);
        self.base.set_state(PlaybackState::Playing);
        self.base.emit_event(
            Event::new(EventType::TrackChanged, self.name()).with("source", source),
        );
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        if self.base.state() == PlaybackState::Playing {
            self.base.set_state(PlaybackState::Paused);
        }
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        if self.base.state() == PlaybackState::Paused {
            self.base.set_state(PlaybackState::Playing);
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.base.set_state(PlaybackState::Stopped);
        self.base.reset_playback();
        Ok(())
    }

    fn seek(&self, position: Duration) -> Result<()> {
        if self.base.current_source().is_none() {
            return Err(BackendError::NoActivePlayback);
        }
        self.base.set_position(position);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

/// Knobs and observations shared with every instance a mock creator builds
#[derive(Clone, Default)]
pub struct MockHandle {
    pub available: Arc<AtomicBool>,
    pub fail_creation: Arc<AtomicBool>,
    pub created: Arc<AtomicUsize>,
    pub instances: Arc<Mutex<Vec<Arc<MockBackend>>>>,
}

impl MockHandle {
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_creation(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Most recently constructed instance
    pub fn last(&self) -> Arc<MockBackend> {
        self.instances.lock().unwrap().last().cloned().expect("no instance built")
    }
}

/// Registry entry for a mock backend plus its handle
pub fn mock_backend(name: &str, priority: i32, available: bool) -> (BackendInfo, MockHandle) {
    let handle = MockHandle::default();
    handle.set_available(available);

    let shared = handle.clone();
    let backend_name = name.to_string();
    let info = BackendInfo::new(name, format!("{name} test backend"))
        .with_priority(priority)
        .with_capabilities(
            BackendCapabilities::new()
                .with_formats(["mp3", "flac"])
                .with_platforms([ANY_PLATFORM])
                .with_seek(true),
        )
        .with_creator(move |_config| {
            shared.created.fetch_add(1, Ordering::SeqCst);
            if shared.fail_creation.load(Ordering::SeqCst) {
                return Err(BackendError::engine(format!("{backend_name}: device busy")));
            }

            let backend = Arc::new(MockBackend {
                base: BaseBackend::new(
                    backend_name.clone(),
                    "1.0.0",
                    BackendCapabilities::new().with_seek(true),
                ),
                available: Arc::clone(&shared.available),
            });
            shared.instances.lock().unwrap().push(Arc::clone(&backend));
            Ok(backend as Arc<dyn PlayerBackend>)
        });

    (info, handle)
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
