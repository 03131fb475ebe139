//! PlayerManager lifecycle, switching and event tests

mod common;

use common::{mock_backend, wait_for, MockHandle};
use crossbeam_channel::unbounded;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tonearm_config::AudioConfig;
use tonearm_core::{
    BackendConfig, BackendError, Event, EventHandler, EventType, PlaybackState, PlayerBackend,
};
use tonearm_playback::{PlayerFactory, PlayerManager};

const WAIT: Duration = Duration::from_secs(2);

// ===== Test Helpers =====

struct Fixture {
    manager: Arc<PlayerManager>,
    handles: BTreeMap<String, MockHandle>,
}

impl Fixture {
    fn new(entries: &[(&str, i32, bool)]) -> Self {
        let factory = Arc::new(PlayerFactory::empty());
        let mut handles = BTreeMap::new();
        for &(name, priority, available) in entries {
            let (info, handle) = mock_backend(name, priority, available);
            factory.register_backend(info).unwrap();
            handles.insert(name.to_string(), handle);
        }
        Self {
            manager: Arc::new(PlayerManager::new(factory)),
            handles,
        }
    }

    fn running(entries: &[(&str, i32, bool)]) -> Self {
        let fixture = Self::new(entries);
        fixture.manager.initialize().unwrap();
        fixture
    }

    fn handle(&self, name: &str) -> &MockHandle {
        &self.handles[name]
    }
}

fn audio_config(default_backend: &str, entries: &[(&str, f64)]) -> AudioConfig {
    let mut config = AudioConfig::default();
    config.default_backend = default_backend.to_string();
    config.backends = entries
        .iter()
        .map(|&(name, volume)| {
            let mut backend = BackendConfig::named(name);
            backend.default_volume = volume;
            (name.to_string(), backend)
        })
        .collect();
    config
}

// ===== Uninitialized =====

#[test]
fn control_before_initialize_reports_no_player() {
    let fixture = Fixture::new(&[("a", 1, true)]);
    let manager = &fixture.manager;

    assert!(!manager.is_running());
    assert!(manager.current_backend_name().is_none());
    assert!(matches!(manager.play("x.mp3"), Err(BackendError::NoPlayer)));
    assert!(matches!(manager.pause(), Err(BackendError::NoPlayer)));
    assert!(matches!(manager.resume(), Err(BackendError::NoPlayer)));
    assert!(matches!(manager.stop(), Err(BackendError::NoPlayer)));
    assert!(matches!(manager.seek(Duration::from_secs(1)), Err(BackendError::NoPlayer)));
    assert!(matches!(manager.set_volume(0.5), Err(BackendError::NoPlayer)));
    assert!(matches!(manager.volume(), Err(BackendError::NoPlayer)));
    assert!(matches!(manager.state(), Err(BackendError::NoPlayer)));
    assert!(matches!(manager.position(), Err(BackendError::NoPlayer)));
    assert!(matches!(manager.duration(), Err(BackendError::NoPlayer)));
    assert!(matches!(manager.is_playing(), Err(BackendError::NoPlayer)));

    let err = manager.health_check().unwrap_err();
    assert_eq!(err.to_string(), "no player available");
}

#[test]
fn switch_before_initialize_fails() {
    let fixture = Fixture::new(&[("a", 1, true)]);
    assert!(matches!(
        fixture.manager.switch_backend("a", None),
        Err(BackendError::NotRunning)
    ));
}

// ===== Lifecycle =====

#[test]
fn initialize_picks_highest_priority() {
    let fixture = Fixture::running(&[("low", 5, true), ("high", 10, true), ("off", 20, false)]);
    let manager = &fixture.manager;

    assert!(manager.is_running());
    assert_eq!(manager.current_backend_name().as_deref(), Some("high"));
    assert_eq!(manager.factory().current_backend().as_deref(), Some("high"));
    assert_eq!(manager.state().unwrap(), PlaybackState::Stopped);
    assert_eq!(manager.volume().unwrap(), 0.8);

    let config = manager.current_config().unwrap();
    assert_eq!(config.name, "high");
    assert_eq!(config.buffer_size, 4096);
}

#[test]
fn initialize_twice_fails() {
    let fixture = Fixture::running(&[("a", 1, true)]);
    assert!(matches!(
        fixture.manager.initialize(),
        Err(BackendError::AlreadyRunning)
    ));
}

#[test]
fn initialize_without_backends_fails() {
    let fixture = Fixture::new(&[("a", 1, false)]);
    assert!(matches!(
        fixture.manager.initialize(),
        Err(BackendError::NoBackendsAvailable)
    ));
    assert!(!fixture.manager.is_running());
}

#[test]
fn initialize_refreshes_availability() {
    let fixture = Fixture::new(&[("late", 10, false), ("early", 5, true)]);
    fixture.handle("late").set_available(true);

    fixture.manager.initialize().unwrap();
    assert_eq!(fixture.manager.current_backend_name().as_deref(), Some("late"));
}

#[test]
fn initialize_fails_when_construction_fails() {
    let fixture = Fixture::new(&[("broken", 1, true)]);
    fixture.handle("broken").fail_creation(true);

    // Creator failures during the refresh mark the backend unavailable
    assert!(fixture.manager.initialize().is_err());
    assert!(!fixture.manager.is_running());
}

#[test]
fn preferred_backend_is_used_when_available() {
    let fixture = Fixture::new(&[("high", 10, true), ("low", 5, true), ("off", 7, false)]);
    fixture.manager.initialize_with_preference("low").unwrap();
    assert_eq!(fixture.manager.current_backend_name().as_deref(), Some("low"));

    let fixture = Fixture::new(&[("high", 10, true), ("off", 7, false)]);
    fixture.manager.initialize_with_preference("off").unwrap();
    assert_eq!(fixture.manager.current_backend_name().as_deref(), Some("high"));
}

#[test]
fn custom_defaults_apply_on_initialize() {
    let factory = Arc::new(PlayerFactory::empty());
    let (info, _handle) = mock_backend("a", 1, true);
    factory.register_backend(info).unwrap();

    let mut defaults = BackendConfig::default();
    defaults.default_volume = 0.35;
    let manager = PlayerManager::with_defaults(factory, defaults);
    manager.initialize().unwrap();

    assert_eq!(manager.volume().unwrap(), 0.35);
}

#[test]
fn shutdown_releases_backend_and_is_idempotent() {
    let fixture = Fixture::running(&[("a", 1, true)]);
    let manager = &fixture.manager;
    manager.play("/music/a.flac").unwrap();
    let instance = fixture.handle("a").last();

    manager.shutdown().unwrap();
    manager.shutdown().unwrap();

    assert!(!manager.is_running());
    assert!(manager.current_backend().is_none());
    assert!(manager.factory().current_backend().is_none());
    assert_eq!(instance.state(), PlaybackState::Stopped);
    assert!(instance.current_source().is_none());
    assert!(matches!(manager.play("x"), Err(BackendError::NoPlayer)));

    // A stopped manager can start again
    manager.initialize().unwrap();
    assert!(manager.is_running());
}

// ===== Control =====

#[test]
fn control_calls_reach_current_backend() {
    let fixture = Fixture::running(&[("a", 1, true)]);
    let manager = &fixture.manager;

    manager.play("/music/a.flac").unwrap();
    assert!(manager.is_playing().unwrap());
    assert_eq!(manager.duration().unwrap(), common::TRACK_LENGTH);
    assert_eq!(manager.current_source().unwrap().as_deref(), Some("/music/a.flac"));

    manager.seek(Duration::from_secs(12)).unwrap();
    assert_eq!(manager.position().unwrap(), Duration::from_secs(12));

    manager.toggle().unwrap();
    assert_eq!(manager.state().unwrap(), PlaybackState::Paused);
    manager.toggle().unwrap();
    assert_eq!(manager.state().unwrap(), PlaybackState::Playing);

    manager.stop().unwrap();
    assert_eq!(manager.position().unwrap(), Duration::ZERO);
}

#[test]
fn volume_validation_is_enforced() {
    let fixture = Fixture::running(&[("a", 1, true)]);
    let manager = &fixture.manager;

    manager.set_volume(0.3).unwrap();
    assert!(matches!(manager.set_volume(1.01), Err(BackendError::InvalidVolume(_))));
    assert!(matches!(manager.set_volume(-0.1), Err(BackendError::InvalidVolume(_))));
    assert_eq!(manager.volume().unwrap(), 0.3);

    manager.volume_up().unwrap();
    assert!((manager.volume().unwrap() - 0.35).abs() < 1e-9);
    manager.volume_down().unwrap();
    manager.volume_down().unwrap();
    assert!((manager.volume().unwrap() - 0.25).abs() < 1e-9);
}

// ===== Switching =====

#[test]
fn switch_replaces_backend() {
    let fixture = Fixture::running(&[("a", 10, true), ("b", 5, true)]);
    let manager = &fixture.manager;
    let old = fixture.handle("a").last();

    manager.switch_backend("b", None).unwrap();

    assert_eq!(manager.current_backend_name().as_deref(), Some("b"));
    assert_eq!(manager.factory().current_backend().as_deref(), Some("b"));
    assert_eq!(old.state(), PlaybackState::Stopped);
    assert_eq!(manager.current_config().unwrap().name, "b");
}

#[test]
fn switch_overrides_config_name() {
    let fixture = Fixture::running(&[("a", 10, true), ("b", 5, true)]);
    let mut config = BackendConfig::named("something-else");
    config.default_volume = 0.4;

    fixture.manager.switch_backend("b", Some(config)).unwrap();

    assert_eq!(fixture.manager.current_config().unwrap().name, "b");
    assert_eq!(fixture.manager.volume().unwrap(), 0.4);
}

#[test]
fn switch_to_unknown_or_unavailable_leaves_current() {
    let fixture = Fixture::running(&[("a", 10, true), ("off", 5, false)]);
    let manager = &fixture.manager;

    assert!(matches!(
        manager.switch_backend("pulse", None),
        Err(BackendError::NotFound(_))
    ));

    let err = manager.switch_backend("off", None).unwrap_err();
    assert_eq!(err.to_string(), "backend 'off' is not available");
    assert_eq!(manager.current_backend_name().as_deref(), Some("a"));
}

#[test]
fn switch_to_current_updates_in_place() {
    let fixture = Fixture::running(&[("a", 1, true)]);
    let manager = &fixture.manager;
    let instance = fixture.handle("a").last();
    let created = fixture.handle("a").created();

    let mut config = BackendConfig::named("a");
    config.default_volume = 0.55;
    manager.switch_backend("a", Some(config)).unwrap();

    assert_eq!(fixture.handle("a").created(), created);
    assert_eq!(instance.volume(), 0.55);

    // Zero volume means "leave as is"
    let mut config = BackendConfig::named("a");
    config.default_volume = 0.0;
    manager.switch_backend("a", Some(config)).unwrap();
    assert_eq!(instance.volume(), 0.55);

    manager.switch_backend("a", None).unwrap();
    assert_eq!(fixture.handle("a").created(), created);
}

#[test]
fn failed_construction_keeps_previous_backend() {
    let fixture = Fixture::running(&[("a", 10, true), ("b", 5, true)]);
    let manager = &fixture.manager;
    fixture.handle("b").fail_creation(true);

    let err = manager.switch_backend("b", None).unwrap_err();
    assert_eq!(err.to_string(), "b: device busy");
    assert_eq!(manager.current_backend_name().as_deref(), Some("a"));

    // The kept backend is stopped but still usable
    manager.play("/music/after.flac").unwrap();
    assert!(manager.is_playing().unwrap());
}

#[test]
fn failed_construction_resumes_previous_backend() {
    let fixture = Fixture::running(&[("a", 10, true), ("b", 5, true)]);
    let manager = &fixture.manager;
    let kept = fixture.handle("a").last();

    manager.play("/music/a.flac").unwrap();
    manager.seek(Duration::from_secs(30)).unwrap();
    fixture.handle("b").fail_creation(true);

    assert!(manager.switch_backend("b", None).is_err());
    assert!(wait_for(WAIT, || {
        kept.is_playing()
            && kept.current_source().as_deref() == Some("/music/a.flac")
            && kept.position() == Duration::from_secs(30)
    }));
    assert_eq!(manager.current_backend_name().as_deref(), Some("a"));
}

#[test]
fn switch_while_playing_resumes_source_and_position() {
    let fixture = Fixture::running(&[("a", 10, true), ("b", 5, true)]);
    let manager = &fixture.manager;

    manager.play("http://radio.example/live.mp3").unwrap();
    manager.seek(Duration::from_secs(30)).unwrap();
    manager.switch_backend("b", None).unwrap();

    let incoming = fixture.handle("b").last();
    assert!(wait_for(WAIT, || {
        incoming.current_source().as_deref() == Some("http://radio.example/live.mp3")
            && incoming.position() == Duration::from_secs(30)
    }));
    assert!(incoming.is_playing());
}

#[test]
fn switch_while_paused_does_not_resume() {
    let fixture = Fixture::running(&[("a", 10, true), ("b", 5, true)]);
    let manager = &fixture.manager;

    manager.play("/music/a.flac").unwrap();
    manager.pause().unwrap();
    manager.switch_backend("b", None).unwrap();

    std::thread::sleep(Duration::from_millis(300));
    let incoming = fixture.handle("b").last();
    assert_eq!(incoming.state(), PlaybackState::Stopped);
    assert!(incoming.current_source().is_none());
}

#[test]
fn control_calls_during_switches_always_find_a_player() {
    let fixture = Fixture::running(&[("a", 10, true), ("b", 5, true)]);
    let manager = Arc::clone(&fixture.manager);
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let manager = Arc::clone(&manager);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut calls = 0_usize;
            while !done.load(Ordering::SeqCst) {
                manager.volume().unwrap();
                assert!(manager.current_backend_name().is_some());
                calls += 1;
            }
            calls
        })
    };

    for i in 0..20 {
        let target = if i % 2 == 0 { "b" } else { "a" };
        manager.switch_backend(target, None).unwrap();
        assert_eq!(manager.current_backend_name().as_deref(), Some(target));
    }
    done.store(true, Ordering::SeqCst);

    assert!(reader.join().unwrap() > 0);
}

// ===== Events =====

#[test]
fn concurrent_switches_keep_factory_in_step() {
    for _ in 0..50 {
        let fixture = Fixture::running(&[("a", 10, true), ("b", 5, true), ("c", 1, true)]);
        let workers: Vec<_> = ["b", "c"]
            .into_iter()
            .map(|target| {
                let manager = Arc::clone(&fixture.manager);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        manager.switch_backend(target, None).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let manager = &fixture.manager;
        assert_eq!(manager.factory().current_backend(), manager.current_backend_name());
    }
}

#[test]
fn handlers_survive_switches() {
    let fixture = Fixture::running(&[("a", 10, true), ("b", 5, true)]);
    let manager = &fixture.manager;
    let (tx, rx) = unbounded();
    let handler: EventHandler = Arc::new(move |event: &Event| {
        let _ = tx.send((event.source.clone(), event.get_str("new_state").map(str::to_string)));
    });
    manager.add_event_handler(EventType::StateChanged, handler);

    manager.play("/music/a.flac").unwrap();
    let (source, state) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(source, "a");
    assert_eq!(state.as_deref(), Some("playing"));

    manager.stop().unwrap();
    manager.switch_backend("b", None).unwrap();
    while rx.recv_timeout(Duration::from_millis(200)).is_ok() {}

    manager.play("/music/b.flac").unwrap();
    let (source, _state) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(source, "b");
}

#[test]
fn backend_switched_event_carries_from_and_to() {
    let fixture = Fixture::new(&[("a", 10, true), ("b", 5, true)]);
    let manager = &fixture.manager;
    let (tx, rx) = unbounded();
    manager.add_event_handler(
        EventType::BackendSwitched,
        Arc::new(move |event: &Event| {
            let _ = tx.send((
                event.get_str("from").unwrap_or_default().to_string(),
                event.get_str("to").unwrap_or_default().to_string(),
            ));
        }),
    );

    manager.initialize().unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (String::new(), "a".to_string()));

    manager.switch_backend("b", None).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), ("a".to_string(), "b".to_string()));
}

#[test]
fn removing_handlers() {
    let fixture = Fixture::running(&[("a", 1, true)]);
    let manager = &fixture.manager;
    let handler: EventHandler = Arc::new(|_event: &Event| {});

    manager.add_event_handler(EventType::VolumeChanged, Arc::clone(&handler));
    assert_eq!(manager.handler_count(EventType::VolumeChanged), 1);
    assert_eq!(fixture.handle("a").last().base().handler_count(EventType::VolumeChanged), 1);

    manager.remove_event_handler(EventType::VolumeChanged, &handler).unwrap();
    assert_eq!(manager.handler_count(EventType::VolumeChanged), 0);
    assert_eq!(fixture.handle("a").last().base().handler_count(EventType::VolumeChanged), 0);

    assert!(matches!(
        manager.remove_event_handler(EventType::VolumeChanged, &handler),
        Err(BackendError::HandlerNotFound)
    ));
}

// ===== Factory pass-through =====

#[test]
fn factory_pass_through() {
    let fixture = Fixture::running(&[("a", 10, true), ("b", 5, true)]);
    let manager = &fixture.manager;

    assert_eq!(manager.get_available_backends(), vec!["a", "b"]);
    assert_eq!(manager.get_all_backends().len(), 2);
    assert_eq!(manager.get_backend_info("b").unwrap().priority, 5);

    fixture.handle("b").set_available(false);
    manager.refresh_backends();
    assert_eq!(manager.get_available_backends(), vec!["a"]);
}

// ===== Config callbacks =====

#[test]
fn config_default_change_switches_backend() {
    let fixture = Fixture::running(&[("a", 10, true), ("b", 5, true)]);
    let callback = fixture.manager.config_change_callback();

    let old = audio_config("a", &[("a", 0.8), ("b", 0.6)]);
    let new = audio_config("b", &[("a", 0.8), ("b", 0.6)]);
    callback(&old, &new).unwrap();

    assert_eq!(fixture.manager.current_backend_name().as_deref(), Some("b"));
    assert_eq!(fixture.manager.volume().unwrap(), 0.6);
}

#[test]
fn config_entry_change_applies_in_place() {
    let fixture = Fixture::running(&[("a", 10, true)]);
    let callback = fixture.manager.config_change_callback();
    let created = fixture.handle("a").created();

    let old = audio_config("a", &[("a", 0.8)]);
    let new = audio_config("a", &[("a", 0.45)]);
    callback(&old, &new).unwrap();

    assert_eq!(fixture.handle("a").created(), created);
    assert_eq!(fixture.manager.volume().unwrap(), 0.45);
}

#[test]
fn config_switch_to_unavailable_reports_error() {
    let fixture = Fixture::running(&[("a", 10, true), ("off", 5, false)]);
    let callback = fixture.manager.config_change_callback();

    let old = audio_config("a", &[("a", 0.8), ("off", 0.8)]);
    let new = audio_config("off", &[("a", 0.8), ("off", 0.8)]);

    assert!(callback(&old, &new).is_err());
    assert_eq!(fixture.manager.current_backend_name().as_deref(), Some("a"));
}

#[test]
fn config_changes_are_ignored_when_stopped() {
    let fixture = Fixture::new(&[("a", 10, true), ("b", 5, true)]);
    let callback = fixture.manager.config_change_callback();

    let old = audio_config("a", &[("a", 0.8), ("b", 0.8)]);
    let new = audio_config("b", &[("a", 0.8), ("b", 0.8)]);
    callback(&old, &new).unwrap();

    assert!(fixture.manager.current_backend_name().is_none());
}
