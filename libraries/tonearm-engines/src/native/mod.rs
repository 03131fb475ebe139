//! In-process engine: Symphonia decode, Rubato resample, CPAL output
//!
//! Files are decoded in full on `play`, converted to the device format and
//! handed to the audio thread. A ticker thread mirrors the output position
//! into the shared bookkeeping and notices the end of the track.

pub mod decode;
pub mod output;

use crate::error::EngineError;
use crate::ticker::Ticker;
use output::{AudioOutput, OutputProbe};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tonearm_core::{
    sync, BackendCapabilities, BackendConfig, BackendError, BackendInfo, BaseBackend, Event,
    EventType, PlaybackState, PlayerBackend, Result,
};

/// Registry key
pub const NAME: &str = "native";

const VERSION: &str = env!("CARGO_PKG_VERSION");
const PRIORITY: i32 = 5;
const TICK_INTERVAL: Duration = Duration::from_millis(250);

pub struct NativeBackend {
    base: Arc<BaseBackend>,
    output: Mutex<Option<AudioOutput>>,
    ticker: Mutex<Option<Ticker>>,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self {
            base: Arc::new(BaseBackend::new(NAME, VERSION, capabilities())),
            output: Mutex::new(None),
            ticker: Mutex::new(None),
        }
    }

    /// Registry entry for the factory
    pub fn backend_info() -> BackendInfo {
        BackendInfo::new(NAME, "In-process decoder rendering to the default audio device")
            .with_version(VERSION)
            .with_capabilities(capabilities())
            .with_priority(PRIORITY)
            .with_creator(|_config: &BackendConfig| {
                Ok(Arc::new(NativeBackend::new()) as Arc<dyn PlayerBackend>)
            })
    }

    fn start_ticker(&self, probe: OutputProbe) {
        let base = Arc::clone(&self.base);
        let ticker = Ticker::spawn("tonearm-native-ticker", TICK_INTERVAL, move || {
            if probe.is_finished() {
                tracing::debug!(backend = NAME, "Track finished");
                base.set_state(PlaybackState::Stopped);
                base.reset_playback();
                return ControlFlow::Break(());
            }
            if base.state() == PlaybackState::Playing {
                base.set_position(probe.position());
            }
            ControlFlow::Continue(())
        });

        match ticker {
            Ok(ticker) => *sync::lock(&self.ticker) = Some(ticker),
            Err(e) => tracing::warn!(backend = NAME, error = %e, "Failed to start position ticker"),
        }
    }

    fn stop_ticker(&self) {
        let ticker = sync::lock(&self.ticker).take();
        if let Some(ticker) = ticker {
            ticker.stop();
        }
    }

    fn decode_for_output(&self, path: &Path) -> Result<(Vec<f32>, Duration)> {
        let format = sync::lock(&self.output)
            .as_ref()
            .map(AudioOutput::format)
            .ok_or_else(|| BackendError::engine("native output is not initialized"))?;

        let audio = decode::decode_file(path)?;
        let duration = audio.duration();
        let audio = decode::resample(decode::remix(audio, format.channels), format.sample_rate)?;
        Ok((audio.samples, duration))
    }

    fn load(&self, samples: Vec<f32>) -> Result<OutputProbe> {
        let guard = sync::lock(&self.output);
        let output = guard
            .as_ref()
            .ok_or_else(|| BackendError::engine("native output is not initialized"))?;
        output.set_volume(self.base.volume() as f32);
        output.load(samples)?;
        Ok(output.probe())
    }

    fn with_output<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&AudioOutput) -> crate::error::Result<()>,
    {
        match sync::lock(&self.output).as_ref() {
            Some(output) => f(output).map_err(BackendError::from),
            None => Err(BackendError::NoActivePlayback),
        }
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn capabilities() -> BackendCapabilities {
    BackendCapabilities::new()
        .with_formats(decode::SUPPORTED_FORMATS.iter().copied())
        .with_platforms(["linux", "macos", "windows"])
        .with_seek(true)
        .with_streaming(false)
        .with_feature("native", true)
        .with_metadata("decoder", "symphonia")
        .with_metadata("output", "cpal")
}

/// Local path for a source locator; `file://` URLs are accepted
fn resolve_path(source: &str) -> std::result::Result<PathBuf, EngineError> {
    if let Some(path) = source.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if source.contains("://") {
        return Err(EngineError::UnsupportedSource(source.to_string()));
    }
    Ok(PathBuf::from(source))
}

impl PlayerBackend for NativeBackend {
    fn base(&self) -> &BaseBackend {
        &self.base
    }

    fn initialize(&self, config: &BackendConfig) -> Result<()> {
        self.base.initialize(config)?;
        let output = AudioOutput::open()?;
        output.set_volume(self.base.volume() as f32);
        *sync::lock(&self.output) = Some(output);
        Ok(())
    }

    fn play(&self, source: &str) -> Result<()> {
        let path = resolve_path(source)?;
        self.stop_ticker();
        self.base.set_state(PlaybackState::Buffering);

        let loaded = self
            .decode_for_output(&path)
            .and_then(|(samples, duration)| Ok((self.load(samples)?, duration)));
        let (probe, duration) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(backend = NAME, source, error = %e, "Failed to start playback");
                self.base.fail(e.to_string());
                return Err(e);
            }
        };

        self.base.set_source(Some(source.to_string()));
        self.base.set_duration(duration);
        self.base.mark_play_started();
        self.base.set_position(Duration::ZERO);
        self.base.set_state(PlaybackState::Playing);
        self.base.emit_event(
            Event::new(EventType::TrackChanged, NAME)
                .with("source", source)
                .with("duration", duration.as_secs_f64()),
        );
        self.start_ticker(probe);

        tracing::info!(backend = NAME, source, duration_secs = duration.as_secs_f64(), "Playing");
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        if self.base.state() != PlaybackState::Playing {
            return Ok(());
        }
        self.with_output(AudioOutput::pause)?;
        self.base.set_state(PlaybackState::Paused);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        match self.base.state() {
            PlaybackState::Paused => {
                self.with_output(AudioOutput::resume)?;
                self.base.set_state(PlaybackState::Playing);
                Ok(())
            }
            _ if self.base.current_source().is_none() => Err(BackendError::NoActivePlayback),
            _ => Ok(()),
        }
    }

    fn stop(&self) -> Result<()> {
        self.stop_ticker();
        if let Some(output) = sync::lock(&self.output).as_ref() {
            output.stop()?;
        }
        self.base.set_state(PlaybackState::Stopped);
        self.base.reset_playback();
        Ok(())
    }

    fn seek(&self, position: Duration) -> Result<()> {
        if self.base.current_source().is_none() {
            return Err(BackendError::NoActivePlayback);
        }
        let position = position.min(self.base.duration());
        self.with_output(|output| {
            let format = output.format();
            let frame = (position.as_secs_f64() * f64::from(format.sample_rate)) as usize;
            output.seek(frame * usize::from(format.channels))
        })?;
        self.base.set_position(position);
        Ok(())
    }

    fn subscribe_time(&self) -> Option<crossbeam_channel::Receiver<Duration>> {
        Some(self.base.subscribe_time())
    }

    fn set_volume(&self, volume: f64) -> Result<()> {
        self.base.set_volume(volume)?;
        if let Some(output) = sync::lock(&self.output).as_ref() {
            output.set_volume(volume as f32);
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        AudioOutput::device_available()
    }

    fn health_check(&self) -> Result<()> {
        match sync::lock(&self.output).as_ref() {
            Some(output) if output.is_alive() => Ok(()),
            Some(_) => Err(EngineError::AudioThreadGone.into()),
            None => Err(BackendError::engine("native output is not initialized")),
        }
    }

    fn cleanup(&self) -> Result<()> {
        self.stop_ticker();
        drop(sync::lock(&self.output).take());
        self.base.cleanup();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_urls_resolve_to_paths() {
        assert_eq!(
            resolve_path("file:///music/a.flac").unwrap(),
            PathBuf::from("/music/a.flac")
        );
        assert_eq!(
            resolve_path("music/a.flac").unwrap(),
            PathBuf::from("music/a.flac")
        );
        assert!(matches!(
            resolve_path("https://radio.example/live"),
            Err(EngineError::UnsupportedSource(_))
        ));
    }

    #[test]
    fn registry_entry() {
        let info = NativeBackend::backend_info();
        assert_eq!(info.name, NAME);
        assert_eq!(info.priority, 5);
        assert!(info.capabilities.seek_support);
        assert!(!info.capabilities.streaming_support);
        assert!(info.capabilities.supports_format("flac"));
        assert!(info.creator.is_some());
    }

    #[test]
    fn controls_before_initialize() {
        let backend = NativeBackend::new();
        assert!(matches!(
            backend.seek(Duration::from_secs(1)),
            Err(BackendError::NoActivePlayback)
        ));
        assert!(matches!(backend.resume(), Err(BackendError::NoActivePlayback)));
        assert!(backend.pause().is_ok());
        assert!(backend.stop().is_ok());
        assert!(backend.health_check().is_err());
        assert!(backend.play("/does/not/exist.flac").is_err());
        assert_eq!(backend.state(), PlaybackState::Error);
    }
}
