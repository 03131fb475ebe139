/// CPAL output driven from a dedicated audio thread
use crate::error::{EngineError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tonearm_core::sync;

/// How long callers wait for the audio thread to acknowledge setup or a load
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands sent to the audio thread
enum AudioCommand {
    /// Replace the buffer and start a fresh stream
    Load {
        samples: Arc<Vec<f32>>,
        reply: Sender<Result<()>>,
    },
    Pause,
    Resume,
    Stop,
    /// Jump to an interleaved sample index
    Seek(usize),
    Shutdown,
}

/// Device format samples must be converted to before loading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// State shared between the control side and the realtime callback
struct OutputShared {
    buffer: Mutex<Arc<Vec<f32>>>,
    /// Interleaved sample index
    position: AtomicUsize,
    playing: AtomicBool,
    /// Set by the callback when the buffer ran out
    finished: AtomicBool,
    /// f32 bits
    volume: AtomicU32,
}

impl OutputShared {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(Arc::new(Vec::new())),
            position: AtomicUsize::new(0),
            playing: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
        }
    }
}

/// Output to the default device
///
/// The cpal `Stream` never leaves the audio thread; everything else talks to
/// it through a bounded command queue and a few atomics.
pub struct AudioOutput {
    command_tx: Sender<AudioCommand>,
    format: OutputFormat,
    shared: Arc<OutputShared>,
    audio_thread: Option<JoinHandle<()>>,
}

impl AudioOutput {
    /// Whether the host has a default output device
    pub fn device_available() -> bool {
        cpal::default_host().default_output_device().is_some()
    }

    /// Open the default output device on a new audio thread
    pub fn open() -> Result<Self> {
        let shared = Arc::new(OutputShared::new());
        let (command_tx, command_rx) = bounded::<AudioCommand>(32);
        let (ready_tx, ready_rx) = bounded::<Result<OutputFormat>>(1);

        let thread_shared = Arc::clone(&shared);
        let audio_thread = std::thread::Builder::new()
            .name("tonearm-audio".to_string())
            .spawn(move || {
                let (device, config, format) = match open_default_device() {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(format));
                audio_thread_run(&device, &config, &thread_shared, &command_rx);
            })?;

        let format = ready_rx
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| EngineError::Timeout("audio device"))??;

        tracing::info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Audio output opened"
        );

        Ok(Self {
            command_tx,
            format,
            shared,
            audio_thread: Some(audio_thread),
        })
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Load interleaved samples in the device format and start playing them
    pub fn load(&self, samples: Vec<f32>) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(AudioCommand::Load {
            samples: Arc::new(samples),
            reply: reply_tx,
        })?;
        reply_rx
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| EngineError::AudioThreadGone)?
    }

    pub fn pause(&self) -> Result<()> {
        self.send(AudioCommand::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(AudioCommand::Resume)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(AudioCommand::Stop)
    }

    pub fn seek(&self, sample_index: usize) -> Result<()> {
        self.send(AudioCommand::Seek(sample_index))
    }

    /// Applied on the next callback
    pub fn set_volume(&self, volume: f32) {
        self.shared
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        self.audio_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Shared handle for pollers that must not borrow the output
    pub fn probe(&self) -> OutputProbe {
        OutputProbe {
            shared: Arc::clone(&self.shared),
            format: self.format,
        }
    }

    fn send(&self, command: AudioCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| EngineError::AudioThreadGone)
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        let _ = self.command_tx.send(AudioCommand::Shutdown);
        if let Some(handle) = self.audio_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Read-only view of playback progress
#[derive(Clone)]
pub struct OutputProbe {
    shared: Arc<OutputShared>,
    format: OutputFormat,
}

impl OutputProbe {
    pub fn position(&self) -> Duration {
        let samples = self.shared.position.load(Ordering::Relaxed);
        let frames = samples / usize::from(self.format.channels.max(1));
        Duration::from_secs_f64(frames as f64 / f64::from(self.format.sample_rate.max(1)))
    }

    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Relaxed)
    }
}

fn open_default_device() -> Result<(Device, StreamConfig, OutputFormat)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(EngineError::DeviceNotFound)?;
    let supported = device.default_output_config()?;
    let format = OutputFormat {
        sample_rate: supported.sample_rate().0,
        channels: supported.channels(),
    };
    Ok((device, supported.config(), format))
}

/// Audio thread main loop; owns the stream
fn audio_thread_run(
    device: &Device,
    config: &StreamConfig,
    shared: &Arc<OutputShared>,
    command_rx: &Receiver<AudioCommand>,
) {
    let mut stream: Option<Stream> = None;

    while let Ok(command) = command_rx.recv() {
        match command {
            AudioCommand::Load { samples, reply } => {
                drop(stream.take());

                *sync::lock(&shared.buffer) = samples;
                shared.position.store(0, Ordering::Relaxed);
                shared.finished.store(false, Ordering::Relaxed);
                shared.playing.store(true, Ordering::Relaxed);

                let result = build_stream(device, config, shared).map(|s| {
                    stream = Some(s);
                });
                if let Err(e) = &result {
                    tracing::error!(error = %e, "Failed to start output stream");
                    shared.playing.store(false, Ordering::Relaxed);
                }
                let _ = reply.send(result);
            }
            AudioCommand::Pause => {
                if let Some(s) = &stream {
                    let _ = s.pause();
                }
                shared.playing.store(false, Ordering::Relaxed);
            }
            AudioCommand::Resume => {
                if let Some(s) = &stream {
                    let _ = s.play();
                    shared.playing.store(true, Ordering::Relaxed);
                }
            }
            AudioCommand::Stop => {
                drop(stream.take());
                shared.playing.store(false, Ordering::Relaxed);
                shared.position.store(0, Ordering::Relaxed);
            }
            AudioCommand::Seek(index) => {
                let len = sync::lock(&shared.buffer).len();
                shared.position.store(index.min(len), Ordering::Relaxed);
                shared.finished.store(false, Ordering::Relaxed);
            }
            AudioCommand::Shutdown => break,
        }
    }

    drop(stream);
    tracing::debug!("Audio thread exited");
}

fn build_stream(device: &Device, config: &StreamConfig, shared: &Arc<OutputShared>) -> Result<Stream> {
    let callback_shared = Arc::clone(shared);
    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            audio_callback(data, &callback_shared);
        },
        |err| tracing::error!(error = %err, "Audio stream error"),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

/// Realtime callback
fn audio_callback(output: &mut [f32], shared: &OutputShared) {
    if !shared.playing.load(Ordering::Relaxed) {
        output.fill(0.0);
        return;
    }

    let volume = f32::from_bits(shared.volume.load(Ordering::Relaxed));
    let buffer = Arc::clone(&*sync::lock(&shared.buffer));
    let mut pos = shared.position.load(Ordering::Relaxed);

    for out in output.iter_mut() {
        *out = match buffer.get(pos) {
            Some(sample) => {
                pos += 1;
                sample * volume
            }
            None => 0.0,
        };
    }

    shared.position.store(pos, Ordering::Relaxed);
    if pos >= buffer.len() {
        shared.playing.store(false, Ordering::Relaxed);
        shared.finished.store(true, Ordering::Relaxed);
    }
}
