//! mpv driven over its JSON IPC socket
//!
//! One idle `mpv` process per backend instance is spawned on the first
//! `play`; every control call is a JSON command on the Unix socket given by
//! `--input-ipc-server`.

use crate::error::EngineError;
use crate::ticker::Ticker;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::ops::ControlFlow;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tonearm_core::{
    sync, BackendCapabilities, BackendConfig, BackendError, BackendInfo, BaseBackend, Event,
    EventType, PlaybackState, PlayerBackend, Result,
};

/// Registry key
pub const NAME: &str = "mpv";

const VERSION: &str = env!("CARGO_PKG_VERSION");
const PRIORITY: i32 = 7;
const IPC_TIMEOUT: Duration = Duration::from_secs(2);
const STARTUP_POLL: Duration = Duration::from_millis(100);
const STARTUP_ATTEMPTS: u32 = 50;
const TICK_INTERVAL: Duration = Duration::from_millis(500);
/// Consecutive failed polls before the process is considered gone
const MAX_POLL_FAILURES: u32 = 3;

static SOCKET_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Client for mpv's JSON IPC protocol
///
/// Opens a fresh connection per command; replies are matched by `request_id`
/// and interleaved event lines are skipped.
#[derive(Debug)]
pub struct MpvIpc {
    socket_path: PathBuf,
    next_request_id: AtomicU64,
}

impl MpvIpc {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a command and return its `data` field
    pub fn command(&self, args: &[Value]) -> std::result::Result<Value, EngineError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);

        let mut stream = UnixStream::connect(&self.socket_path)?;
        stream.set_read_timeout(Some(IPC_TIMEOUT))?;
        stream.set_write_timeout(Some(IPC_TIMEOUT))?;
        stream.write_all(encode_command(args, request_id).as_bytes())?;

        for line in BufReader::new(stream).lines() {
            if let Some(reply) = parse_reply(&line?, request_id) {
                return reply.map_err(|reason| EngineError::Rejected {
                    engine: NAME,
                    command: describe(args),
                    reason,
                });
            }
        }

        Err(EngineError::Protocol(format!(
            "mpv closed the connection before answering '{}'",
            describe(args)
        )))
    }

    pub fn get_property(&self, name: &str) -> std::result::Result<Value, EngineError> {
        self.command(&[json!("get_property"), json!(name)])
    }

    pub fn set_property(&self, name: &str, value: Value) -> std::result::Result<(), EngineError> {
        self.command(&[json!("set_property"), json!(name), value])
            .map(|_| ())
    }

    fn get_f64(&self, name: &str) -> std::result::Result<Option<f64>, EngineError> {
        self.get_property(name).map(|v| v.as_f64())
    }
}

/// One line of the IPC protocol
pub(crate) fn encode_command(args: &[Value], request_id: u64) -> String {
    let mut line = json!({ "command": args, "request_id": request_id }).to_string();
    line.push('\n');
    line
}

/// Reply for `request_id`, or `None` for events and unrelated lines
pub(crate) fn parse_reply(
    line: &str,
    request_id: u64,
) -> Option<std::result::Result<Value, String>> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value.get("event").is_some() {
        return None;
    }
    if value.get("request_id").and_then(Value::as_u64) != Some(request_id) {
        return None;
    }

    match value.get("error").and_then(Value::as_str) {
        Some("success") => Some(Ok(value.get("data").cloned().unwrap_or(Value::Null))),
        Some(error) => Some(Err(error.to_string())),
        None => Some(Err("reply without status".to_string())),
    }
}

fn describe(args: &[Value]) -> String {
    args.iter()
        .map(|arg| match arg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Locate an executable by explicit path or on `PATH`
pub fn find_binary(binary: &str) -> Option<PathBuf> {
    let candidate = Path::new(binary);
    if binary.contains(std::path::MAIN_SEPARATOR) {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|path| path.is_file())
}

/// Engine options read from `BackendConfig::settings`
#[derive(Debug, Clone)]
struct MpvSettings {
    /// `binary`: path or name of the mpv executable
    binary: String,
    /// `socket_path`: IPC socket location
    socket_path: PathBuf,
    /// `extra_args`: appended to the mpv command line
    extra_args: Vec<String>,
}

impl MpvSettings {
    fn from_config(config: &BackendConfig) -> Self {
        let socket_path = config.setting_str("socket_path").map_or_else(
            || {
                std::env::temp_dir().join(format!(
                    "tonearm-mpv-{}-{}.sock",
                    std::process::id(),
                    SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed)
                ))
            },
            PathBuf::from,
        );

        Self {
            binary: config.setting_str("binary").unwrap_or("mpv").to_string(),
            socket_path,
            extra_args: config.setting_list("extra_args"),
        }
    }
}

pub struct MpvBackend {
    base: Arc<BaseBackend>,
    settings: MpvSettings,
    ipc: Arc<MpvIpc>,
    process: Mutex<Option<Child>>,
    ticker: Mutex<Option<Ticker>>,
}

impl MpvBackend {
    pub fn new(config: &BackendConfig) -> Self {
        let settings = MpvSettings::from_config(config);
        Self {
            base: Arc::new(BaseBackend::new(NAME, VERSION, capabilities())),
            ipc: Arc::new(MpvIpc::new(settings.socket_path.clone())),
            settings,
            process: Mutex::new(None),
            ticker: Mutex::new(None),
        }
    }

    /// Registry entry for the factory
    pub fn backend_info() -> BackendInfo {
        BackendInfo::new(NAME, "mpv media player controlled over JSON IPC")
            .with_version(VERSION)
            .with_capabilities(capabilities())
            .with_priority(PRIORITY)
            .with_creator(|config: &BackendConfig| {
                Ok(Arc::new(MpvBackend::new(config)) as Arc<dyn PlayerBackend>)
            })
    }

    /// Spawn mpv if it is not running and wait for its socket
    fn ensure_process(&self) -> Result<()> {
        let mut process = sync::lock(&self.process);
        if let Some(child) = process.as_mut() {
            if child.try_wait()?.is_none() {
                return Ok(());
            }
            tracing::warn!(backend = NAME, "mpv exited, restarting");
        }

        let _ = std::fs::remove_file(&self.settings.socket_path);
        let child = Command::new(&self.settings.binary)
            .arg("--idle=yes")
            .arg("--no-video")
            .arg("--no-terminal")
            .arg(format!(
                "--input-ipc-server={}",
                self.settings.socket_path.display()
            ))
            .arg(format!("--volume={:.0}", self.base.volume() * 100.0))
            .args(&self.settings.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        tracing::info!(backend = NAME, pid = child.id(), "Spawned mpv");
        *process = Some(child);

        for _ in 0..STARTUP_ATTEMPTS {
            if UnixStream::connect(&self.settings.socket_path).is_ok() {
                return Ok(());
            }
            std::thread::sleep(STARTUP_POLL);
        }
        Err(EngineError::Timeout("mpv IPC socket").into())
    }

    fn process_running(&self) -> bool {
        sync::lock(&self.process)
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }

    fn start_ticker(&self) {
        let base = Arc::clone(&self.base);
        let ipc = Arc::clone(&self.ipc);
        let mut seen_active = false;
        let mut failures = 0;

        let ticker = Ticker::spawn("tonearm-mpv-ticker", TICK_INTERVAL, move || {
            match poll(&ipc, &base, &mut seen_active) {
                Ok(flow) => {
                    failures = 0;
                    flow
                }
                Err(e) => {
                    failures += 1;
                    tracing::debug!(backend = NAME, error = %e, failures, "mpv poll failed");
                    if failures >= MAX_POLL_FAILURES {
                        tracing::warn!(backend = NAME, "Lost contact with mpv");
                        base.fail("lost contact with mpv");
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                }
            }
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

    fn shutdown_process(&self) {
        let child = sync::lock(&self.process).take();
        if let Some(mut child) = child {
            if let Err(e) = self.ipc.command(&[json!("quit")]) {
                tracing::debug!(backend = NAME, error = %e, "quit command failed, killing mpv");
            }
            let _ = child.kill();
            let _ = child.wait();
        }
        let _ = std::fs::remove_file(&self.settings.socket_path);
    }
}

/// One ticker round: mirror position/duration and detect the end of the file
fn poll(
    ipc: &MpvIpc,
    base: &BaseBackend,
    seen_active: &mut bool,
) -> std::result::Result<ControlFlow<()>, EngineError> {
    let idle = ipc.get_property("idle-active")?.as_bool().unwrap_or(false);
    if !idle {
        *seen_active = true;
    } else if *seen_active {
        base.set_state(PlaybackState::Stopped);
        base.reset_playback();
        return Ok(ControlFlow::Break(()));
    }

    if base.state() == PlaybackState::Playing && !idle {
        if base.duration().is_zero() {
            if let Some(duration) = ipc.get_f64("duration")? {
                base.set_duration(Duration::from_secs_f64(duration.max(0.0)));
            }
        }
        if let Some(position) = ipc.get_f64("time-pos")? {
            base.set_position(Duration::from_secs_f64(position.max(0.0)));
        }
    }
    Ok(ControlFlow::Continue(()))
}

fn capabilities() -> BackendCapabilities {
    BackendCapabilities::new()
        .with_formats(["mp3", "wav", "flac", "ogg", "m4a", "aac", "wma", "ape", "opus"])
        .with_platforms(["unix"])
        .with_seek(true)
        .with_streaming(true)
        .with_feature("external_process", true)
        .with_metadata("ipc", "json")
}

impl PlayerBackend for MpvBackend {
    fn base(&self) -> &BaseBackend {
        &self.base
    }

    fn initialize(&self, config: &BackendConfig) -> Result<()> {
        if !self.is_available() {
            return Err(BackendError::unavailable(format!(
                "mpv binary '{}' not found",
                self.settings.binary
            )));
        }
        self.base.initialize(config)
    }

    fn play(&self, source: &str) -> Result<()> {
        self.stop_ticker();
        self.ensure_process()?;

        self.ipc
            .command(&[json!("loadfile"), json!(source), json!("replace")])?;
        self.ipc.set_property("pause", json!(false))?;

        self.base.set_source(Some(source.to_string()));
        self.base.set_duration(Duration::ZERO);
        self.base.mark_play_started();
        self.base.set_position(Duration::ZERO);
        self.base.set_state(PlaybackState::Playing);
        self.base
            .emit_event(Event::new(EventType::TrackChanged, NAME).with("source", source));
        self.start_ticker();

        tracing::info!(backend = NAME, source, "Playing");
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        if self.base.state() != PlaybackState::Playing {
            return Ok(());
        }
        self.ipc.set_property("pause", json!(true))?;
        self.base.set_state(PlaybackState::Paused);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        match self.base.state() {
            PlaybackState::Paused => {
                self.ipc.set_property("pause", json!(false))?;
                self.base.set_state(PlaybackState::Playing);
                Ok(())
            }
            _ if self.base.current_source().is_none() => Err(BackendError::NoActivePlayback),
            _ => Ok(()),
        }
    }

    fn stop(&self) -> Result<()> {
        self.stop_ticker();
        if self.process_running() {
            self.ipc.command(&[json!("stop")])?;
        }
        self.base.set_state(PlaybackState::Stopped);
        self.base.reset_playback();
        Ok(())
    }

    fn seek(&self, position: Duration) -> Result<()> {
        if self.base.current_source().is_none() {
            return Err(BackendError::NoActivePlayback);
        }
        self.ipc
            .set_property("time-pos", json!(position.as_secs_f64()))?;
        self.base.set_position(position);
        Ok(())
    }

    fn subscribe_time(&self) -> Option<crossbeam_channel::Receiver<Duration>> {
        Some(self.base.subscribe_time())
    }

    fn set_volume(&self, volume: f64) -> Result<()> {
        self.base.set_volume(volume)?;
        if self.process_running() {
            self.ipc.set_property("volume", json!(volume * 100.0))?;
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        find_binary(&self.settings.binary).is_some()
    }

    fn health_check(&self) -> Result<()> {
        if !self.process_running() {
            if self.base.current_source().is_some() {
                return Err(BackendError::engine("mpv process is not running"));
            }
            return Ok(());
        }
        self.ipc.get_property("mpv-version")?;
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        self.stop_ticker();
        self.shutdown_process();
        self.base.cleanup();
        Ok(())
    }
}

impl Drop for MpvBackend {
    fn drop(&mut self) {
        if let Some(mut child) = sync::lock(&self.process).take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
