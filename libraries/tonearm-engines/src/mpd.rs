//! Client for the Music Player Daemon text protocol
//!
//! Playback happens inside the daemon; this backend only replaces the queue
//! with the requested source and mirrors the daemon's status.

use crate::error::EngineError;
use crate::ticker::Ticker;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tonearm_core::{
    sync, BackendCapabilities, BackendConfig, BackendError, BackendInfo, BaseBackend, Event,
    EventType, PlaybackState, PlayerBackend, Result,
};

/// Registry key
pub const NAME: &str = "mpd";

const VERSION: &str = env!("CARGO_PKG_VERSION");
const PRIORITY: i32 = 8;
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 6600;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const IO_TIMEOUT: Duration = Duration::from_secs(5);
const TICK_INTERVAL: Duration = Duration::from_secs(1);

type Reply = Vec<(String, String)>;

/// One open protocol session
struct MpdConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl MpdConnection {
    fn open(addr: &str, password: Option<&str>) -> std::result::Result<Self, EngineError> {
        let stream = connect(addr)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;

        let mut conn = Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        };

        let mut greeting = String::new();
        conn.reader.read_line(&mut greeting)?;
        if !greeting.starts_with("OK MPD") {
            return Err(EngineError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }

        if let Some(password) = password {
            conn.command(&format!("password {}", quote(password)))?;
        }
        Ok(conn)
    }

    fn command(&mut self, command: &str) -> std::result::Result<Reply, EngineError> {
        self.writer.write_all(command.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        let mut reply = Vec::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(EngineError::Protocol(
                    "connection closed by MPD".to_string(),
                ));
            }
            let line = line.trim_end();

            if line == "OK" {
                return Ok(reply);
            }
            if let Some(ack) = line.strip_prefix("ACK ") {
                return Err(EngineError::Rejected {
                    engine: NAME,
                    command: command.split(' ').next().unwrap_or(command).to_string(),
                    reason: ack.to_string(),
                });
            }
            if let Some((key, value)) = line.split_once(": ") {
                reply.push((key.to_string(), value.to_string()));
            }
        }
    }
}

fn connect(addr: &str) -> std::result::Result<TcpStream, EngineError> {
    let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
    let mut last_error = None;
    for candidate in addrs {
        match TcpStream::connect_timeout(&candidate, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.map_or_else(
        || EngineError::Protocol(format!("no address for {addr}")),
        EngineError::Io,
    ))
}

/// Quote an argument for the MPD protocol
pub(crate) fn quote(arg: &str) -> String {
    let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Lazily connected, self-healing session shared by the backend and its ticker
pub struct MpdClient {
    addr: String,
    password: Option<String>,
    conn: Mutex<Option<MpdConnection>>,
}

impl MpdClient {
    pub fn new(addr: impl Into<String>, password: Option<String>) -> Self {
        Self {
            addr: addr.into(),
            password,
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Run a command, reconnecting once if the daemon dropped the session
    pub fn command(&self, command: &str) -> std::result::Result<Reply, EngineError> {
        let mut conn = sync::lock(&self.conn);
        for attempt in 0..2 {
            if conn.is_none() {
                *conn = Some(MpdConnection::open(&self.addr, self.password.as_deref())?);
            }
            let Some(session) = conn.as_mut() else {
                continue;
            };
            match session.command(command) {
                Err(EngineError::Io(e)) if attempt == 0 => {
                    tracing::debug!(backend = NAME, error = %e, "MPD session lost, reconnecting");
                    *conn = None;
                }
                Err(EngineError::Protocol(reason)) if attempt == 0 => {
                    tracing::debug!(backend = NAME, reason = %reason, "MPD session closed, reconnecting");
                    *conn = None;
                }
                result => return result,
            }
        }
        Err(EngineError::Protocol(format!(
            "could not reach MPD at {}",
            self.addr
        )))
    }

    pub fn connect(&self) -> std::result::Result<(), EngineError> {
        let mut conn = sync::lock(&self.conn);
        if conn.is_none() {
            *conn = Some(MpdConnection::open(&self.addr, self.password.as_deref())?);
        }
        Ok(())
    }

    /// Close the session politely
    pub fn close(&self) {
        if let Some(mut session) = sync::lock(&self.conn).take() {
            let _ = session.writer.write_all(b"close\n");
        }
    }

    pub fn status(&self) -> std::result::Result<MpdStatus, EngineError> {
        self.command("status").map(|reply| MpdStatus::parse(&reply))
    }

    /// Whether a daemon answers with a greeting within the connect timeout
    pub fn probe(addr: &str) -> bool {
        let Ok(stream) = connect(addr) else {
            return false;
        };
        if stream.set_read_timeout(Some(CONNECT_TIMEOUT)).is_err() {
            return false;
        }
        let mut greeting = String::new();
        let mut reader = BufReader::new(stream);
        reader.read_line(&mut greeting).is_ok() && greeting.starts_with("OK MPD")
    }
}

/// Subset of the `status` reply this backend cares about
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MpdStatus {
    pub state: Option<PlaybackState>,
    pub elapsed: Option<Duration>,
    pub duration: Option<Duration>,
    pub volume: Option<u8>,
}

impl MpdStatus {
    fn parse(reply: &[(String, String)]) -> Self {
        let mut status = Self::default();
        for (key, value) in reply {
            match key.as_str() {
                "state" => {
                    status.state = match value.as_str() {
                        "play" => Some(PlaybackState::Playing),
                        "pause" => Some(PlaybackState::Paused),
                        "stop" => Some(PlaybackState::Stopped),
                        _ => None,
                    };
                }
                "elapsed" => status.elapsed = parse_seconds(value),
                "duration" => status.duration = parse_seconds(value),
                // Older daemons only report "time: elapsed:total"
                "time" => {
                    if let Some((elapsed, total)) = value.split_once(':') {
                        status.elapsed = status.elapsed.or_else(|| parse_seconds(elapsed));
                        status.duration = status.duration.or_else(|| parse_seconds(total));
                    }
                }
                "volume" => status.volume = value.parse().ok(),
                _ => {}
            }
        }
        status
    }
}

fn parse_seconds(value: &str) -> Option<Duration> {
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

pub struct MpdBackend {
    base: Arc<BaseBackend>,
    client: Arc<MpdClient>,
    ticker: Mutex<Option<Ticker>>,
}

impl MpdBackend {
    /// Connection parameters come from the `host`, `port` and `password` settings
    pub fn new(config: &BackendConfig) -> Self {
        let host = config.setting_str("host").unwrap_or(DEFAULT_HOST);
        let port = config
            .setting_u64("port")
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PORT);
        let password = config
            .setting_str("password")
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Self {
            base: Arc::new(BaseBackend::new(NAME, VERSION, capabilities())),
            client: Arc::new(MpdClient::new(format!("{host}:{port}"), password)),
            ticker: Mutex::new(None),
        }
    }

    /// Registry entry for the factory
    pub fn backend_info() -> BackendInfo {
        BackendInfo::new(NAME, "Music Player Daemon client")
            .with_version(VERSION)
            .with_capabilities(capabilities())
            .with_priority(PRIORITY)
            .with_creator(|config: &BackendConfig| {
                Ok(Arc::new(MpdBackend::new(config)) as Arc<dyn PlayerBackend>)
            })
    }

    fn start_ticker(&self) {
        let base = Arc::clone(&self.base);
        let client = Arc::clone(&self.client);

        let ticker = Ticker::spawn("tonearm-mpd-ticker", TICK_INTERVAL, move || {
            let status = match client.status() {
                Ok(status) => status,
                Err(e) => {
                    tracing::debug!(backend = NAME, error = %e, "MPD status poll failed");
                    return ControlFlow::Continue(());
                }
            };

            if let Some(duration) = status.duration {
                base.set_duration(duration);
            }
            match status.state {
                Some(PlaybackState::Stopped) => {
                    base.set_state(PlaybackState::Stopped);
                    base.reset_playback();
                    ControlFlow::Break(())
                }
                Some(PlaybackState::Playing) => {
                    if let Some(elapsed) = status.elapsed {
                        base.set_position(elapsed);
                    }
                    ControlFlow::Continue(())
                }
                _ => ControlFlow::Continue(()),
            }
        });

        match ticker {
            Ok(ticker) => *sync::lock(&self.ticker) = Some(ticker),
            Err(e) => tracing::warn!(backend = NAME, error = %e, "Failed to start status ticker"),
        }
    }

    fn stop_ticker(&self) {
        let ticker = sync::lock(&self.ticker).take();
        if let Some(ticker) = ticker {
            ticker.stop();
        }
    }
}

fn capabilities() -> BackendCapabilities {
    BackendCapabilities::new()
        .with_formats(["mp3", "wav", "flac", "ogg", "m4a", "aac", "wma", "ape", "opus"])
        .with_platforms(["linux", "unix"])
        .with_seek(true)
        .with_streaming(true)
        .with_feature("network_daemon", true)
        .with_metadata("protocol", "mpd")
}

impl PlayerBackend for MpdBackend {
    fn base(&self) -> &BaseBackend {
        &self.base
    }

    fn initialize(&self, config: &BackendConfig) -> Result<()> {
        self.base.initialize(config)?;
        self.client.connect()?;
        tracing::info!(backend = NAME, addr = self.client.addr(), "Connected to MPD");
        Ok(())
    }

    fn play(&self, source: &str) -> Result<()> {
        self.stop_ticker();

        self.client.command("clear")?;
        self.client.command(&format!("add {}", quote(source)))?;
        self.client.command("play 0")?;
        self.client
            .command(&format!("setvol {:.0}", self.base.volume() * 100.0))?;

        let status = self.client.status()?;
        self.base.set_source(Some(source.to_string()));
        self.base
            .set_duration(status.duration.unwrap_or(Duration::ZERO));
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
        self.client.command("pause 1")?;
        self.base.set_state(PlaybackState::Paused);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        match self.base.state() {
            PlaybackState::Paused => {
                self.client.command("pause 0")?;
                self.base.set_state(PlaybackState::Playing);
                Ok(())
            }
            _ if self.base.current_source().is_none() => Err(BackendError::NoActivePlayback),
            _ => Ok(()),
        }
    }

    fn stop(&self) -> Result<()> {
        self.stop_ticker();
        self.client.command("stop")?;
        self.base.set_state(PlaybackState::Stopped);
        self.base.reset_playback();
        Ok(())
    }

    fn seek(&self, position: Duration) -> Result<()> {
        if self.base.current_source().is_none() {
            return Err(BackendError::NoActivePlayback);
        }
        self.client
            .command(&format!("seekcur {:.3}", position.as_secs_f64()))?;
        self.base.set_position(position);
        Ok(())
    }

    fn subscribe_time(&self) -> Option<crossbeam_channel::Receiver<Duration>> {
        Some(self.base.subscribe_time())
    }

    fn set_volume(&self, volume: f64) -> Result<()> {
        self.base.set_volume(volume)?;
        self.client
            .command(&format!("setvol {:.0}", volume * 100.0))?;
        Ok(())
    }

    fn is_available(&self) -> bool {
        MpdClient::probe(self.client.addr())
    }

    fn health_check(&self) -> Result<()> {
        self.client.command("ping")?;
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        self.stop_ticker();
        self.client.close();
        self.base.cleanup();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(pairs: &[(&str, &str)]) -> Reply {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn quoting_escapes_quotes_and_backslashes() {
        assert_eq!(quote("music/a.flac"), r#""music/a.flac""#);
        assert_eq!(quote(r#"say "hi"\now"#), r#""say \"hi\"\\now""#);
    }

    fn unquote(quoted: &str) -> Option<String> {
        let inner = quoted.strip_prefix('"')?.strip_suffix('"')?;
        let mut out = String::new();
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => out.push(chars.next()?),
                '"' => return None,
                c => out.push(c),
            }
        }
        Some(out)
    }

    proptest::proptest! {
        #[test]
        fn quoted_arguments_parse_back(arg in ".*") {
            proptest::prop_assert_eq!(unquote(&quote(&arg)), Some(arg));
        }
    }

    #[test]
    fn status_parsing() {
        let status = MpdStatus::parse(&reply(&[
            ("volume", "80"),
            ("state", "pause"),
            ("elapsed", "12.500"),
            ("duration", "200.000"),
        ]));
        assert_eq!(status.state, Some(PlaybackState::Paused));
        assert_eq!(status.elapsed, Some(Duration::from_millis(12_500)));
        assert_eq!(status.duration, Some(Duration::from_secs(200)));
        assert_eq!(status.volume, Some(80));
    }

    #[test]
    fn legacy_time_field() {
        let status = MpdStatus::parse(&reply(&[("state", "play"), ("time", "30:240")]));
        assert_eq!(status.state, Some(PlaybackState::Playing));
        assert_eq!(status.elapsed, Some(Duration::from_secs(30)));
        assert_eq!(status.duration, Some(Duration::from_secs(240)));
    }

    #[test]
    fn connection_settings() {
        let config = BackendConfig::named(NAME)
            .with_setting("host", "127.0.0.1")
            .with_setting("port", "6601")
            .with_setting("password", "");
        let backend = MpdBackend::new(&config);
        assert_eq!(backend.client.addr(), "127.0.0.1:6601");
        assert!(backend.client.password.is_none());

        let backend = MpdBackend::new(&BackendConfig::named(NAME));
        assert_eq!(backend.client.addr(), "localhost:6600");
    }
}
