/// Tonearm - play audio through the best backend available
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tonearm_config::ConfigManager;
use tonearm_core::{Event, EventType, PlaybackState};
use tonearm_playback::{PlayerFactory, PlayerManager};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tonearm")]
#[command(about = "Pluggable audio playback", long_about = None)]
struct Cli {
    /// Audio configuration file (TOML or JSON)
    #[arg(short, long, global = true, env = "TONEARM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every registered backend
    Backends,
    /// Play a file or URL until it ends or Ctrl-C
    Play {
        /// Path or URL to play
        source: String,
        /// Backend to use instead of the configured default
        #[arg(short, long)]
        backend: Option<String>,
        /// Initial volume between 0 and 1
        #[arg(short, long)]
        volume: Option<f64>,
    },
    /// Start the configured backend and run its health check
    Check {
        #[arg(short, long)]
        backend: Option<String>,
    },
}

/// How a `play` session ended
enum Finished {
    Stopped,
    Failed(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tonearm=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Backends => list_backends(),
        Commands::Play {
            source,
            backend,
            volume,
        } => play(config_path, source, backend, volume).await?,
        Commands::Check { backend } => check(config_path, backend).await?,
    }

    Ok(())
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("tonearm").join("audio.toml"))
        .unwrap_or_else(|| PathBuf::from("tonearm.toml"))
}

fn list_backends() {
    let factory = PlayerFactory::new();
    let mut backends: Vec<_> = factory.get_all_backends().into_values().collect();
    backends.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));

    println!("{:<10} {:<8} {:>8}  {:<11} DESCRIPTION", "NAME", "VERSION", "PRIORITY", "STATUS");
    for info in backends {
        let status = if info.available { "available" } else { "unavailable" };
        println!(
            "{:<10} {:<8} {:>8}  {:<11} {}",
            info.name, info.version, info.priority, status, info.description
        );
    }
}

/// Manager configured from the audio config, started on `preferred` if possible
async fn start_manager(
    config: &ConfigManager,
    preferred: Option<String>,
) -> anyhow::Result<Arc<PlayerManager>> {
    let audio = config.get_config();
    let preferred = preferred.unwrap_or_else(|| audio.default_backend.clone());
    let defaults = audio.backend_or_global(&preferred);

    let manager = Arc::new(PlayerManager::with_defaults(
        Arc::new(PlayerFactory::new()),
        defaults,
    ));

    let starting = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || starting.initialize_with_preference(&preferred)).await??;

    Ok(manager)
}

async fn play(
    config_path: PathBuf,
    source: String,
    backend: Option<String>,
    volume: Option<f64>,
) -> anyhow::Result<()> {
    let config = Arc::new(ConfigManager::new(&config_path)?);
    tracing::info!("Config: {}", config_path.display());

    let manager = start_manager(&config, backend).await?;
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    watch_events(&manager, done_tx);

    if config.is_hot_reload_enabled() {
        config.add_config_change_callback(manager.config_change_callback());
        if let Err(e) = config.start_watching() {
            tracing::warn!("Hot reload disabled: {}", e);
        }
    }

    if let Some(volume) = volume {
        manager.set_volume(volume)?;
    }

    let playing = Arc::clone(&manager);
    let target = source.clone();
    tokio::task::spawn_blocking(move || playing.play(&target)).await??;
    tracing::info!(
        backend = %manager.current_backend_name().unwrap_or_default(),
        "Playing {}",
        source
    );

    let outcome = tokio::select! {
        finished = done_rx.recv() => finished,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping playback");
            None
        }
    };

    config.stop_watching();
    let stopping = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || stopping.shutdown()).await??;

    match outcome {
        Some(Finished::Failed(reason)) => anyhow::bail!("playback failed: {reason}"),
        Some(Finished::Stopped) => tracing::info!("Playback finished"),
        None => {}
    }
    Ok(())
}

/// Log manager events and report when the current backend stops or fails
fn watch_events(manager: &Arc<PlayerManager>, done: mpsc::UnboundedSender<Finished>) {
    let weak: Weak<PlayerManager> = Arc::downgrade(manager);
    manager.add_event_handler(
        EventType::StateChanged,
        Arc::new(move |event: &Event| {
            let new_state = event
                .get_str("new_state")
                .and_then(PlaybackState::from_str)
                .unwrap_or_default();
            tracing::debug!(backend = %event.source, state = %new_state, "State changed");

            // Backends being switched away from also report `stopped`
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if manager.current_backend_name().as_deref() != Some(event.source.as_str()) {
                return;
            }

            match new_state {
                PlaybackState::Stopped => {
                    let _ = done.send(Finished::Stopped);
                }
                PlaybackState::Error => {
                    let reason = format!("backend '{}' entered the error state", event.source);
                    let _ = done.send(Finished::Failed(reason));
                }
                _ => {}
            }
        }),
    );

    manager.add_event_handler(
        EventType::TrackChanged,
        Arc::new(|event: &Event| {
            tracing::info!(
                backend = %event.source,
                "Now playing {}",
                event.get_str("source").unwrap_or("?")
            );
        }),
    );

    manager.add_event_handler(
        EventType::BackendSwitched,
        Arc::new(|event: &Event| {
            tracing::info!(
                "Backend switched: {} -> {}",
                event.get_str("from").unwrap_or_default(),
                event.get_str("to").unwrap_or_default()
            );
        }),
    );

    manager.add_event_handler(
        EventType::Error,
        Arc::new(|event: &Event| {
            tracing::error!(
                backend = %event.source,
                "{}",
                event.get_str("message").unwrap_or("backend error")
            );
        }),
    );
}

async fn check(config_path: PathBuf, backend: Option<String>) -> anyhow::Result<()> {
    let config = ConfigManager::new(&config_path)?;
    let manager = start_manager(&config, backend).await?;

    let name = manager.current_backend_name().unwrap_or_default();
    let checking = Arc::clone(&manager);
    let health = tokio::task::spawn_blocking(move || {
        let result = checking.health_check();
        let shutdown = checking.shutdown();
        result.and(shutdown)
    })
    .await?;

    match health {
        Ok(()) => {
            println!("{name}: ok");
            Ok(())
        }
        Err(e) => anyhow::bail!("{name}: {e}"),
    }
}
