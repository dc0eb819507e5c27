use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fieldcam::capture::{backend_from_config, BackendKind};
use fieldcam::config::ConfigStore;
use fieldcam::events::EventBus;
use fieldcam::session::{spawn_session, SessionDeps, SessionOrchestrator, SessionSettings};
use fieldcam::signaling::{ChannelSettings, MessageSink, SignalingChannel, WebSocketConnector};
use fieldcam::webrtc::RtcPeerFactory;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// fieldcam command line arguments
#[derive(Parser, Debug)]
#[command(name = "fieldcam")]
#[command(version, about = "Stream a device camera to a remote viewer over WebRTC", long_about = None)]
struct CliArgs {
    /// Coordination endpoint (ws:// or wss://); remembered for next start
    #[arg(short = 'e', long, value_name = "URL")]
    endpoint: Option<String>,

    /// Role announced to the coordination server
    #[arg(long, value_name = "ROLE")]
    role: Option<String>,

    /// Capture backend (overrides config)
    #[arg(short = 'b', long, value_name = "BACKEND")]
    backend: Option<BackendKind>,

    /// Data directory path (default: /var/lib/fieldcam)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting fieldcam v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = args.data_dir.unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let config_store = ConfigStore::new(&data_dir.join("config.json")).await?;
    if let Some(endpoint) = args.endpoint.as_deref() {
        config_store.remember_endpoint(endpoint).await?;
    }

    // CLI overrides apply to this run only
    let mut config = (*config_store.get()).clone();
    if let Some(role) = args.role {
        config.signaling.role = role;
    }
    if let Some(backend) = args.backend {
        config.capture.backend = backend;
    }
    tracing::info!(
        "Endpoint {} as '{}', capture backend {}",
        config.signaling.endpoint,
        config.signaling.role,
        config.capture.backend
    );

    let events = Arc::new(EventBus::new());
    tokio::spawn(log_events(events.subscribe()));
    tokio::spawn(log_config_changes(config_store.subscribe()));

    let (channel, signaling_rx) = SignalingChannel::spawn(
        ChannelSettings::from_config(&config.signaling),
        WebSocketConnector,
        events.clone(),
    );

    let sink: Arc<dyn MessageSink> = Arc::new(channel.clone());
    let deps = SessionDeps {
        backend: Arc::from(backend_from_config(&config.capture)),
        peers: Arc::new(RtcPeerFactory),
        sink,
        events: events.clone(),
    };
    let (orchestrator, candidates_rx) =
        SessionOrchestrator::new(deps, SessionSettings::from_config(&config));
    let (session, session_task) = spawn_session(orchestrator, candidates_rx, signaling_rx);

    channel.connect()?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");

    if let Err(e) = session.shutdown().await {
        tracing::warn!("Session already stopped: {}", e);
    }
    if let Err(e) = channel.close() {
        tracing::debug!("Signaling already closed: {}", e);
    }
    if let Err(e) = session_task.await {
        tracing::error!("Session task panicked: {}", e);
    }

    tracing::info!("fieldcam stopped");
    Ok(())
}

/// Log configuration writes until the store goes away
async fn log_config_changes(mut rx: broadcast::Receiver<fieldcam::config::ConfigChange>) {
    loop {
        match rx.recv().await {
            Ok(change) => tracing::debug!("Configuration changed: {}", change.key),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Mirror bus events into the log
async fn log_events(mut rx: broadcast::Receiver<fieldcam::events::SystemEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::debug!(event = event.event_name(), "{}", json),
                Err(_) => tracing::debug!(event = event.event_name(), "event"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Event log lagged, {} events skipped", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "fieldcam=error,webrtc=error",
        LogLevel::Warn => "fieldcam=warn,webrtc=warn",
        LogLevel::Info => "fieldcam=info,webrtc=warn",
        LogLevel::Verbose => "fieldcam=debug,webrtc=warn",
        LogLevel::Debug => "fieldcam=debug,webrtc=info",
        LogLevel::Trace => "fieldcam=trace,webrtc=debug",
    };

    // RUST_LOG wins over both
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("FIELDCAM_DATA_DIR") {
        return PathBuf::from(path);
    }
    PathBuf::from("/var/lib/fieldcam")
}
