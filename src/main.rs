//! HQAstroCam service
//!
//! Serves the camera API and live view until interrupted.

use clap::Parser;
use hqastrocam::{
    config::{AppConfig, ConfigError, SourceSelection},
    controls::{ControlRegistry, PresetTable},
    metrics::{MetricsError, MetricsRegistry},
    pipeline::{CapturePipeline, PipelineError},
    preview::{PreviewBroadcaster, PreviewProducer},
    server::{ApiServer, AppState, ServerError},
    session::{SessionCoordinator, StateStore},
    source::{open_source, SourceError},
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{error, info};

/// Astrophotography camera service for the Raspberry Pi HQ Camera.
#[derive(Debug, Parser)]
#[command(name = "hqastrocam", version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long, env = "ASTROCAM_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory receiving photos and videos.
    #[arg(long, env = "ASTROCAM_CAPTURES")]
    captures_dir: Option<PathBuf>,

    /// Frame source to use.
    #[arg(long, value_enum)]
    source: Option<SourceSelection>,

    /// File remembering the last applied settings.
    #[arg(long)]
    state_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("camera: {0}")]
    Source(#[from] SourceError),
    #[error("captures directory: {0}")]
    Storage(#[from] PipelineError),
    #[error("metrics: {0}")]
    Metrics(#[from] MetricsError),
    #[error("{0}")]
    Server(#[from] ServerError),
    #[error("signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("HQAstroCam v{}", hqastrocam::VERSION);

    if let Err(e) = run(Args::parse()) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<AppConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            AppConfig::from_file(path)?
        }
        None => AppConfig::default(),
    };

    if let Some(bind) = &args.bind {
        config.server.bind_address = bind.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = &args.captures_dir {
        config.storage.captures_dir = dir.clone();
    }
    if let Some(source) = args.source {
        config.camera.source = source;
    }
    if let Some(state_file) = &args.state_file {
        config.storage.state_file = Some(state_file.clone());
    }

    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> Result<(), StartupError> {
    let config = load_config(&args)?;
    let addr = config.server.socket_addr()?;

    let registry = ControlRegistry::hq_camera();
    let presets = PresetTable::load(&registry, &config.presets)
        .map_err(|e| ConfigError::InvalidPreset(e.to_string()))?;
    info!(presets = presets.len(), "Presets loaded");

    let pipeline = CapturePipeline::new(&config.storage.captures_dir, config.video.clone())?;
    info!(dir = %config.storage.captures_dir.display(), "Captures directory ready");

    let source = open_source(&config.camera)?;
    let mut session = SessionCoordinator::new(registry, presets, source, pipeline);
    if let Some(path) = &config.storage.state_file {
        session = session.with_state_store(StateStore::new(path));
    }
    let session = Arc::new(session);

    let preview = Arc::new(PreviewBroadcaster::new(config.preview.channel_capacity));
    let producer = PreviewProducer::spawn(
        Arc::clone(&session),
        Arc::clone(&preview),
        config.camera.preview_fps,
    )?;
    let metrics = Arc::new(MetricsRegistry::new()?);

    let shutdown = Arc::new(Notify::new());
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("Shutdown requested");
            shutdown.notify_one();
        })?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let state = AppState {
        session: Arc::clone(&session),
        preview: Arc::clone(&preview),
        metrics,
    };
    let served = runtime.block_on(ApiServer::new(addr, state).run({
        let preview = Arc::clone(&preview);
        async move {
            shutdown.notified().await;
            // Open MJPEG streams would otherwise keep the server alive.
            preview.close();
        }
    }));

    producer.stop();
    session.shutdown();
    info!("Stopped");
    served.map_err(StartupError::from)
}
