//! Vigil detection server (vigil-server) - Main entry point
//!
//! Runs one capture worker per configured source plus the event and
//! artifact protocol servers, until Ctrl+C or SIGTERM.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_server::config::{ConfigOverrides, LoggingConfig, ServerConfig};
use vigil_server::detector::DetectionInvoker;
use vigil_server::protocol::{ArtifactServer, EventServer};
use vigil_server::source::WorkerExit;
use vigil_server::supervisor::Supervisor;
use vigil_server::EventStore;

/// Command-line arguments for vigil-server
#[derive(Parser, Debug)]
#[command(name = "vigil-server")]
#[command(about = "Detection-event server: capture workers plus event and artifact sockets")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Event protocol port
    #[arg(long, env = "VIGIL_EVENT_PORT")]
    event_port: Option<u16>,

    /// Artifact protocol port
    #[arg(long, env = "VIGIL_ARTIFACT_PORT")]
    artifact_port: Option<u16>,

    /// Address both servers bind to
    #[arg(long, env = "VIGIL_BIND_HOST")]
    bind_host: Option<String>,

    /// Directory where detection images are stored and served from
    #[arg(long, env = "VIGIL_ARTIFACT_DIR")]
    artifact_dir: Option<PathBuf>,

    /// Directory for per-worker scratch frames
    #[arg(long, env = "VIGIL_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Maximum number of pending events
    #[arg(long, env = "VIGIL_CAPACITY")]
    capacity: Option<usize>,

    /// Process 1 of every N frames
    #[arg(long, env = "VIGIL_FRAME_SKIP")]
    frame_skip: Option<u64>,

    /// Minimum detection confidence, in [0, 1]
    #[arg(long, env = "VIGIL_CONFIDENCE_THRESHOLD")]
    confidence_threshold: Option<f64>,

    /// Detector program
    #[arg(long, env = "VIGIL_DETECTOR")]
    detector: Option<String>,

    /// Detector argument placed before the image path (repeatable)
    #[arg(long = "detector-arg", allow_hyphen_values = true)]
    detector_args: Vec<String>,

    /// Image directory replayed when a source cannot be opened
    #[arg(long, env = "VIGIL_FALLBACK_DIR")]
    fallback_dir: Option<PathBuf>,

    /// Legacy source list with `ID,URL` lines
    #[arg(long, env = "VIGIL_SOURCES_FILE")]
    sources_file: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (e.g. "vigil_server=debug")
    #[arg(long, env = "VIGIL_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            event_port: self.event_port,
            artifact_port: self.artifact_port,
            bind_host: self.bind_host.clone(),
            artifact_dir: self.artifact_dir.clone(),
            temp_dir: self.temp_dir.clone(),
            capacity: self.capacity,
            frame_skip: self.frame_skip,
            confidence_threshold: self.confidence_threshold,
            detector_program: self.detector.clone(),
            detector_args: (!self.detector_args.is_empty()).then(|| self.detector_args.clone()),
            fallback_sequence_dir: self.fallback_dir.clone(),
            sources_file: self.sources_file.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ServerConfig::load(args.config.as_deref(), &args.overrides())
        .context("Failed to load configuration")?;

    init_tracing(&config.logging)?;

    info!("Starting Vigil detection server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Capacity {} ({:?}), frame skip {}, confidence threshold {}",
        config.capacity, config.overflow_policy, config.frame_skip, config.confidence_threshold
    );
    info!("Artifact directory: {}", config.artifact_dir.display());

    let store = Arc::new(
        EventStore::new(config.capacity, config.overflow_policy)
            .context("Failed to create event store")?,
    );

    tokio::fs::create_dir_all(&config.artifact_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.artifact_dir.display()))?;
    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.temp_dir.display()))?;

    let event_addr = config.event_addr().await?;
    let artifact_addr = config.artifact_addr().await?;
    let event_listener = TcpListener::bind(event_addr)
        .await
        .with_context(|| format!("Failed to bind event server to {}", event_addr))?;
    let artifact_listener = TcpListener::bind(artifact_addr)
        .await
        .with_context(|| format!("Failed to bind artifact server to {}", artifact_addr))?;

    let shutdown = CancellationToken::new();
    let event_task = tokio::spawn(
        EventServer::new(Arc::clone(&store))
            .with_io_timeout(config.connection_timeout())
            .serve(event_listener, shutdown.clone()),
    );
    let artifact_task = tokio::spawn(
        ArtifactServer::new(config.artifact_dir.clone())
            .with_io_timeout(config.connection_timeout())
            .serve(artifact_listener, shutdown.clone()),
    );

    let invoker: Arc<dyn DetectionInvoker> = Arc::new(config.detector.invoker());
    let supervisor = Supervisor::start(&config, Arc::clone(&store), invoker).await;

    info!(
        "Server started: {} workers, events on {}, artifacts on {}",
        supervisor.handles().len(),
        event_addr,
        artifact_addr
    );

    shutdown_signal().await;

    for report in supervisor.shutdown().await {
        match &report.exit {
            WorkerExit::Stopped => info!(
                source_id = %report.source_id,
                "Worker stopped ({} events recorded)", report.stats.events_recorded
            ),
            WorkerExit::Faulted(reason) => warn!(
                source_id = %report.source_id,
                "Worker had terminated: {}", reason
            ),
        }
    }

    shutdown.cancel();
    for task in [event_task, artifact_task] {
        if let Err(e) = task.await {
            error!("Server task failed: {}", e);
        }
    }

    info!("Server shutdown complete ({} events left pending)", store.size().await);
    Ok(())
}

/// Install the tracing subscriber: stdout plus an optional log file
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let file_layer = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
