//! parkgated - The parking gate service
//!
//! This is the main entry point for the parkgated service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Lane hardware (scanners, gate relays, cameras)
//! - Entry and exit pipelines
//! - WebSocket broadcast hub for displays

use anyhow::{Context, Result};
use clap::Parser;
use parkgate_config::{Config, load_config};
use parkgate_core::{
    CoreEvent, EntryRecorder, ExitOrchestrator, PipelineContext, ScanDispatcher, SessionMatcher,
};
use parkgate_host_api::HardwareAdapter;
use parkgate_host_net::{NetHardware, ScanListener};
use parkgate_hub::{BroadcastHub, HubServer};
use parkgate_store::{AuditEvent, AuditEventType, SessionStore, SqliteStore};
use parkgate_util::default_config_path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long background tasks get to wind down after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// parkgated - Parking gate service
#[derive(Parser, Debug)]
#[command(name = "parkgated")]
#[command(about = "Parking gate service: lane scanning, fees and live displays", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/parkgate/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set PARKGATE_DATA_DIR env var)
    #[arg(short, long, env = "PARKGATE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Broadcast hub port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

/// Main service state
struct Service {
    store: Arc<dyn SessionStore>,
    hardware: Arc<NetHardware>,
    hub_server: HubServer,
    scan_listener: ScanListener,
    dispatcher: ScanDispatcher,
    events: broadcast::Receiver<CoreEvent>,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        // Load configuration
        let mut config = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        if let Some(data_dir) = &args.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(port) = args.port {
            config.hub.port = port;
        }

        info!(
            config_path = %args.config.display(),
            rate_count = config.rates.len(),
            "Configuration loaded"
        );

        Self::from_config(config).await
    }

    async fn from_config(config: Config) -> Result<Self> {
        // Create data directories
        let images_dir = config.images_dir();
        std::fs::create_dir_all(&images_dir)
            .with_context(|| format!("Failed to create data directory {:?}", images_dir))?;

        // Initialize store
        let db_path = config.database_path();
        let store: Arc<dyn SessionStore> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;
        store.append_audit(AuditEvent::new(AuditEventType::ConfigLoaded {
            rate_count: config.rates.len(),
        }))?;

        let open_sessions = store.get_active_sessions()?.len();
        info!(open_sessions, "Vehicles currently parked");

        // Broadcast hub; failing to bind is fatal
        let hub = Arc::new(BroadcastHub::new(config.hub.send_timeout));
        let hub_server = HubServer::bind(&config.hub, hub.clone())
            .await
            .with_context(|| {
                format!("Failed to start broadcast hub on {}:{}", config.hub.bind, config.hub.port)
            })?;

        // Lane hardware
        let hardware = Arc::new(
            NetHardware::new(&config.hardware, &images_dir)
                .context("Failed to initialize lane hardware")?,
        );
        let scan_listener = ScanListener::bind(&config.hardware.scan_bind, config.hardware.scan_port)
            .await
            .with_context(|| {
                format!(
                    "Failed to start scan listener on {}:{}",
                    config.hardware.scan_bind, config.hardware.scan_port
                )
            })?;

        // Pipelines
        let (events_tx, events) = broadcast::channel(256);
        let ctx = PipelineContext {
            store: store.clone(),
            hardware: hardware.clone(),
            hub,
            matcher: SessionMatcher::new(config.tokens),
            rates: config.rates.clone(),
            settings: config.pipeline.clone(),
            events: events_tx,
        };
        let dispatcher = ScanDispatcher::new(
            EntryRecorder::new(ctx.clone()),
            ExitOrchestrator::new(ctx),
            config.pipeline.partitions,
        );

        Ok(Self {
            store,
            hardware,
            hub_server,
            scan_listener,
            dispatcher,
            events,
        })
    }

    async fn run(self) -> Result<()> {
        let Service {
            store,
            hardware,
            hub_server,
            scan_listener,
            dispatcher,
            mut events,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        if let Ok(addr) = hub_server.local_addr() {
            info!(addr = %addr, "Broadcast hub listening");
        }
        info!(addr = %scan_listener.local_addr(), "Scan listener listening");

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let hub_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = hub_server.run(hub_shutdown).await {
                error!(error = %e, "Broadcast hub error");
            }
        }));

        tasks.push(tokio::spawn(
            scan_listener.run(hardware.scan_sender(), shutdown_rx.clone()),
        ));
        tasks.push(tokio::spawn(
            dispatcher.run(hardware.subscribe(), shutdown_rx.clone()),
        ));

        // Set up signal handlers
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

        info!("Service running");

        let mut events_open = true;
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                event = events.recv(), if events_open => {
                    match event {
                        Ok(event) => log_core_event(&event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Core event log lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Core event stream closed");
                            events_open = false;
                        }
                    }
                }
            }
        }

        // Graceful shutdown
        info!("Shutting down parkgated");
        let _ = shutdown_tx.send(true);

        for task in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Background task panicked"),
                Err(_) => warn!("Background task did not stop in time"),
            }
        }

        if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::ServiceStopped)) {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

fn log_core_event(event: &CoreEvent) {
    match event {
        CoreEvent::EntryRecorded { session } => {
            debug!(session_id = %session.id, identifier = %session.identifier, "Core event: entry");
        }
        CoreEvent::ExitCompleted { session } => {
            debug!(session_id = %session.id, identifier = %session.identifier, "Core event: exit");
        }
        CoreEvent::PipelineAborted {
            lane,
            token,
            stage,
            reason,
        } => {
            debug!(lane = %lane, token = %token, stage = %stage, reason = %reason, "Core event: aborted");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "parkgated starting");

    // Create and run the service
    let service = Service::new(&args).await?;
    service.run().await
}
