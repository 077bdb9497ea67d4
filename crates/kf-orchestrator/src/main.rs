//! kftray Orchestrator Daemon
//!
//! Runs port-forward sessions in the background and serves the IPC
//! interface used by the CLI and the desktop app.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kf_core::config::{self, ForwarderConfig};
use kf_core::ipc::CommandOutcome;
use kf_core::store::JsonFileStore;
use kf_orchestrator::cluster::KubeCluster;
use kf_orchestrator::ipc::IpcServer;
use kf_orchestrator::monitor::TcpProbe;
use kf_orchestrator::OrchestratorState;

#[derive(Parser)]
#[command(name = "kf-orchestrator")]
#[command(about = "kftray port-forward orchestrator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IPC port (overrides config)
    #[arg(short, long, env = "KFTRAY_IPC_PORT")]
    port: Option<u16>,

    /// Start every stored configuration on launch
    #[arg(long)]
    start_all: bool,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("kftray orchestrator starting...");

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                ForwarderConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            ForwarderConfig::default()
        }
    };

    if let Some(port) = args.port {
        config.ipc_port = port;
    }

    tracing::info!("Config store: {:?}", config.store_path);
    let store = Arc::new(JsonFileStore::new(config.store_path.clone()));
    let cluster = Arc::new(KubeCluster::new(&config));
    let probe = Arc::new(TcpProbe::from_config(&config.monitor));

    let ipc_address = config.ipc_address();
    let state = Arc::new(OrchestratorState::new(config, cluster, store, probe));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    tokio::spawn(Arc::clone(&state.monitor).run(cancel.clone()));

    if args.start_all {
        match state.orchestrator.start_all().await {
            Ok(results) => {
                let running = results.iter().filter(|r| r.status == CommandOutcome::Running).count();
                tracing::info!("Started {}/{} stored configs", running, results.len());
            }
            Err(e) => tracing::warn!("Could not start stored configs: {}", e),
        }
    }

    let server =
        IpcServer::new(ipc_address.clone(), Arc::clone(&state)).with_shutdown_token(cancel.clone());

    tracing::info!("Starting IPC server on {}", ipc_address);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                tracing::error!("IPC server failed: {:#}", e);
                cancel.cancel();
            }
        }
        _ = cancel.cancelled() => {}
    }

    for status in state.orchestrator.stop_all().await {
        if let Some(warning) = status.warning {
            tracing::warn!("Config {} stopped with warning: {}", status.config_id, warning);
        }
    }

    tracing::info!("Orchestrator shutdown complete");
    Ok(())
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();
}
