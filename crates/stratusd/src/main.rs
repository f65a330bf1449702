//! stratusd — the Stratus daemon.
//!
//! Single binary that assembles the elastic-compute control plane:
//! - Record store (redb)
//! - Sensor store
//! - Provisioner service with per-site IaaS drivers
//! - Decision engine + controller loop
//!
//! # Usage
//!
//! ```text
//! stratusd run --config stratus.toml --data-dir /var/lib/stratus
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::info;

use stratus_controller::{ControlFacade, Controller, reconfigure_channel};
use stratus_provisioner::{ProvisionerCore, SensorSink, SimContextBroker, SimIaasDriver};
use stratus_state::{ProvisionerStore, SensorStore};

use crate::config::{DaemonConfig, DriverKind};

#[derive(Parser)]
#[command(name = "stratusd", about = "Stratus elastic-compute daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane from a configuration file.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long)]
        config: PathBuf,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/stratus")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stratusd=debug,stratus=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, data_dir } => run(config, data_dir).await,
    }
}

async fn run(config_path: PathBuf, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("Stratus daemon starting");

    let config = DaemonConfig::load(&config_path)?;

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("stratus-records.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = ProvisionerStore::open(&db_path)?;
    info!(path = ?db_path, "record store opened");

    let sensors = SensorStore::new();

    let mut core = ProvisionerCore::new(
        store,
        config.registry(),
        Arc::new(SensorSink::new(sensors.clone())),
    )
    .with_retry(config.retry_policy())
    .with_stale_after(config.stale_after());
    for (name, site) in &config.sites {
        match site.driver {
            DriverKind::Sim => {
                core = core.with_site(name, Arc::new(SimIaasDriver::new()));
                info!(site = %name, "simulated iaas driver registered");
            }
        }
    }
    if config.needs_broker() {
        core = core.with_broker(Arc::new(SimContextBroker::new()));
        info!("simulated context broker registered");
    }

    let engine = stratus_engine::by_name(&config.engine.name)
        .ok_or_else(|| anyhow::anyhow!("unknown engine: {}", config.engine.name))?;
    info!(engine = %config.engine.name, "decision engine selected");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let (command_tx, command_rx) = mpsc::channel(64);
    let provisioner_handle = tokio::spawn(stratus_provisioner::run(
        core,
        command_rx,
        config.query_interval(),
        shutdown_rx.clone(),
    ));

    let facade = ControlFacade::new(sensors.clone(), command_tx);
    let controller = Controller::new(engine, facade, sensors, &config.engine.config)
        .map_err(|e| anyhow::anyhow!("engine initialization failed: {e}"))?;

    // Held for the daemon's lifetime; a future admin surface submits
    // reconfigurations through it.
    let (_reconfigure_client, updates_rx) = reconfigure_channel(8);
    let controller_handle = tokio::spawn(controller.run(updates_rx, shutdown_rx));

    info!("control plane running");

    // Graceful shutdown on Ctrl-C.
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = provisioner_handle.await;
    let _ = controller_handle.await;

    info!("Stratus daemon stopped");
    Ok(())
}
