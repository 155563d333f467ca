// src/main.rs
//! Fleet worker
//!
//! `pool` (the default) provisions worker identities and supervises one
//! child process per slot; `worker --slot <n>` is what each child runs.

use anyhow::Result;
use clap::{Parser, Subcommand};
use fleet_worker::observability::{init_metrics, init_tracing};
use fleet_worker::shutdown::install_shutdown_handler;
use fleet_worker::runtime::worker_unit::EXIT_ABNORMAL;
use fleet_worker::{ConfigStore, FleetConfig, HttpControlPlane, WorkerPool, WorkerUnit};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fleet-worker", version, about = "Queue-driven container job workers")]
struct Cli {
    /// Config file (TOML, YAML or JSON)
    #[arg(long, global = true, env = "FLEET_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run and supervise the whole worker pool
    Pool,
    /// Run a single worker slot in this process
    Worker {
        #[arg(long)]
        slot: usize,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let settings = FleetConfig::settings(cli.config.as_deref())?;
    let config = FleetConfig::from_settings(&settings)?;
    init_tracing(config.observability.log_format)?;

    let store = ConfigStore::open(&config.state_dir, settings)?;
    let control_plane = Arc::new(HttpControlPlane::new(&config.control_plane.base_url));

    match cli.command.unwrap_or(Command::Pool) {
        Command::Pool => run_pool(&config, &store, control_plane, cli.config).await,
        Command::Worker { slot } => {
            let shutdown = match install_shutdown_handler() {
                Ok(token) => token,
                Err(e) => {
                    error!(slot, "Failed to install signal handlers: {}", e);
                    return Ok(ExitCode::from(EXIT_ABNORMAL));
                }
            };
            let exit = WorkerUnit::run_slot(slot, &config, &store, control_plane, shutdown).await;
            Ok(ExitCode::from(exit.code()))
        }
    }
}

async fn run_pool(
    config: &FleetConfig,
    store: &ConfigStore,
    control_plane: Arc<HttpControlPlane>,
    config_path: Option<PathBuf>,
) -> Result<ExitCode> {
    info!("Starting fleet worker pool v{}", env!("CARGO_PKG_VERSION"));
    init_metrics(config.observability.metrics_addr)?;

    let shutdown = install_shutdown_handler()?;
    let mut pool = WorkerPool::new(store, control_plane.as_ref(), config_path).await?;
    pool.start()?;

    let finished = tokio::select! {
        exits = pool.wait() => Some(exits?),
        _ = shutdown.cancelled() => None,
    };

    match finished {
        Some(exits) => info!("All {} workers exited", exits.len()),
        None => {
            let grace = Duration::from_secs(config.worker.shutdown_grace_secs);
            info!("Stopping {} workers", pool.len());
            pool.stop(grace).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
