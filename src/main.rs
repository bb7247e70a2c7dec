//! `daq-dispatcher`: runs the reconciliation loop against simulated detectors.

use anyhow::{Context, Result};
use clap::Parser;
use daq_dispatcher::clock::{Clock, SystemClock};
use daq_dispatcher::config::{DispatcherConfig, DEFAULT_CONFIG_PATH};
use daq_dispatcher::dispatcher::{Dispatcher, GoalFile, GoalSource, StaticGoal};
use daq_dispatcher::simulation::SimulatedDaq;
use daq_dispatcher::{DaqController, MemoryControlStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "daq-dispatcher", version, about = "Drive the DAQ towards its goal state")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// JSON goal document re-read every cycle, instead of the `[goal]` table
    #[arg(long)]
    goal_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Stop after this many reconciliation cycles
    #[arg(long)]
    cycles: Option<u64>,
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DispatcherConfig::load_from(&cli.config)
        .with_context(|| format!("Invalid configuration file: {}", cli.config.display()))?;
    init_tracing(&config.dispatcher.log_level, cli.json);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = MemoryControlStore::from_config(&config, Arc::clone(&clock));
    let simulation = SimulatedDaq::new(&config, store.clone(), Arc::clone(&clock));
    let controller = DaqController::new(&config, store, clock)
        .context("Failed to initialise the DAQ controller")?;

    let shutdown = shutdown_signal();
    let store = match cli.goal_file {
        Some(path) => {
            info!("Following goal document {}", path.display());
            let dispatcher = Dispatcher::new(controller, simulation, GoalFile::new(path));
            serve(dispatcher, &config, shutdown, cli.cycles).await
        }
        None => {
            let goal = StaticGoal::new(config.static_goal());
            let dispatcher = Dispatcher::new(controller, simulation, goal);
            serve(dispatcher, &config, shutdown, cli.cycles).await
        }
    };

    for anomaly in store.anomalies() {
        info!("Anomaly raised during session: {}", anomaly);
    }
    Ok(())
}

/// Turns true on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!("Cannot listen for Ctrl-C: {}", e);
                // Dropping the sender would end the loop.
                std::future::pending::<()>().await;
            }
        }
    });
    shutdown_rx
}

async fn serve<G: GoalSource>(
    dispatcher: Dispatcher<MemoryControlStore, SimulatedDaq, G>,
    config: &DispatcherConfig,
    shutdown: watch::Receiver<bool>,
    cycles: Option<u64>,
) -> MemoryControlStore {
    let dispatcher = dispatcher.run(config.poll_interval(), shutdown, cycles).await;
    dispatcher.controller().store().clone()
}
