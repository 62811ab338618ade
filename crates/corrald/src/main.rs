//! corrald — the corral daemon.
//!
//! Single binary that assembles the fleet engine:
//! - State store (redb)
//! - Provider registry (external provider binaries)
//! - Reconciler
//! - Demand signal
//! - Consistency sweep
//! - Metrics exposition
//!
//! # Usage
//!
//! ```text
//! corrald run --config /etc/corral/config.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use corral_core::config::CorralConfig;
use corral_demand::DemandSignal;
use corral_metrics::{render_prometheus, Metrics, PoolSnapshot};
use corral_provider::Registry;
use corral_reconciler::{Reconciler, ReconcilerConfig};
use corral_state::StateStore;
use corral_sweep::{SweepConfig, Sweeper};

#[derive(Parser)]
#[command(name = "corrald", about = "Corral runner fleet daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long)]
        config: PathBuf,

        /// Seconds between metrics snapshots.
        #[arg(long, default_value = "60")]
        metrics_interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,corrald=debug,corral=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            metrics_interval,
        } => run(config, metrics_interval).await,
    }
}

async fn run(config_path: PathBuf, metrics_interval: u64) -> anyhow::Result<()> {
    info!("corral daemon starting");

    let config = CorralConfig::from_file(&config_path)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join("corral.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let controller = store.init_controller_info()?;
    info!(controller_id = %controller.controller_id, "controller identity loaded");

    let registry = Registry::from_configs(&config.providers);
    for provider in &config.providers {
        info!(
            name = %provider.name,
            version = provider.interface_version.as_str(),
            "provider registered"
        );
    }

    let metrics = Arc::new(Metrics::new());

    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        registry.clone(),
        controller,
        metrics.clone(),
        ReconcilerConfig::default(),
    ));

    let demand = DemandSignal::new(store.clone(), metrics.clone(), reconciler.wake_handle());

    let sweeper = Sweeper::new(
        store.clone(),
        registry,
        controller,
        metrics.clone(),
        SweepConfig::default(),
    );

    // Job events enter here. Webhook ingress is out of scope; anything
    // that can produce `Job` values (a platform poller, a test) feeds
    // this sender.
    let (job_tx, job_rx) = mpsc::channel(256);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let reconcile_handle = tokio::spawn(reconciler.clone().run(
        Duration::from_secs(config.reconcile_interval_secs),
        shutdown_rx.clone(),
    ));

    let sweep_handle = tokio::spawn(sweeper.run(
        Duration::from_secs(config.sweep_interval_secs),
        shutdown_rx.clone(),
    ));

    let demand_handle = tokio::spawn(demand.run(job_rx, shutdown_rx.clone()));

    let metrics_handle = tokio::spawn(export_metrics(
        store.clone(),
        metrics.clone(),
        config.data_dir.join("metrics.prom"),
        Duration::from_secs(metrics_interval),
        shutdown_rx,
    ));

    // ── Graceful shutdown on Ctrl-C ────────────────────────────

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    drop(job_tx);

    let _ = reconcile_handle.await;
    let _ = sweep_handle.await;
    let _ = demand_handle.await;
    let _ = metrics_handle.await;

    info!("corral daemon stopped");
    Ok(())
}

/// Periodically renders the metrics registry and per-pool gauges into a
/// Prometheus text file (node-exporter textfile collector format).
async fn export_metrics(
    store: StateStore,
    metrics: Arc<Metrics>,
    path: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(error) = write_snapshot(&store, &metrics, &path) {
                    warn!(%error, "metrics export failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

fn write_snapshot(
    store: &StateStore,
    metrics: &Metrics,
    path: &std::path::Path,
) -> anyhow::Result<()> {
    let mut snapshots = Vec::new();
    for pool in store.list_pools()? {
        let instances = store.list_instances_for_pool(&pool.id)?;
        snapshots.push(PoolSnapshot::compute(&pool, &instances));
    }
    std::fs::write(path, render_prometheus(metrics, &snapshots))?;
    Ok(())
}
