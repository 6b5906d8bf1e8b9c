//! Proxy fleet daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   fleet-state.json ──watch──▶ store reload ──trigger──┐
//!          │                                            ▼
//!          ▼                                     ┌──────────────┐   write + reload
//!   ┌─────────────┐   list active   ┌─────────┐  │ConfigApplier │──────────────────▶ proxy daemon
//!   │ MemoryStore │◀───────────────▶│ Health  │  │  (interval)  │
//!   │             │  batch commit   │ Monitor │  └──────┬───────┘
//!   └─────────────┘                 └─────────┘         │ records + events
//!          ▲                                            │
//!          └────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;

use proxy_fleet::config::{self, FleetConfig};
use proxy_fleet::lifecycle::{self, Shutdown};
use proxy_fleet::observability;
use proxy_fleet::store::watcher::SnapshotWatcher;
use proxy_fleet::store::{FleetStore, MemoryStore, Retention};
use proxy_fleet::{ConfigApplier, HealthMonitor};

#[derive(Parser)]
#[command(name = "proxy-fleet")]
#[command(about = "Health checks and config sync for a proxy fleet", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => FleetConfig::default(),
    };

    observability::init_logging(&config.observability)?;

    tracing::info!("proxy-fleet v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        snapshot = %config.store.snapshot_path.display(),
        daemon_config = %config.daemon.config_path.display(),
        service = %config.daemon.service_name,
        health_interval_secs = config.health_check.interval_secs,
        apply_interval_secs = config.daemon.apply_interval_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = observability::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let memory = Arc::new(
        MemoryStore::open(&config.store.snapshot_path)?
            .with_retention(Retention::from_config(&config.store)),
    );
    let store: Arc<dyn FleetStore> = memory.clone();

    let shutdown = Shutdown::new();

    let monitor = HealthMonitor::new(store.clone(), config.health_check.clone());
    let monitor_task = tokio::spawn(monitor.run(shutdown.subscribe()));

    let applier = Arc::new(ConfigApplier::from_config(store.clone(), &config));
    let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
    let apply_interval = Duration::from_secs(config.daemon.apply_interval_secs);
    let apply_task = {
        let applier = applier.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move { applier.run(apply_interval, trigger_rx, shutdown_rx).await })
    };

    // Held for the life of the process; dropping it stops the watch.
    let _watcher = if config.store.watch {
        let (watcher, mut changes) = SnapshotWatcher::new(&config.store.snapshot_path);
        match watcher.run() {
            Ok(handle) => {
                let memory = memory.clone();
                tokio::spawn(async move {
                    while changes.recv().await.is_some() {
                        match memory.reload().await {
                            Ok(true) => {
                                let _ = trigger_tx.send(());
                            }
                            // Our own write.
                            Ok(false) => {}
                            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable snapshot change"),
                        }
                    }
                });
                Some(handle)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to watch fleet snapshot");
                None
            }
        }
    } else {
        None
    };

    lifecycle::shutdown_on_signal(&shutdown).await;

    let _ = tokio::join!(monitor_task, apply_task);

    tracing::info!("Shutdown complete");
    Ok(())
}
