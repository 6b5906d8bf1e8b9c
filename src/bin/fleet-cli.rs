use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use proxy_fleet::config::{self, FleetConfig};
use proxy_fleet::health::FleetHealth;
use proxy_fleet::model::{Server, ServerStatus};
use proxy_fleet::observability;
use proxy_fleet::store::{FleetStore, MemoryStore, Retention};
use proxy_fleet::synth;
use proxy_fleet::{ApplyOutcome, ConfigApplier, HealthMonitor, ServerSelector};

#[derive(Parser)]
#[command(name = "fleet-cli")]
#[command(about = "Operator commands for the proxy fleet", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe one server (no persistence) or every active server
    Check {
        /// Server id or name
        server: Option<String>,
    },
    /// Pick a server for a tenant tier
    Select {
        #[arg(short, long, default_value_t = 0)]
        tier: u32,
        /// Override the configured strategy
        #[arg(short, long)]
        strategy: Option<String>,
    },
    /// Show the config that would be applied, with its hash
    Preview,
    /// Synthesize and apply the daemon config
    Apply,
    /// Structurally validate a config document
    Validate { file: PathBuf },
    /// Fleet health summary
    Status,
    /// Health check history for one server
    History {
        server: String,
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Generated config records, newest first
    Configs {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Toggle maintenance mode for a server
    Maintenance { server: String, mode: Toggle },
    /// Set a server's load score (used by least_connections)
    Load { server: String, score: f64 },
    /// Copy the running daemon config to the backup directory
    Backup,
    /// List available backups
    Backups,
    /// Restore a backup and reload the daemon
    Restore { name: String },
    /// Show the config the daemon is currently running
    Running,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => FleetConfig::default(),
    };
    if std::env::var_os("RUST_LOG").is_none() {
        config.observability.log_level = "warn".to_string();
    }
    observability::init_logging(&config.observability)?;

    let store: Arc<dyn FleetStore> = Arc::new(
        MemoryStore::open(&config.store.snapshot_path)?
            .with_retention(Retention::from_config(&config.store)),
    );
    let applier = ConfigApplier::from_config(store.clone(), &config);

    match cli.command {
        Commands::Check { server: Some(key) } => {
            let server = find_server(store.as_ref(), &key).await?;
            let monitor = HealthMonitor::new(store.clone(), config.health_check.clone());
            print_json(&monitor.check_one(&server).await)?;
        }
        Commands::Check { server: None } => {
            let monitor = HealthMonitor::new(store.clone(), config.health_check.clone());
            let results = monitor.check_active().await?;
            let servers = store.list_servers(None).await?;
            print_json(&json!({
                "results": results,
                "summary": FleetHealth::summarize(&servers),
            }))?;
        }
        Commands::Select { tier, strategy } => {
            let name = strategy.unwrap_or_else(|| config.load_balancer.strategy.clone());
            let selector = ServerSelector::from_name(&name);
            let servers = store.list_servers(None).await?;
            match selector.select(&servers, tier) {
                Some(server) => print_json(server)?,
                None => return Err("no server available".into()),
            }
        }
        Commands::Preview => {
            let rendered = applier.preview().await?;
            print_json(&json!({ "hash": rendered.hash, "document": rendered.document }))?;
        }
        Commands::Apply => match applier.apply().await? {
            ApplyOutcome::Applied { id, hash } => {
                print_json(&json!({ "status": "applied", "config_id": id, "hash": hash }))?
            }
            ApplyOutcome::Unchanged { hash } => {
                print_json(&json!({ "status": "unchanged", "hash": hash }))?
            }
        },
        Commands::Validate { file } => {
            let document: Value = serde_json::from_slice(&tokio::fs::read(&file).await?)?;
            synth::validate(&document)?;
            print_json(&json!({ "valid": true, "hash": synth::content_hash(&document) }))?;
        }
        Commands::Status => {
            let servers = store.list_servers(None).await?;
            let active = store.active_config().await?;
            print_json(&json!({
                "fleet": FleetHealth::summarize(&servers),
                "active_config": active.map(|c| json!({ "id": c.id, "hash": c.hash, "applied_at": c.applied_at })),
            }))?;
        }
        Commands::History { server, limit } => {
            let server = find_server(store.as_ref(), &server).await?;
            let history = store.health_history(server.id, limit).await?;
            print_json(&json!({ "server_id": server.id, "server_name": server.name, "history": history }))?;
        }
        Commands::Configs { limit } => {
            let configs: Vec<Value> = store
                .config_history(limit)
                .await?
                .into_iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "hash": c.hash,
                        "status": c.status,
                        "created_at": c.created_at,
                        "applied_at": c.applied_at,
                    })
                })
                .collect();
            print_json(&configs)?;
        }
        Commands::Maintenance { server, mode } => {
            let server = find_server(store.as_ref(), &server).await?;
            let status = match mode {
                Toggle::On => ServerStatus::Maintenance,
                Toggle::Off => ServerStatus::Active,
            };
            print_json(&store.set_server_status(server.id, status).await?)?;
        }
        Commands::Load { server, score } => {
            let server = find_server(store.as_ref(), &server).await?;
            print_json(&store.set_load_score(server.id, score).await?)?;
        }
        Commands::Backup => {
            let path = applier.backup().await?;
            print_json(&json!({ "backup": path }))?;
        }
        Commands::Backups => print_json(&applier.backups().await?)?,
        Commands::Restore { name } => {
            applier.restore(&name).await?;
            print_json(&json!({ "restored": name }))?;
        }
        Commands::Running => print_json(&applier.running_config().await?)?,
    }

    Ok(())
}

/// Look a server up by id, falling back to an exact name match.
async fn find_server(store: &dyn FleetStore, key: &str) -> Result<Server, Box<dyn std::error::Error>> {
    if let Ok(id) = key.parse::<Uuid>() {
        if let Some(server) = store.get_server(id).await? {
            return Ok(server);
        }
    }
    store
        .list_servers(None)
        .await?
        .into_iter()
        .find(|s| s.name == key)
        .ok_or_else(|| format!("server {:?} not found", key).into())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
