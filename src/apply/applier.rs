//! Change detection, file write, reload and config record bookkeeping.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use uuid::Uuid;

use crate::apply::backup;
use crate::apply::reload::{CommandReloader, ReloadError, ServiceReloader};
use crate::config::{DaemonConfig, FleetConfig};
use crate::model::{GeneratedConfig, Severity, SystemEvent};
use crate::observability::metrics;
use crate::store::{FleetStore, StoreError};
use crate::synth::{self, ConfigSynthesizer, InvalidDocument, Rendered};

#[derive(Debug, Error)]
pub enum ApplyError {
    /// Another apply or restore holds the guard. Try again later.
    #[error("another config apply is already in progress")]
    ConcurrentApplyRejected,

    #[error("invalid config document: {0}")]
    Validation(#[from] InvalidDocument),

    #[error("store error: {0}")]
    Persistence(#[from] StoreError),

    #[error("failed to render config document: {0}")]
    Render(#[from] serde_json::Error),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0:?} is not a backup file name")]
    BackupName(String),

    #[error("service reload failed: {0}")]
    Reload(#[from] ReloadError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new record went active and the daemon was reloaded.
    Applied { id: Uuid, hash: String },
    /// The synthesized document is already the active one.
    Unchanged { hash: String },
}

impl ApplyOutcome {
    pub fn hash(&self) -> &str {
        match self {
            ApplyOutcome::Applied { hash, .. } | ApplyOutcome::Unchanged { hash } => hash,
        }
    }
}

/// Held for the whole apply (or restore) sequence.
struct ApplyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ApplyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for ApplyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct ConfigApplier {
    store: Arc<dyn FleetStore>,
    synthesizer: ConfigSynthesizer,
    reloader: Arc<dyn ServiceReloader>,
    config_path: PathBuf,
    backup_dir: PathBuf,
    in_flight: AtomicBool,
}

impl ConfigApplier {
    pub fn new(
        store: Arc<dyn FleetStore>,
        synthesizer: ConfigSynthesizer,
        reloader: Arc<dyn ServiceReloader>,
        daemon: &DaemonConfig,
    ) -> Self {
        Self {
            store,
            synthesizer,
            reloader,
            config_path: daemon.config_path.clone(),
            backup_dir: daemon.backup_dir.clone(),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Applier that reloads the daemon with `systemctl reload`.
    pub fn from_config(store: Arc<dyn FleetStore>, config: &FleetConfig) -> Self {
        let reloader = CommandReloader::systemctl(
            &config.daemon.service_name,
            Duration::from_secs(config.daemon.reload_timeout_secs),
        );
        Self::new(
            store,
            ConfigSynthesizer::new(config.synthesis.clone()),
            Arc::new(reloader),
            &config.daemon,
        )
    }

    /// Whether an apply or restore currently holds the guard.
    pub fn is_applying(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Synthesize and hash from current store state without side effects.
    pub async fn preview(&self) -> Result<Rendered, ApplyError> {
        let servers = self.store.list_servers(None).await?;
        let access = self.store.list_tenant_access().await?;
        let document = self.synthesizer.synthesize(&servers, &access);
        Ok(synth::render(&document)?)
    }

    /// Bring the daemon in line with current store state.
    ///
    /// Rejected immediately, not queued, while another apply is running.
    pub async fn apply(&self) -> Result<ApplyOutcome, ApplyError> {
        let Some(_guard) = ApplyGuard::acquire(&self.in_flight) else {
            metrics::record_config_apply("rejected");
            return Err(ApplyError::ConcurrentApplyRejected);
        };

        let result = self.apply_locked().await;
        metrics::record_config_apply(match &result {
            Ok(ApplyOutcome::Applied { .. }) => "applied",
            Ok(ApplyOutcome::Unchanged { .. }) => "unchanged",
            Err(ApplyError::Validation(_)) => "invalid",
            Err(_) => "failed",
        });
        result
    }

    async fn apply_locked(&self) -> Result<ApplyOutcome, ApplyError> {
        let rendered = self.preview().await?;
        self.apply_rendered(rendered).await
    }

    async fn apply_rendered(&self, rendered: Rendered) -> Result<ApplyOutcome, ApplyError> {
        let Rendered { document, hash } = rendered;

        if let Some(active) = self.store.active_config().await? {
            if active.hash == hash {
                tracing::info!(hash = %hash, "Configuration already active, no changes needed");
                return Ok(ApplyOutcome::Unchanged { hash });
            }
        }

        if let Err(e) = synth::validate(&document) {
            tracing::error!(error = %e, "Generated configuration is invalid");
            return Err(e.into());
        }

        let record = GeneratedConfig::pending(hash.clone(), document.clone());
        let id = record.id;
        self.store.insert_config(record).await?;

        // The live file is replaced before the reload result is known.
        if let Err(source) = write_document(&self.config_path, &document).await {
            tracing::error!(path = %self.config_path.display(), error = %source, "Failed to write configuration file");
            self.mark_failed(id).await;
            self.log_event(
                "config_failed",
                Severity::Error,
                format!("Failed to write configuration file: {}", source),
                json!({ "config_id": id, "hash": hash }),
            )
            .await;
            return Err(ApplyError::Write {
                path: self.config_path.clone(),
                source,
            });
        }

        match self.reloader.reload().await {
            Ok(()) => {
                if let Err(e) = self.store.activate_config(id, Utc::now()).await {
                    tracing::error!(config_id = %id, error = %e, "Daemon reloaded but activation was not recorded");
                    self.mark_failed(id).await;
                    self.log_event(
                        "config_failed",
                        Severity::Error,
                        format!("Configuration reloaded but could not be marked active: {}", e),
                        json!({ "config_id": id, "hash": hash, "error": e.to_string() }),
                    )
                    .await;
                    return Err(e.into());
                }
                self.log_event(
                    "config_applied",
                    Severity::Info,
                    format!("Configuration applied successfully (hash: {})", hash),
                    json!({ "config_id": id, "hash": hash }),
                )
                .await;
                tracing::info!(config_id = %id, hash = %hash, "Configuration applied");
                Ok(ApplyOutcome::Applied { id, hash })
            }
            Err(e) => {
                tracing::error!(config_id = %id, error = %e, "Failed to reload proxy service");
                self.mark_failed(id).await;
                self.log_event(
                    "config_failed",
                    Severity::Error,
                    format!("Failed to reload proxy service: {}", e),
                    json!({ "config_id": id, "hash": hash, "error": e.to_string() }),
                )
                .await;
                Err(ApplyError::Reload(e))
            }
        }
    }

    /// Parsed contents of the file the daemon is running.
    pub async fn running_config(&self) -> Result<Value, ApplyError> {
        read_document(&self.config_path).await
    }

    /// Copy the live file into the backup directory. Returns the new path.
    pub async fn backup(&self) -> Result<PathBuf, ApplyError> {
        let name = backup::backup_name(&Local::now());
        let target = backup::copy_to_backup(&self.config_path, &self.backup_dir, &name)
            .await
            .map_err(|source| ApplyError::Read {
                path: self.config_path.clone(),
                source,
            })?;
        tracing::info!(path = %target.display(), "Configuration backed up");
        Ok(target)
    }

    /// Backup names, newest first.
    pub async fn backups(&self) -> Result<Vec<String>, ApplyError> {
        backup::list_backups(&self.backup_dir)
            .await
            .map_err(|source| ApplyError::Read {
                path: self.backup_dir.clone(),
                source,
            })
    }

    /// Put a backup back in place and reload. Creates no config record.
    pub async fn restore(&self, name: &str) -> Result<(), ApplyError> {
        if !backup::is_backup_name(name) {
            return Err(ApplyError::BackupName(name.to_string()));
        }

        let Some(_guard) = ApplyGuard::acquire(&self.in_flight) else {
            return Err(ApplyError::ConcurrentApplyRejected);
        };

        let document = read_document(&self.backup_dir.join(name)).await?;
        synth::validate(&document)?;

        write_document(&self.config_path, &document)
            .await
            .map_err(|source| ApplyError::Write {
                path: self.config_path.clone(),
                source,
            })?;

        match self.reloader.reload().await {
            Ok(()) => {
                self.log_event(
                    "config_restored",
                    Severity::Info,
                    format!("Configuration restored from backup: {}", name),
                    json!({ "backup": name }),
                )
                .await;
                tracing::info!(backup = name, "Configuration restored");
                Ok(())
            }
            Err(e) => {
                self.log_event(
                    "config_restore_failed",
                    Severity::Error,
                    format!("Failed to reload after restoring {}: {}", name, e),
                    json!({ "backup": name, "error": e.to_string() }),
                )
                .await;
                Err(e.into())
            }
        }
    }

    /// Apply on every tick and on every trigger until shutdown.
    pub async fn run(
        &self,
        interval: Duration,
        mut triggers: mpsc::UnboundedReceiver<()>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(interval_secs = interval.as_secs(), "Config apply loop starting");
        let mut ticker = time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.apply_logged().await,
                Some(()) = triggers.recv() => {
                    // Coalesce a burst of triggers into one apply.
                    while triggers.try_recv().is_ok() {}
                    self.apply_logged().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Config apply loop received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn apply_logged(&self) {
        match self.apply().await {
            Ok(ApplyOutcome::Applied { id, hash }) => {
                tracing::info!(config_id = %id, hash = %hash, "Applied new configuration")
            }
            Ok(ApplyOutcome::Unchanged { .. }) => {}
            Err(ApplyError::ConcurrentApplyRejected) => {
                tracing::debug!("Apply already in progress, skipping")
            }
            Err(e) => tracing::error!(error = %e, "Config apply failed"),
        }
    }

    async fn mark_failed(&self, id: Uuid) {
        if let Err(e) = self.store.fail_config(id).await {
            tracing::error!(config_id = %id, error = %e, "Failed to mark configuration failed");
        }
    }

    async fn log_event(&self, event_type: &str, severity: Severity, message: String, metadata: Value) {
        let event = SystemEvent::new(event_type, severity, message).with_metadata(metadata);
        if let Err(e) = self.store.record_event(event).await {
            tracing::error!(event_type, error = %e, "Failed to log system event");
        }
    }
}

/// Pretty-print `document` to `path` via a sibling temp file and rename.
async fn write_document(path: &Path, document: &Value) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(document)?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn read_document(path: &Path) -> Result<Value, ApplyError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ApplyError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}
