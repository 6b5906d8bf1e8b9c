//! In-process fleet store with optional JSON snapshot persistence.
//!
//! # Responsibilities
//! - Hold fleet state behind a mutex and hand out clones
//! - Persist every mutation to the snapshot before making it visible
//! - Pick up snapshot writes made by other processes (the daemon and
//!   `fleet-cli` share one file)
//! - Cap history so snapshots stay bounded
//!
//! # Design Decisions
//! - Writers are serialised by an async lock; the state mutex is never
//!   held across an await
//! - File I/O runs on the blocking pool
//! - Before each mutation the snapshot's fingerprint (mtime, length, inode)
//!   is compared with the one this store last read or wrote; a mismatch
//!   reloads the file first, so an external write is built upon rather
//!   than overwritten

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::model::{
    ConfigStatus, GeneratedConfig, HealthCheckRecord, Server, ServerStatus, SystemEvent, Tenant,
    TenantAccess, TenantCredential,
};
use crate::store::{FleetStore, HealthBatch, StoreError, StoreResult};

/// Everything the store holds. This is also the snapshot file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetState {
    /// Bumped on every persisted mutation.
    pub revision: u64,
    pub servers: Vec<Server>,
    pub tenants: Vec<Tenant>,
    pub credentials: Vec<TenantCredential>,
    pub health_checks: Vec<HealthCheckRecord>,
    pub events: Vec<SystemEvent>,
    pub configs: Vec<GeneratedConfig>,
}

/// How much history the store keeps. Oldest entries go first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub health_checks: usize,
    pub events: usize,
    /// The active config record is never dropped.
    pub configs: usize,
}

impl Retention {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            health_checks: config.max_health_checks,
            events: config.max_events,
            configs: config.max_configs,
        }
    }

    fn apply(&self, state: &mut FleetState) {
        trim_oldest(&mut state.health_checks, self.health_checks);
        trim_oldest(&mut state.events, self.events);

        if state.configs.len() > self.configs {
            let mut excess = state.configs.len() - self.configs;
            state.configs.retain(|c| {
                if excess > 0 && !c.is_active() {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

fn trim_oldest<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}

/// Identity of one version of the snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: SystemTime,
    len: u64,
    inode: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> io::Result<Option<Self>> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(Self {
            modified: meta.modified()?,
            len: meta.len(),
            inode: inode(&meta),
        }))
    }
}

#[cfg(unix)]
fn inode(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode(_meta: &fs::Metadata) -> u64 {
    0
}

#[derive(Debug)]
struct Snapshot {
    path: PathBuf,
    /// Held for the whole read-modify-write; holds the last fingerprint seen.
    seen: tokio::sync::Mutex<Option<Fingerprint>>,
}

/// A `FleetStore` backed by a mutex-guarded `FleetState`.
///
/// Every mutation is staged on a copy, written to the snapshot file (when
/// one is configured) and only then swapped in, so a failed write leaves
/// the visible state untouched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<FleetState>,
    snapshot: Option<Snapshot>,
    retention: Retention,
}

impl MemoryStore {
    /// Create an empty, non-persistent store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a non-persistent store holding `state`.
    pub fn from_state(state: FleetState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Open a store persisted at `path`, loading the snapshot if it exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let (state, seen) = match Fingerprint::of(&path)? {
            Some(_) => {
                let (state, seen) = read_snapshot(&path)?;
                tracing::info!(
                    path = %path.display(),
                    revision = state.revision,
                    servers = state.servers.len(),
                    tenants = state.tenants.len(),
                    "Loaded fleet snapshot"
                );
                (state, seen)
            }
            None => (FleetState::default(), None),
        };

        Ok(Self {
            state: Mutex::new(state),
            snapshot: Some(Snapshot {
                path,
                seen: tokio::sync::Mutex::new(seen),
            }),
            retention: Retention::default(),
        })
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Re-read the snapshot if someone else wrote it.
    ///
    /// Returns `false` when the file is exactly what this store last wrote.
    pub async fn reload(&self) -> StoreResult<bool> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(false);
        };
        let mut seen = snapshot.seen.lock().await;
        self.sync_from_disk(&snapshot.path, &mut seen).await
    }

    /// Clone of the current state.
    pub fn state(&self) -> StoreResult<FleetState> {
        Ok(self.lock()?.clone())
    }

    pub async fn insert_server(&self, server: Server) -> StoreResult<()> {
        self.mutate(move |state| {
            state.servers.push(server);
            Ok(())
        })
        .await
    }

    pub async fn insert_tenant(&self, tenant: Tenant) -> StoreResult<()> {
        self.mutate(move |state| {
            state.tenants.push(tenant);
            Ok(())
        })
        .await
    }

    pub async fn insert_credential(&self, credential: TenantCredential) -> StoreResult<()> {
        self.mutate(move |state| {
            state.credentials.push(credential);
            Ok(())
        })
        .await
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, FleetState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("fleet state mutex poisoned".into()))
    }

    /// Stage `f` on a copy of the state, persist it, then publish it.
    async fn mutate<T>(&self, f: impl FnOnce(&mut FleetState) -> StoreResult<T>) -> StoreResult<T> {
        let Some(snapshot) = &self.snapshot else {
            let mut guard = self.lock()?;
            let mut draft = guard.clone();
            let out = f(&mut draft)?;
            self.retention.apply(&mut draft);
            *guard = draft;
            return Ok(out);
        };

        let mut seen = snapshot.seen.lock().await;
        self.sync_from_disk(&snapshot.path, &mut seen).await?;

        let (out, draft) = {
            let guard = self.lock()?;
            let mut draft = guard.clone();
            let out = f(&mut draft)?;
            draft.revision += 1;
            self.retention.apply(&mut draft);
            (out, draft)
        };

        let path = snapshot.path.clone();
        let (draft, written) = blocking(move || {
            let written = write_snapshot(&path, &draft)?;
            Ok((draft, written))
        })
        .await?;

        *seen = written;
        *self.lock()? = draft;
        Ok(out)
    }

    /// Adopt the file's contents if its fingerprint differs from `seen`.
    async fn sync_from_disk(&self, path: &Path, seen: &mut Option<Fingerprint>) -> StoreResult<bool> {
        let current = {
            let path = path.to_path_buf();
            blocking(move || Ok(Fingerprint::of(&path)?)).await?
        };
        if current == *seen {
            return Ok(false);
        }
        if current.is_none() {
            // Removed underneath us; the next write recreates it from memory.
            *seen = None;
            return Ok(false);
        }

        let (state, fingerprint) = {
            let path = path.to_path_buf();
            blocking(move || read_snapshot(&path)).await?
        };
        tracing::info!(
            path = %path.display(),
            revision = state.revision,
            "Picked up external snapshot change"
        );
        *self.lock()? = state;
        *seen = fingerprint;
        Ok(true)
    }
}

async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Unavailable(format!("snapshot task failed: {}", e)))?
}

fn find_server(state: &mut FleetState, id: Uuid) -> StoreResult<&mut Server> {
    state
        .servers
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or(StoreError::NotFound { kind: "server", id })
}

fn find_config(state: &mut FleetState, id: Uuid) -> StoreResult<&mut GeneratedConfig> {
    state
        .configs
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or(StoreError::NotFound { kind: "config", id })
}

/// Fingerprint is taken before the read; a write racing the read only
/// causes one extra reload later.
fn read_snapshot(path: &Path) -> StoreResult<(FleetState, Option<Fingerprint>)> {
    let fingerprint = Fingerprint::of(path)?;
    let reader = BufReader::new(File::open(path)?);
    Ok((serde_json::from_reader(reader)?, fingerprint))
}

/// Write to a sibling temp file and rename over the snapshot.
fn write_snapshot(path: &Path, state: &FleetState) -> StoreResult<Option<Fingerprint>> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, state)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(Fingerprint::of(path)?)
}

#[async_trait]
impl FleetStore for MemoryStore {
    async fn list_servers(&self, status: Option<ServerStatus>) -> StoreResult<Vec<Server>> {
        let state = self.lock()?;
        Ok(state
            .servers
            .iter()
            .filter(|s| status.map_or(true, |st| s.status == st))
            .cloned()
            .collect())
    }

    async fn get_server(&self, id: Uuid) -> StoreResult<Option<Server>> {
        Ok(self.lock()?.servers.iter().find(|s| s.id == id).cloned())
    }

    async fn set_server_status(&self, id: Uuid, status: ServerStatus) -> StoreResult<Server> {
        self.mutate(|state| {
            let server = find_server(state, id)?;
            server.status = status;
            Ok(server.clone())
        })
        .await
    }

    async fn set_load_score(&self, id: Uuid, load_score: f64) -> StoreResult<Server> {
        self.mutate(|state| {
            let server = find_server(state, id)?;
            server.load_score = load_score;
            Ok(server.clone())
        })
        .await
    }

    async fn commit_health_batch(&self, batch: HealthBatch) -> StoreResult<()> {
        self.mutate(move |state| {
            for (id, score) in &batch.scores {
                find_server(state, *id)?.health_score = *score;
            }
            state.health_checks.extend(batch.records);
            state.events.extend(batch.events);
            Ok(())
        })
        .await
    }

    async fn health_history(&self, server_id: Uuid, limit: usize) -> StoreResult<Vec<HealthCheckRecord>> {
        let state = self.lock()?;
        let mut history: Vec<_> = state
            .health_checks
            .iter()
            .filter(|r| r.server_id == server_id)
            .cloned()
            .collect();
        // Stable sort keeps append order among equal timestamps; reverse for newest first.
        history.sort_by_key(|r| r.checked_at);
        history.reverse();
        history.truncate(limit);
        Ok(history)
    }

    async fn record_event(&self, event: SystemEvent) -> StoreResult<()> {
        self.mutate(move |state| {
            state.events.push(event);
            Ok(())
        })
        .await
    }

    async fn list_tenant_access(&self) -> StoreResult<Vec<TenantAccess>> {
        let state = self.lock()?;
        Ok(state
            .credentials
            .iter()
            .filter_map(|credential| {
                state
                    .tenants
                    .iter()
                    .find(|t| t.id == credential.tenant_id && t.is_active())
                    .map(|tenant| TenantAccess {
                        tenant: tenant.clone(),
                        credential: credential.clone(),
                    })
            })
            .collect())
    }

    async fn active_config(&self) -> StoreResult<Option<GeneratedConfig>> {
        Ok(self.lock()?.configs.iter().find(|c| c.is_active()).cloned())
    }

    async fn insert_config(&self, record: GeneratedConfig) -> StoreResult<()> {
        self.mutate(move |state| {
            state.configs.push(record);
            Ok(())
        })
        .await
    }

    async fn activate_config(&self, id: Uuid, applied_at: DateTime<Utc>) -> StoreResult<()> {
        self.mutate(|state| {
            find_config(state, id)?;
            for config in state.configs.iter_mut() {
                if config.id == id {
                    config.status = ConfigStatus::Active;
                    config.applied_at = Some(applied_at);
                } else if config.is_active() {
                    config.status = ConfigStatus::Inactive;
                }
            }
            Ok(())
        })
        .await
    }

    async fn fail_config(&self, id: Uuid) -> StoreResult<()> {
        self.mutate(|state| {
            find_config(state, id)?.status = ConfigStatus::Failed;
            Ok(())
        })
        .await
    }

    async fn config_history(&self, limit: usize) -> StoreResult<Vec<GeneratedConfig>> {
        let state = self.lock()?;
        Ok(state.configs.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Protocol, Severity, TenantStatus};

    fn record(server_id: Uuid, score: f64) -> HealthCheckRecord {
        HealthCheckRecord {
            server_id,
            latency_ms: Some(20),
            score,
            error: None,
            checked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_batch_commit_applies_everything() {
        let store = MemoryStore::new();
        let server = Server::new("eu-1", "10.0.0.1", 443, Protocol::Vmess);
        let id = server.id;
        store.insert_server(server).await.unwrap();

        let batch = HealthBatch {
            scores: vec![(id, 20.0)],
            records: vec![record(id, 20.0)],
            events: vec![SystemEvent::new("server_health", Severity::Critical, "low")],
        };
        store.commit_health_batch(batch).await.unwrap();

        let state = store.state().unwrap();
        assert_eq!(state.servers[0].health_score, 20.0);
        assert_eq!(state.health_checks.len(), 1);
        assert_eq!(state.events.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_with_unknown_server_rolls_back() {
        let store = MemoryStore::new();
        let server = Server::new("eu-1", "10.0.0.1", 443, Protocol::Vmess);
        let id = server.id;
        store.insert_server(server).await.unwrap();

        let missing = Uuid::new_v4();
        let batch = HealthBatch {
            scores: vec![(id, 10.0), (missing, 10.0)],
            records: vec![record(id, 10.0)],
            events: vec![],
        };
        let err = store.commit_health_batch(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "server", .. }));

        let state = store.state().unwrap();
        assert_eq!(state.servers[0].health_score, 100.0);
        assert!(state.health_checks.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_write_failure_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("state.json");
        let store = MemoryStore::open(&path).unwrap();

        let err = store
            .record_event(SystemEvent::new("x", Severity::Info, "y"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(store.state().unwrap().events.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = MemoryStore::open(&path).unwrap();
        let server = Server::new("eu-1", "10.0.0.1", 443, Protocol::Vless);
        store.insert_server(server.clone()).await.unwrap();
        assert!(!store.reload().await.unwrap());

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.list_servers(None).await.unwrap(), vec![server.clone()]);

        // An external writer adds a second server; reload picks it up.
        let other = MemoryStore::open(&path).unwrap();
        other
            .insert_server(Server::new("us-1", "10.0.0.2", 443, Protocol::Trojan))
            .await
            .unwrap();
        assert!(reopened.reload().await.unwrap());
        assert_eq!(reopened.list_servers(None).await.unwrap().len(), 2);
        assert!(!reopened.reload().await.unwrap());
    }

    #[tokio::test]
    async fn test_external_write_survives_local_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let daemon = MemoryStore::open(&path).unwrap();
        let server = Server::new("eu-1", "10.0.0.1", 443, Protocol::Vmess);
        daemon.insert_server(server.clone()).await.unwrap();

        let operator = MemoryStore::open(&path).unwrap();
        operator
            .set_server_status(server.id, ServerStatus::Maintenance)
            .await
            .unwrap();

        // The daemon writes before its watcher has run.
        daemon
            .record_event(SystemEvent::new("x", Severity::Info, "y"))
            .await
            .unwrap();

        let state = daemon.state().unwrap();
        assert_eq!(state.servers[0].status, ServerStatus::Maintenance);
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.revision, 3);

        let on_disk = MemoryStore::open(&path).unwrap().state().unwrap();
        assert_eq!(on_disk.servers[0].status, ServerStatus::Maintenance);
        assert_eq!(on_disk.events.len(), 1);
    }

    #[tokio::test]
    async fn test_retention_caps_history() {
        let store = MemoryStore::new().with_retention(Retention {
            health_checks: 2,
            events: 1,
            configs: 2,
        });
        let server = Server::new("eu-1", "10.0.0.1", 443, Protocol::Vmess);
        let id = server.id;
        store.insert_server(server).await.unwrap();

        for score in [10.0, 20.0, 30.0] {
            store
                .commit_health_batch(HealthBatch {
                    records: vec![record(id, score)],
                    events: vec![SystemEvent::new("e", Severity::Info, score.to_string())],
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let active = GeneratedConfig::pending("a", serde_json::json!({}));
        store.insert_config(active.clone()).await.unwrap();
        store.activate_config(active.id, Utc::now()).await.unwrap();
        for hash in ["b", "c"] {
            store
                .insert_config(GeneratedConfig::pending(hash, serde_json::json!({})))
                .await
                .unwrap();
        }

        let state = store.state().unwrap();
        let scores: Vec<f64> = state.health_checks.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![20.0, 30.0]);
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.events[0].message, "30");

        // The oldest record is active, so the oldest inactive one goes instead.
        let hashes: Vec<&str> = state.configs.iter().map(|c| c.hash.as_str()).collect();
        assert_eq!(hashes, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_load_score_update() {
        let store = MemoryStore::new();
        let server = Server::new("eu-1", "10.0.0.1", 443, Protocol::Vmess);
        let id = server.id;
        store.insert_server(server).await.unwrap();

        let updated = store.set_load_score(id, 42.5).await.unwrap();
        assert_eq!(updated.load_score, 42.5);
        assert_eq!(store.state().unwrap().servers[0].load_score, 42.5);

        let err = store.set_load_score(Uuid::new_v4(), 1.0).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "server", .. }));
    }

    #[tokio::test]
    async fn test_activate_deactivates_previous() {
        let store = MemoryStore::new();
        let first = GeneratedConfig::pending("a", serde_json::json!({}));
        let second = GeneratedConfig::pending("b", serde_json::json!({}));
        store.insert_config(first.clone()).await.unwrap();
        store.insert_config(second.clone()).await.unwrap();

        store.activate_config(first.id, Utc::now()).await.unwrap();
        store.activate_config(second.id, Utc::now()).await.unwrap();

        let history = store.config_history(10).await.unwrap();
        assert_eq!(history[0].id, second.id);
        assert_eq!(history[0].status, ConfigStatus::Active);
        assert_eq!(history[1].status, ConfigStatus::Inactive);
        assert_eq!(store.active_config().await.unwrap().unwrap().hash, "b");
    }

    #[tokio::test]
    async fn test_tenant_access_skips_suspended_tenants() {
        let store = MemoryStore::new();
        let active = Tenant::new("a@example.com", "alice", 0);
        let mut suspended = Tenant::new("b@example.com", "bob", 1);
        suspended.status = TenantStatus::Suspended;

        for tenant in [&active, &suspended] {
            store.insert_tenant(tenant.clone()).await.unwrap();
            store
                .insert_credential(TenantCredential {
                    tenant_id: tenant.id,
                    protocol: Protocol::Vmess,
                    secret: Uuid::new_v4().to_string(),
                    settings: Default::default(),
                })
                .await
                .unwrap();
        }

        let access = store.list_tenant_access().await.unwrap();
        assert_eq!(access.len(), 1);
        assert_eq!(access[0].tenant.username, "alice");
    }

    #[tokio::test]
    async fn test_health_history_newest_first_with_limit() {
        let store = MemoryStore::new();
        let server = Server::new("eu-1", "10.0.0.1", 443, Protocol::Vmess);
        let id = server.id;
        store.insert_server(server).await.unwrap();

        for score in [10.0, 20.0, 30.0] {
            let mut r = record(id, score);
            r.checked_at = Utc::now() + chrono::Duration::seconds(score as i64);
            store
                .commit_health_batch(HealthBatch { records: vec![r], ..Default::default() })
                .await
                .unwrap();
        }

        let history = store.health_history(id, 2).await.unwrap();
        assert_eq!(history.iter().map(|r| r.score).collect::<Vec<_>>(), vec![30.0, 20.0]);
    }
}
