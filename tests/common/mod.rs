//! Shared fixtures and test doubles for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use uuid::Uuid;

use proxy_fleet::apply::{ReloadError, ServiceReloader};
use proxy_fleet::config::{DaemonConfig, SynthesisConfig};
use proxy_fleet::health::{Measurement, ProbeError, Prober, UnsupportedProtocol};
use proxy_fleet::model::{
    GeneratedConfig, HealthCheckRecord, Protocol, Server, ServerStatus, SystemEvent, Tenant,
    TenantAccess, TenantCredential,
};
use proxy_fleet::store::{FleetStore, HealthBatch, MemoryStore, StoreError, StoreResult};
use proxy_fleet::synth::ConfigSynthesizer;
use proxy_fleet::ConfigApplier;

/// Start a TCP listener that accepts and immediately closes connections.
pub async fn start_mock_backend() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });

    port
}

pub fn server(name: &str, protocol: Protocol) -> Server {
    Server::new(name, format!("{}.example.net", name), 443, protocol)
}

pub fn server_with_score(name: &str, score: f64, status: ServerStatus) -> Server {
    let mut s = server(name, Protocol::Vmess);
    s.health_score = score;
    s.status = status;
    s
}

/// Insert a tenant holding one credential for `protocol`.
pub async fn add_tenant(store: &MemoryStore, name: &str, tier: u32, protocol: Protocol) -> Tenant {
    let tenant = Tenant::new(format!("{}@example.com", name), name, tier);
    store.insert_tenant(tenant.clone()).await.unwrap();
    store
        .insert_credential(TenantCredential {
            tenant_id: tenant.id,
            protocol,
            secret: Uuid::new_v4().to_string(),
            settings: Default::default(),
        })
        .await
        .unwrap();
    tenant
}

/// What a scripted probe does for one address.
#[derive(Debug, Clone)]
pub enum Script {
    Reachable(u64),
    Refused,
    Hang,
    Panic,
}

/// Prober whose outcome is looked up by address.
#[derive(Debug, Default)]
pub struct ScriptedProber {
    scripts: HashMap<String, Script>,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: &str, script: Script) -> Self {
        self.scripts.insert(address.to_string(), script);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(
        &self,
        protocol: &Protocol,
        address: &str,
        _port: u16,
        _timeout: Duration,
    ) -> Result<Measurement, UnsupportedProtocol> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Protocol::Other(tag) = protocol {
            return Err(UnsupportedProtocol(tag.clone()));
        }
        match self.scripts.get(address).cloned().unwrap_or(Script::Refused) {
            Script::Reachable(ms) => Ok(Measurement::reachable(ms)),
            Script::Refused => Ok(Measurement::failed(ProbeError::Connection(
                "connection refused".to_string(),
            ))),
            Script::Hang => std::future::pending().await,
            Script::Panic => panic!("probe blew up for {}", address),
        }
    }
}

/// Reloader that counts calls and fails on demand.
#[derive(Debug, Default)]
pub struct RecordingReloader {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingReloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServiceReloader for RecordingReloader {
    async fn reload(&self) -> Result<(), ReloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(ReloadError::Exit {
                code: Some(1),
                stderr: "Job for v2ray.service failed".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Reloader that parks until released, to hold an apply in flight.
#[derive(Debug, Default)]
pub struct BlockingReloader {
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl ServiceReloader for BlockingReloader {
    async fn reload(&self) -> Result<(), ReloadError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

/// Which store operation a `FailingStore` refuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    HealthCommit,
    Activation,
}

/// Store that fails one operation and delegates everything else.
pub struct FailingStore {
    pub inner: Arc<MemoryStore>,
    pub failure: Failure,
}

impl FailingStore {
    pub fn new(inner: Arc<MemoryStore>, failure: Failure) -> Self {
        Self { inner, failure }
    }

    fn refuse(&self, op: Failure) -> StoreResult<()> {
        if self.failure == op {
            Err(StoreError::Unavailable("database is locked".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FleetStore for FailingStore {
    async fn list_servers(&self, status: Option<ServerStatus>) -> StoreResult<Vec<Server>> {
        self.inner.list_servers(status).await
    }

    async fn get_server(&self, id: Uuid) -> StoreResult<Option<Server>> {
        self.inner.get_server(id).await
    }

    async fn set_server_status(&self, id: Uuid, status: ServerStatus) -> StoreResult<Server> {
        self.inner.set_server_status(id, status).await
    }

    async fn set_load_score(&self, id: Uuid, load_score: f64) -> StoreResult<Server> {
        self.inner.set_load_score(id, load_score).await
    }

    async fn commit_health_batch(&self, batch: HealthBatch) -> StoreResult<()> {
        self.refuse(Failure::HealthCommit)?;
        self.inner.commit_health_batch(batch).await
    }

    async fn health_history(&self, server_id: Uuid, limit: usize) -> StoreResult<Vec<HealthCheckRecord>> {
        self.inner.health_history(server_id, limit).await
    }

    async fn record_event(&self, event: SystemEvent) -> StoreResult<()> {
        self.inner.record_event(event).await
    }

    async fn list_tenant_access(&self) -> StoreResult<Vec<TenantAccess>> {
        self.inner.list_tenant_access().await
    }

    async fn active_config(&self) -> StoreResult<Option<GeneratedConfig>> {
        self.inner.active_config().await
    }

    async fn insert_config(&self, record: GeneratedConfig) -> StoreResult<()> {
        self.inner.insert_config(record).await
    }

    async fn activate_config(&self, id: Uuid, applied_at: DateTime<Utc>) -> StoreResult<()> {
        self.refuse(Failure::Activation)?;
        self.inner.activate_config(id, applied_at).await
    }

    async fn fail_config(&self, id: Uuid) -> StoreResult<()> {
        self.inner.fail_config(id).await
    }

    async fn config_history(&self, limit: usize) -> StoreResult<Vec<GeneratedConfig>> {
        self.inner.config_history(limit).await
    }
}

/// Daemon settings pointing into `dir`.
pub fn daemon_in(dir: &Path) -> DaemonConfig {
    DaemonConfig {
        config_path: dir.join("config.json"),
        backup_dir: dir.join("backups"),
        ..DaemonConfig::default()
    }
}

pub fn applier(
    store: Arc<dyn FleetStore>,
    reloader: Arc<dyn ServiceReloader>,
    daemon: &DaemonConfig,
) -> ConfigApplier {
    ConfigApplier::new(
        store,
        ConfigSynthesizer::new(SynthesisConfig::default()),
        reloader,
        daemon,
    )
}
