//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the fleet daemon.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the fleet daemon and CLI.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FleetConfig {
    /// Periodic health check settings.
    pub health_check: HealthCheckConfig,

    /// Server selection settings.
    pub load_balancer: LoadBalancerConfig,

    /// The proxy daemon being configured.
    pub daemon: DaemonConfig,

    /// Values baked into the synthesized daemon configuration.
    pub synthesis: SynthesisConfig,

    /// Fleet state persistence.
    pub store: StoreConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable periodic health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}

/// Load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Strategy name. Unknown names fall back to `weighted_random`.
    pub strategy: String,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: "weighted_random".to_string(),
        }
    }
}

/// Proxy daemon integration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// File the daemon reads its configuration from.
    pub config_path: PathBuf,

    /// System service reloaded after a config write.
    pub service_name: String,

    /// Upper bound on one reload, in seconds.
    pub reload_timeout_secs: u64,

    /// Periodic apply interval in seconds.
    pub apply_interval_secs: u64,

    /// Where `backup` writes copies of the live config.
    pub backup_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/v2ray/config.json"),
            service_name: "v2ray".to_string(),
            reload_timeout_secs: 30,
            apply_interval_secs: 60,
            backup_dir: PathBuf::from("/var/backups/proxy-fleet"),
        }
    }
}

/// Fixed parts of the synthesized daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub api_port: u16,
    pub api_listen: String,
    pub access_log: String,
    pub error_log: String,

    /// Daemon log level (debug, info, warning, error, none).
    pub log_level: String,

    pub vmess_port: u16,
    pub vmess_ws_path: String,
    pub tls_cert_file: String,
    pub tls_key_file: String,

    pub vless_port: u16,
    pub reality_dest: String,
    pub reality_server_names: Vec<String>,
    pub reality_private_key: String,

    pub shadowsocks_port: u16,
    pub shadowsocks_method: String,

    pub socks_port: u16,
    pub http_port: u16,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            api_port: 10085,
            api_listen: "127.0.0.1".to_string(),
            access_log: "/var/log/v2ray/access.log".to_string(),
            error_log: "/var/log/v2ray/error.log".to_string(),
            log_level: "warning".to_string(),
            vmess_port: 443,
            vmess_ws_path: "/ray".to_string(),
            tls_cert_file: "/etc/v2ray/cert.pem".to_string(),
            tls_key_file: "/etc/v2ray/key.pem".to_string(),
            vless_port: 8443,
            reality_dest: "www.microsoft.com:443".to_string(),
            reality_server_names: vec!["www.microsoft.com".to_string()],
            reality_private_key: String::new(),
            shadowsocks_port: 8388,
            shadowsocks_method: "chacha20-ietf-poly1305".to_string(),
            socks_port: 1080,
            http_port: 8118,
        }
    }
}

impl SynthesisConfig {
    /// `(inbound, port)` for every listener the document can contain.
    pub fn inbound_ports(&self) -> [(&'static str, u16); 6] {
        [
            ("api", self.api_port),
            ("vmess", self.vmess_port),
            ("vless", self.vless_port),
            ("shadowsocks", self.shadowsocks_port),
            ("socks", self.socks_port),
            ("http", self.http_port),
        ]
    }
}

/// Fleet state persistence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot of servers, tenants and history.
    pub snapshot_path: PathBuf,

    /// Re-apply when the snapshot changes on disk.
    pub watch: bool,

    /// Health check records kept, oldest dropped first.
    pub max_health_checks: usize,

    /// System events kept.
    pub max_events: usize,

    /// Generated config records kept. The active one always survives.
    pub max_configs: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("fleet-state.json"),
            watch: true,
            max_health_checks: 10_000,
            max_events: 1_000,
            max_configs: 50,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: `pretty` or `json`.
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
