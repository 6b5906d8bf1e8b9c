//! Proxy endpoint definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Score at or above which a server counts as healthy.
pub const HEALTHY_FLOOR: f64 = 50.0;

/// Protocol tag carried by servers and tenant credentials.
///
/// Tags outside the known set are preserved verbatim in `Other` so that
/// probing can classify them as unsupported instead of rejecting the row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    Vmess,
    Vless,
    Shadowsocks,
    Trojan,
    Socks,
    Http,
    Other(String),
}

impl Protocol {
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Trojan => "trojan",
            Protocol::Socks => "socks",
            Protocol::Http => "http",
            Protocol::Other(tag) => tag,
        }
    }

    /// Tag of the inbound that serves this protocol (e.g. `vmess-in`).
    pub fn inbound_tag(&self) -> String {
        format!("{}-in", self.as_str())
    }
}

impl From<String> for Protocol {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "vmess" => Protocol::Vmess,
            "vless" => Protocol::Vless,
            "shadowsocks" => Protocol::Shadowsocks,
            "trojan" => Protocol::Trojan,
            "socks" => Protocol::Socks,
            "http" => Protocol::Http,
            _ => Protocol::Other(tag),
        }
    }
}

impl From<Protocol> for String {
    fn from(protocol: Protocol) -> Self {
        protocol.as_str().to_string()
    }
}

impl FromStr for Protocol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Protocol::from(s.to_string()))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Active,
    Inactive,
    Maintenance,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Active => "active",
            ServerStatus::Inactive => "inactive",
            ServerStatus::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

impl FromStr for ServerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ServerStatus::Active),
            "inactive" => Ok(ServerStatus::Inactive),
            "maintenance" => Ok(ServerStatus::Maintenance),
            other => Err(format!("unknown server status '{}'", other)),
        }
    }
}

/// A registered proxy endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub protocol: Protocol,
    pub status: ServerStatus,
    #[serde(default)]
    pub location: Option<String>,
    /// Current utilization, lower is better. Maintained outside this crate.
    #[serde(default)]
    pub load_score: f64,
    /// 0-100, written only by the health monitor.
    #[serde(default = "default_health_score")]
    pub health_score: f64,
    /// Upstream credential and protocol settings (`id`, `password`,
    /// `cipher`, `streamSettings`, ...).
    #[serde(default)]
    pub upstream: BTreeMap<String, serde_json::Value>,
}

fn default_health_score() -> f64 {
    100.0
}

impl Server {
    /// Create an active server with a fresh id and default scores.
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            address: address.into(),
            port,
            protocol,
            status: ServerStatus::Active,
            location: None,
            load_score: 0.0,
            health_score: default_health_score(),
            upstream: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ServerStatus::Active
    }

    pub fn is_healthy(&self) -> bool {
        self.health_score >= HEALTHY_FLOOR
    }

    /// Active and healthy.
    pub fn is_available(&self) -> bool {
        self.is_active() && self.is_healthy()
    }

    /// Tag of the outbound generated for this server.
    pub fn outbound_tag(&self) -> String {
        format!("server-{}", self.id)
    }

    /// String-valued upstream setting, if present.
    pub fn upstream_str(&self, key: &str) -> Option<&str> {
        self.upstream.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_roundtrip_keeps_unknown_tags() {
        assert_eq!(Protocol::from("vless".to_string()), Protocol::Vless);
        let wireguard: Protocol = "wireguard".parse().unwrap();
        assert_eq!(wireguard, Protocol::Other("wireguard".into()));
        assert_eq!(wireguard.to_string(), "wireguard");
        assert_eq!(Protocol::Shadowsocks.inbound_tag(), "shadowsocks-in");
    }

    #[test]
    fn test_availability() {
        let mut server = Server::new("eu-1", "10.0.0.1", 443, Protocol::Vmess);
        assert!(server.is_available());

        server.health_score = 49.9;
        assert!(!server.is_healthy());

        server.health_score = 50.0;
        server.status = ServerStatus::Maintenance;
        assert!(server.is_healthy());
        assert!(!server.is_available());
    }

    #[test]
    fn test_server_deserialize_defaults() {
        let json = r#"{
            "id": "6f1c2a3e-0000-4000-8000-000000000001",
            "name": "us-1",
            "address": "us1.example.net",
            "port": 8443,
            "protocol": "trojan",
            "status": "active"
        }"#;
        let server: Server = serde_json::from_str(json).unwrap();
        assert_eq!(server.protocol, Protocol::Trojan);
        assert_eq!(server.health_score, 100.0);
        assert!(server.upstream.is_empty());
    }
}
