//! Typed tree of the proxy daemon configuration.
//!
//! Field order here is the order written to disk. The content hash is
//! taken over a key-sorted rendering, so it does not depend on it.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Outbound tag that drops traffic.
pub const BLOCKED_TAG: &str = "blocked";

/// Outbound tag that sends traffic out directly.
pub const DIRECT_TAG: &str = "direct";

/// Tag of the control-plane inbound, outbound and API section.
pub const API_TAG: &str = "api";

/// Balancer shared by every per-server routing rule.
pub const BALANCER_TAG: &str = "load-balancer";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigDocument {
    pub log: LogSection,
    pub api: ApiSection,
    pub stats: StatsSection,
    pub policy: PolicySection,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    pub routing: RoutingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSection {
    pub access: String,
    pub error: String,
    pub loglevel: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiSection {
    pub tag: String,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSection {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicySection {
    /// Keyed by tier rendered as a string.
    pub levels: BTreeMap<String, LevelPolicy>,
    pub system: SystemPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelPolicy {
    pub handshake: u32,
    pub conn_idle: u32,
    pub uplink_only: u32,
    pub downlink_only: u32,
    pub stats_user_uplink: bool,
    pub stats_user_downlink: bool,
    pub buffer_size: u32,
}

impl LevelPolicy {
    /// Policy for a tenant tier; privileged tiers idle longer with bigger buffers.
    pub fn for_tier(tier: u32) -> Self {
        let standard = Self {
            handshake: 4,
            conn_idle: 300,
            uplink_only: 2,
            downlink_only: 5,
            stats_user_uplink: true,
            stats_user_downlink: true,
            buffer_size: 10240,
        };
        if tier >= crate::model::PRIVILEGED_TIER {
            Self {
                conn_idle: 600,
                buffer_size: 20480,
                ..standard
            }
        } else {
            standard
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPolicy {
    pub stats_inbound_uplink: bool,
    pub stats_inbound_downlink: bool,
    pub stats_outbound_uplink: bool,
    pub stats_outbound_downlink: bool,
}

impl Default for SystemPolicy {
    fn default() -> Self {
        Self {
            stats_inbound_uplink: true,
            stats_inbound_downlink: true,
            stats_outbound_uplink: true,
            stats_outbound_downlink: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbound {
    pub tag: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    pub protocol: String,
    pub settings: InboundSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InboundSettings {
    Api {
        address: String,
    },
    Vmess {
        clients: Vec<VmessClient>,
    },
    Vless {
        clients: Vec<TenantClient>,
        decryption: String,
    },
    Shadowsocks {
        method: String,
        clients: Vec<PasswordClient>,
    },
    Socks {
        auth: String,
        accounts: Vec<Account>,
    },
    Http {
        accounts: Vec<Account>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmessClient {
    pub id: String,
    pub email: String,
    pub level: u32,
    pub alter_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantClient {
    pub id: String,
    pub email: String,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PasswordClient {
    pub password: String,
    pub email: String,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub user: String,
    pub pass: String,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outbound {
    pub tag: String,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<OutboundSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<Value>,
}

impl Outbound {
    pub fn sentinel(tag: &str, protocol: &str) -> Self {
        Self {
            tag: tag.to_string(),
            protocol: protocol.to_string(),
            settings: Some(OutboundSettings::Empty {}),
            stream_settings: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundSettings {
    Empty {},
    Vnext { vnext: Vec<VnextEndpoint> },
    Servers { servers: Vec<UpstreamServer> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VnextEndpoint {
    pub address: String,
    pub port: u16,
    pub users: Vec<VnextUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VnextUser {
    Vmess {
        id: String,
        #[serde(rename = "alterId")]
        alter_id: u32,
        security: String,
    },
    Vless {
        id: String,
        encryption: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UpstreamServer {
    Shadowsocks {
        address: String,
        port: u16,
        method: String,
        password: String,
    },
    Trojan {
        address: String,
        port: u16,
        password: String,
    },
    Socks {
        address: String,
        port: u16,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        users: Vec<SocksUser>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocksUser {
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSection {
    pub domain_strategy: String,
    pub rules: Vec<RoutingRule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub balancers: Vec<Balancer>,
}

/// A `field` rule: one match condition, one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingRule {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub matcher: RuleMatch,
    #[serde(flatten)]
    pub target: RuleTarget,
}

impl RoutingRule {
    pub fn field(matcher: RuleMatch, target: RuleTarget) -> Self {
        Self {
            kind: "field".to_string(),
            matcher,
            target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RuleMatch {
    #[serde(rename = "inboundTag")]
    InboundTag(Vec<String>),
    #[serde(rename = "ip")]
    Ip(Vec<String>),
    #[serde(rename = "domain")]
    Domain(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RuleTarget {
    #[serde(rename = "outboundTag")]
    Outbound(String),
    #[serde(rename = "balancerTag")]
    Balancer(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Balancer {
    pub tag: String,
    pub selector: Vec<String>,
}
