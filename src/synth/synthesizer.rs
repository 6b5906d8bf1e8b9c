//! Builds the daemon configuration from servers and tenant credentials.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::SynthesisConfig;
use crate::model::{Protocol, Server, TenantAccess};
use crate::synth::document::*;

/// Protocols that get a tenant inbound, in document order.
pub const INBOUND_ORDER: [Protocol; 5] = [
    Protocol::Vmess,
    Protocol::Vless,
    Protocol::Shadowsocks,
    Protocol::Socks,
    Protocol::Http,
];

const API_SERVICES: [&str; 3] = ["HandlerService", "LoggerService", "StatsService"];

const DEFAULT_SS_CIPHER: &str = "chacha20-ietf-poly1305";

#[derive(Debug, Clone)]
pub struct ConfigSynthesizer {
    config: SynthesisConfig,
}

impl ConfigSynthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    /// Build the full document. Output depends only on the inputs and their order.
    pub fn synthesize(&self, servers: &[Server], access: &[TenantAccess]) -> ConfigDocument {
        let access: Vec<&TenantAccess> = access.iter().filter(|a| a.tenant.is_active()).collect();
        let active: Vec<&Server> = servers.iter().filter(|s| s.is_active()).collect();

        ConfigDocument {
            log: LogSection {
                access: self.config.access_log.clone(),
                error: self.config.error_log.clone(),
                loglevel: self.config.log_level.clone(),
            },
            api: ApiSection {
                tag: API_TAG.to_string(),
                services: API_SERVICES.iter().map(|s| s.to_string()).collect(),
            },
            stats: StatsSection::default(),
            policy: PolicySection {
                levels: tier_policies(&access),
                system: SystemPolicy::default(),
            },
            inbounds: self.inbounds(&access),
            outbounds: outbounds(&active),
            routing: routing(&active),
        }
    }

    fn inbounds(&self, access: &[&TenantAccess]) -> Vec<Inbound> {
        let mut inbounds = vec![Inbound {
            tag: API_TAG.to_string(),
            port: self.config.api_port,
            listen: Some(self.config.api_listen.clone()),
            protocol: "dokodemo-door".to_string(),
            settings: InboundSettings::Api {
                address: self.config.api_listen.clone(),
            },
            stream_settings: None,
        }];

        for protocol in &INBOUND_ORDER {
            let holders: Vec<&TenantAccess> = access
                .iter()
                .copied()
                .filter(|a| &a.credential.protocol == protocol)
                .collect();
            if holders.is_empty() {
                continue;
            }
            inbounds.push(self.protocol_inbound(protocol, &holders));
        }

        inbounds
    }

    fn protocol_inbound(&self, protocol: &Protocol, holders: &[&TenantAccess]) -> Inbound {
        let cfg = &self.config;
        let accounts = || {
            holders
                .iter()
                .map(|a| Account {
                    user: a.tenant.username.clone(),
                    pass: a.credential.secret.clone(),
                    level: a.tenant.tier,
                })
                .collect::<Vec<_>>()
        };

        let (port, settings, stream_settings) = match protocol {
            Protocol::Vmess => (
                cfg.vmess_port,
                InboundSettings::Vmess {
                    clients: holders
                        .iter()
                        .map(|a| VmessClient {
                            id: a.credential.secret.clone(),
                            email: a.tenant.email.clone(),
                            level: a.tenant.tier,
                            alter_id: 0,
                        })
                        .collect(),
                },
                Some(serde_json::json!({
                    "network": "ws",
                    "wsSettings": { "path": cfg.vmess_ws_path },
                    "security": "tls",
                    "tlsSettings": {
                        "certificates": [{
                            "certificateFile": cfg.tls_cert_file,
                            "keyFile": cfg.tls_key_file,
                        }]
                    }
                })),
            ),
            Protocol::Vless => (
                cfg.vless_port,
                InboundSettings::Vless {
                    clients: holders
                        .iter()
                        .map(|a| TenantClient {
                            id: a.credential.secret.clone(),
                            email: a.tenant.email.clone(),
                            level: a.tenant.tier,
                        })
                        .collect(),
                    decryption: "none".to_string(),
                },
                Some(serde_json::json!({
                    "network": "grpc",
                    "security": "reality",
                    "realitySettings": {
                        "show": false,
                        "dest": cfg.reality_dest,
                        "xver": 0,
                        "serverNames": cfg.reality_server_names,
                        "privateKey": cfg.reality_private_key,
                        "shortIds": [""],
                    }
                })),
            ),
            Protocol::Shadowsocks => (
                cfg.shadowsocks_port,
                InboundSettings::Shadowsocks {
                    method: cfg.shadowsocks_method.clone(),
                    clients: holders
                        .iter()
                        .map(|a| PasswordClient {
                            password: a.credential.secret.clone(),
                            email: a.tenant.email.clone(),
                            level: a.tenant.tier,
                        })
                        .collect(),
                },
                None,
            ),
            Protocol::Socks => (
                cfg.socks_port,
                InboundSettings::Socks {
                    auth: "password".to_string(),
                    accounts: accounts(),
                },
                None,
            ),
            _ => (cfg.http_port, InboundSettings::Http { accounts: accounts() }, None),
        };

        Inbound {
            tag: protocol.inbound_tag(),
            port,
            listen: None,
            protocol: protocol.to_string(),
            settings,
            stream_settings,
        }
    }
}

/// Base level "0" plus one entry per tier present.
fn tier_policies(access: &[&TenantAccess]) -> BTreeMap<String, LevelPolicy> {
    let tiers: BTreeSet<u32> = std::iter::once(0)
        .chain(access.iter().map(|a| a.tenant.tier))
        .collect();

    tiers
        .into_iter()
        .map(|tier| (tier.to_string(), LevelPolicy::for_tier(tier)))
        .collect()
}

fn outbounds(active: &[&Server]) -> Vec<Outbound> {
    let mut outbounds = vec![
        Outbound::sentinel(DIRECT_TAG, "freedom"),
        Outbound::sentinel(BLOCKED_TAG, "blackhole"),
    ];
    outbounds.extend(active.iter().map(|s| server_outbound(s)));
    outbounds
}

fn server_outbound(server: &Server) -> Outbound {
    let upstream = |key: &str| server.upstream_str(key).unwrap_or_default().to_string();
    let address = server.address.clone();
    let port = server.port;

    let settings = match server.protocol {
        Protocol::Vmess => Some(OutboundSettings::Vnext {
            vnext: vec![VnextEndpoint {
                address,
                port,
                users: vec![VnextUser::Vmess {
                    id: upstream("id"),
                    alter_id: 0,
                    security: "auto".to_string(),
                }],
            }],
        }),
        Protocol::Vless => Some(OutboundSettings::Vnext {
            vnext: vec![VnextEndpoint {
                address,
                port,
                users: vec![VnextUser::Vless {
                    id: upstream("id"),
                    encryption: "none".to_string(),
                }],
            }],
        }),
        Protocol::Shadowsocks => Some(OutboundSettings::Servers {
            servers: vec![UpstreamServer::Shadowsocks {
                address,
                port,
                method: server
                    .upstream_str("cipher")
                    .unwrap_or(DEFAULT_SS_CIPHER)
                    .to_string(),
                password: upstream("password"),
            }],
        }),
        Protocol::Trojan => Some(OutboundSettings::Servers {
            servers: vec![UpstreamServer::Trojan {
                address,
                port,
                password: upstream("password"),
            }],
        }),
        Protocol::Socks => {
            let users = match (server.upstream_str("user"), server.upstream_str("pass")) {
                (Some(user), Some(pass)) => vec![SocksUser {
                    user: user.to_string(),
                    pass: pass.to_string(),
                }],
                _ => Vec::new(),
            };
            Some(OutboundSettings::Servers {
                servers: vec![UpstreamServer::Socks { address, port, users }],
            })
        }
        Protocol::Http | Protocol::Other(_) => None,
    };

    Outbound {
        tag: server.outbound_tag(),
        protocol: server.protocol.to_string(),
        settings,
        stream_settings: server.upstream.get("streamSettings").cloned(),
    }
}

fn routing(active: &[&Server]) -> RoutingSection {
    let mut rules = vec![
        RoutingRule::field(
            RuleMatch::InboundTag(vec![API_TAG.to_string()]),
            RuleTarget::Outbound(API_TAG.to_string()),
        ),
        RoutingRule::field(
            RuleMatch::Ip(vec!["geoip:private".to_string()]),
            RuleTarget::Outbound(BLOCKED_TAG.to_string()),
        ),
        RoutingRule::field(
            RuleMatch::Domain(vec!["geosite:category-ads-all".to_string()]),
            RuleTarget::Outbound(BLOCKED_TAG.to_string()),
        ),
    ];

    rules.extend(active.iter().map(|s| {
        RoutingRule::field(
            RuleMatch::InboundTag(vec![s.protocol.inbound_tag()]),
            RuleTarget::Balancer(BALANCER_TAG.to_string()),
        )
    }));

    let balancers = if active.is_empty() {
        Vec::new()
    } else {
        vec![Balancer {
            tag: BALANCER_TAG.to_string(),
            selector: vec!["server-".to_string()],
        }]
    };

    RoutingSection {
        domain_strategy: "IPIfNonMatch".to_string(),
        rules,
        balancers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ServerStatus, Tenant, TenantCredential, TenantStatus};
    use serde_json::{json, Value};

    fn access(tier: u32, protocol: Protocol, secret: &str) -> TenantAccess {
        let tenant = Tenant::new(format!("{}@example.com", secret), secret, tier);
        TenantAccess {
            credential: TenantCredential {
                tenant_id: tenant.id,
                protocol,
                secret: secret.to_string(),
                settings: Default::default(),
            },
            tenant,
        }
    }

    fn render(servers: &[Server], access: &[TenantAccess]) -> Value {
        let doc = ConfigSynthesizer::new(SynthesisConfig::default()).synthesize(servers, access);
        serde_json::to_value(doc).unwrap()
    }

    #[test]
    fn test_empty_state_has_sentinels_and_base_policy() {
        let doc = render(&[], &[]);

        assert_eq!(doc["inbounds"].as_array().unwrap().len(), 1);
        assert_eq!(doc["inbounds"][0]["protocol"], "dokodemo-door");
        assert_eq!(doc["outbounds"], json!([
            {"tag": "direct", "protocol": "freedom", "settings": {}},
            {"tag": "blocked", "protocol": "blackhole", "settings": {}}
        ]));
        assert_eq!(doc["routing"]["rules"].as_array().unwrap().len(), 3);
        assert!(doc["routing"].get("balancers").is_none());
        assert_eq!(doc["policy"]["levels"]["0"]["connIdle"], 300);
        assert_eq!(doc["stats"], json!({}));
    }

    #[test]
    fn test_inbound_order_is_fixed() {
        let tenants = vec![
            access(0, Protocol::Http, "h"),
            access(0, Protocol::Socks, "s"),
            access(0, Protocol::Vless, "l"),
            access(0, Protocol::Shadowsocks, "ss"),
            access(0, Protocol::Vmess, "m"),
            access(0, Protocol::Trojan, "t"),
        ];
        let doc = render(&[], &tenants);

        let tags: Vec<&str> = doc["inbounds"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["tag"].as_str().unwrap())
            .collect();
        assert_eq!(tags, vec!["api", "vmess-in", "vless-in", "shadowsocks-in", "socks-in", "http-in"]);
    }

    #[test]
    fn test_clients_follow_input_order_and_skip_suspended() {
        let mut suspended = access(0, Protocol::Vmess, "gone");
        suspended.tenant.status = TenantStatus::Suspended;
        let tenants = vec![
            access(1, Protocol::Vmess, "second"),
            suspended,
            access(0, Protocol::Vmess, "first"),
        ];
        let doc = render(&[], &tenants);

        let clients = &doc["inbounds"][1]["settings"]["clients"];
        assert_eq!(clients[0]["id"], "second");
        assert_eq!(clients[0]["level"], 1);
        assert_eq!(clients[0]["alterId"], 0);
        assert_eq!(clients[1]["id"], "first");
        assert_eq!(clients.as_array().unwrap().len(), 2);
        assert_eq!(doc["inbounds"][1]["streamSettings"]["wsSettings"]["path"], "/ray");
    }

    #[test]
    fn test_socks_and_http_accounts() {
        let doc = render(&[], &[access(0, Protocol::Socks, "pw")]);
        let socks = &doc["inbounds"][1];
        assert_eq!(socks["settings"]["auth"], "password");
        assert_eq!(socks["settings"]["accounts"][0], json!({"user": "pw", "pass": "pw", "level": 0}));
        assert_eq!(socks["port"], 1080);
    }

    #[test]
    fn test_tier_policies() {
        let doc = render(&[], &[access(3, Protocol::Vmess, "a"), access(1, Protocol::Vless, "b")]);
        let levels = doc["policy"]["levels"].as_object().unwrap();

        assert_eq!(levels.keys().collect::<Vec<_>>(), vec!["0", "1", "3"]);
        assert_eq!(levels["1"]["connIdle"], 300);
        assert_eq!(levels["1"]["bufferSize"], 10240);
        assert_eq!(levels["3"]["connIdle"], 600);
        assert_eq!(levels["3"]["bufferSize"], 20480);
        assert_eq!(levels["3"]["handshake"], 4);
    }

    #[test]
    fn test_server_outbounds() {
        let mut vmess = Server::new("m", "1.1.1.1", 443, Protocol::Vmess);
        vmess.upstream.insert("id".into(), json!("uuid-1"));
        vmess.upstream.insert("streamSettings".into(), json!({"network": "ws"}));

        let mut ss = Server::new("s", "2.2.2.2", 8388, Protocol::Shadowsocks);
        ss.upstream.insert("password".into(), json!("secret"));

        let mut socks = Server::new("k", "3.3.3.3", 1080, Protocol::Socks);
        socks.upstream.insert("user".into(), json!("u"));
        socks.upstream.insert("pass".into(), json!("p"));

        let mut parked = Server::new("p", "4.4.4.4", 443, Protocol::Vless);
        parked.status = ServerStatus::Maintenance;

        let odd = Server::new("w", "5.5.5.5", 51820, Protocol::Other("wireguard".into()));

        let doc = render(&[vmess.clone(), ss.clone(), socks, parked, odd.clone()], &[]);
        let outbounds = doc["outbounds"].as_array().unwrap();
        assert_eq!(outbounds.len(), 2 + 4);

        assert_eq!(outbounds[2]["tag"], format!("server-{}", vmess.id));
        assert_eq!(outbounds[2]["settings"]["vnext"][0]["users"][0], json!({
            "id": "uuid-1", "alterId": 0, "security": "auto"
        }));
        assert_eq!(outbounds[2]["streamSettings"], json!({"network": "ws"}));

        assert_eq!(outbounds[3]["settings"]["servers"][0], json!({
            "address": "2.2.2.2", "port": 8388,
            "method": "chacha20-ietf-poly1305", "password": "secret"
        }));
        assert_eq!(outbounds[4]["settings"]["servers"][0]["users"], json!([{"user": "u", "pass": "p"}]));
        assert_eq!(outbounds[5], json!({"tag": format!("server-{}", odd.id), "protocol": "wireguard"}));
    }

    #[test]
    fn test_rules_point_at_balancer() {
        let a = Server::new("a", "1.1.1.1", 443, Protocol::Vmess);
        let b = Server::new("b", "2.2.2.2", 443, Protocol::Trojan);
        let doc = render(&[a, b], &[]);

        let rules = doc["routing"]["rules"].as_array().unwrap();
        assert_eq!(rules[0], json!({"type": "field", "inboundTag": ["api"], "outboundTag": "api"}));
        assert_eq!(rules[1], json!({"type": "field", "ip": ["geoip:private"], "outboundTag": "blocked"}));
        assert_eq!(rules[3], json!({"type": "field", "inboundTag": ["vmess-in"], "balancerTag": "load-balancer"}));
        assert_eq!(rules[4]["inboundTag"], json!(["trojan-in"]));
        assert_eq!(doc["routing"]["balancers"], json!([{"tag": "load-balancer", "selector": ["server-"]}]));
    }
}
