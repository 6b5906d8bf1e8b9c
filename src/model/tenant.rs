//! Tenants and their per-protocol credentials.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::server::Protocol;

/// Tier at or above which a tenant is treated as privileged.
pub const PRIVILEGED_TIER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
}

/// An account of the access service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub tier: u32,
    pub status: TenantStatus,
}

impl Tenant {
    pub fn new(email: impl Into<String>, username: impl Into<String>, tier: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            username: username.into(),
            tier,
            status: TenantStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }

    pub fn is_privileged(&self) -> bool {
        self.tier >= PRIVILEGED_TIER
    }
}

/// One protocol credential held by a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantCredential {
    pub tenant_id: Uuid,
    pub protocol: Protocol,
    /// UUID for vmess/vless, password for shadowsocks/socks/http.
    pub secret: String,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

/// A credential joined with the tenant that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantAccess {
    pub tenant: Tenant,
    pub credential: TenantCredential,
}
