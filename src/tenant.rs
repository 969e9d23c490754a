//! Tenant directory records and the routing context a request or job carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Company id as stored in the master registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One company row from the master registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TenantRecord {
    pub id: String,
    pub slug: String,
    pub domain: Option<String>,
    /// Never serialized: carries database credentials.
    #[serde(skip_serializing, default)]
    pub connection_string: String,
    pub is_active: bool,
    pub invite_code: Option<String>,
    pub max_users: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a freshly provisioned company.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTenant {
    pub slug: String,
    pub domain: Option<String>,
    pub max_users: Option<i32>,
}

/// Who a request or job is acting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantContext {
    /// Tenant id taken from the authenticated session or job payload.
    Tenant(TenantId),
    /// Unauthenticated entry point routed by public domain name.
    Domain(String),
    /// Platform-level actor or public route: uses the fallback client.
    Platform,
}

impl TenantContext {
    pub fn tenant(id: impl Into<TenantId>) -> Self {
        TenantContext::Tenant(id.into())
    }

    /// `Some(id)` becomes a tenant context, `None` the platform context.
    pub fn from_optional(id: Option<String>) -> Self {
        match id {
            Some(id) => TenantContext::Tenant(TenantId(id)),
            None => TenantContext::Platform,
        }
    }
}
