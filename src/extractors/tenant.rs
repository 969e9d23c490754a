//! Build a [`TenantContext`] from request headers.
//!
//! The auth layer is expected to have placed the resolved company id in
//! `X-Tenant-ID`; public domain-routed pages use the `Host` header instead.

use crate::tenant::TenantContext;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Header carrying the authenticated tenant id.
pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";

/// `Tenant(id)` when `X-Tenant-ID` is set and non-empty, otherwise `Platform`.
#[derive(Clone, Debug)]
pub struct RequestTenant(pub TenantContext);

#[async_trait]
impl<S> FromRequestParts<S> for RequestTenant
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = header_value(parts, TENANT_ID_HEADER);
        Ok(RequestTenant(TenantContext::from_optional(value)))
    }
}

/// `Domain(host)` from the `Host` header (port stripped), otherwise `Platform`.
#[derive(Clone, Debug)]
pub struct HostTenant(pub TenantContext);

#[async_trait]
impl<S> FromRequestParts<S> for HostTenant
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = header_value(parts, axum::http::header::HOST.as_str())
            .map(|host| host.split(':').next().unwrap_or_default().to_lowercase())
            .filter(|host| !host.is_empty())
            .map(TenantContext::Domain)
            .unwrap_or(TenantContext::Platform);
        Ok(HostTenant(ctx))
    }
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
