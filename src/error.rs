//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing setting: {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum TenantError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("tenant not found: {0}")]
    TenantNotFound(String),
    #[error("tenant inactive: {0}")]
    TenantInactive(String),
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    #[error("provisioning failed: {0}")]
    ProvisioningFailure(String),
    #[error("registry: {0}")]
    Registry(#[from] sqlx::Error),
}

impl TenantError {
    /// Wraps a driver error raised while opening a physical connection.
    pub fn connection(err: impl std::fmt::Display) -> Self {
        TenantError::ConnectionFailure(err.to_string())
    }

    pub fn provisioning(err: impl std::fmt::Display) -> Self {
        TenantError::ProvisioningFailure(err.to_string())
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl TenantError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            TenantError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            TenantError::TenantNotFound(_) => (StatusCode::NOT_FOUND, "tenant_not_found"),
            TenantError::TenantInactive(_) => (StatusCode::FORBIDDEN, "tenant_inactive"),
            TenantError::ConnectionFailure(_) => (StatusCode::SERVICE_UNAVAILABLE, "connection_failure"),
            TenantError::ProvisioningFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "provisioning_failure"),
            TenantError::Registry(_) => (StatusCode::INTERNAL_SERVER_ERROR, "registry_error"),
        }
    }
}

impl IntoResponse for TenantError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
