//! Opening and closing physical tenant clients.
//!
//! The pool and resolver are generic over [`Connector`] so they can be driven
//! by an in-memory double in tests; production uses [`PgConnector`].

use crate::error::TenantError;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The data client handed to business code.
    type Client: Send + Sync + 'static;

    /// Open a live client for `connection_string`. Failures are never cached.
    async fn connect(&self, connection_string: &str) -> Result<Self::Client, TenantError>;

    /// Close a client. Errors are reported, not raised, by every caller.
    async fn close(&self, client: &Self::Client) -> Result<(), TenantError>;
}

/// Opens one sqlx `PgPool` per tenant database.
#[derive(Clone, Debug)]
pub struct PgConnector {
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PgConnector {
    pub fn new(max_connections: u32) -> Self {
        PgConnector {
            max_connections: max_connections.max(1),
            acquire_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Client = PgPool;

    async fn connect(&self, connection_string: &str) -> Result<PgPool, TenantError> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(connection_string)
            .await
            .map_err(TenantError::connection)
    }

    /// Waits for checked-out connections to be returned, then closes them.
    async fn close(&self, client: &PgPool) -> Result<(), TenantError> {
        client.close().await;
        Ok(())
    }
}
