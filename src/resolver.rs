//! Resolve a request or job context to the data client it must use.

use crate::connector::Connector;
use crate::error::TenantError;
use crate::pool::{CloseOutcome, TenantPool};
use crate::store::TenantDirectory;
use crate::tenant::{TenantContext, TenantId};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Client handed to business code, tagged with where it came from.
#[derive(Debug)]
pub enum DataClient<T> {
    Tenant { tenant_id: TenantId, client: Arc<T> },
    Fallback { client: Arc<T> },
}

impl<T> DataClient<T> {
    pub fn client(&self) -> &Arc<T> {
        match self {
            DataClient::Tenant { client, .. } | DataClient::Fallback { client } => client,
        }
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        match self {
            DataClient::Tenant { tenant_id, .. } => Some(tenant_id),
            DataClient::Fallback { .. } => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, DataClient::Fallback { .. })
    }
}

impl<T> Deref for DataClient<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.client()
    }
}

/// Routes tenant contexts through the pool and tenant-less ones to a single
/// shared fallback client.
pub struct TenantResolver<C: Connector, D: TenantDirectory> {
    pool: Arc<TenantPool<C, D>>,
    connector: Arc<C>,
    fallback_url: String,
    /// Concurrent first callers wait on the one in-flight connect; a failed
    /// connect leaves the cell empty for the next caller to retry.
    fallback: OnceCell<Arc<C::Client>>,
    fallback_closed: AtomicBool,
}

impl<C, D> TenantResolver<C, D>
where
    C: Connector,
    D: TenantDirectory + 'static,
{
    pub fn new(pool: Arc<TenantPool<C, D>>, connector: Arc<C>, fallback_url: impl Into<String>) -> Self {
        TenantResolver {
            pool,
            connector,
            fallback_url: fallback_url.into(),
            fallback: OnceCell::new(),
            fallback_closed: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &Arc<TenantPool<C, D>> {
        &self.pool
    }

    pub async fn resolve(&self, ctx: &TenantContext) -> Result<DataClient<C::Client>, TenantError> {
        match ctx {
            TenantContext::Tenant(tenant_id) => {
                let client = self.pool.get_client(tenant_id.as_str()).await?;
                Ok(DataClient::Tenant {
                    tenant_id: tenant_id.clone(),
                    client,
                })
            }
            TenantContext::Domain(domain) => {
                let tenant_id = self
                    .pool
                    .tenant_for_domain(domain)
                    .await?
                    .ok_or_else(|| TenantError::TenantNotFound(domain.clone()))?;
                let client = self.pool.get_client(&tenant_id).await?;
                Ok(DataClient::Tenant {
                    tenant_id: TenantId(tenant_id),
                    client,
                })
            }
            TenantContext::Platform => Ok(DataClient::Fallback {
                client: self.fallback_client().await?,
            }),
        }
    }

    async fn fallback_client(&self) -> Result<Arc<C::Client>, TenantError> {
        if self.fallback_closed.load(Ordering::SeqCst) {
            return Err(TenantError::ConnectionFailure("fallback client is closed".into()));
        }
        let client = self
            .fallback
            .get_or_try_init(|| async {
                tracing::info!("opening fallback client");
                self.connector.connect(&self.fallback_url).await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(client))
    }

    /// Close the fallback client if it was ever opened. Later platform
    /// resolutions fail instead of handing out the closed client.
    pub async fn close_fallback(&self) -> CloseOutcome {
        self.fallback_closed.store(true, Ordering::SeqCst);
        match self.fallback.get() {
            Some(client) => match self.connector.close(client).await {
                Ok(()) => CloseOutcome::Closed,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to close fallback client");
                    CloseOutcome::Failed(e.to_string())
                }
            },
            None => CloseOutcome::Absent,
        }
    }
}
