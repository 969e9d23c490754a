//! Composition root: one router per process, shared by every request and job.

use crate::config::{PoolSettings, Settings};
use crate::connector::{Connector, PgConnector};
use crate::error::TenantError;
use crate::pool::{CloseOutcome, PoolStats, TeardownReport, TenantPool};
use crate::provision::{DatabaseAdmin, PgDatabaseAdmin, Provisioner};
use crate::resolver::{DataClient, TenantResolver};
use crate::store::{PgTenantDirectory, TenantDirectory};
use crate::tenant::{NewTenant, TenantContext, TenantRecord};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

/// Entry point for the rest of the platform. Business modules only call
/// [`resolve`](Self::resolve); tenant management calls the lifecycle hooks.
pub struct TenantRouter<C: Connector, D: TenantDirectory, A: DatabaseAdmin> {
    resolver: TenantResolver<C, D>,
    provisioner: Provisioner<A>,
    directory: Arc<D>,
}

pub type PgTenantRouter = TenantRouter<PgConnector, PgTenantDirectory, PgDatabaseAdmin>;

impl<C, D, A> TenantRouter<C, D, A>
where
    C: Connector,
    D: TenantDirectory + 'static,
    A: DatabaseAdmin,
{
    pub fn new(
        connector: Arc<C>,
        directory: Arc<D>,
        admin: Arc<A>,
        pool_settings: PoolSettings,
        fallback_url: impl Into<String>,
    ) -> Self {
        let pool = TenantPool::new(Arc::clone(&connector), Arc::clone(&directory), pool_settings);
        TenantRouter {
            resolver: TenantResolver::new(pool, connector, fallback_url),
            provisioner: Provisioner::new(admin),
            directory,
        }
    }

    pub async fn resolve(&self, ctx: &TenantContext) -> Result<DataClient<C::Client>, TenantError> {
        self.resolver.resolve(ctx).await
    }

    /// Drop the tenant's pooled client so no new work reaches its database.
    pub async fn on_tenant_deactivated(&self, tenant_id: &str) -> CloseOutcome {
        self.resolver.pool().disconnect_tenant(tenant_id).await
    }

    /// Mark the tenant inactive in the registry and drop its pooled client.
    pub async fn deactivate_tenant(&self, tenant_id: &str) -> Result<CloseOutcome, TenantError> {
        if !self.directory.set_active(tenant_id, false).await? {
            return Err(TenantError::TenantNotFound(tenant_id.to_string()));
        }
        Ok(self.on_tenant_deactivated(tenant_id).await)
    }

    /// Create the tenant database for `slug`; returns its connection string.
    pub async fn on_tenant_provisioned(&self, slug: &str) -> Result<String, TenantError> {
        self.provisioner.provision_database(slug).await
    }

    /// Provision a database for a new company and register it in the directory.
    ///
    /// Refuses a slug whose database already belongs to a different company,
    /// e.g. `acme-corp` after `Acme Corp`.
    pub async fn onboard_tenant(&self, tenant: NewTenant) -> Result<TenantRecord, TenantError> {
        let planned = self.provisioner.connection_string_for(&tenant.slug)?;
        if let Some(owner) = self.directory.find_by_connection_string(&planned).await? {
            if owner.slug != tenant.slug {
                tracing::warn!(
                    slug = %tenant.slug,
                    owner = %owner.id,
                    "tenant database already belongs to another company"
                );
                return Err(TenantError::ProvisioningFailure(format!(
                    "slug {:?} maps to a database already used by company {}",
                    tenant.slug, owner.id
                )));
            }
        }
        let connection_string = self.on_tenant_provisioned(&tenant.slug).await?;
        self.directory.register(&tenant, &connection_string).await
    }

    pub fn pool(&self) -> &Arc<TenantPool<C, D>> {
        self.resolver.pool()
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    pub async fn stats(&self) -> PoolStats {
        self.pool().stats().await
    }

    /// Close every tenant client and the fallback client.
    pub async fn shutdown(&self) -> TeardownReport {
        let mut report = self.pool().shutdown().await;
        match self.resolver.close_fallback().await {
            CloseOutcome::Closed => report.closed += 1,
            CloseOutcome::Failed(err) => report.failed.push(("fallback".into(), err)),
            CloseOutcome::Absent => {}
        }
        report
    }
}

impl PgTenantRouter {
    /// Wire the production stack from settings and make sure the registry
    /// tables exist.
    pub async fn connect(settings: &Settings) -> Result<Self, TenantError> {
        let master = PgPoolOptions::new()
            .max_connections(5)
            .connect(&settings.master_database_url)
            .await
            .map_err(TenantError::connection)?;
        let directory = Arc::new(PgTenantDirectory::new(master, settings.registry_schema.clone()));
        directory.ensure_registry_tables().await?;

        let connector = Arc::new(PgConnector::new(settings.pool.max_connections_per_tenant));
        let admin = Arc::new(PgDatabaseAdmin::new(
            settings.admin_database_url.clone(),
            settings.master_database_url.clone(),
        ));
        tracing::info!(
            profile = ?settings.profile,
            max_size = settings.pool.max_size,
            sweep = settings.pool.sweep_interval.is_some(),
            "tenant router ready"
        );
        Ok(TenantRouter::new(
            connector,
            directory,
            admin,
            settings.pool.clone(),
            settings.fallback_database_url.clone(),
        ))
    }
}
