//! Tenant database provisioning: create the physical database, apply the
//! baseline schema, hand back its connection string.

use crate::error::TenantError;
use crate::migration::apply_baseline;
use async_trait::async_trait;
use regex::Regex;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection, PgConnection};
use std::str::FromStr;
use std::sync::Arc;

/// PostgreSQL truncates identifiers beyond this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;
const DATABASE_PREFIX: &str = "tenant_";

/// SQLSTATE for `duplicate_database`.
const DUPLICATE_DATABASE: &str = "42P04";
/// Concurrent CREATE DATABASE on the same name can surface as a unique violation.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Administrative operations against the database server.
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// Connection string whose host, port and credentials tenant databases inherit.
    fn master_url(&self) -> &str;

    async fn create_database(&self, name: &str) -> Result<CreateOutcome, TenantError>;

    async fn apply_baseline_schema(&self, connection_string: &str) -> Result<(), TenantError>;
}

/// Runs CREATE DATABASE with the admin credentials, then the baseline
/// migrations over a direct connection to the new database.
#[derive(Clone, Debug)]
pub struct PgDatabaseAdmin {
    admin_url: String,
    master_url: String,
}

impl PgDatabaseAdmin {
    pub fn new(admin_url: impl Into<String>, master_url: impl Into<String>) -> Self {
        PgDatabaseAdmin {
            admin_url: admin_url.into(),
            master_url: master_url.into(),
        }
    }
}

#[async_trait]
impl DatabaseAdmin for PgDatabaseAdmin {
    fn master_url(&self) -> &str {
        &self.master_url
    }

    async fn create_database(&self, name: &str) -> Result<CreateOutcome, TenantError> {
        let opts = PgConnectOptions::from_str(&self.admin_url)
            .map_err(|e| TenantError::provisioning(format!("invalid admin database url: {}", e)))?;
        let mut conn: PgConnection = opts.connect().await.map_err(TenantError::provisioning)?;
        let result = sqlx::query(&format!("CREATE DATABASE {}", crate::store::quote_ident(name)))
            .execute(&mut conn)
            .await;
        if let Err(e) = conn.close().await {
            tracing::warn!(error = %e, "failed to close admin connection");
        }
        match result {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(e) if is_duplicate_database(&e) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(TenantError::provisioning(e)),
        }
    }

    async fn apply_baseline_schema(&self, connection_string: &str) -> Result<(), TenantError> {
        let mut conn = PgConnection::connect(connection_string)
            .await
            .map_err(TenantError::provisioning)?;
        let applied = apply_baseline(&mut conn).await.map_err(TenantError::provisioning);
        if let Err(e) = conn.close().await {
            tracing::warn!(error = %e, "failed to close tenant migration connection");
        }
        let applied = applied?;
        tracing::debug!(steps = applied, "baseline schema applied");
        Ok(())
    }
}

fn is_duplicate_database(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == DUPLICATE_DATABASE || code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

/// Creates tenant databases during company onboarding.
pub struct Provisioner<A: DatabaseAdmin> {
    admin: Arc<A>,
}

impl<A: DatabaseAdmin> Provisioner<A> {
    pub fn new(admin: Arc<A>) -> Self {
        Provisioner { admin }
    }

    /// Connection string the database for `slug` will have, without touching
    /// the server.
    pub fn connection_string_for(&self, slug: &str) -> Result<String, TenantError> {
        tenant_connection_string(self.admin.master_url(), &database_name_for_slug(slug)?)
    }

    /// Create (or reuse) the database for `slug` and apply the baseline schema.
    ///
    /// An existing database is not an error; the schema step still runs. A
    /// schema failure leaves a created but unusable database behind and must
    /// be resolved by an operator, so it is never retried here.
    pub async fn provision_database(&self, slug: &str) -> Result<String, TenantError> {
        let database = database_name_for_slug(slug)?;
        let connection_string = tenant_connection_string(self.admin.master_url(), &database)?;

        match self.admin.create_database(&database).await {
            Ok(CreateOutcome::Created) => tracing::info!(%database, slug, "created tenant database"),
            Ok(CreateOutcome::AlreadyExists) => {
                tracing::warn!(%database, slug, "tenant database already exists, reusing it")
            }
            Err(e) => {
                tracing::error!(%database, slug, error = %e, "tenant database creation failed");
                return Err(TenantError::ProvisioningFailure(format!(
                    "create database {}: {}",
                    database, e
                )));
            }
        }

        if let Err(e) = self.admin.apply_baseline_schema(&connection_string).await {
            tracing::error!(
                %database,
                slug,
                error = %e,
                "baseline schema failed; tenant database needs operator attention"
            );
            return Err(TenantError::ProvisioningFailure(format!(
                "database {} was created but its baseline schema failed: {}",
                database, e
            )));
        }

        Ok(connection_string)
    }
}

/// Deterministic database name for a company slug: lowercase, anything
/// outside `[a-z0-9_]` collapsed to `_`, prefixed with `tenant_`.
pub fn database_name_for_slug(slug: &str) -> Result<String, TenantError> {
    let re = Regex::new(r"[^a-z0-9_]+").map_err(TenantError::provisioning)?;
    let lowered = slug.trim().to_lowercase();
    let cleaned = re.replace_all(&lowered, "_");
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        return Err(TenantError::ProvisioningFailure(format!(
            "slug {:?} has no usable characters",
            slug
        )));
    }
    let mut name = format!("{}{}", DATABASE_PREFIX, cleaned);
    name.truncate(MAX_IDENTIFIER_LEN);
    Ok(name)
}

/// `master_url` with its database path replaced by `database`.
pub fn tenant_connection_string(master_url: &str, database: &str) -> Result<String, TenantError> {
    let scheme_end = master_url
        .find("://")
        .map(|i| i + 3)
        .ok_or_else(|| TenantError::ProvisioningFailure("master database url has no scheme".into()))?;
    let rest = master_url.get(scheme_end..).unwrap_or("");
    let (before_query, query) = match rest.split_once('?') {
        Some((head, q)) => (head, Some(q)),
        None => (rest, None),
    };
    let authority = before_query
        .split_once('/')
        .map(|(a, _)| a)
        .unwrap_or(before_query);
    if authority.is_empty() {
        return Err(TenantError::ProvisioningFailure("master database url has no host".into()));
    }
    let scheme = master_url.get(..scheme_end).unwrap_or("postgres://");
    Ok(match query {
        Some(q) => format!("{}{}/{}?{}", scheme, authority, database, q),
        None => format!("{}{}/{}", scheme, authority, database),
    })
}
