//! Master registry: company directory DDL and lookups. All registry tables live
//! in one schema (default `registry`, from `REGISTRY_SCHEMA`).

use crate::error::TenantError;
use crate::tenant::{NewTenant, TenantRecord};
use async_trait::async_trait;
use sqlx::PgPool;

const COMPANIES_TABLE: &str = "companies";
const COMPANY_COLUMNS: &str =
    "id, slug, domain, connection_string, is_active, invite_code, max_users, created_at";

/// Read access to the tenant directory.
///
/// The pool only ever looks tenants up; registration is used by onboarding.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find_by_id(&self, tenant_id: &str) -> Result<Option<TenantRecord>, TenantError>;

    /// Only active tenants match a domain.
    async fn find_by_domain(&self, domain: &str) -> Result<Option<TenantRecord>, TenantError>;

    /// Company whose tenant database is `connection_string`, active or not.
    async fn find_by_connection_string(&self, connection_string: &str) -> Result<Option<TenantRecord>, TenantError>;

    /// Insert a company row pointing at an already-provisioned database.
    async fn register(&self, tenant: &NewTenant, connection_string: &str) -> Result<TenantRecord, TenantError>;

    /// Flip the active flag. `false` when no such tenant exists.
    async fn set_active(&self, tenant_id: &str, active: bool) -> Result<bool, TenantError>;

    /// Readiness check.
    async fn ping(&self) -> Result<(), TenantError> {
        Ok(())
    }
}

/// Directory backed by the control-plane PostgreSQL database.
#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
    schema: String,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        PgTenantDirectory {
            pool,
            schema: schema.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Schema-qualified table name (e.g. `"registry"."companies"`).
    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }

    /// Create the registry schema and companies table if missing.
    pub async fn ensure_registry_tables(&self) -> Result<(), TenantError> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.schema)))
            .execute(&self.pool)
            .await?;

        let q_table = self.qualified(COMPANIES_TABLE);
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                domain TEXT UNIQUE,
                connection_string TEXT NOT NULL UNIQUE,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                invite_code TEXT UNIQUE,
                max_users INTEGER,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            q_table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn find_by_id(&self, tenant_id: &str) -> Result<Option<TenantRecord>, TenantError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            COMPANY_COLUMNS,
            self.qualified(COMPANIES_TABLE)
        );
        let record = sqlx::query_as::<_, TenantRecord>(&sql)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Option<TenantRecord>, TenantError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE lower(domain) = lower($1) AND is_active",
            COMPANY_COLUMNS,
            self.qualified(COMPANIES_TABLE)
        );
        let record = sqlx::query_as::<_, TenantRecord>(&sql)
            .bind(domain.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_by_connection_string(&self, connection_string: &str) -> Result<Option<TenantRecord>, TenantError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE connection_string = $1",
            COMPANY_COLUMNS,
            self.qualified(COMPANIES_TABLE)
        );
        let record = sqlx::query_as::<_, TenantRecord>(&sql)
            .bind(connection_string)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn register(&self, tenant: &NewTenant, connection_string: &str) -> Result<TenantRecord, TenantError> {
        let sql = format!(
            "INSERT INTO {} (id, slug, domain, connection_string, is_active, invite_code, max_users) \
             VALUES ($1, $2, $3, $4, TRUE, $5, $6) RETURNING {}",
            self.qualified(COMPANIES_TABLE),
            COMPANY_COLUMNS
        );
        let record = sqlx::query_as::<_, TenantRecord>(&sql)
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&tenant.slug)
            .bind(tenant.domain.as_deref())
            .bind(connection_string)
            .bind(new_invite_code())
            .bind(tenant.max_users)
            .fetch_one(&self.pool)
            .await?;
        tracing::info!(tenant_id = %record.id, slug = %record.slug, "registered company");
        Ok(record)
    }

    async fn set_active(&self, tenant_id: &str, active: bool) -> Result<bool, TenantError> {
        let sql = format!("UPDATE {} SET is_active = $2 WHERE id = $1", self.qualified(COMPANIES_TABLE));
        let result = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), TenantError> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }
}

/// Short, url-safe invite code.
fn new_invite_code() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..10].to_uppercase()
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_doubles_embedded_quotes() {
        assert_eq!(quote_ident("registry"), "\"registry\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn invite_codes_are_short_and_distinct() {
        let a = new_invite_code();
        let b = new_invite_code();
        assert_eq!(a.len(), 10);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
