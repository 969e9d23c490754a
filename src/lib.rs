//! Tenant router: resolves requests and jobs to per-company PostgreSQL
//! clients through a bounded pool, and provisions new company databases.

pub mod config;
pub mod connector;
pub mod error;
pub mod extractors;
pub mod migration;
pub mod pool;
pub mod provision;
pub mod resolver;
pub mod routes;
pub mod state;
pub mod store;
pub mod tenant;

#[cfg(test)]
mod testing;

pub use config::{PoolSettings, Profile, Settings};
pub use connector::{Connector, PgConnector};
pub use error::{ConfigError, TenantError};
pub use extractors::tenant::{HostTenant, RequestTenant};
pub use pool::{CloseOutcome, PoolStats, SweepReport, TeardownReport, TenantPool};
pub use provision::{database_name_for_slug, CreateOutcome, DatabaseAdmin, PgDatabaseAdmin, Provisioner};
pub use resolver::{DataClient, TenantResolver};
pub use routes::common_routes;
pub use state::{PgTenantRouter, TenantRouter};
pub use store::{PgTenantDirectory, TenantDirectory};
pub use tenant::{NewTenant, TenantContext, TenantId, TenantRecord};
