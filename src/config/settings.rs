//! Deployment profile and router settings, read from the environment.

use crate::error::ConfigError;
use std::time::Duration;

/// Where the process runs. Decides pool bounds and whether the idle sweep runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Profile {
    /// Long-running server: larger pool, background idle sweep.
    Server,
    /// Short-lived invocations without persistent timers: small pool, no sweep.
    Serverless,
}

impl std::str::FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "server" => Ok(Profile::Server),
            "serverless" | "lambda" | "edge" => Ok(Profile::Serverless),
            _ => Err(ConfigError::Invalid {
                key: "DEPLOYMENT_PROFILE",
                value: s.to_string(),
            }),
        }
    }
}

/// Bounds of the tenant connection pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum number of tenants with a live client at once.
    pub max_size: usize,
    /// Entries unused for longer than this are closed by the sweep.
    pub idle_timeout: Duration,
    /// `None` disables the background sweep.
    pub sweep_interval: Option<Duration>,
    /// Physical connections per tenant client.
    pub max_connections_per_tenant: u32,
}

impl PoolSettings {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Server => PoolSettings {
                max_size: 50,
                idle_timeout: Duration::from_secs(10 * 60),
                sweep_interval: Some(Duration::from_secs(60)),
                max_connections_per_tenant: 5,
            },
            Profile::Serverless => PoolSettings {
                max_size: 5,
                idle_timeout: Duration::from_secs(60),
                sweep_interval: None,
                max_connections_per_tenant: 1,
            },
        }
    }
}

/// Everything the composition root needs to wire the production stack.
#[derive(Clone, Debug)]
pub struct Settings {
    pub profile: Profile,
    pub pool: PoolSettings,
    /// Control-plane database holding the tenant directory.
    pub master_database_url: String,
    /// Credentials allowed to run CREATE DATABASE. Defaults to the master URL.
    pub admin_database_url: String,
    /// Shared database for tenant-less work. Defaults to the master URL.
    pub fallback_database_url: String,
    /// Schema holding the registry tables.
    pub registry_schema: String,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, so tests need not touch process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let profile = match get("DEPLOYMENT_PROFILE") {
            Some(p) => p.parse()?,
            None => Profile::Server,
        };

        let mut pool = PoolSettings::for_profile(profile);
        if let Some(v) = get("TENANT_POOL_MAX_SIZE") {
            pool.max_size = parse_num("TENANT_POOL_MAX_SIZE", &v)?;
            if pool.max_size == 0 {
                return Err(ConfigError::Invalid {
                    key: "TENANT_POOL_MAX_SIZE",
                    value: v,
                });
            }
        }
        if let Some(v) = get("TENANT_POOL_IDLE_TIMEOUT_SECS") {
            pool.idle_timeout = Duration::from_secs(parse_num("TENANT_POOL_IDLE_TIMEOUT_SECS", &v)?);
        }
        // Serverless never sweeps, even when an interval is configured.
        if profile == Profile::Server {
            if let Some(v) = get("TENANT_POOL_SWEEP_INTERVAL_SECS") {
                let secs: u64 = parse_num("TENANT_POOL_SWEEP_INTERVAL_SECS", &v)?;
                pool.sweep_interval = (secs > 0).then(|| Duration::from_secs(secs));
            }
        }
        if let Some(v) = get("TENANT_DB_MAX_CONNECTIONS") {
            pool.max_connections_per_tenant = parse_num("TENANT_DB_MAX_CONNECTIONS", &v)?;
        }

        let master_database_url = get("MASTER_DATABASE_URL")
            .or_else(|| get("DATABASE_URL"))
            .ok_or(ConfigError::Missing("MASTER_DATABASE_URL"))?;
        let admin_database_url = get("DATABASE_ADMIN_URL").unwrap_or_else(|| master_database_url.clone());
        let fallback_database_url = get("FALLBACK_DATABASE_URL").unwrap_or_else(|| master_database_url.clone());
        let registry_schema = get("REGISTRY_SCHEMA").unwrap_or_else(|| "registry".into());

        Ok(Settings {
            profile,
            pool,
            master_database_url,
            admin_database_url,
            fallback_database_url,
            registry_schema,
        })
    }
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}
