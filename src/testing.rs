//! In-memory doubles for the directory, connector and database admin.

use crate::config::PoolSettings;
use crate::connector::Connector;
use crate::error::TenantError;
use crate::provision::{CreateOutcome, DatabaseAdmin};
use crate::store::TenantDirectory;
use crate::tenant::{NewTenant, TenantRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn settings(max_size: usize, idle_secs: u64, sweep_secs: Option<u64>) -> PoolSettings {
    PoolSettings {
        max_size,
        idle_timeout: Duration::from_secs(idle_secs),
        sweep_interval: sweep_secs.map(Duration::from_secs),
        max_connections_per_tenant: 1,
    }
}

pub fn record(id: &str, active: bool) -> TenantRecord {
    TenantRecord {
        id: id.to_string(),
        slug: id.to_string(),
        domain: None,
        connection_string: format!("postgres://db/tenant_{}", id),
        is_active: active,
        invite_code: None,
        max_users: None,
        created_at: chrono::Utc::now(),
    }
}

#[derive(Default)]
pub struct MockDirectory {
    records: Mutex<HashMap<String, TenantRecord>>,
}

impl MockDirectory {
    pub fn with_active(ids: &[&str]) -> Self {
        let dir = MockDirectory::default();
        for id in ids {
            dir.add(id, true);
        }
        dir
    }

    pub fn add(&self, id: &str, active: bool) {
        self.records.lock().unwrap().insert(id.to_string(), record(id, active));
    }

    pub fn set_domain(&self, id: &str, domain: &str) {
        if let Some(r) = self.records.lock().unwrap().get_mut(id) {
            r.domain = Some(domain.to_string());
        }
    }
}

#[async_trait]
impl TenantDirectory for MockDirectory {
    async fn find_by_id(&self, tenant_id: &str) -> Result<Option<TenantRecord>, TenantError> {
        Ok(self.records.lock().unwrap().get(tenant_id).cloned())
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Option<TenantRecord>, TenantError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.is_active && r.domain.as_deref() == Some(domain))
            .cloned())
    }

    async fn find_by_connection_string(&self, connection_string: &str) -> Result<Option<TenantRecord>, TenantError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.connection_string == connection_string)
            .cloned())
    }

    async fn register(&self, tenant: &NewTenant, connection_string: &str) -> Result<TenantRecord, TenantError> {
        let mut rec = record(&tenant.slug, true);
        rec.domain = tenant.domain.clone();
        rec.connection_string = connection_string.to_string();
        self.records.lock().unwrap().insert(rec.id.clone(), rec.clone());
        Ok(rec)
    }

    async fn set_active(&self, tenant_id: &str, active: bool) -> Result<bool, TenantError> {
        Ok(match self.records.lock().unwrap().get_mut(tenant_id) {
            Some(r) => {
                r.is_active = active;
                true
            }
            None => false,
        })
    }
}

#[derive(Debug)]
pub struct MockClient {
    pub id: usize,
    pub url: String,
}

#[derive(Default)]
pub struct MockConnector {
    next_id: AtomicUsize,
    close_attempts: AtomicUsize,
    fail_connect: AtomicBool,
    fail_close: AtomicBool,
    closed: Mutex<Vec<usize>>,
}

impl MockConnector {
    pub fn connects(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> Vec<usize> {
        self.closed.lock().unwrap().clone()
    }

    pub fn close_attempts(&self) -> usize {
        self.close_attempts.load(Ordering::SeqCst)
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_closes(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Client = MockClient;

    async fn connect(&self, connection_string: &str) -> Result<MockClient, TenantError> {
        // Suspend like a real handshake so concurrent callers interleave.
        tokio::task::yield_now().await;
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TenantError::connection("connection refused"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockClient {
            id,
            url: connection_string.to_string(),
        })
    }

    async fn close(&self, client: &MockClient) -> Result<(), TenantError> {
        self.close_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(TenantError::connection("close failed"));
        }
        self.closed.lock().unwrap().push(client.id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockAdmin {
    databases: Mutex<Vec<String>>,
    schema_runs: Mutex<Vec<String>>,
    fail_create: AtomicBool,
    fail_schema: AtomicBool,
}

impl MockAdmin {
    pub fn databases(&self) -> Vec<String> {
        self.databases.lock().unwrap().clone()
    }

    pub fn schema_runs(&self) -> Vec<String> {
        self.schema_runs.lock().unwrap().clone()
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_schema(&self, fail: bool) {
        self.fail_schema.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatabaseAdmin for MockAdmin {
    fn master_url(&self) -> &str {
        "postgres://admin:secret@db:5432/master?sslmode=disable"
    }

    async fn create_database(&self, name: &str) -> Result<CreateOutcome, TenantError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TenantError::provisioning("permission denied to create database"));
        }
        let mut dbs = self.databases.lock().unwrap();
        if dbs.iter().any(|d| d == name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        dbs.push(name.to_string());
        Ok(CreateOutcome::Created)
    }

    async fn apply_baseline_schema(&self, connection_string: &str) -> Result<(), TenantError> {
        self.schema_runs.lock().unwrap().push(connection_string.to_string());
        if self.fail_schema.load(Ordering::SeqCst) {
            return Err(TenantError::provisioning("relation already exists"));
        }
        Ok(())
    }
}
