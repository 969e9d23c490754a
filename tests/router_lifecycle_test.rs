//! End-to-end tenant lifecycle through `TenantRouter`: onboard, resolve,
//! deactivate, shut down. Everything below the router is in memory.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tenant_router::{
    Connector, CreateOutcome, DatabaseAdmin, NewTenant, PoolSettings, TenantContext, TenantDirectory,
    TenantError, TenantRecord, TenantRouter,
};

#[derive(Default)]
struct Directory {
    records: Mutex<HashMap<String, TenantRecord>>,
}

#[async_trait]
impl TenantDirectory for Directory {
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
        let record = TenantRecord {
            id: format!("co-{}", tenant.slug),
            slug: tenant.slug.clone(),
            domain: tenant.domain.clone(),
            connection_string: connection_string.to_string(),
            is_active: true,
            invite_code: Some("INVITE".into()),
            max_users: tenant.max_users,
            created_at: chrono::Utc::now(),
        };
        self.records.lock().unwrap().insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn set_active(&self, tenant_id: &str, active: bool) -> Result<bool, TenantError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(tenant_id) {
            Some(r) => {
                r.is_active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug)]
struct Client {
    url: String,
}

#[derive(Default)]
struct Connections {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

#[async_trait]
impl Connector for Connections {
    type Client = Client;

    async fn connect(&self, connection_string: &str) -> Result<Client, TenantError> {
        tokio::task::yield_now().await;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Client {
            url: connection_string.to_string(),
        })
    }

    async fn close(&self, _client: &Client) -> Result<(), TenantError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct Admin {
    created: Mutex<Vec<String>>,
}

#[async_trait]
impl DatabaseAdmin for Admin {
    fn master_url(&self) -> &str {
        "postgres://app:pw@db:5432/master"
    }

    async fn create_database(&self, name: &str) -> Result<CreateOutcome, TenantError> {
        let mut created = self.created.lock().unwrap();
        if created.iter().any(|n| n == name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        created.push(name.to_string());
        Ok(CreateOutcome::Created)
    }

    async fn apply_baseline_schema(&self, _connection_string: &str) -> Result<(), TenantError> {
        Ok(())
    }
}

fn router(max_size: usize) -> (TenantRouter<Connections, Directory, Admin>, Arc<Connections>) {
    let connections = Arc::new(Connections::default());
    let router = TenantRouter::new(
        Arc::clone(&connections),
        Arc::new(Directory::default()),
        Arc::new(Admin::default()),
        PoolSettings {
            max_size,
            idle_timeout: Duration::from_secs(60),
            sweep_interval: None,
            max_connections_per_tenant: 1,
        },
        "postgres://app:pw@db:5432/master",
    );
    (router, connections)
}

#[tokio::test]
async fn onboarded_tenant_resolves_to_its_own_database() {
    let (router, connections) = router(4);
    let record = router
        .onboard_tenant(NewTenant {
            slug: "Acme Corp".into(),
            domain: Some("acme.example.com".into()),
            max_users: Some(25),
        })
        .await
        .unwrap();
    assert_eq!(record.connection_string, "postgres://app:pw@db:5432/tenant_acme_corp");

    let first = router.resolve(&TenantContext::tenant(record.id.as_str())).await.unwrap();
    let second = router.resolve(&TenantContext::tenant(record.id.as_str())).await.unwrap();
    let by_domain = router
        .resolve(&TenantContext::Domain("acme.example.com".into()))
        .await
        .unwrap();

    assert_eq!(first.url, "postgres://app:pw@db:5432/tenant_acme_corp");
    assert!(Arc::ptr_eq(first.client(), second.client()));
    assert!(Arc::ptr_eq(first.client(), by_domain.client()));
    assert_eq!(connections.opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn deactivated_tenant_is_evicted_and_refused() {
    let (router, connections) = router(4);
    let record = router
        .onboard_tenant(NewTenant {
            slug: "globex".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    router.resolve(&TenantContext::tenant(record.id.as_str())).await.unwrap();

    router.deactivate_tenant(&record.id).await.unwrap();
    assert!(!router.pool().contains(&record.id).await);
    assert_eq!(connections.closed.load(Ordering::SeqCst), 1);

    let err = router.resolve(&TenantContext::tenant(record.id.as_str())).await.unwrap_err();
    assert!(matches!(err, TenantError::TenantInactive(_)));
    assert!(router.pool().is_empty().await);

    assert!(matches!(
        router.deactivate_tenant("co-unknown").await,
        Err(TenantError::TenantNotFound(_))
    ));
}

#[tokio::test]
async fn deactivation_racing_a_first_resolve_leaves_nothing_pooled() {
    let (router, connections) = router(4);
    let record = router
        .onboard_tenant(NewTenant {
            slug: "umbrella".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let ctx = TenantContext::tenant(record.id.as_str());

    let (resolved, deactivated) = tokio::join!(router.resolve(&ctx), router.deactivate_tenant(&record.id));

    assert!(matches!(resolved, Err(TenantError::TenantInactive(_))));
    assert!(deactivated.is_ok());
    assert!(!router.pool().contains(&record.id).await);
    assert!(matches!(router.resolve(&ctx).await, Err(TenantError::TenantInactive(_))));
    assert_eq!(
        connections.opened.load(Ordering::SeqCst),
        connections.closed.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn slugs_sharing_a_database_name_are_refused() {
    let (router, _) = router(4);
    let first = router
        .onboard_tenant(NewTenant {
            slug: "Acme Corp".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let err = router
        .onboard_tenant(NewTenant {
            slug: "acme-corp".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TenantError::ProvisioningFailure(msg) if msg.contains(&first.id)));
    assert!(router.directory().find_by_id("co-acme-corp").await.unwrap().is_none());
}

#[tokio::test]
async fn pool_stays_bounded_across_many_tenants() {
    let (router, connections) = router(2);
    let mut ids = Vec::new();
    for slug in ["a", "b", "c", "d", "e"] {
        let record = router
            .onboard_tenant(NewTenant {
                slug: slug.into(),
                ..Default::default()
            })
            .await
            .unwrap();
        ids.push(record.id);
    }

    for id in &ids {
        router.resolve(&TenantContext::tenant(id.as_str())).await.unwrap();
        assert!(router.pool().len().await <= 2);
    }
    let opened = connections.opened.load(Ordering::SeqCst);
    assert_eq!(opened, 5);
    assert_eq!(connections.closed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn shutdown_closes_tenants_and_fallback() {
    let (router, connections) = router(4);
    let record = router
        .onboard_tenant(NewTenant {
            slug: "initech".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    router.resolve(&TenantContext::tenant(record.id.as_str())).await.unwrap();
    let platform = router.resolve(&TenantContext::Platform).await.unwrap();
    assert!(platform.is_fallback());
    drop(platform);

    let report = router.shutdown().await;
    assert_eq!(report.closed, 2);
    assert!(report.failed.is_empty());
    assert_eq!(connections.closed.load(Ordering::SeqCst), 2);
    assert!(router.pool().is_empty().await);

    assert!(matches!(
        router.resolve(&TenantContext::Platform).await,
        Err(TenantError::ConnectionFailure(_))
    ));
    assert!(matches!(
        router.resolve(&TenantContext::tenant(record.id.as_str())).await,
        Err(TenantError::ConnectionFailure(_))
    ));
    assert_eq!(connections.opened.load(Ordering::SeqCst), 3);
}
