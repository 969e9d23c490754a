//! Bounded tenant id -> client cache with LRU eviction and idle sweep.

use crate::config::PoolSettings;
use crate::connector::Connector;
use crate::error::TenantError;
use crate::store::TenantDirectory;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Result of closing one pooled client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// Removed from the pool, but the driver reported an error while closing.
    Failed(String),
    /// Nothing was pooled for that tenant.
    Absent,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub closed: Vec<String>,
    /// Idle past the timeout but still held by a caller; retried next tick.
    pub deferred: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.closed.is_empty() && self.deferred.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub closed: usize,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub capacity: usize,
    pub tenants: Vec<String>,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub idle_closed: u64,
}

struct PoolEntry<T> {
    client: Arc<T>,
    last_used_at: Instant,
    /// Use counter; orders entries that share a `last_used_at`.
    stamp: u64,
}

struct PoolState<T> {
    entries: HashMap<String, PoolEntry<T>>,
    next_stamp: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    idle_closed: u64,
    shut_down: bool,
    /// Bumped by every explicit disconnect.
    generation: u64,
    /// Generation of the latest explicit disconnect per tenant.
    disconnected_at: HashMap<String, u64>,
}

impl<T> PoolState<T> {
    fn new() -> Self {
        PoolState {
            entries: HashMap::new(),
            next_stamp: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            idle_closed: 0,
            shut_down: false,
            generation: 0,
            disconnected_at: HashMap::new(),
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    fn touch(&mut self, tenant_id: &str) -> Option<Arc<T>> {
        let stamp = self.bump();
        let entry = self.entries.get_mut(tenant_id)?;
        entry.last_used_at = Instant::now();
        entry.stamp = stamp;
        Some(Arc::clone(&entry.client))
    }

    fn insert(&mut self, tenant_id: &str, client: Arc<T>) {
        let stamp = self.bump();
        self.entries.insert(
            tenant_id.to_string(),
            PoolEntry {
                client,
                last_used_at: Instant::now(),
                stamp,
            },
        );
    }

    /// True when `tenant_id` was disconnected after generation `since`.
    fn disconnected_since(&self, tenant_id: &str, since: u64) -> bool {
        self.disconnected_at
            .get(tenant_id)
            .map(|g| *g > since)
            .unwrap_or(false)
    }

    fn take_oldest(&mut self) -> Option<(String, Arc<T>)> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.last_used_at, e.stamp))
            .map(|(id, _)| id.clone())?;
        self.entries.remove(&oldest).map(|e| (oldest, e.client))
    }
}

/// Process-wide cache of live tenant clients.
///
/// Holds at most `max_size` entries once any call returns. Lookups go through
/// the [`TenantDirectory`]; physical clients are opened and closed by the
/// [`Connector`]. No lock is held while connecting, closing or querying the
/// directory.
pub struct TenantPool<C: Connector, D: TenantDirectory> {
    connector: Arc<C>,
    directory: Arc<D>,
    settings: PoolSettings,
    state: Mutex<PoolState<C::Client>>,
    cancel: CancellationToken,
}

impl<C, D> TenantPool<C, D>
where
    C: Connector,
    D: TenantDirectory + 'static,
{
    /// Create a pool. When `settings.sweep_interval` is set, spawns the idle
    /// sweep on the current tokio runtime; it stops on [`shutdown`](Self::shutdown)
    /// or when the pool is dropped.
    pub fn new(connector: Arc<C>, directory: Arc<D>, mut settings: PoolSettings) -> Arc<Self> {
        if settings.max_size == 0 {
            tracing::warn!("tenant pool max_size of 0 raised to 1");
            settings.max_size = 1;
        }
        let sweep_interval = settings.sweep_interval.filter(|d| !d.is_zero());
        tracing::debug!(
            max_size = settings.max_size,
            idle_timeout_secs = settings.idle_timeout.as_secs(),
            sweep = sweep_interval.is_some(),
            "created tenant pool"
        );
        let pool = Arc::new(TenantPool {
            connector,
            directory,
            settings,
            state: Mutex::new(PoolState::new()),
            cancel: CancellationToken::new(),
        });
        if let Some(interval) = sweep_interval {
            spawn_sweeper(Arc::downgrade(&pool), pool.cancel.clone(), interval);
        }
        pool
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    /// Live client for `tenant_id`, opening one on a miss.
    ///
    /// Fails with `TenantNotFound` / `TenantInactive` without touching the
    /// pool, and with `ConnectionFailure` when the database cannot be reached.
    /// A miss that races with [`disconnect_tenant`](Self::disconnect_tenant)
    /// for the same tenant closes its fresh client and fails with
    /// `TenantInactive`.
    pub async fn get_client(&self, tenant_id: &str) -> Result<Arc<C::Client>, TenantError> {
        let generation = {
            let mut state = self.state.lock().await;
            if let Some(client) = state.touch(tenant_id) {
                state.hits += 1;
                return Ok(client);
            }
            state.misses += 1;
            state.generation
        };

        let record = self
            .directory
            .find_by_id(tenant_id)
            .await?
            .ok_or_else(|| TenantError::TenantNotFound(tenant_id.to_string()))?;
        if !record.is_active {
            return Err(TenantError::TenantInactive(tenant_id.to_string()));
        }

        let fresh = match self.connector.connect(&record.connection_string).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "failed to open tenant client");
                return Err(e);
            }
        };

        let mut evicted = Vec::new();
        let (client, surplus) = {
            let mut state = self.state.lock().await;
            if state.shut_down {
                drop(state);
                self.close_client(tenant_id, &fresh, "shutdown").await;
                return Err(TenantError::ConnectionFailure("tenant pool is shut down".into()));
            }
            if state.disconnected_since(tenant_id, generation) {
                drop(state);
                tracing::info!(tenant_id, "tenant disconnected while its client was opening");
                self.close_client(tenant_id, &fresh, "disconnect").await;
                return Err(TenantError::TenantInactive(tenant_id.to_string()));
            }
            if let Some(existing) = state.touch(tenant_id) {
                // Another caller admitted this tenant while we were connecting.
                (existing, Some(fresh))
            } else {
                while state.entries.len() >= self.settings.max_size {
                    match state.take_oldest() {
                        Some(oldest) => {
                            state.evictions += 1;
                            evicted.push(oldest);
                        }
                        None => break,
                    }
                }
                state.insert(tenant_id, Arc::clone(&fresh));
                (fresh, None)
            }
        };

        if let Some(surplus) = surplus {
            self.close_client(tenant_id, &surplus, "duplicate").await;
        }
        for (old_id, old_client) in evicted {
            tracing::info!(tenant_id = %old_id, admitted = tenant_id, "evicting least recently used tenant client");
            self.close_client(&old_id, &old_client, "lru").await;
        }
        tracing::debug!(tenant_id, "opened tenant client");
        Ok(client)
    }

    /// Resolve by public domain. `Ok(None)` when no active tenant owns it.
    pub async fn get_client_by_domain(&self, domain: &str) -> Result<Option<Arc<C::Client>>, TenantError> {
        match self.tenant_for_domain(domain).await? {
            Some(tenant_id) => self.get_client(&tenant_id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Id of the active tenant that owns `domain`.
    pub async fn tenant_for_domain(&self, domain: &str) -> Result<Option<String>, TenantError> {
        Ok(self
            .directory
            .find_by_domain(domain)
            .await?
            .filter(|record| record.is_active)
            .map(|record| record.id))
    }

    /// Close and forget the tenant's client. No-op when none is pooled.
    ///
    /// Misses for this tenant already in flight will not admit their client.
    pub async fn disconnect_tenant(&self, tenant_id: &str) -> CloseOutcome {
        let removed = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            let generation = state.generation;
            state.disconnected_at.insert(tenant_id.to_string(), generation);
            state.entries.remove(tenant_id)
        };
        match removed {
            Some(entry) => {
                tracing::info!(tenant_id, "disconnecting tenant client");
                self.close_client(tenant_id, &entry.client, "disconnect").await
            }
            None => CloseOutcome::Absent,
        }
    }

    /// Close the entry with the oldest `last_used_at`. `None` when empty.
    pub async fn evict_oldest_client(&self) -> Option<(String, CloseOutcome)> {
        let oldest = {
            let mut state = self.state.lock().await;
            let oldest = state.take_oldest();
            if oldest.is_some() {
                state.evictions += 1;
            }
            oldest
        };
        let (tenant_id, client) = oldest?;
        let outcome = self.close_client(&tenant_id, &client, "lru").await;
        Some((tenant_id, outcome))
    }

    /// Close entries unused for longer than the idle timeout.
    ///
    /// An entry whose client is still held outside the pool is left in place
    /// and reported as deferred.
    pub async fn sweep_idle(&self) -> SweepReport {
        let now = Instant::now();
        let mut report = SweepReport::default();
        let expired: Vec<(String, Arc<C::Client>)> = {
            let mut state = self.state.lock().await;
            let idle: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, e)| now.saturating_duration_since(e.last_used_at) > self.settings.idle_timeout)
                .map(|(id, _)| id.clone())
                .collect();
            let mut expired = Vec::with_capacity(idle.len());
            for id in idle {
                let busy = state
                    .entries
                    .get(&id)
                    .map(|e| Arc::strong_count(&e.client) > 1)
                    .unwrap_or(false);
                if busy {
                    report.deferred.push(id);
                } else if let Some(entry) = state.entries.remove(&id) {
                    expired.push((id, entry.client));
                }
            }
            state.idle_closed += expired.len() as u64;
            expired
        };

        let outcomes = join_all(
            expired
                .iter()
                .map(|(id, client)| self.close_client(id, client, "idle")),
        )
        .await;
        for ((id, _), outcome) in expired.into_iter().zip(outcomes) {
            match outcome {
                CloseOutcome::Failed(err) => report.failed.push((id, err)),
                _ => report.closed.push(id),
            }
        }
        report
    }

    /// Stop the sweep and close every pooled client concurrently.
    ///
    /// Later `get_client` misses fail; close errors are collected, not raised.
    pub async fn shutdown(&self) -> TeardownReport {
        self.cancel.cancel();
        let drained: Vec<(String, Arc<C::Client>)> = {
            let mut state = self.state.lock().await;
            state.shut_down = true;
            state.entries.drain().map(|(id, e)| (id, e.client)).collect()
        };

        let outcomes = join_all(
            drained
                .iter()
                .map(|(id, client)| self.close_client(id, client, "shutdown")),
        )
        .await;
        let mut report = TeardownReport::default();
        for ((id, _), outcome) in drained.into_iter().zip(outcomes) {
            match outcome {
                CloseOutcome::Failed(err) => report.failed.push((id, err)),
                _ => report.closed += 1,
            }
        }
        tracing::info!(closed = report.closed, failed = report.failed.len(), "tenant pool shut down");
        report
    }

    pub async fn contains(&self, tenant_id: &str) -> bool {
        self.state.lock().await.entries.contains_key(tenant_id)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let mut tenants: Vec<String> = state.entries.keys().cloned().collect();
        tenants.sort();
        PoolStats {
            size: state.entries.len(),
            capacity: self.settings.max_size,
            tenants,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            idle_closed: state.idle_closed,
        }
    }

    async fn close_client(&self, tenant_id: &str, client: &C::Client, reason: &'static str) -> CloseOutcome {
        match self.connector.close(client).await {
            Ok(()) => {
                tracing::debug!(tenant_id, reason, "closed tenant client");
                CloseOutcome::Closed
            }
            Err(e) => {
                tracing::warn!(tenant_id, reason, error = %e, "failed to close tenant client");
                CloseOutcome::Failed(e.to_string())
            }
        }
    }
}

impl<C: Connector, D: TenantDirectory> Drop for TenantPool<C, D> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_sweeper<C, D>(pool: Weak<TenantPool<C, D>>, cancel: CancellationToken, interval: Duration)
where
    C: Connector,
    D: TenantDirectory + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = cancel.cancelled() => break,
            }
            let pool = match pool.upgrade() {
                Some(pool) => pool,
                None => break,
            };
            let report = pool.sweep_idle().await;
            if !report.is_empty() {
                tracing::info!(
                    closed = report.closed.len(),
                    deferred = report.deferred.len(),
                    failed = report.failed.len(),
                    "idle sweep"
                );
            }
        }
        tracing::debug!("idle sweep stopped");
    });
}
