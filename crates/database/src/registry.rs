//! Tenant Pool Registry
//!
//! Caches one pool per (tenant, role) and owns its lifecycle:
//!
//! ```text
//! get_or_create ──miss──▶ directory lookup ──▶ settings merge ──▶ factory build ──▶ publish
//!        │                                                                        │
//!        └──hit── revalidate after cache_ttl ── same Arc<PoolHandle> ◀────────────┘
//!
//! reset / evict ──▶ bump generation ──▶ remove from map ──▶ close (drain) ──▶ next access re-provisions
//! ```
//!
//! Concurrent misses on the same key are coalesced by the cache: exactly one
//! caller runs the lookup and construction, the others wait for and share its
//! result. Failures are handed to every waiter and are not cached.
//!
//! Every handle carries the tenant generation it was provisioned under. A
//! reset bumps the generation, so a build that was in flight across a reset
//! is discarded instead of being served.
//!
//! Capacity is enforced by the registry rather than the cache: publishing a
//! pool beyond `max_pools` retires the least recently used other pool,
//! preferring pools with no connections checked out.

use crate::directory::TenantDirectory;
use crate::error::{Result, TenancyError};
use crate::factory::{ManagedPool, PoolFactory};
use crate::handle::{PoolHandle, PoolState};
use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::Op;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tenancy_models::{DbRole, PoolSettings, TenantId};

/// A caller that keeps drawing unusable handles (reset racing with lookup)
/// gives up after this many attempts.
const MAX_STALE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub tenant_id: TenantId,
    pub role: DbRole,
}

impl PoolKey {
    pub fn new(tenant_id: TenantId, role: DbRole) -> Self {
        Self { tenant_id, role }
    }
}

/// Configuration for the pool registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of live pools; the least recently used pool is closed beyond this
    pub max_pools: u64,
    /// Upper bound on a directory lookup during provisioning
    pub lookup_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_pools: 100,
            lookup_timeout: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        Self {
            max_pools: std::env::var("TENANT_REGISTRY_MAX_POOLS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            lookup_timeout: Duration::from_secs(
                std::env::var("TENANT_REGISTRY_LOOKUP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}

/// Strategy used by the routing layer to find the pool for a tenant
#[async_trait]
pub trait PoolResolver: Send + Sync {
    type Pool: ManagedPool;

    async fn resolve(&self, tenant_id: &TenantId, role: DbRole)
        -> Result<Arc<PoolHandle<Self::Pool>>>;
}

pub struct TenantPoolRegistry<F: PoolFactory> {
    directory: TenantDirectory,
    factory: Arc<F>,
    pools: Cache<PoolKey, Arc<PoolHandle<F::Pool>>>,
    /// Per-tenant reset counter
    generations: Cache<TenantId, u64>,
    /// Bumped by `reset_all`
    epoch: Arc<AtomicU64>,
    next_id: Arc<AtomicU64>,
    ticks: Arc<AtomicU64>,
    config: RegistryConfig,
}

impl<F: PoolFactory> Clone for TenantPoolRegistry<F> {
    fn clone(&self) -> Self {
        Self {
            directory: self.directory.clone(),
            factory: self.factory.clone(),
            pools: self.pools.clone(),
            generations: self.generations.clone(),
            epoch: self.epoch.clone(),
            next_id: self.next_id.clone(),
            ticks: self.ticks.clone(),
            config: self.config.clone(),
        }
    }
}

impl<F: PoolFactory> TenantPoolRegistry<F> {
    pub fn new(directory: TenantDirectory, factory: F, config: RegistryConfig) -> Self {
        Self {
            directory,
            factory: Arc::new(factory),
            pools: Cache::builder().build(),
            generations: Cache::builder().build(),
            epoch: Arc::new(AtomicU64::new(0)),
            next_id: Arc::new(AtomicU64::new(0)),
            ticks: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    pub fn directory(&self) -> &TenantDirectory {
        &self.directory
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Pool for (tenant, role), provisioning it on first use
    pub async fn get_or_create(
        &self,
        tenant_id: &TenantId,
        role: DbRole,
    ) -> Result<Arc<PoolHandle<F::Pool>>> {
        let key = PoolKey::new(tenant_id.clone(), role);

        for _ in 0..MAX_STALE_ATTEMPTS {
            let entry = self
                .pools
                .entry(key.clone())
                .or_try_insert_with(self.provision(&key))
                .await
                .map_err(|e| {
                    let e = unshare(e);
                    tracing::warn!(
                        "No {} pool for tenant {}: {}",
                        role,
                        tenant_id,
                        e
                    );
                    e
                })?;

            let fresh = entry.is_fresh();
            let handle = entry.into_value();

            if handle.generation() != self.generation(tenant_id).await {
                // Provisioned from metadata that a reset has since replaced
                tracing::debug!(
                    "Discarding {} pool for tenant {} (handle {}) built before reset",
                    role,
                    tenant_id,
                    handle.id()
                );
                self.retire(&key, &handle).await;
                self.directory.invalidate(tenant_id).await;
                continue;
            }

            if handle.is_closed() {
                // Lost a race with reset, or the pool was closed underneath us
                self.discard_if_current(&key, handle.id()).await;
                continue;
            }

            handle.touch(self.ticks.fetch_add(1, Ordering::Relaxed) + 1);
            if fresh {
                self.enforce_capacity(&key).await;
            } else {
                self.revalidate(&key, &handle).await?;
                tracing::debug!(
                    "Reusing {} pool for tenant {} (handle {})",
                    role,
                    tenant_id,
                    handle.id()
                );
            }

            return Ok(handle);
        }

        Err(TenancyError::PoolClosed {
            tenant_id: tenant_id.to_string(),
            role,
        })
    }

    async fn provision(&self, key: &PoolKey) -> Result<Arc<PoolHandle<F::Pool>>> {
        // Captured before the lookup so that a reset during lookup or build
        // marks the result as stale
        let generation = self.generation(&key.tenant_id).await;

        let record = tokio::time::timeout(
            self.config.lookup_timeout,
            self.directory.find_active(&key.tenant_id),
        )
        .await
        .map_err(|_| {
            TenancyError::DirectoryUnavailable(format!(
                "lookup of tenant {} timed out after {:?}",
                key.tenant_id, self.config.lookup_timeout
            ))
        })??;

        let settings = PoolSettings::resolve(&record);

        // Dropping the build future on timeout releases whatever it had opened
        let pool = tokio::time::timeout(
            settings.connection_timeout,
            self.factory.build(&record, key.role, &settings),
        )
        .await
        .map_err(|_| {
            TenancyError::PoolCreation(format!(
                "building {} pool for tenant {} timed out after {:?}",
                key.role, key.tenant_id, settings.connection_timeout
            ))
        })?
        .map_err(|e| {
            tracing::error!(
                "Failed to create {} pool for tenant {}: {}",
                key.role,
                key.tenant_id,
                e
            );
            e
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            "Provisioned {} pool for tenant {} (handle {}, max {})",
            key.role,
            key.tenant_id,
            id,
            settings.max_pool_size
        );

        let handle = PoolHandle::new(id, key.tenant_id.clone(), key.role, settings, pool)
            .with_generation(generation);
        handle.mark_validated();
        Ok(Arc::new(handle))
    }

    /// Current generation of a tenant; changes on every reset of it
    async fn generation(&self, tenant_id: &TenantId) -> u64 {
        let tenant = self.generations.get(tenant_id).await.unwrap_or(0);
        self.epoch.load(Ordering::Acquire) + tenant
    }

    async fn bump_generation(&self, tenant_id: &TenantId) {
        let _ = self
            .generations
            .entry(tenant_id.clone())
            .and_upsert_with(|entry| async move { entry.map(|e| e.into_value()).unwrap_or(0) + 1 })
            .await;
    }

    /// Re-check a cached pool's tenant once the directory TTL has passed.
    /// A tenant that went missing or inactive loses its pool.
    async fn revalidate(&self, key: &PoolKey, handle: &Arc<PoolHandle<F::Pool>>) -> Result<()> {
        if !handle.needs_revalidation(self.directory.cache_ttl()) {
            return Ok(());
        }

        let checked = tokio::time::timeout(
            self.config.lookup_timeout,
            self.directory.refresh(&key.tenant_id),
        )
        .await
        .map_err(|_| {
            TenancyError::DirectoryUnavailable(format!(
                "lookup of tenant {} timed out after {:?}",
                key.tenant_id, self.config.lookup_timeout
            ))
        })
        .and_then(|r| r);

        match checked {
            Ok(_) => {
                handle.mark_validated();
                Ok(())
            }
            Err(e @ (TenancyError::TenantNotFound(_) | TenancyError::TenantInactive(_))) => {
                tracing::warn!(
                    "Closing {} pool for tenant {}: {}",
                    key.role,
                    key.tenant_id,
                    e
                );
                self.retire(key, handle).await;
                Err(e)
            }
            // Pool is kept; the next call tries the directory again
            Err(e) => Err(e),
        }
    }

    /// Drop the entry if it still holds `handle`, then close `handle`
    async fn retire(&self, key: &PoolKey, handle: &Arc<PoolHandle<F::Pool>>) {
        self.discard_if_current(key, handle.id()).await;
        handle.close().await;
    }

    /// Remove the entry only if it still holds the given handle
    async fn discard_if_current(&self, key: &PoolKey, handle_id: u64) {
        let _ = self
            .pools
            .entry(key.clone())
            .and_compute_with(|entry| {
                let stale = entry
                    .map(|e| e.value().id() == handle_id)
                    .unwrap_or(false);
                async move {
                    if stale {
                        Op::Remove
                    } else {
                        Op::Nop
                    }
                }
            })
            .await;
    }

    /// Retire least recently used pools, never `keep`, until the registry is
    /// within `max_pools`. Idle pools go before busy ones.
    async fn enforce_capacity(&self, keep: &PoolKey) {
        loop {
            let live: Vec<(Arc<PoolKey>, Arc<PoolHandle<F::Pool>>)> = self.pools.iter().collect();
            if live.len() as u64 <= self.config.max_pools {
                return;
            }

            let victim = live
                .into_iter()
                .filter(|(key, _)| key.as_ref() != keep)
                .min_by_key(|(_, handle)| (handle.in_use() > 0, handle.last_used()));

            let Some((key, handle)) = victim else {
                return;
            };

            self.discard_if_current(&key, handle.id()).await;
            close_evicted(key, handle);
        }
    }

    /// Close and drop every role pool of a tenant. Returns the number of pools
    /// closed. The tenant's directory entry is invalidated as well so the next
    /// access reads fresh metadata, and builds still in flight are discarded.
    pub async fn reset(&self, tenant_id: &TenantId) -> usize {
        self.directory.invalidate(tenant_id).await;
        self.bump_generation(tenant_id).await;

        let mut closed = 0;
        for role in DbRole::ALL {
            if self.evict(tenant_id, role).await {
                closed += 1;
            }
        }

        tracing::info!("Reset tenant {} ({} pools closed)", tenant_id, closed);
        closed
    }

    /// Close and drop every pool
    pub async fn reset_all(&self) -> usize {
        self.directory.invalidate_all();
        self.epoch.fetch_add(1, Ordering::AcqRel);

        let keys: Vec<PoolKey> = self.pools.iter().map(|(k, _)| (*k).clone()).collect();
        let mut closed = 0;
        for key in keys {
            if let Some(handle) = self.pools.remove(&key).await {
                handle.close().await;
                closed += 1;
            }
        }

        tracing::info!("Reset all tenant pools ({} closed)", closed);
        closed
    }

    /// Close and drop a single (tenant, role) pool. The entry leaves the map
    /// before the drain starts, so nobody can obtain the handle once it is
    /// closing.
    pub async fn evict(&self, tenant_id: &TenantId, role: DbRole) -> bool {
        let key = PoolKey::new(tenant_id.clone(), role);
        match self.pools.remove(&key).await {
            Some(handle) => {
                handle.close().await;
                true
            }
            None => false,
        }
    }

    /// Tenants that currently have at least one live pool
    pub fn list_tenant_ids(&self) -> Vec<TenantId> {
        self.pools
            .iter()
            .map(|(k, _)| k.tenant_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut pools: Vec<PoolStats> = self
            .pools
            .iter()
            .map(|(key, handle)| PoolStats {
                tenant_id: key.tenant_id.clone(),
                role: key.role,
                handle_id: handle.id(),
                state: handle.state(),
                size: handle.pool().size(),
                idle: handle.pool().num_idle(),
                age_secs: handle.age().as_secs(),
                settings: *handle.settings(),
            })
            .collect();
        pools.sort_by(|a, b| {
            (a.tenant_id.as_str(), a.role.as_str()).cmp(&(b.tenant_id.as_str(), b.role.as_str()))
        });

        RegistryStats {
            cached_pools: pools.len(),
            max_pools: self.config.max_pools,
            pools,
        }
    }

    /// Provision the `role` pool of every active tenant that has a target for
    /// it. A directory failure aborts; per-tenant failures are reported.
    pub async fn warm_up(&self, role: DbRole) -> Result<Vec<WarmUpOutcome>> {
        let records = self.directory.list_active().await?;
        let mut outcomes = Vec::with_capacity(records.len());

        for record in records.iter().filter(|r| r.target(role).is_some()) {
            let tenant_id = record.id();
            let result = self
                .get_or_create(&tenant_id, role)
                .await
                .map(|handle| handle.id());
            outcomes.push(WarmUpOutcome { tenant_id, result });
        }

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        tracing::info!(
            "Warmed up {} {} pools ({} failed)",
            outcomes.len() - failed,
            role,
            failed
        );

        Ok(outcomes)
    }
}

#[async_trait]
impl<F: PoolFactory> PoolResolver for TenantPoolRegistry<F> {
    type Pool = F::Pool;

    async fn resolve(
        &self,
        tenant_id: &TenantId,
        role: DbRole,
    ) -> Result<Arc<PoolHandle<F::Pool>>> {
        self.get_or_create(tenant_id, role).await
    }
}

fn unshare(e: Arc<TenancyError>) -> TenancyError {
    Arc::try_unwrap(e).unwrap_or_else(|shared| (*shared).clone())
}

/// Drain a pool retired for capacity without holding up the caller that
/// pushed the registry over its limit
fn close_evicted<P: ManagedPool>(key: Arc<PoolKey>, handle: Arc<PoolHandle<P>>) {
    tracing::info!(
        "Evicting {} pool for tenant {} (capacity, handle {})",
        key.role,
        key.tenant_id,
        handle.id()
    );

    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                handle.close().await;
            });
        }
        Err(_) => tracing::warn!(
            "No runtime to drain evicted pool for tenant {}; it closes on drop",
            key.tenant_id
        ),
    }
}

/// Registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub cached_pools: usize,
    pub max_pools: u64,
    pub pools: Vec<PoolStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub tenant_id: TenantId,
    pub role: DbRole,
    pub handle_id: u64,
    pub state: PoolState,
    pub size: u32,
    pub idle: usize,
    pub age_secs: u64,
    pub settings: PoolSettings,
}

#[derive(Debug, Clone)]
pub struct WarmUpOutcome {
    pub tenant_id: TenantId,
    /// Handle id on success
    pub result: Result<u64>,
}
