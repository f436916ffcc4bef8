//! Tenant Directory
//!
//! Read side of the master store. Records are cached for a bounded time so a
//! hot tenant does not hit the master database on every pool miss, while a
//! tenant that is deactivated is seen as inactive at most `cache_ttl` later.

use crate::error::{Result, TenancyError};
use crate::store::TenantStore;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tenancy_models::{TenantId, TenantRecord};

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// How long a fetched record may be served from cache
    pub cache_ttl: Duration,
    /// Maximum number of cached records
    pub max_cached_records: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            max_cached_records: 1_000,
        }
    }
}

impl DirectoryConfig {
    pub fn from_env() -> Self {
        Self {
            cache_ttl: Duration::from_secs(
                std::env::var("TENANT_DIRECTORY_CACHE_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            max_cached_records: std::env::var("TENANT_DIRECTORY_MAX_RECORDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1_000),
        }
    }
}

#[derive(Clone)]
pub struct TenantDirectory {
    store: Arc<dyn TenantStore>,
    records: Cache<TenantId, TenantRecord>,
    cache_ttl: Duration,
}

impl TenantDirectory {
    pub fn new(store: Arc<dyn TenantStore>, config: DirectoryConfig) -> Self {
        let records = Cache::builder()
            .max_capacity(config.max_cached_records)
            .time_to_live(config.cache_ttl)
            .build();

        Self {
            store,
            records,
            cache_ttl: config.cache_ttl,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Look up an active tenant.
    ///
    /// Inactive records are cached like active ones, so reactivation is also
    /// picked up within the TTL. Misses are not cached.
    pub async fn find_active(&self, tenant_id: &TenantId) -> Result<TenantRecord> {
        let record = match self.records.get(tenant_id).await {
            Some(record) => record,
            None => self.load(tenant_id).await?,
        };
        ensure_active(tenant_id, record)
    }

    /// Like [`TenantDirectory::find_active`] but always reads the store,
    /// replacing whatever was cached.
    pub async fn refresh(&self, tenant_id: &TenantId) -> Result<TenantRecord> {
        let record = self.load(tenant_id).await?;
        ensure_active(tenant_id, record)
    }

    async fn load(&self, tenant_id: &TenantId) -> Result<TenantRecord> {
        match self.store.fetch(tenant_id).await? {
            Some(record) => {
                self.records.insert(tenant_id.clone(), record.clone()).await;
                Ok(record)
            }
            None => {
                self.records.invalidate(tenant_id).await;
                Err(TenancyError::TenantNotFound(tenant_id.to_string()))
            }
        }
    }

    /// All active tenants, always read from the store
    pub async fn list_active(&self) -> Result<Vec<TenantRecord>> {
        self.store.fetch_active().await
    }

    /// Drop the cached record so the next lookup reads the store
    pub async fn invalidate(&self, tenant_id: &TenantId) {
        self.records.invalidate(tenant_id).await;
    }

    pub fn invalidate_all(&self) {
        self.records.invalidate_all();
    }
}

fn ensure_active(tenant_id: &TenantId, record: TenantRecord) -> Result<TenantRecord> {
    if !record.is_active() {
        tracing::debug!("Tenant {} is registered but inactive", tenant_id);
        return Err(TenancyError::TenantInactive(tenant_id.to_string()));
    }
    Ok(record)
}
