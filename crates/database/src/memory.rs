// In-process tenant store for local development and tests

use crate::error::{Result, TenancyError};
use crate::store::TenantStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tenancy_models::{TenantId, TenantRecord};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryTenantStore {
    records: RwLock<BTreeMap<String, TenantRecord>>,
    unavailable: AtomicBool,
    fetches: AtomicUsize,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = TenantRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|r| (r.tenant_id.clone(), r))
            .collect();

        Self {
            records: RwLock::new(records),
            ..Self::default()
        }
    }

    pub async fn upsert(&self, record: TenantRecord) {
        self.records
            .write()
            .await
            .insert(record.tenant_id.clone(), record);
    }

    pub async fn remove(&self, tenant_id: &str) -> Option<TenantRecord> {
        self.records.write().await.remove(tenant_id)
    }

    pub async fn set_active(&self, tenant_id: &str, active: bool) -> bool {
        match self.records.write().await.get_mut(tenant_id) {
            Some(record) => {
                record.is_active = active;
                true
            }
            None => false,
        }
    }

    /// Simulate the master store going down (or coming back)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of single-record fetches served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TenancyError::DirectoryUnavailable(
                "master store is unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn fetch(&self, tenant_id: &TenantId) -> Result<Option<TenantRecord>> {
        self.check_available()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.read().await.get(tenant_id.as_str()).cloned())
    }

    async fn fetch_active(&self) -> Result<Vec<TenantRecord>> {
        self.check_available()?;
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.is_active())
            .cloned()
            .collect())
    }
}
