// In-memory pool doubles for exercising the registry without a database

use crate::error::{Result, TenancyError};
use crate::factory::{ManagedPool, PoolFactory};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tenancy_models::{DbRole, PoolSettings, TenantRecord};

/// Connection handed out by `FakePool`; records where it points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeConnection {
    pub tenant_id: String,
    pub role: DbRole,
    pub target: String,
}

#[derive(Debug)]
pub struct FakePool {
    pub tenant_id: String,
    pub role: DbRole,
    pub target: String,
    pub settings: PoolSettings,
    closed: AtomicBool,
    acquired: AtomicUsize,
}

impl FakePool {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManagedPool for FakePool {
    type Connection = FakeConnection;

    async fn acquire(&self) -> Result<FakeConnection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TenancyError::Acquire("pool closed".to_string()));
        }

        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            tenant_id: self.tenant_id.clone(),
            role: self.role,
            target: self.target.clone(),
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn size(&self) -> u32 {
        self.settings.min_idle
    }

    fn num_idle(&self) -> usize {
        self.settings.min_idle as usize
    }
}

/// Factory that counts constructions. Targets containing `unreachable` fail
/// the way an unreachable host would.
#[derive(Debug, Default)]
pub struct CountingPoolFactory {
    builds: AtomicUsize,
    delay: Duration,
}

impl CountingPoolFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep inside every build, widening the window for concurrent callers
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            builds: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolFactory for CountingPoolFactory {
    type Pool = FakePool;

    async fn build(
        &self,
        record: &TenantRecord,
        role: DbRole,
        settings: &PoolSettings,
    ) -> Result<FakePool> {
        let target = record
            .target(role)
            .ok_or_else(|| TenancyError::missing_target(&record.tenant_id, role))?
            .to_string();

        self.builds.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if target.contains("unreachable") {
            return Err(TenancyError::PoolCreation(format!(
                "connection refused: {}",
                target
            )));
        }

        Ok(FakePool {
            tenant_id: record.tenant_id.clone(),
            role,
            target,
            settings: *settings,
            closed: AtomicBool::new(false),
            acquired: AtomicUsize::new(0),
        })
    }
}
