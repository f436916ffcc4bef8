use crate::error::{Result, TenancyError};
use crate::factory::ManagedPool;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tenancy_models::{DbRole, PoolSettings, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    Active,
    Closed,
}

/// One live pool bound to exactly one (tenant, role).
///
/// A handle only moves from `Active` to `Closed`. Once closed it rejects every
/// acquisition; the registry provisions a new handle (with a new id) for the
/// key on the next request.
pub struct PoolHandle<P> {
    id: u64,
    tenant_id: TenantId,
    role: DbRole,
    settings: PoolSettings,
    pool: P,
    closed: AtomicBool,
    created_at: Instant,
    /// Tenant generation the pool was provisioned under
    generation: u64,
    last_used: AtomicU64,
    /// Millis after `created_at` at which the tenant was last confirmed active
    validated_at_ms: AtomicU64,
}

impl<P: ManagedPool> PoolHandle<P> {
    pub fn new(id: u64, tenant_id: TenantId, role: DbRole, settings: PoolSettings, pool: P) -> Self {
        Self {
            id,
            tenant_id,
            role,
            settings,
            pool,
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            generation: 0,
            last_used: AtomicU64::new(0),
            validated_at_ms: AtomicU64::new(0),
        }
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Registry-unique id; a re-provisioned key always gets a fresh one
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn role(&self) -> DbRole {
        self.role
    }

    /// Effective settings the pool was built with
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// The underlying pool, e.g. to use `&PgPool` as a sqlx executor
    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn state(&self) -> PoolState {
        if self.is_closed() {
            PoolState::Closed
        } else {
            PoolState::Active
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.pool.is_closed()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Record a use at registry tick `tick`
    pub fn touch(&self, tick: u64) {
        self.last_used.fetch_max(tick, Ordering::Relaxed);
    }

    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    /// Connections currently checked out
    pub fn in_use(&self) -> u32 {
        self.pool.size().saturating_sub(self.pool.num_idle() as u32)
    }

    /// Whether the tenant was last confirmed active more than `ttl` ago
    pub fn needs_revalidation(&self, ttl: Duration) -> bool {
        let validated = Duration::from_millis(self.validated_at_ms.load(Ordering::Relaxed));
        self.age().saturating_sub(validated) >= ttl
    }

    pub fn mark_validated(&self) {
        let now = self.age().as_millis() as u64;
        self.validated_at_ms.fetch_max(now, Ordering::Relaxed);
    }

    pub async fn acquire(&self) -> Result<P::Connection> {
        if self.is_closed() {
            return Err(TenancyError::PoolClosed {
                tenant_id: self.tenant_id.to_string(),
                role: self.role,
            });
        }

        self.pool.acquire().await
    }

    /// Mark closed and drain the pool. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.pool.close().await;
        tracing::info!(
            "Closed {} pool for tenant {} (handle {})",
            self.role,
            self.tenant_id,
            self.id
        );
    }
}

impl<P> std::fmt::Debug for PoolHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("role", &self.role)
            .field("settings", &self.settings)
            .field("generation", &self.generation)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingPoolFactory;
    use crate::factory::PoolFactory;
    use tenancy_models::TenantRecord;

    async fn handle() -> PoolHandle<crate::testing::FakePool> {
        let record = TenantRecord::new("acme", "db://acme-host/primary");
        let settings = PoolSettings::default();
        let pool = CountingPoolFactory::new()
            .build(&record, DbRole::Primary, &settings)
            .await
            .unwrap();
        PoolHandle::new(1, "acme".into(), DbRole::Primary, settings, pool).with_generation(4)
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let handle = handle().await;
        assert!(handle.acquire().await.is_ok());
        assert_eq!(handle.pool().acquired(), 1);

        handle.close().await;
        handle.close().await;
        assert_eq!(handle.state(), PoolState::Closed);
        assert!(matches!(
            handle.acquire().await,
            Err(TenancyError::PoolClosed { .. })
        ));
        assert_eq!(handle.pool().acquired(), 1);
    }

    #[tokio::test]
    async fn test_revalidation_window() {
        let handle = handle().await;
        assert_eq!(handle.generation(), 4);
        assert!(!handle.needs_revalidation(Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(handle.needs_revalidation(Duration::from_millis(20)));

        handle.mark_validated();
        assert!(!handle.needs_revalidation(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_touch_keeps_latest_tick() {
        let handle = handle().await;
        handle.touch(7);
        handle.touch(3);
        assert_eq!(handle.last_used(), 7);
        assert_eq!(handle.in_use(), 0);
    }
}
