//! Routing connection source.
//!
//! The single entry point data-access code uses to get a connection. Every
//! call reads the task-local tenant afresh and asks the resolver for that
//! tenant's pool; nothing about the "current" pool is remembered between
//! calls.

use crate::context::TenantContext;
use std::future::Future;
use std::sync::Arc;
use tenancy_database::{ManagedPool, PoolHandle, PoolResolver, Result, TenancyError};
use tenancy_models::{DbRole, TenantId};

pub type Connection<R> = <<R as PoolResolver>::Pool as ManagedPool>::Connection;

pub struct RoutingConnectionSource<R: PoolResolver> {
    resolver: Arc<R>,
}

impl<R: PoolResolver> Clone for RoutingConnectionSource<R> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
        }
    }
}

impl<R: PoolResolver> RoutingConnectionSource<R> {
    pub fn new(resolver: Arc<R>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Connection from the current tenant's primary pool
    pub async fn acquire(&self) -> Result<Connection<R>> {
        self.acquire_for(DbRole::Primary).await
    }

    /// Connection from the current tenant's pool for `role`.
    ///
    /// A pool closed between resolution and acquisition (reset or eviction)
    /// is resolved once more, which provisions its replacement.
    pub async fn acquire_for(&self, role: DbRole) -> Result<Connection<R>> {
        match self.pool_for(role).await?.acquire().await {
            Err(TenancyError::PoolClosed { tenant_id, .. }) => {
                tracing::debug!(
                    "{} pool for tenant {} closed before acquire, resolving again",
                    role,
                    tenant_id
                );
                self.pool_for(role).await?.acquire().await
            }
            result => result,
        }
    }

    /// Current tenant's primary pool handle, e.g. to run sqlx queries on `handle.pool()`
    pub async fn pool(&self) -> Result<Arc<PoolHandle<R::Pool>>> {
        self.pool_for(DbRole::Primary).await
    }

    pub async fn pool_for(&self, role: DbRole) -> Result<Arc<PoolHandle<R::Pool>>> {
        let tenant_id = current_tenant()?;
        self.resolver.resolve(&tenant_id, role).await
    }
}

fn current_tenant() -> Result<TenantId> {
    match TenantContext::current() {
        Some(tenant_id) if TenantContext::has_tenant() => Ok(tenant_id),
        _ => {
            tracing::warn!("Connection requested with no tenant in context");
            Err(TenancyError::NoTenantContext)
        }
    }
}

/// Run a unit of work on behalf of `tenant_id`, with the context bracketed
/// around it. Use this for background jobs that do not come through the HTTP
/// middleware.
pub async fn run_as<F>(tenant_id: impl Into<TenantId>, work: F) -> F::Output
where
    F: Future,
{
    TenantContext::scope(tenant_id.into(), work).await
}
