//! Task-local tenant context.
//!
//! The current tenant exists only inside a `scope`. Leaving the scope by any
//! path (return, error, panic, or the future being dropped) removes it, so a
//! tenant can never leak into the next unit of work on the same worker thread.

use std::future::Future;
use tenancy_models::TenantId;
use tokio::task_local;

task_local! {
    static CURRENT_TENANT: TenantId;
}

pub struct TenantContext;

impl TenantContext {
    /// Run a future with `tenant_id` as the current tenant.
    ///
    /// Nested scopes shadow the outer tenant and restore it on exit.
    pub async fn scope<F>(tenant_id: TenantId, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_TENANT.scope(tenant_id, future).await
    }

    /// Synchronous counterpart of [`TenantContext::scope`]
    pub fn sync_scope<F, R>(tenant_id: TenantId, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        CURRENT_TENANT.sync_scope(tenant_id, f)
    }

    /// The current tenant, if any
    pub fn current() -> Option<TenantId> {
        CURRENT_TENANT.try_with(|id| id.clone()).ok()
    }

    pub fn has_tenant() -> bool {
        CURRENT_TENANT
            .try_with(|id| !id.as_str().trim().is_empty())
            .unwrap_or(false)
    }
}
