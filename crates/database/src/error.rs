use tenancy_models::DbRole;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TenancyError>;

/// Failures surfaced by the tenant directory, pool factory and registry.
///
/// Payloads are strings so a single construction failure can be handed to
/// every caller that was waiting on the same pool.
#[derive(Debug, Clone, Error)]
pub enum TenancyError {
    #[error("Tenant directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Tenant '{0}' not found")]
    TenantNotFound(String),

    #[error("Tenant '{0}' is not active")]
    TenantInactive(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Pool creation failed: {0}")]
    PoolCreation(String),

    #[error("Pool for tenant '{tenant_id}' ({role}) is closed")]
    PoolClosed { tenant_id: String, role: DbRole },

    #[error("Connection acquisition failed: {0}")]
    Acquire(String),

    #[error("No tenant set in the current context")]
    NoTenantContext,
}

impl TenancyError {
    pub fn directory(e: sqlx::Error) -> Self {
        Self::DirectoryUnavailable(e.to_string())
    }

    pub fn missing_target(tenant_id: &str, role: DbRole) -> Self {
        Self::Configuration(format!(
            "missing target for role {} of tenant {}",
            role, tenant_id
        ))
    }

    /// Short stable name for logs and API payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DirectoryUnavailable(_) => "directory_unavailable",
            Self::TenantNotFound(_) => "tenant_not_found",
            Self::TenantInactive(_) => "tenant_inactive",
            Self::Configuration(_) => "configuration_error",
            Self::PoolCreation(_) => "pool_creation_error",
            Self::PoolClosed { .. } => "pool_closed",
            Self::Acquire(_) => "acquire_error",
            Self::NoTenantContext => "no_tenant_context",
        }
    }

    /// Whether a later attempt by the caller may succeed without any change
    /// to tenant metadata. Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DirectoryUnavailable(_)
                | Self::PoolCreation(_)
                | Self::PoolClosed { .. }
                | Self::Acquire(_)
        )
    }
}
