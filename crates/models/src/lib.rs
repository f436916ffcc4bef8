// Core tenancy data types shared by the directory, the pool registry and the
// request-scoped routing layer.

pub mod pool_settings;
pub mod tenant;

pub use pool_settings::{
    PoolOverrides, PoolSettings, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAX_LIFETIME, DEFAULT_MAX_POOL_SIZE, DEFAULT_MIN_IDLE,
};
pub use tenant::{DbRole, TenantId, TenantRecord};
