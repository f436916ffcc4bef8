pub mod connection;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod factory;
pub mod handle;
pub mod memory;
pub mod registry;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use connection::{Database, DatabaseConfig};
pub use crypto::CredentialCipher;
pub use directory::{DirectoryConfig, TenantDirectory};
pub use error::{Result, TenancyError};
pub use factory::{ManagedPool, PgPoolFactory, PoolFactory};
pub use handle::{PoolHandle, PoolState};
pub use memory::MemoryTenantStore;
pub use registry::{
    PoolKey, PoolResolver, PoolStats, RegistryConfig, RegistryStats, TenantPoolRegistry,
    WarmUpOutcome,
};
pub use store::{PgTenantStore, TenantStore};
