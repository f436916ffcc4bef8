//! Connection pool construction.
//!
//! `PoolFactory` turns a tenant record plus a role into a live pool. The
//! registry never looks inside the pool beyond the `ManagedPool` surface, so
//! tests can substitute an in-memory pool.

use crate::crypto::CredentialCipher;
use crate::error::{Result, TenancyError};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres};
use tenancy_models::{DbRole, PoolSettings, TenantRecord};

/// Operations the registry needs from a pool
#[async_trait]
pub trait ManagedPool: Send + Sync + 'static {
    type Connection: Send;

    async fn acquire(&self) -> Result<Self::Connection>;

    /// Close gracefully: stop handing out connections and wait for checked
    /// out ones to be returned.
    async fn close(&self);

    fn is_closed(&self) -> bool;

    /// Open connections (idle + in use)
    fn size(&self) -> u32;

    fn num_idle(&self) -> usize;
}

#[async_trait]
impl ManagedPool for PgPool {
    type Connection = PoolConnection<Postgres>;

    async fn acquire(&self) -> Result<Self::Connection> {
        PgPool::acquire(self)
            .await
            .map_err(|e| TenancyError::Acquire(e.to_string()))
    }

    async fn close(&self) {
        PgPool::close(self).await
    }

    fn is_closed(&self) -> bool {
        PgPool::is_closed(self)
    }

    fn size(&self) -> u32 {
        PgPool::size(self)
    }

    fn num_idle(&self) -> usize {
        PgPool::num_idle(self)
    }
}

/// Builds one pool for one (tenant, role)
#[async_trait]
pub trait PoolFactory: Send + Sync + 'static {
    type Pool: ManagedPool;

    async fn build(
        &self,
        record: &TenantRecord,
        role: DbRole,
        settings: &PoolSettings,
    ) -> Result<Self::Pool>;
}

/// PostgreSQL pools via sqlx
#[derive(Debug, Clone, Default)]
pub struct PgPoolFactory {
    cipher: Option<CredentialCipher>,
}

impl PgPoolFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decrypt the `password` column with this cipher before connecting
    pub fn with_cipher(cipher: CredentialCipher) -> Self {
        Self {
            cipher: Some(cipher),
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self {
            cipher: CredentialCipher::from_env()?,
        })
    }

    /// Connect options for the role target, with the record's credentials applied
    pub fn connect_options(&self, record: &TenantRecord, role: DbRole) -> Result<PgConnectOptions> {
        let target = record
            .target(role)
            .ok_or_else(|| TenancyError::missing_target(&record.tenant_id, role))?;

        let mut options: PgConnectOptions = normalize_target(target).parse().map_err(|e| {
            TenancyError::Configuration(format!(
                "Invalid {} target for tenant {}: {}",
                role, record.tenant_id, e
            ))
        })?;

        if let Some(username) = record.username.as_deref().filter(|u| !u.is_empty()) {
            options = options.username(username);
        }

        if let Some(password) = record.password.as_deref().filter(|p| !p.is_empty()) {
            let password = match &self.cipher {
                Some(cipher) => cipher.decrypt(password)?,
                None => password.to_string(),
            };
            options = options.password(&password);
        }

        Ok(options)
    }
}

/// Strip a JDBC-style prefix (`jdbc:postgresql://…`) so sqlx can parse the URL
fn normalize_target(target: &str) -> &str {
    target.strip_prefix("jdbc:").unwrap_or(target)
}

#[async_trait]
impl PoolFactory for PgPoolFactory {
    type Pool = PgPool;

    async fn build(
        &self,
        record: &TenantRecord,
        role: DbRole,
        settings: &PoolSettings,
    ) -> Result<PgPool> {
        let options = self.connect_options(record, role)?;

        let pool_options = PgPoolOptions::new()
            .max_connections(settings.max_pool_size)
            .min_connections(settings.min_idle)
            .acquire_timeout(settings.connection_timeout)
            .idle_timeout(settings.idle_timeout)
            .max_lifetime(settings.max_lifetime)
            .test_before_acquire(true);

        // connect_with opens the first connection eagerly, so an unreachable
        // host or bad credentials fail here rather than on first query
        let pool = match tokio::time::timeout(
            settings.connection_timeout,
            pool_options.connect_with(options),
        )
        .await
        {
            Ok(Ok(pool)) => pool,
            Ok(Err(e)) => {
                return Err(TenancyError::PoolCreation(format!(
                    "Failed to connect to {} database of tenant {}: {}",
                    role, record.tenant_id, e
                )))
            }
            Err(_) => {
                return Err(TenancyError::PoolCreation(format!(
                    "Connecting to {} database of tenant {} timed out after {:?}",
                    role, record.tenant_id, settings.connection_timeout
                )))
            }
        };

        tracing::info!(
            "Created {} pool for tenant {} (max {}, min idle {})",
            role,
            record.tenant_id,
            settings.max_pool_size,
            settings.min_idle
        );

        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_target() {
        assert_eq!(
            normalize_target("jdbc:postgresql://acme-host:5432/acme"),
            "postgresql://acme-host:5432/acme"
        );
        assert_eq!(
            normalize_target("postgres://acme-host/acme"),
            "postgres://acme-host/acme"
        );
    }

    #[test]
    fn test_missing_role_target_is_configuration_error() {
        let record = TenantRecord::new("acme", "postgres://acme-host/acme");
        let err = PgPoolFactory::new()
            .connect_options(&record, DbRole::Archive)
            .unwrap_err();

        assert!(matches!(err, TenancyError::Configuration(msg) if msg.contains("missing target")));
    }

    #[test]
    fn test_connect_options_apply_credentials() {
        let mut record = TenantRecord::new("acme", "jdbc:postgresql://acme-host:6543/acme");
        record.username = Some("acme_app".to_string());
        record.password = Some("plain".to_string());

        let options = PgPoolFactory::new()
            .connect_options(&record, DbRole::Primary)
            .unwrap();

        assert_eq!(options.get_host(), "acme-host");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_username(), "acme_app");
        assert_eq!(options.get_database(), Some("acme"));
    }

    #[test]
    fn test_encrypted_password_requires_matching_key() {
        let cipher = CredentialCipher::new([0x42u8; 32]);
        let mut record = TenantRecord::new("acme", "postgres://acme-host/acme");
        record.password = Some(cipher.encrypt("s3cret").unwrap());

        let factory = PgPoolFactory::with_cipher(cipher);
        assert!(factory.connect_options(&record, DbRole::Primary).is_ok());

        let wrong = PgPoolFactory::with_cipher(CredentialCipher::new([0x01u8; 32]));
        assert!(matches!(
            wrong.connect_options(&record, DbRole::Primary),
            Err(TenancyError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_pool_creation_error() {
        let mut record = TenantRecord::new("acme", "postgres://127.0.0.1:1/acme");
        record.connection_timeout = Some(500);
        let settings = PoolSettings::resolve(&record);

        let err = PgPoolFactory::new()
            .build(&record, DbRole::Primary, &settings)
            .await
            .unwrap_err();

        assert!(matches!(err, TenancyError::PoolCreation(_)));
    }
}
