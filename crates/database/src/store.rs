use crate::error::{Result, TenancyError};
use async_trait::async_trait;
use sqlx::PgPool;
use tenancy_models::{TenantId, TenantRecord};

/// Source of tenant records (the master store)
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Fetch a tenant record regardless of its active flag
    async fn fetch(&self, tenant_id: &TenantId) -> Result<Option<TenantRecord>>;

    /// Fetch every active tenant record
    async fn fetch_active(&self) -> Result<Vec<TenantRecord>>;
}

const TENANT_COLUMNS: &str = r#"
    tenant_id, url, readdb, flexdb, appstoredb,
    username, password, dialect, version, db_properties,
    COALESCE(isactive, TRUE) AS isactive,
    maxpoolsize, minidle, connectiontimeout, idletimeout
"#;

/// `master_tenant` table in the master PostgreSQL database
#[derive(Clone)]
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a tenant registration
    pub async fn upsert(&self, record: &TenantRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO master_tenant (
                tenant_id, url, readdb, flexdb, appstoredb,
                username, password, dialect, version, db_properties,
                isactive, maxpoolsize, minidle, connectiontimeout, idletimeout
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (tenant_id) DO UPDATE SET
                url = EXCLUDED.url,
                readdb = EXCLUDED.readdb,
                flexdb = EXCLUDED.flexdb,
                appstoredb = EXCLUDED.appstoredb,
                username = EXCLUDED.username,
                password = EXCLUDED.password,
                dialect = EXCLUDED.dialect,
                version = EXCLUDED.version,
                db_properties = EXCLUDED.db_properties,
                isactive = EXCLUDED.isactive,
                maxpoolsize = EXCLUDED.maxpoolsize,
                minidle = EXCLUDED.minidle,
                connectiontimeout = EXCLUDED.connectiontimeout,
                idletimeout = EXCLUDED.idletimeout
            "#,
        )
        .bind(&record.tenant_id)
        .bind(&record.url)
        .bind(&record.read_db)
        .bind(&record.flex_db)
        .bind(&record.appstore_db)
        .bind(&record.username)
        .bind(&record.password)
        .bind(&record.dialect)
        .bind(record.version)
        .bind(&record.db_properties)
        .bind(record.is_active)
        .bind(record.max_pool_size)
        .bind(record.min_idle)
        .bind(record.connection_timeout)
        .bind(record.idle_timeout)
        .execute(&self.pool)
        .await
        .map_err(TenancyError::directory)?;

        tracing::info!("Registered tenant {}", record.tenant_id);
        Ok(())
    }

    /// Flip the active flag; returns false when no such tenant exists
    pub async fn set_active(&self, tenant_id: &TenantId, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE master_tenant SET isactive = $1 WHERE tenant_id = $2")
            .bind(active)
            .bind(tenant_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(TenancyError::directory)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn fetch(&self, tenant_id: &TenantId) -> Result<Option<TenantRecord>> {
        let query = format!(
            "SELECT {} FROM master_tenant WHERE tenant_id = $1",
            TENANT_COLUMNS
        );

        sqlx::query_as::<_, TenantRecord>(&query)
            .bind(tenant_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(TenancyError::directory)
    }

    async fn fetch_active(&self) -> Result<Vec<TenantRecord>> {
        let query = format!(
            "SELECT {} FROM master_tenant WHERE COALESCE(isactive, TRUE) ORDER BY tenant_id",
            TENANT_COLUMNS
        );

        sqlx::query_as::<_, TenantRecord>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(TenancyError::directory)
    }
}
