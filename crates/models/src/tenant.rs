use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Identifier of a tenant as it appears in requests and in `master_tenant.tenant_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Logical database purpose for a tenant. Each role maps to one connection
/// target column on the tenant record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbRole {
    Primary,     // url
    ReadReplica, // readdb
    Secondary,   // flexdb
    Archive,     // appstoredb
}

impl DbRole {
    pub const ALL: [DbRole; 4] = [
        DbRole::Primary,
        DbRole::ReadReplica,
        DbRole::Secondary,
        DbRole::Archive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::ReadReplica => "read_replica",
            Self::Secondary => "secondary",
            Self::Archive => "archive",
        }
    }
}

impl Default for DbRole {
    fn default() -> Self {
        Self::Primary
    }
}

impl fmt::Display for DbRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbRole {
    type Err = String;

    /// Accepts the canonical names as well as the legacy column-style aliases
    /// (`tac`, `read`, `flex`, `appstore`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" | "tac" | "url" => Ok(Self::Primary),
            "read_replica" | "read" | "readdb" => Ok(Self::ReadReplica),
            "secondary" | "flex" | "flexdb" => Ok(Self::Secondary),
            "archive" | "appstore" | "appstoredb" => Ok(Self::Archive),
            other => Err(format!("unknown database role '{}'", other)),
        }
    }
}

/// Tenant registration row from the master store (`master_tenant`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TenantRecord {
    pub tenant_id: String,
    pub url: Option<String>,
    #[sqlx(rename = "readdb")]
    pub read_db: Option<String>,
    #[sqlx(rename = "flexdb")]
    pub flex_db: Option<String>,
    #[sqlx(rename = "appstoredb")]
    pub appstore_db: Option<String>,
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub dialect: Option<String>,
    pub version: Option<i32>,
    pub db_properties: Option<String>,
    #[sqlx(rename = "isactive")]
    pub is_active: bool,
    #[sqlx(rename = "maxpoolsize")]
    pub max_pool_size: Option<i32>,
    #[sqlx(rename = "minidle")]
    pub min_idle: Option<i32>,
    /// Milliseconds
    #[sqlx(rename = "connectiontimeout")]
    pub connection_timeout: Option<i64>,
    /// Milliseconds
    #[sqlx(rename = "idletimeout")]
    pub idle_timeout: Option<i64>,
}

impl TenantRecord {
    /// Minimal active record with only a primary target; used by tooling and tests.
    pub fn new(tenant_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            url: Some(url.into()),
            read_db: None,
            flex_db: None,
            appstore_db: None,
            username: None,
            password: None,
            dialect: None,
            version: None,
            db_properties: None,
            is_active: true,
            max_pool_size: None,
            min_idle: None,
            connection_timeout: None,
            idle_timeout: None,
        }
    }

    pub fn id(&self) -> TenantId {
        TenantId::new(self.tenant_id.clone())
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Connection target for the role. Blank targets count as missing.
    pub fn target(&self, role: DbRole) -> Option<&str> {
        let target = match role {
            DbRole::Primary => self.url.as_deref(),
            DbRole::ReadReplica => self.read_db.as_deref(),
            DbRole::Secondary => self.flex_db.as_deref(),
            DbRole::Archive => self.appstore_db.as_deref(),
        };

        target.map(str::trim).filter(|t| !t.is_empty())
    }
}
