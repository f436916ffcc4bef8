//! Effective pool configuration for a tenant.
//!
//! Every tunable is merged from three layers, first hit wins:
//! 1. the structured column on the tenant record
//! 2. the same key in the `db_properties` override blob
//! 3. the static default
//!
//! A blob that cannot be parsed is logged and ignored; it never fails pool
//! creation.

use crate::tenant::TenantRecord;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

pub const DEFAULT_MAX_POOL_SIZE: u32 = 3;
pub const DEFAULT_MIN_IDLE: u32 = 1;
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(600_000);
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_millis(1_800_000);

const KEY_MAX_POOL_SIZE: &str = "maxPoolSize";
const KEY_MIN_IDLE: &str = "minIdle";
const KEY_CONNECTION_TIMEOUT: &str = "connectionTimeout";
const KEY_IDLE_TIMEOUT: &str = "idleTimeout";

/// One layer of optional tuning values (structured columns or the blob)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolOverrides {
    pub max_pool_size: Option<u32>,
    pub min_idle: Option<u32>,
    pub connection_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

impl PoolOverrides {
    /// Structured layer taken from the tenant record columns. Negative values
    /// are treated as unset.
    pub fn from_record(record: &TenantRecord) -> Self {
        Self {
            max_pool_size: record.max_pool_size.and_then(|v| u32::try_from(v).ok()),
            min_idle: record.min_idle.and_then(|v| u32::try_from(v).ok()),
            connection_timeout_ms: record
                .connection_timeout
                .and_then(|v| u64::try_from(v).ok()),
            idle_timeout_ms: record.idle_timeout.and_then(|v| u64::try_from(v).ok()),
        }
    }

    /// Parse the override blob, a JSON object such as
    /// `{"maxPoolSize": 5, "idleTimeout": "60000"}`.
    ///
    /// Values may be numbers or numeric strings. A key whose value cannot be
    /// read as a non-negative integer is skipped. An empty blob yields no
    /// overrides.
    pub fn parse(blob: &str) -> Result<Self, serde_json::Error> {
        if blob.trim().is_empty() {
            return Ok(Self::default());
        }

        let props: Map<String, Value> = serde_json::from_str(blob)?;

        Ok(Self {
            max_pool_size: read_u64(&props, KEY_MAX_POOL_SIZE)
                .and_then(|v| u32::try_from(v).ok()),
            min_idle: read_u64(&props, KEY_MIN_IDLE).and_then(|v| u32::try_from(v).ok()),
            connection_timeout_ms: read_u64(&props, KEY_CONNECTION_TIMEOUT),
            idle_timeout_ms: read_u64(&props, KEY_IDLE_TIMEOUT),
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn read_u64(props: &Map<String, Value>, key: &str) -> Option<u64> {
    let value = props.get(key)?;
    let parsed = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    if parsed.is_none() && !value.is_null() {
        tracing::warn!("Ignoring unparsable override '{}': {}", key, value);
    }

    parsed
}

/// Fully resolved pool tuning, one value per tunable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSettings {
    pub max_pool_size: u32,
    pub min_idle: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            min_idle: DEFAULT_MIN_IDLE,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_lifetime: DEFAULT_MAX_LIFETIME,
        }
    }
}

impl PoolSettings {
    /// Merge structured values over blob values over static defaults.
    ///
    /// The result is normalised: pool size is at least 1, `min_idle` never
    /// exceeds the pool size, and a zero timeout falls back to the default.
    pub fn merge(structured: &PoolOverrides, blob: &PoolOverrides) -> Self {
        let defaults = Self::default();

        let max_pool_size = structured
            .max_pool_size
            .or(blob.max_pool_size)
            .unwrap_or(defaults.max_pool_size)
            .max(1);
        let min_idle = structured
            .min_idle
            .or(blob.min_idle)
            .unwrap_or(defaults.min_idle)
            .min(max_pool_size);
        let connection_timeout = structured
            .connection_timeout_ms
            .or(blob.connection_timeout_ms)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.connection_timeout);
        let idle_timeout = structured
            .idle_timeout_ms
            .or(blob.idle_timeout_ms)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.idle_timeout);

        Self {
            max_pool_size,
            min_idle,
            connection_timeout,
            idle_timeout,
            max_lifetime: defaults.max_lifetime,
        }
    }

    /// Effective settings for a tenant record
    pub fn resolve(record: &TenantRecord) -> Self {
        let structured = PoolOverrides::from_record(record);
        let blob = match record.db_properties.as_deref() {
            Some(raw) => PoolOverrides::parse(raw).unwrap_or_else(|e| {
                tracing::warn!(
                    "Malformed db_properties for tenant {}, ignoring overrides: {}",
                    record.tenant_id,
                    e
                );
                PoolOverrides::default()
            }),
            None => PoolOverrides::default(),
        };

        Self::merge(&structured, &blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(max_pool_size: Option<i32>, blob: Option<&str>) -> TenantRecord {
        let mut record = TenantRecord::new("acme", "postgres://acme-host/primary");
        record.max_pool_size = max_pool_size;
        record.db_properties = blob.map(str::to_string);
        record
    }

    #[test]
    fn test_structured_field_beats_blob() {
        let record = record_with(Some(7), Some(r#"{"maxPoolSize": 5}"#));
        assert_eq!(PoolSettings::resolve(&record).max_pool_size, 7);
    }

    #[test]
    fn test_blob_used_when_field_null() {
        let record = record_with(None, Some(r#"{"maxPoolSize": 5}"#));
        assert_eq!(PoolSettings::resolve(&record).max_pool_size, 5);
    }

    #[test]
    fn test_malformed_blob_falls_back_to_default() {
        let record = record_with(None, Some("{maxPoolSize: five"));
        assert_eq!(
            PoolSettings::resolve(&record).max_pool_size,
            DEFAULT_MAX_POOL_SIZE
        );
    }

    #[test]
    fn test_absent_blob_falls_back_to_default() {
        let record = record_with(None, None);
        assert_eq!(PoolSettings::resolve(&record), PoolSettings::default());
    }

    #[test]
    fn test_blob_accepts_numeric_strings() {
        let overrides =
            PoolOverrides::parse(r#"{"minIdle": "2", "idleTimeout": "60000", "maxPoolSize": 8.0}"#)
                .unwrap();

        assert_eq!(overrides.min_idle, Some(2));
        assert_eq!(overrides.idle_timeout_ms, Some(60_000));
        assert_eq!(overrides.max_pool_size, Some(8));
        assert_eq!(overrides.connection_timeout_ms, None);
    }

    #[test]
    fn test_blob_skips_bad_values_only() {
        let overrides =
            PoolOverrides::parse(r#"{"maxPoolSize": "lots", "minIdle": -1, "idleTimeout": 1000}"#)
                .unwrap();

        assert_eq!(overrides.max_pool_size, None);
        assert_eq!(overrides.min_idle, None);
        assert_eq!(overrides.idle_timeout_ms, Some(1000));
    }

    #[test]
    fn test_non_object_blob_is_malformed() {
        assert!(PoolOverrides::parse("[1, 2, 3]").is_err());
        assert!(PoolOverrides::parse("  ").unwrap().is_empty());
    }

    #[test]
    fn test_timeouts_merge_per_key() {
        let mut record = record_with(None, Some(r#"{"connectionTimeout": 5000, "idleTimeout": 9000}"#));
        record.idle_timeout = Some(1_000);

        let settings = PoolSettings::resolve(&record);
        assert_eq!(settings.connection_timeout, Duration::from_millis(5000));
        assert_eq!(settings.idle_timeout, Duration::from_millis(1000));
        assert_eq!(settings.max_lifetime, DEFAULT_MAX_LIFETIME);
    }

    #[test]
    fn test_normalisation() {
        let structured = PoolOverrides {
            max_pool_size: Some(0),
            min_idle: Some(10),
            connection_timeout_ms: Some(0),
            idle_timeout_ms: None,
        };

        let settings = PoolSettings::merge(&structured, &PoolOverrides::default());
        assert_eq!(settings.max_pool_size, 1);
        assert_eq!(settings.min_idle, 1);
        assert_eq!(settings.connection_timeout, DEFAULT_CONNECTION_TIMEOUT);
    }

    #[test]
    fn test_negative_structured_values_are_unset() {
        let mut record = record_with(Some(-4), Some(r#"{"maxPoolSize": 6}"#));
        record.connection_timeout = Some(-1);

        let settings = PoolSettings::resolve(&record);
        assert_eq!(settings.max_pool_size, 6);
        assert_eq!(settings.connection_timeout, DEFAULT_CONNECTION_TIMEOUT);
    }
}
