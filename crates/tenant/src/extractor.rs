// Tenant resolution from inbound request metadata.
// Precedence: header, then query parameter, then host subdomain, then the
// configured default tenant.

use axum::http::{header, HeaderMap, Uri};
use std::collections::HashMap;
use std::net::IpAddr;
use tenancy_models::TenantId;

pub const DEFAULT_TENANT_HEADER: &str = "X-Tenant-ID";
pub const DEFAULT_TENANT_PARAMETER: &str = "tenantId";
pub const DEFAULT_TENANT_ID: &str = "default";

const RESERVED_SUBDOMAIN: &str = "www";

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub header: String,
    pub parameter: String,
    pub default_tenant: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            header: DEFAULT_TENANT_HEADER.to_string(),
            parameter: DEFAULT_TENANT_PARAMETER.to_string(),
            default_tenant: DEFAULT_TENANT_ID.to_string(),
        }
    }
}

impl ResolverConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            header: std::env::var("TENANT_HEADER").unwrap_or(defaults.header),
            parameter: std::env::var("TENANT_PARAMETER").unwrap_or(defaults.parameter),
            default_tenant: std::env::var("DEFAULT_TENANT").unwrap_or(defaults.default_tenant),
        }
    }
}

/// The parts of a request tenant resolution looks at
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    /// Value of the tenant header
    pub header: Option<String>,
    /// Decoded query parameters
    pub query: HashMap<String, String>,
    /// Host name without port
    pub host: Option<String>,
}

impl RequestMetadata {
    pub fn from_request_parts(headers: &HeaderMap, uri: &Uri, config: &ResolverConfig) -> Self {
        let header = headers
            .get(config.header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let query = uri
            .query()
            .and_then(|q| serde_urlencoded::from_str::<HashMap<String, String>>(q).ok())
            .unwrap_or_default();

        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| uri.host())
            .map(strip_port)
            .map(str::to_string);

        Self {
            header,
            query,
            host,
        }
    }
}

fn strip_port(host: &str) -> &str {
    host.rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map(|(name, _)| name)
        .unwrap_or(host)
}

#[derive(Debug, Clone, Default)]
pub struct TenantResolver {
    config: ResolverConfig,
}

impl TenantResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn resolve(&self, request: &RequestMetadata) -> TenantId {
        let resolved = non_blank(request.header.as_deref())
            .or_else(|| non_blank(request.query.get(&self.config.parameter).map(String::as_str)))
            .or_else(|| request.host.as_deref().and_then(subdomain));

        match resolved {
            Some(tenant_id) => {
                tracing::debug!("Resolved tenant ID: {}", tenant_id);
                TenantId::from(tenant_id)
            }
            None => {
                tracing::debug!(
                    "No tenant ID found in request, using default tenant: {}",
                    self.config.default_tenant
                );
                TenantId::new(self.config.default_tenant.clone())
            }
        }
    }

    /// Resolve straight from HTTP request parts
    pub fn resolve_parts(&self, headers: &HeaderMap, uri: &Uri) -> TenantId {
        self.resolve(&RequestMetadata::from_request_parts(headers, uri, &self.config))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// First label of a multi-label host, unless it is `www` or the host is an IP address
fn subdomain(host: &str) -> Option<&str> {
    if host.parse::<IpAddr>().is_ok() {
        return None;
    }
    let (label, rest) = host.split_once('.')?;
    if rest.is_empty() || label.eq_ignore_ascii_case(RESERVED_SUBDOMAIN) {
        return None;
    }
    non_blank(Some(label))
}
