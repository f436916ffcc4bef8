// Request-scoped tenant context, tenant extraction from requests, and the
// connection source that routes data access to the current tenant's pool.

pub mod context;
pub mod extractor;
pub mod middleware;
pub mod routing;

pub use context::TenantContext;
pub use extractor::{RequestMetadata, ResolverConfig, TenantResolver};
pub use middleware::tenant_scope;
pub use routing::{run_as, Connection, RoutingConnectionSource};
