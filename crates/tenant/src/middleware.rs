use crate::context::TenantContext;
use crate::extractor::TenantResolver;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Resolve the tenant for the request and run the rest of the stack inside
/// its context scope. The resolved `TenantId` is also added to the request
/// extensions for handlers that prefer an extractor.
///
/// ```ignore
/// let app = Router::new()
///     .route("/reports", get(reports))
///     .layer(axum::middleware::from_fn_with_state(resolver, tenant_scope));
/// ```
pub async fn tenant_scope(
    State(resolver): State<Arc<TenantResolver>>,
    mut request: Request,
    next: Next,
) -> Response {
    let tenant_id = resolver.resolve_parts(request.headers(), request.uri());
    tracing::debug!("Tenant ID set to: {}", tenant_id);

    request.extensions_mut().insert(tenant_id.clone());
    TenantContext::scope(tenant_id, next.run(request)).await
}
