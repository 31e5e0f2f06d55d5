use axum::{middleware, routing::get, Router};

use crate::api::tenant_extractor::resolve_tenant;
use crate::api::{handlers, AppState};

/// Tenant-scoped routes are served both at the root (header / subdomain
/// resolution) and below `<path_prefix>/:tenant` (path resolution).
pub fn create_router(state: AppState, path_prefix: &str) -> Router {
    let tenant_routes = Router::new()
        .route("/tenant", get(handlers::current_tenant))
        .route(
            "/customers",
            get(handlers::list_customers).post(handlers::create_customer),
        );

    let nested_at = format!("{}/:tenant", path_prefix.trim_end_matches('/'));

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .merge(tenant_routes.clone())
        .nest(&nested_at, tenant_routes)
        .layer(middleware::from_fn_with_state(
            state.chain.clone(),
            resolve_tenant,
        ))
        .with_state(state)
}
