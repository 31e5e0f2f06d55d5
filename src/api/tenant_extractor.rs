use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::error::TenancyError;
use crate::logic::{ResolverChain, Tenants};
use crate::model::TenantId;
use crate::store::{SchemaSessionManager, TenantSession};

/// Middleware that resolves the tenant once per request.
///
/// The tenant is stored in the request extensions and installed in
/// [`Tenants`] for everything the rest of the stack runs for this request.
pub async fn resolve_tenant(
    State(chain): State<Arc<ResolverChain>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let tenant = match chain.resolve(&parts) {
        Ok(tenant) => tenant,
        Err(err) => return err.into_response(),
    };

    parts.extensions.insert(tenant.clone());
    Tenants::scope(tenant, next.run(Request::from_parts(parts, body))).await
}

/// The tenant resolved for this request
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentTenant(pub TenantId);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = TenancyError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantId>()
            .cloned()
            .or_else(Tenants::current)
            .map(CurrentTenant)
            .ok_or(TenancyError::TenantNotResolved)
    }
}

/// Per-request tenant transaction.
///
/// Handlers commit explicitly; a session dropped without commit (handler
/// error, panic or cancelled request) is rolled back.
#[async_trait]
impl<S> FromRequestParts<S> for TenantSession
where
    S: Send + Sync,
    Arc<SchemaSessionManager>: FromRef<S>,
{
    type Rejection = TenancyError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let manager = Arc::<SchemaSessionManager>::from_ref(state);
        let tenant = parts.extensions.get::<TenantId>().cloned();
        manager.acquire(tenant.as_ref()).await
    }
}
