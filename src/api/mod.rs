pub mod errors;
pub mod handlers;
pub mod routes;
pub mod tenant_extractor;

pub use errors::*;
pub use handlers::*;
pub use routes::*;
pub use tenant_extractor::*;

use axum::extract::FromRef;
use std::sync::Arc;

use crate::logic::ResolverChain;
use crate::store::SchemaSessionManager;

#[derive(Debug, Clone)]
pub struct AppState {
    pub sessions: Arc<SchemaSessionManager>,
    pub chain: Arc<ResolverChain>,
}

impl FromRef<AppState> for Arc<SchemaSessionManager> {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}
