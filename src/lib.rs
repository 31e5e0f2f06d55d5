pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::{create_router, AppState};

pub use error::{ErrorKind, Result, TenancyError};

// Export logic types
pub use logic::{
    migrate_all_tenants, HeaderResolver, MigrationPlan, PathResolver, PlanError, Resolver,
    ResolverChain, ResolverKind, SubdomainResolver, Tenants,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{
    ChangesetSource, DirectoryChangesets, MigrationOrchestrator, PostgresTenantStore,
    SchemaMigrator, SchemaSessionManager, StaticChangesets, TenantSession, TenantStore,
};

/// Build the application state and serve the demo router until shutdown.
pub async fn run_server() -> anyhow::Result<()> {
    use axum::serve;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    let config = crate::config::AppConfig::load()?;

    let sessions = SchemaSessionManager::connect(
        &config.database_url(),
        &config.database,
        &config.tenancy,
    )
    .await?;
    let chain = ResolverChain::from_config(&config.tenancy)?;
    log::info!("tenant resolution order: {:?}", chain.kinds());

    let state = AppState {
        sessions: Arc::new(sessions),
        chain: Arc::new(chain),
    };
    let app = create_router(state, &config.tenancy.path_prefix);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("tenancy server running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
