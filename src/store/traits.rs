use crate::error::Result;
use crate::model::{Changeset, Direction, MigrationReport, Scope, Target, TenantId, TenantRecord};

/// Registry of known tenants, kept in the shared schema
#[async_trait::async_trait]
pub trait TenantStore: Send + Sync {
    /// Create the registry table if it is missing
    async fn ensure_registry(&self) -> Result<()>;
    /// Create the tenant's schema and registry row; existing tenants are returned unchanged
    async fn create_tenant(&self, id: &TenantId) -> Result<TenantRecord>;
    /// Drop the tenant's schema (cascading) and its registry row
    async fn drop_tenant(&self, id: &TenantId) -> Result<bool>;
    async fn get_tenant(&self, id: &TenantId) -> Result<Option<TenantRecord>>;
    /// Tenants ordered by creation time
    async fn list_tenants(&self, active_only: bool) -> Result<Vec<TenantRecord>>;
    async fn set_active(&self, id: &TenantId, active: bool) -> Result<bool>;
}

/// Applies or reverts changesets against a single schema.
#[async_trait::async_trait]
pub trait SchemaMigrator: Send + Sync {
    async fn run(
        &self,
        schema: &TenantId,
        scope: Scope,
        direction: Direction,
        target: &Target,
    ) -> Result<MigrationReport>;
}

/// Ordered changesets for one scope
pub trait ChangesetSource: Send + Sync {
    fn changesets(&self) -> Result<Vec<Changeset>>;
}
