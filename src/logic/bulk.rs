use log::{error, info};

use crate::error::Result;
use crate::model::{BulkSummary, Direction, Scope, Target};
use crate::store::traits::{SchemaMigrator, TenantStore};

/// Migrate every active tenant one after another.
///
/// A tenant that fails is recorded in the summary and the loop moves on;
/// tenants migrated earlier keep their results. Only a failure to read the
/// registry itself aborts the run. A missing registry is created first, so a
/// fresh database migrates zero tenants instead of failing.
pub async fn migrate_all_tenants(
    store: &dyn TenantStore,
    migrator: &dyn SchemaMigrator,
    direction: Direction,
    target: &Target,
) -> Result<BulkSummary> {
    store.ensure_registry().await?;
    let tenants = store.list_tenants(true).await?;
    info!(
        "migrating {} active tenant(s) {direction} to {target}",
        tenants.len()
    );

    let mut summary = BulkSummary::default();
    for tenant in tenants {
        match migrator.run(&tenant.id, Scope::Tenant, direction, target).await {
            Ok(report) => {
                info!(
                    "tenant {}: {} changeset(s) executed",
                    tenant.id,
                    report.executed.len()
                );
                summary.succeeded.push(report);
            }
            Err(err) => {
                error!("tenant {} failed: {err}", tenant.id);
                summary.failed.push((tenant.id, err));
            }
        }
    }

    info!(
        "bulk migration finished: {} succeeded, {} failed",
        summary.succeeded.len(),
        summary.failed.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TenancyError;
    use crate::model::{MigrationReport, TenantId, TenantRecord};
    use crate::store::mem::MemoryTenantStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Registry whose table only exists once `ensure_registry` ran
    #[derive(Default)]
    struct LazyRegistry {
        created: AtomicBool,
        inner: MemoryTenantStore,
    }

    #[async_trait::async_trait]
    impl TenantStore for LazyRegistry {
        async fn ensure_registry(&self) -> Result<()> {
            self.created.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn create_tenant(&self, id: &TenantId) -> Result<TenantRecord> {
            self.inner.create_tenant(id).await
        }

        async fn drop_tenant(&self, id: &TenantId) -> Result<bool> {
            self.inner.drop_tenant(id).await
        }

        async fn get_tenant(&self, id: &TenantId) -> Result<Option<TenantRecord>> {
            self.inner.get_tenant(id).await
        }

        async fn list_tenants(&self, active_only: bool) -> Result<Vec<TenantRecord>> {
            if !self.created.load(Ordering::SeqCst) {
                return Err(TenancyError::Database(sqlx::Error::Protocol(
                    "relation \"tenants\" does not exist".to_string(),
                )));
            }
            self.inner.list_tenants(active_only).await
        }

        async fn set_active(&self, id: &TenantId, active: bool) -> Result<bool> {
            self.inner.set_active(id, active).await
        }
    }

    struct FakeMigrator {
        failing: &'static str,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl SchemaMigrator for FakeMigrator {
        async fn run(
            &self,
            schema: &TenantId,
            scope: Scope,
            direction: Direction,
            _target: &Target,
        ) -> Result<MigrationReport> {
            self.calls.lock().unwrap().push(schema.to_string());
            if schema.as_str() == self.failing {
                return Err(TenancyError::ChangesetFailed {
                    schema: schema.to_string(),
                    changeset: "0002_orders".to_string(),
                    source: sqlx::Error::RowNotFound,
                });
            }
            Ok(MigrationReport {
                schema: schema.clone(),
                scope,
                direction,
                executed: vec!["0001_customers".to_string()],
                skipped_empty: Vec::new(),
            })
        }
    }

    async fn store_with(ids: &[&str]) -> MemoryTenantStore {
        let store = MemoryTenantStore::new();
        for id in ids {
            store.create_tenant(&TenantId::parse(*id).unwrap()).await.unwrap();
            // distinct creation timestamps keep list order deterministic
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        store
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_other_tenants() {
        let store = store_with(&["t1", "t2", "t3"]).await;
        let migrator = FakeMigrator {
            failing: "t1",
            calls: Mutex::new(Vec::new()),
        };

        let summary = migrate_all_tenants(&store, &migrator, Direction::Up, &Target::Head)
            .await
            .unwrap();

        assert_eq!(*migrator.calls.lock().unwrap(), vec!["t1", "t2", "t3"]);
        assert!(!summary.is_success());
        let done: Vec<&str> = summary.succeeded.iter().map(|r| r.schema.as_str()).collect();
        assert_eq!(done, vec!["t2", "t3"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0.as_str(), "t1");
        assert!(summary.failed[0].1.to_string().contains("0002_orders"));
    }

    #[tokio::test]
    async fn test_inactive_tenants_are_skipped() {
        let store = store_with(&["t1", "t2"]).await;
        store
            .set_active(&TenantId::parse("t1").unwrap(), false)
            .await
            .unwrap();
        let migrator = FakeMigrator {
            failing: "none",
            calls: Mutex::new(Vec::new()),
        };

        let summary = migrate_all_tenants(&store, &migrator, Direction::Up, &Target::Head)
            .await
            .unwrap();

        assert!(summary.is_success());
        assert_eq!(*migrator.calls.lock().unwrap(), vec!["t2"]);
    }

    #[tokio::test]
    async fn test_fresh_registry_migrates_nothing() {
        let store = LazyRegistry::default();
        let migrator = FakeMigrator {
            failing: "none",
            calls: Mutex::new(Vec::new()),
        };

        let summary = migrate_all_tenants(&store, &migrator, Direction::Up, &Target::Head)
            .await
            .unwrap();

        assert!(store.created.load(Ordering::SeqCst));
        assert!(summary.is_success());
        assert!(summary.succeeded.is_empty());
        assert!(migrator.calls.lock().unwrap().is_empty());
    }
}
