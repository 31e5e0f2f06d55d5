use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::{TenantId, TenantRecord};
use crate::store::traits::TenantStore;

/// In-memory tenant registry for tests and local tooling
#[derive(Debug, Default, Clone)]
pub struct MemoryTenantStore {
    tenants: Arc<RwLock<HashMap<TenantId, TenantRecord>>>,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TenantStore for MemoryTenantStore {
    async fn ensure_registry(&self) -> Result<()> {
        Ok(())
    }

    async fn create_tenant(&self, id: &TenantId) -> Result<TenantRecord> {
        let mut tenants = self.tenants.write().await;
        let record = tenants.entry(id.clone()).or_insert_with(|| TenantRecord {
            id: id.clone(),
            created_at: Utc::now(),
            is_active: true,
        });
        Ok(record.clone())
    }

    async fn drop_tenant(&self, id: &TenantId) -> Result<bool> {
        Ok(self.tenants.write().await.remove(id).is_some())
    }

    async fn get_tenant(&self, id: &TenantId) -> Result<Option<TenantRecord>> {
        Ok(self.tenants.read().await.get(id).cloned())
    }

    async fn list_tenants(&self, active_only: bool) -> Result<Vec<TenantRecord>> {
        let tenants = self.tenants.read().await;
        let mut records: Vec<TenantRecord> = tenants
            .values()
            .filter(|record| !active_only || record.is_active)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn set_active(&self, id: &TenantId, active: bool) -> Result<bool> {
        let mut tenants = self.tenants.write().await;
        match tenants.get_mut(id) {
            Some(record) => {
                record.is_active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
