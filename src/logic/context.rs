use std::future::Future;

use crate::error::{Result, TenancyError};
use crate::model::TenantId;

tokio::task_local! {
    static CURRENT_TENANT: TenantId;
}

/// Task-local holder of the tenant resolved for the running unit of work.
///
/// A value only exists inside [`Tenants::scope`] (or [`Tenants::sync_scope`])
/// and disappears when that future completes, fails or is dropped.
/// Concurrent tasks each see their own value. Spawned tasks do not inherit
/// the scope; wrap them with [`Tenants::propagate`].
pub struct Tenants;

impl Tenants {
    /// Run `fut` with `tenant` as the current tenant
    pub async fn scope<F>(tenant: TenantId, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_TENANT.scope(tenant, fut).await
    }

    pub fn sync_scope<F, R>(tenant: TenantId, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        CURRENT_TENANT.sync_scope(tenant, f)
    }

    /// Carry the caller's tenant (if any) into a future that will be
    /// spawned onto another task.
    pub fn propagate<F>(fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let tenant = Self::current();
        async move {
            match tenant {
                Some(tenant) => CURRENT_TENANT.scope(tenant, fut).await,
                None => fut.await,
            }
        }
    }

    pub fn current() -> Option<TenantId> {
        CURRENT_TENANT.try_with(|tenant| tenant.clone()).ok()
    }

    pub fn require() -> Result<TenantId> {
        Self::current().ok_or(TenancyError::TenantNotResolved)
    }
}
