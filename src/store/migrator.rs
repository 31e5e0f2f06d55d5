use log::{info, warn};
use sqlx::{Connection, Executor, PgConnection, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::{LockPolicy, MigrationConfig};
use crate::error::{Result, TenancyError};
use crate::logic::bulk::migrate_all_tenants;
use crate::logic::planner::{self, MigrationPlan};
use crate::model::{
    AppliedChangeset, BulkSummary, Changeset, Direction, MigrationReport, MigrationStatus, Scope,
    Target, TenantId,
};
use crate::store::traits::{ChangesetSource, SchemaMigrator, TenantStore};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Applies changesets to one schema at a time over a dedicated connection.
///
/// Every run holds the session-level advisory lock
/// `(lock_id, hashtext(schema))` for its whole duration, so two runs never
/// write the same schema concurrently and a crashed run releases the lock
/// when its connection goes away. Request traffic and its pool are never
/// involved.
pub struct MigrationOrchestrator {
    database_url: String,
    lock_id: i32,
    lock_policy: LockPolicy,
    lock_wait: Duration,
    version_table: TenantId,
    shared_schema: TenantId,
    shared: Arc<dyn ChangesetSource>,
    tenant: Arc<dyn ChangesetSource>,
}

impl MigrationOrchestrator {
    pub fn new(
        database_url: impl Into<String>,
        config: &MigrationConfig,
        shared_schema: TenantId,
        shared: Arc<dyn ChangesetSource>,
        tenant: Arc<dyn ChangesetSource>,
    ) -> Result<Self> {
        Ok(Self {
            database_url: database_url.into(),
            lock_id: config.lock_id,
            lock_policy: config.lock_policy,
            lock_wait: config.lock_wait(),
            version_table: TenantId::schema(config.version_table.as_str())?,
            shared_schema,
            shared,
            tenant,
        })
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn shared_schema(&self) -> &TenantId {
        &self.shared_schema
    }

    fn source(&self, scope: Scope) -> &dyn ChangesetSource {
        match scope {
            Scope::Shared => self.shared.as_ref(),
            Scope::Tenant => self.tenant.as_ref(),
        }
    }

    /// Shared changesets only ever land in the shared schema and tenant
    /// changesets never do.
    fn check_scope(&self, schema: &TenantId, scope: Scope) -> Result<()> {
        let reason = match scope {
            Scope::Shared if *schema != self.shared_schema => {
                "shared scope must target the shared schema"
            }
            Scope::Tenant if *schema == self.shared_schema => {
                "tenant scope cannot target the shared schema"
            }
            _ => return Ok(()),
        };
        Err(TenancyError::InvalidTenantId {
            value: schema.to_string(),
            reason,
        })
    }

    fn version_table_ref(&self, schema: &TenantId) -> String {
        format!("{}.{}", schema.quoted(), self.version_table.quoted())
    }

    async fn connect(&self) -> Result<PgConnection> {
        Ok(PgConnection::connect(&self.database_url).await?)
    }

    /// Apply or revert changesets of `scope` against `schema`.
    pub async fn run(
        &self,
        schema: &TenantId,
        scope: Scope,
        direction: Direction,
        target: &Target,
    ) -> Result<MigrationReport> {
        self.check_scope(schema, scope)?;
        let available = self.source(scope).changesets()?;

        let mut conn = self.connect().await?;
        let result = match self.acquire_lock(&mut conn, schema).await {
            Ok(()) => {
                let result = self
                    .run_locked(&mut conn, schema, scope, direction, target, &available)
                    .await;
                self.release_lock(&mut conn, schema).await;
                result
            }
            Err(err) => Err(err),
        };

        if let Err(err) = conn.close().await {
            warn!("closing migration connection for {schema} failed: {err}");
        }
        result
    }

    /// Migrate the shared schema.
    pub async fn run_shared(&self, direction: Direction, target: &Target) -> Result<MigrationReport> {
        let schema = self.shared_schema.clone();
        self.run(&schema, Scope::Shared, direction, target).await
    }

    /// Migrate every active tenant in the registry, best effort.
    pub async fn run_all_tenants(
        &self,
        store: &dyn TenantStore,
        direction: Direction,
        target: &Target,
    ) -> Result<BulkSummary> {
        migrate_all_tenants(store, self, direction, target).await
    }

    /// Applied and pending changesets without taking the lock or changing anything.
    pub async fn status(&self, schema: &TenantId, scope: Scope) -> Result<MigrationStatus> {
        self.check_scope(schema, scope)?;
        let available = self.source(scope).changesets()?;

        let mut conn = self.connect().await?;
        let applied = self.read_applied(&mut conn, schema).await;
        if let Err(err) = conn.close().await {
            warn!("closing migration connection for {schema} failed: {err}");
        }
        let applied = applied?;

        planner::verify_history(&available, &applied).map_err(|source| {
            TenancyError::InvalidPlan {
                schema: schema.to_string(),
                source,
            }
        })?;

        Ok(MigrationStatus {
            schema: schema.clone(),
            scope,
            pending: planner::pending(&available, &applied),
            applied: applied.into_iter().map(|record| record.id).collect(),
        })
    }

    async fn acquire_lock(&self, conn: &mut PgConnection, schema: &TenantId) -> Result<()> {
        let wait = match self.lock_policy {
            LockPolicy::FailFast => Duration::ZERO,
            LockPolicy::Wait => self.lock_wait,
        };
        let deadline = Instant::now() + wait;

        loop {
            let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1, hashtext($2))")
                .bind(self.lock_id)
                .bind(schema.as_str())
                .fetch_one(&mut *conn)
                .await?;
            if acquired {
                info!("migration lock acquired for {schema}");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TenancyError::MigrationLockTimeout {
                    schema: schema.to_string(),
                });
            }
            sleep(LOCK_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn release_lock(&self, conn: &mut PgConnection, schema: &TenantId) {
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1, hashtext($2))")
            .bind(self.lock_id)
            .bind(schema.as_str())
            .fetch_one(&mut *conn)
            .await;
        match released {
            Ok(true) => {}
            // closing the connection drops the lock anyway
            Ok(false) => warn!("migration lock for {schema} was not held at release"),
            Err(err) => warn!("releasing migration lock for {schema} failed: {err}"),
        }
    }

    async fn run_locked(
        &self,
        conn: &mut PgConnection,
        schema: &TenantId,
        scope: Scope,
        direction: Direction,
        target: &Target,
        available: &[Changeset],
    ) -> Result<MigrationReport> {
        let create = format!("CREATE SCHEMA IF NOT EXISTS {}", schema.quoted());
        (&mut *conn)
            .execute(create.as_str())
            .await
            .map_err(|source| TenancyError::SchemaCreation {
                schema: schema.to_string(),
                source,
            })?;

        let search_path = match scope {
            Scope::Shared => schema.quoted(),
            Scope::Tenant => format!("{}, {}", schema.quoted(), self.shared_schema.quoted()),
        };
        (&mut *conn)
            .execute(format!("SET search_path TO {search_path}").as_str())
            .await?;

        self.ensure_version_table(conn, schema).await?;
        let applied = self.read_applied(conn, schema).await?;

        let plan = planner::plan(available, &applied, direction, target).map_err(|source| {
            TenancyError::InvalidPlan {
                schema: schema.to_string(),
                source,
            }
        })?;

        info!(
            "migrating {scope} schema {schema} {direction} to {target}: {} changeset(s)",
            plan.steps.len()
        );
        let executed = self.execute_plan(conn, schema, &plan).await?;

        Ok(MigrationReport {
            schema: schema.clone(),
            scope,
            direction,
            executed,
            skipped_empty: plan.skipped_empty,
        })
    }

    /// One transaction per changeset: the script and its version row
    /// commit together or not at all.
    async fn execute_plan(
        &self,
        conn: &mut PgConnection,
        schema: &TenantId,
        plan: &MigrationPlan,
    ) -> Result<Vec<String>> {
        let table = self.version_table_ref(schema);
        let mut executed = Vec::with_capacity(plan.steps.len());

        for changeset in &plan.steps {
            let failed = |source: sqlx::Error| TenancyError::ChangesetFailed {
                schema: schema.to_string(),
                changeset: changeset.id.clone(),
                source,
            };

            let mut tx = conn.begin().await?;
            match plan.direction {
                Direction::Up => {
                    (&mut *tx).execute(changeset.up.as_str()).await.map_err(failed)?;
                    sqlx::query(&format!(
                        "INSERT INTO {table} (changeset_id, checksum) VALUES ($1, $2)"
                    ))
                    .bind(&changeset.id)
                    .bind(changeset.checksum())
                    .execute(&mut *tx)
                    .await
                    .map_err(failed)?;
                }
                Direction::Down => {
                    // the planner refuses changesets without a down script
                    let down = changeset.down.as_deref().unwrap_or_default();
                    (&mut *tx).execute(down).await.map_err(failed)?;
                    sqlx::query(&format!("DELETE FROM {table} WHERE changeset_id = $1"))
                        .bind(&changeset.id)
                        .execute(&mut *tx)
                        .await
                        .map_err(failed)?;
                }
            }
            tx.commit().await.map_err(failed)?;

            info!("{schema}: {} {}", plan.direction, changeset.id);
            executed.push(changeset.id.clone());
        }

        Ok(executed)
    }

    async fn ensure_version_table(&self, conn: &mut PgConnection, schema: &TenantId) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                seq BIGSERIAL PRIMARY KEY,
                changeset_id TEXT NOT NULL UNIQUE,
                checksum TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.version_table_ref(schema)
        );
        (&mut *conn).execute(ddl.as_str()).await?;
        Ok(())
    }

    /// Version rows of exactly this schema, oldest first. A schema that was
    /// never migrated has no table and therefore no versions.
    async fn read_applied(
        &self,
        conn: &mut PgConnection,
        schema: &TenantId,
    ) -> Result<Vec<AppliedChangeset>> {
        let table = self.version_table_ref(schema);
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1::cstring) IS NOT NULL")
            .bind(&table)
            .fetch_one(&mut *conn)
            .await?;
        if !exists {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT changeset_id, checksum, applied_at FROM {table} ORDER BY seq"
        ))
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AppliedChangeset {
                id: row.get("changeset_id"),
                checksum: row.get("checksum"),
                applied_at: row.get("applied_at"),
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl SchemaMigrator for MigrationOrchestrator {
    async fn run(
        &self,
        schema: &TenantId,
        scope: Scope,
        direction: Direction,
        target: &Target,
    ) -> Result<MigrationReport> {
        MigrationOrchestrator::run(self, schema, scope, direction, target).await
    }
}
