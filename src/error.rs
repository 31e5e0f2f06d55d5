use thiserror::Error;

use crate::logic::planner::PlanError;

/// Stable classification of every failure the crate can surface.
///
/// Callers match on this instead of on `TenancyError` variants so that
/// HTTP status mapping and CLI exit codes stay fixed when variants gain
/// fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidTenant,
    TenantNotResolved,
    UnknownTenantSchema,
    PoolExhausted,
    MigrationLockTimeout,
    SchemaCreation,
    ChangesetFailed,
    InvalidPlan,
    ChangesetSource,
    Config,
    Database,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidTenant => "invalid_tenant",
            ErrorKind::TenantNotResolved => "tenant_not_resolved",
            ErrorKind::UnknownTenantSchema => "unknown_tenant_schema",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::MigrationLockTimeout => "migration_lock_timeout",
            ErrorKind::SchemaCreation => "schema_creation",
            ErrorKind::ChangesetFailed => "changeset_failed",
            ErrorKind::InvalidPlan => "invalid_plan",
            ErrorKind::ChangesetSource => "changeset_source",
            ErrorKind::Config => "config",
            ErrorKind::Database => "database",
        }
    }
}

#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("invalid tenant identifier {value:?}: {reason}")]
    InvalidTenantId { value: String, reason: &'static str },

    #[error("no tenant resolved for this unit of work")]
    TenantNotResolved,

    #[error("tenant schema {0:?} does not exist")]
    UnknownTenantSchema(String),

    #[error("timed out waiting for a pooled database connection")]
    PoolExhausted,

    #[error("migration lock for schema {schema:?} is held by another run")]
    MigrationLockTimeout { schema: String },

    #[error("failed to create schema {schema:?}: {source}")]
    SchemaCreation {
        schema: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("changeset {changeset} failed on schema {schema:?}: {source}")]
    ChangesetFailed {
        schema: String,
        changeset: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("cannot plan migration for schema {schema:?}: {source}")]
    InvalidPlan {
        schema: String,
        #[source]
        source: PlanError,
    },

    #[error("changeset source error: {0}")]
    ChangesetSource(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, TenancyError>;

impl TenancyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TenancyError::InvalidTenantId { .. } => ErrorKind::InvalidTenant,
            TenancyError::TenantNotResolved => ErrorKind::TenantNotResolved,
            TenancyError::UnknownTenantSchema(_) => ErrorKind::UnknownTenantSchema,
            TenancyError::PoolExhausted => ErrorKind::PoolExhausted,
            TenancyError::MigrationLockTimeout { .. } => ErrorKind::MigrationLockTimeout,
            TenancyError::SchemaCreation { .. } => ErrorKind::SchemaCreation,
            TenancyError::ChangesetFailed { .. } => ErrorKind::ChangesetFailed,
            TenancyError::InvalidPlan { .. } => ErrorKind::InvalidPlan,
            TenancyError::ChangesetSource(_) => ErrorKind::ChangesetSource,
            TenancyError::Config(_) => ErrorKind::Config,
            TenancyError::Database(_) => ErrorKind::Database,
        }
    }

    /// Whether retrying the same operation later can succeed without any
    /// operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::PoolExhausted | ErrorKind::MigrationLockTimeout
        )
    }

    /// Process exit code used by the operator CLI.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::InvalidTenant | ErrorKind::TenantNotResolved => 2,
            ErrorKind::UnknownTenantSchema => 3,
            ErrorKind::PoolExhausted | ErrorKind::MigrationLockTimeout => 75, // EX_TEMPFAIL
            ErrorKind::SchemaCreation | ErrorKind::ChangesetFailed => 4,
            ErrorKind::InvalidPlan | ErrorKind::ChangesetSource => 5,
            ErrorKind::Config => 78, // EX_CONFIG
            ErrorKind::Database => 1,
        }
    }

    /// Maps pool acquisition failures onto the retryable kind.
    pub(crate) fn from_acquire(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => TenancyError::PoolExhausted,
            other => TenancyError::Database(other),
        }
    }
}

impl From<config::ConfigError> for TenancyError {
    fn from(err: config::ConfigError) -> Self {
        TenancyError::Config(err.to_string())
    }
}
