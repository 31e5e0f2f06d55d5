use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, LevelFilter};
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::sync::Arc;

use schema_tenancy::config::{AppConfig, LockPolicy};
use schema_tenancy::{
    Direction, DirectoryChangesets, MigrationOrchestrator, MigrationReport, PostgresTenantStore,
    Scope, Target, TenancyError, TenantId, TenantStore,
};

#[derive(Parser)]
#[command(name = "tenantctl")]
#[command(about = "Tenant registry and schema migration commands")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a tenant schema and register it
    Create { tenant: String },
    /// Drop a tenant schema (CASCADE) and remove it from the registry
    Drop {
        tenant: String,
        /// Confirm the drop
        #[arg(long)]
        yes: bool,
    },
    /// List registered tenants
    List {
        /// Include inactive tenants
        #[arg(long)]
        all: bool,
    },
    /// Mark a tenant active so bulk migrations include it
    Activate { tenant: String },
    /// Mark a tenant inactive so bulk migrations skip it
    Deactivate { tenant: String },
    /// Apply or revert changesets
    Migrate {
        #[arg(long, value_enum, default_value = "tenant")]
        scope: MigrateScope,
        /// Tenant schema, required with --scope tenant
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long, value_enum, default_value = "up")]
        direction: DirectionArg,
        /// head, base, a revision id, or +N / -N steps (-N only with --direction down)
        #[arg(long, default_value = "head", allow_hyphen_values = true)]
        target: String,
        /// Wait for the migration lock instead of failing fast
        #[arg(long)]
        wait: bool,
    },
    /// Show applied and pending changesets for one schema
    Status {
        #[arg(long, value_enum, default_value = "tenant")]
        scope: MigrateScope,
        #[arg(long)]
        tenant: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MigrateScope {
    Shared,
    Tenant,
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Up,
    Down,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Up => Direction::Up,
            DirectionArg::Down => Direction::Down,
        }
    }
}

fn print_report(report: &MigrationReport) {
    if report.is_noop() {
        println!("{} ({}): already at target", report.schema, report.scope);
    } else {
        println!(
            "{} ({}): {} {}",
            report.schema,
            report.scope,
            report.direction,
            report.executed.join(", ")
        );
    }
    for id in &report.skipped_empty {
        println!("  skipped empty changeset {id}");
    }
}

fn require_tenant(tenant: Option<String>) -> Result<TenantId> {
    let Some(tenant) = tenant else {
        bail!("--tenant is required for tenant scope");
    };
    Ok(TenantId::parse(tenant)?)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    let database_url = config.database_url();

    // Registry traffic is tiny; keep its pool separate and small
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let store = PostgresTenantStore::new(pool, &config.migration)?;

    let orchestrator = || -> Result<MigrationOrchestrator> {
        Ok(MigrationOrchestrator::new(
            database_url.clone(),
            &config.migration,
            config.tenancy.shared_schema()?,
            Arc::new(DirectoryChangesets::new(&config.migration.shared_dir)),
            Arc::new(DirectoryChangesets::new(&config.migration.tenant_dir)),
        )?)
    };

    match cli.command {
        Command::Create { tenant } => {
            let record = store.create_tenant(&TenantId::parse(tenant)?).await?;
            println!("created tenant {} ({})", record.id, record.created_at);
        }
        Command::Drop { tenant, yes } => {
            if !yes {
                println!("Use --yes to confirm drop");
                return Ok(ExitCode::FAILURE);
            }
            let id = TenantId::parse(tenant)?;
            if store.drop_tenant(&id).await? {
                println!("dropped tenant {id}");
            } else {
                println!("schema {id} dropped; it was not in the registry");
            }
        }
        Command::List { all } => {
            store.ensure_registry().await?;
            for record in store.list_tenants(!all).await? {
                let state = if record.is_active { "active" } else { "inactive" };
                println!("{}\t{}\t{}", record.id, state, record.created_at.to_rfc3339());
            }
        }
        Command::Activate { tenant } => {
            let id = TenantId::parse(tenant)?;
            if !store.set_active(&id, true).await? {
                bail!("tenant {id} is not registered");
            }
            println!("tenant {id} activated");
        }
        Command::Deactivate { tenant } => {
            let id = TenantId::parse(tenant)?;
            if !store.set_active(&id, false).await? {
                bail!("tenant {id} is not registered");
            }
            println!("tenant {id} deactivated");
        }
        Command::Migrate {
            scope,
            tenant,
            direction,
            target,
            wait,
        } => {
            let target: Target = target.parse()?;
            let direction = Direction::from(direction);
            let mut orchestrator = orchestrator()?;
            if wait {
                orchestrator = orchestrator.with_lock_policy(LockPolicy::Wait);
            }

            match scope {
                MigrateScope::Shared => {
                    print_report(&orchestrator.run_shared(direction, &target).await?);
                }
                MigrateScope::Tenant => {
                    let id = require_tenant(tenant)?;
                    let report = orchestrator
                        .run(&id, Scope::Tenant, direction, &target)
                        .await?;
                    print_report(&report);
                }
                MigrateScope::All => {
                    let summary = orchestrator
                        .run_all_tenants(&store, direction, &target)
                        .await?;
                    for report in &summary.succeeded {
                        print_report(report);
                    }
                    for (tenant, err) in &summary.failed {
                        println!("{tenant}: FAILED: {err}");
                    }
                    println!(
                        "{} tenant(s) migrated, {} failed",
                        summary.succeeded.len(),
                        summary.failed.len()
                    );
                    if !summary.is_success() {
                        return Ok(ExitCode::FAILURE);
                    }
                }
            }
        }
        Command::Status { scope, tenant } => {
            let orchestrator = orchestrator()?;
            let (schema, scope) = match scope {
                MigrateScope::Shared => (orchestrator.shared_schema().clone(), Scope::Shared),
                MigrateScope::Tenant => (require_tenant(tenant)?, Scope::Tenant),
                MigrateScope::All => bail!("status takes --scope shared or --scope tenant"),
            };
            let status = orchestrator.status(&schema, scope).await?;
            println!("{} ({})", status.schema, status.scope);
            for id in &status.applied {
                println!("  applied  {id}");
            }
            for id in &status.pending {
                println!("  pending  {id}");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            let Some(tenancy_err) = err.downcast_ref::<TenancyError>() else {
                return ExitCode::FAILURE;
            };
            if tenancy_err.is_retryable() {
                info!("this failure is transient; retry later");
            }
            ExitCode::from(tenancy_err.exit_code())
        }
    }
}
