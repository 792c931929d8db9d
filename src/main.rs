use std::error::Error;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sea_orm::Database;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use nasman::backup::{BackupService, EncryptionService};
use nasman::config::Settings;
use nasman::db::enums::BackupType;
use nasman::db::services::router_service;
use nasman::locks::RouterLocks;
use nasman::provisioning::{FailoverService, Orchestrator};
use nasman::sync::SyncService;
use nasman::transport;

#[derive(Parser)]
#[command(name = "nasman", version, about = "RADIUS edge-router provisioning and credential sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Configure a router for RADIUS authentication, end to end
    Provision {
        router_id: i32,
        /// User id to record as the actor on the provisioning log
        #[arg(long)]
        actor: Option<i32>,
    },
    /// Sync one customer's credential mirror onto a router
    SyncCustomer { customer_id: i32, router_id: i32 },
    /// Enable a customer's mirror, creating it if missing
    EnableCustomer { customer_id: i32, router_id: i32 },
    /// Disable a customer's mirror without deleting it
    DisableCustomer { customer_id: i32, router_id: i32 },
    /// Remove a customer's mirror from the router
    RemoveCustomer { customer_id: i32, router_id: i32 },
    /// Sync every active customer of the router's tenant onto it
    SyncRouter { router_id: i32 },
    /// Sync all provisioned routers of a tenant, concurrency-bounded
    SyncFleet { tenant_id: i32 },
    /// Switch a router to RADIUS-primary authentication
    RadiusMode { router_id: i32 },
    /// Switch a router back to local-primary authentication
    LocalMode { router_id: i32 },
    /// Show the router's RADIUS wiring as the device reports it
    RadiusStatus { router_id: i32 },
    /// Take an encrypted configuration backup of a router
    Backup {
        router_id: i32,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Restore a stored backup onto its router
    Restore { router_id: i32, backup_id: i32 },
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stdout))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    init_logging();
    let cli = Cli::parse();

    let settings = Settings::from_env()?;
    let db = Arc::new(Database::connect(&settings.database_url).await?);
    info!(version = env!("CARGO_PKG_VERSION"), "nasman starting");
    let locks = Arc::new(RouterLocks::new());
    let crypto = Arc::new(EncryptionService::new(&settings.backup_encryption_key)?);
    let backups = BackupService::new(db.clone(), crypto);
    let orchestrator = Orchestrator::new(
        db.clone(),
        settings.clone(),
        locks.clone(),
        backups.clone(),
    );
    let sync = SyncService::new(db.clone(), settings.clone(), locks.clone());
    let failover = FailoverService::new(db.clone(), settings.clone(), locks.clone());

    match cli.command {
        Command::Provision { router_id, actor } => {
            let outcome = orchestrator.provision(router_id, actor).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Command::SyncCustomer {
            customer_id,
            router_id,
        } => {
            let outcome = sync.sync_customer(customer_id, router_id).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::EnableCustomer {
            customer_id,
            router_id,
        } => {
            let outcome = sync.enable_customer(customer_id, router_id).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::DisableCustomer {
            customer_id,
            router_id,
        } => {
            let outcome = sync.disable_customer(customer_id, router_id).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::RemoveCustomer {
            customer_id,
            router_id,
        } => {
            let outcome = sync.remove_customer(customer_id, router_id).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::SyncRouter { router_id } => {
            let report = sync.sync_router(router_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::SyncFleet { tenant_id } => {
            let report = sync.sync_fleet(tenant_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::RadiusMode { router_id } => {
            let outcome = failover.switch_to_radius(router_id).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::LocalMode { router_id } => {
            let outcome = failover.switch_to_local(router_id).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::RadiusStatus { router_id } => {
            let status = failover.radius_status(router_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Backup { router_id, notes } => {
            let router = router_service::find_by_id(&db, router_id)
                .await?
                .ok_or_else(|| format!("router {router_id} not found"))?;
            let _guard = locks.lock(router_id).await;
            let device = transport::for_router(&router, settings.device_timeout)?;
            match backups
                .backup_router(
                    &router,
                    device.as_ref(),
                    BackupType::Manual,
                    None,
                    notes.as_deref(),
                )
                .await?
            {
                Some(backup) => println!("stored backup #{}", backup.id),
                None => println!("device yielded no configuration, nothing stored"),
            }
        }
        Command::Restore {
            router_id,
            backup_id,
        } => {
            let router = router_service::find_by_id(&db, router_id)
                .await?
                .ok_or_else(|| format!("router {router_id} not found"))?;
            let _guard = locks.lock(router_id).await;
            let device = transport::for_router(&router, settings.device_timeout)?;
            let report = backups
                .restore(&router, device.as_ref(), backup_id, None)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.succeeded() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
