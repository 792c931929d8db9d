//! First-connect provisioning.
//!
//! One run walks a fixed sequence of steps, recording each step's outcome in
//! a provisioning log that is finalized exactly once. Optional steps may
//! fail without failing the run; required steps may not.

use std::sync::Arc;

use sea_orm::{DatabaseConnection, DbErr};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::backup::BackupService;
use crate::config::Settings;
use crate::db::entities::router;
use crate::db::enums::{BackupType, ProvisioningState, ProvisioningStatus};
use crate::db::services::{nas_service, provisioning_log_service, router_service};
use crate::locks::RouterLocks;
use crate::provisioning::netwatch::{self, ProbeInstall};
use crate::transport::row::row_from;
use crate::transport::{
    RouterTransport, TransportError, TransportFactory, commands, default_factory, menus,
};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("router {0} not found")]
    RouterNotFound(i32),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("step log serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One entry of the step transcript stored on the provisioning log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub success: bool,
    pub message: String,
}

impl StepResult {
    fn ok(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            message: message.into(),
        }
    }

    fn failed(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProvisionOutcome {
    pub success: bool,
    pub log_id: i32,
    pub steps: Vec<StepResult>,
}

pub struct Orchestrator {
    db: Arc<DatabaseConnection>,
    settings: Settings,
    locks: Arc<RouterLocks>,
    backups: BackupService,
    transports: TransportFactory,
}

impl Orchestrator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        settings: Settings,
        locks: Arc<RouterLocks>,
        backups: BackupService,
    ) -> Self {
        Self {
            db,
            settings,
            locks,
            backups,
            transports: default_factory(),
        }
    }

    /// Swaps how device connections are made. Tests hand in an in-memory
    /// device here.
    pub fn with_transport_factory(mut self, transports: TransportFactory) -> Self {
        self.transports = transports;
        self
    }

    /// Configures a freshly reachable router for RADIUS authentication.
    ///
    /// Holds the router's lock for the whole run. Device-level failures
    /// become a failed outcome with a full transcript; only infrastructure
    /// failures (database down) surface as errors.
    pub async fn provision(
        &self,
        router_id: i32,
        actor: Option<i32>,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let router = router_service::find_by_id(&self.db, router_id)
            .await?
            .ok_or(ProvisionError::RouterNotFound(router_id))?;
        let _guard = self.locks.lock(router_id).await;

        let log = provisioning_log_service::start(&self.db, router_id, actor, "provision").await?;
        let transport = (self.transports)(&router, self.settings.device_timeout)?;
        let mut steps = Vec::new();

        // Required: nothing else makes sense against an unreachable device.
        if let Err(e) = transport.check_connectivity().await {
            steps.push(StepResult::failed("connectivity", e.to_string()));
            return self.finalize(log, router, steps).await;
        }
        steps.push(StepResult::ok("connectivity", "device reachable"));

        // Optional: a router that cannot be backed up can still be
        // provisioned, but the transcript says so.
        match self
            .backups
            .backup_router(
                &router,
                transport.as_ref(),
                BackupType::PreChange,
                actor,
                Some("pre-provisioning snapshot"),
            )
            .await
        {
            Ok(Some(backup)) => {
                steps.push(StepResult::ok("backup", format!("stored backup #{}", backup.id)));
            }
            Ok(None) => {
                steps.push(StepResult::failed("backup", "no configuration sections readable"));
            }
            Err(e) => {
                warn!(router_id, error = %e, "pre-change backup failed");
                steps.push(StepResult::failed("backup", e.to_string()));
            }
        }

        // Required: without a NAS row the RADIUS server drops the router's
        // requests on the floor. The NAS server address and the watchdog
        // probe target must agree, so both come from the same setting.
        let router = match nas_service::ensure_nas_entry(
            &self.db,
            &router,
            &self.settings.radius_server_ip,
            self.settings.radius_auth_port,
            self.settings.radius_acct_port,
        )
        .await
        {
            Ok(ensured) => {
                let message = if ensured.created {
                    "created"
                } else {
                    "already registered"
                };
                steps.push(StepResult::ok("nas_entry", message));
                let secret = ensured.nas.secret.clone();
                let router = ensured.router;
                run_device_steps(transport.as_ref(), &secret, &self.settings, &mut steps).await;
                router
            }
            Err(e) => {
                steps.push(StepResult::failed("nas_entry", e.to_string()));
                router
            }
        };

        self.finalize(log, router, steps).await
    }

    async fn finalize(
        &self,
        log: crate::db::entities::provisioning_log::Model,
        router: router::Model,
        steps: Vec<StepResult>,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let success = run_succeeded(&steps, &self.settings);
        let status = if success {
            ProvisioningStatus::Success
        } else {
            ProvisioningStatus::Failed
        };
        let error_message = if success {
            None
        } else {
            steps
                .iter()
                .find(|s| !s.success)
                .map(|s| format!("{}: {}", s.name, s.message))
        };

        let log = provisioning_log_service::complete(
            &self.db,
            log,
            status,
            serde_json::to_value(&steps)?,
            error_message,
        )
        .await?;

        let state = if success {
            ProvisioningState::Provisioned
        } else {
            ProvisioningState::Failed
        };
        let router = router_service::set_provisioning_state(&self.db, router, state).await?;
        if success {
            router_service::touch_last_checked(&self.db, router).await?;
            info!(log_id = log.id, "router provisioned for RADIUS authentication");
        } else {
            warn!(log_id = log.id, "provisioning run failed");
        }

        Ok(ProvisionOutcome {
            success,
            log_id: log.id,
            steps,
        })
    }

    /// Triggers an on-device binary backup file, named after the run time.
    /// Returns the file name, or `None` when the device refused.
    pub async fn save_device_backup(&self, router_id: i32) -> Result<Option<String>, ProvisionError> {
        let router = router_service::find_by_id(&self.db, router_id)
            .await?
            .ok_or(ProvisionError::RouterNotFound(router_id))?;
        let _guard = self.locks.lock(router_id).await;
        let transport = (self.transports)(&router, self.settings.device_timeout)?;
        let name = format!("initial-backup-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S"));
        let reply = transport
            .exec_command(commands::SYSTEM_BACKUP_SAVE, &row_from(&[("name", &name)]))
            .await?;
        Ok(reply.map(|_| name))
    }

    /// Exports the device's local credential table to a file on the device.
    pub async fn export_ppp_secrets(&self, router_id: i32) -> Result<Option<String>, ProvisionError> {
        let router = router_service::find_by_id(&self.db, router_id)
            .await?
            .ok_or(ProvisionError::RouterNotFound(router_id))?;
        let _guard = self.locks.lock(router_id).await;
        let transport = (self.transports)(&router, self.settings.device_timeout)?;
        let file = format!(
            "ppp-secret-backup-{}",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        );
        let reply = transport
            .exec_command(commands::PPP_SECRET_EXPORT, &row_from(&[("file", &file)]))
            .await?;
        Ok(reply.map(|_| file))
    }

    /// Cheap provisioning probe: NAS linkage in the database plus a RADIUS
    /// client row on the device.
    pub async fn is_provisioned(&self, router_id: i32) -> Result<bool, ProvisionError> {
        let router = router_service::find_by_id(&self.db, router_id)
            .await?
            .ok_or(ProvisionError::RouterNotFound(router_id))?;
        if router.nas_id.is_none() {
            return Ok(false);
        }
        let transport = (self.transports)(&router, self.settings.device_timeout)?;
        let filter = row_from(&[("address", &self.settings.radius_server_ip)]);
        let rows = transport.get_rows(menus::RADIUS, &filter).await?;
        Ok(!rows.is_empty())
    }
}

/// A run succeeds when every step succeeded, except that a watchdog failure
/// is tolerated unless configured as required.
fn run_succeeded(steps: &[StepResult], settings: &Settings) -> bool {
    steps.iter().all(|step| {
        step.success
            || (step.name == "netwatch" && !settings.netwatch_required)
            || step.name == "backup"
    })
}

/// Steps 4 through 8: everything that happens on the device itself. Later
/// steps still run after a failure so the transcript shows the full picture.
pub(crate) async fn run_device_steps(
    transport: &dyn RouterTransport,
    shared_secret: &str,
    settings: &Settings,
    steps: &mut Vec<StepResult>,
) {
    steps.push(configure_radius_client(transport, shared_secret, settings).await);
    steps.push(configure_ppp_aaa(transport, settings).await);
    steps.push(configure_radius_incoming(transport).await);
    steps.push(install_watchdog(transport, settings).await);
    steps.push(validate(transport, settings).await);
}

/// Upserts the device's RADIUS client entry, keyed by server address.
async fn configure_radius_client(
    transport: &dyn RouterTransport,
    shared_secret: &str,
    settings: &Settings,
) -> StepResult {
    const NAME: &str = "radius_client";
    let auth_port = settings.radius_auth_port.to_string();
    let acct_port = settings.radius_acct_port.to_string();
    let changes = row_from(&[
        ("accounting-port", &acct_port),
        ("authentication-port", &auth_port),
        ("secret", shared_secret),
        ("service", "hotspot,ppp"),
        ("timeout", &settings.radius_timeout),
    ]);

    let filter = row_from(&[("address", &settings.radius_server_ip)]);
    let existing = match transport.get_rows(menus::RADIUS, &filter).await {
        Ok(rows) => rows,
        Err(e) => return StepResult::failed(NAME, e.to_string()),
    };

    if let Some(current) = existing.first() {
        match transport.edit_row(menus::RADIUS, current, &changes).await {
            Ok(true) => StepResult::ok(NAME, "updated"),
            Ok(false) => StepResult::failed(NAME, "device rejected the edit"),
            Err(e) => StepResult::failed(NAME, e.to_string()),
        }
    } else {
        let mut create = changes;
        create.insert("address".to_string(), settings.radius_server_ip.clone());
        create.insert(
            "comment".to_string(),
            "Auto-configured by ISP Solution".to_string(),
        );
        match transport.add_rows(menus::RADIUS, &[create]).await {
            Ok(report) if report.all_succeeded() => StepResult::ok(NAME, "created"),
            Ok(report) => StepResult::failed(NAME, report.errors.join("; ")),
            Err(e) => StepResult::failed(NAME, e.to_string()),
        }
    }
}

/// Points PPP authentication and accounting at RADIUS.
async fn configure_ppp_aaa(transport: &dyn RouterTransport, settings: &Settings) -> StepResult {
    const NAME: &str = "ppp_aaa";
    let args = row_from(&[
        ("interim-update", &settings.interim_update),
        ("use-radius", "yes"),
        ("accounting", "yes"),
    ]);
    match transport.exec_command(commands::PPP_AAA_SET, &args).await {
        Ok(Some(_)) => StepResult::ok(NAME, "configured"),
        Ok(None) => StepResult::failed(NAME, "command rejected"),
        Err(e) => StepResult::failed(NAME, e.to_string()),
    }
}

/// Lets the RADIUS server disconnect sessions (CoA / disconnect messages).
async fn configure_radius_incoming(transport: &dyn RouterTransport) -> StepResult {
    const NAME: &str = "radius_incoming";
    let args = row_from(&[("accept", "yes")]);
    match transport
        .exec_command(commands::RADIUS_INCOMING_SET, &args)
        .await
    {
        Ok(Some(_)) => StepResult::ok(NAME, "configured"),
        Ok(None) => StepResult::failed(NAME, "command rejected"),
        Err(e) => StepResult::failed(NAME, e.to_string()),
    }
}

async fn install_watchdog(transport: &dyn RouterTransport, settings: &Settings) -> StepResult {
    const NAME: &str = "netwatch";
    if !settings.netwatch_enabled {
        return StepResult::ok(NAME, "skipped: disabled in settings");
    }
    match netwatch::install_probe(transport, &settings.radius_server_ip, settings).await {
        Ok(ProbeInstall::Created) => StepResult::ok(NAME, "created"),
        Ok(ProbeInstall::Replaced) => StepResult::ok(NAME, "replaced"),
        Err(e) => StepResult::failed(NAME, e.to_string()),
    }
}

/// Re-reads the device to confirm the RADIUS client actually landed.
async fn validate(transport: &dyn RouterTransport, settings: &Settings) -> StepResult {
    const NAME: &str = "validate";
    if let Err(e) = transport.check_connectivity().await {
        return StepResult::failed(NAME, e.to_string());
    }
    let filter = row_from(&[("address", &settings.radius_server_ip)]);
    match transport.get_rows(menus::RADIUS, &filter).await {
        Ok(rows) if !rows.is_empty() => StepResult::ok(NAME, "radius client present"),
        Ok(_) => StepResult::failed(NAME, "radius client row missing after configuration"),
        Err(e) => StepResult::failed(NAME, e.to_string()),
    }
}
