//! Operator-driven switching between RADIUS-primary and local-primary
//! authentication.
//!
//! The watchdog covers the automatic side on the device; these operations
//! are the explicit switch, flipping `/ppp/aaa use-radius` and the stored
//! `primary_auth` together so the control plane and the device agree.

use std::sync::Arc;

use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::Settings;
use crate::db::enums::PrimaryAuth;
use crate::db::services::router_service;
use crate::locks::RouterLocks;
use crate::transport::row::{Row, row_from};
use crate::transport::{
    RouterTransport, TransportError, TransportFactory, commands, default_factory, menus,
};

#[derive(Debug, Error)]
pub enum FailoverError {
    #[error("router {0} not found")]
    RouterNotFound(i32),
    #[error("device rejected {0}")]
    Rejected(&'static str),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Serialize)]
pub struct ModeSwitch {
    pub changed: bool,
    pub primary_auth: PrimaryAuth,
    pub message: String,
}

/// What the device currently says about its RADIUS wiring, next to the
/// stored mode.
#[derive(Debug, Serialize)]
pub struct RadiusStatus {
    pub primary_auth: PrimaryAuth,
    pub use_radius: bool,
    pub client_configured: bool,
    pub watchdog_installed: bool,
}

pub struct FailoverService {
    db: Arc<DatabaseConnection>,
    settings: Settings,
    locks: Arc<RouterLocks>,
    transports: TransportFactory,
}

impl FailoverService {
    pub fn new(db: Arc<DatabaseConnection>, settings: Settings, locks: Arc<RouterLocks>) -> Self {
        Self {
            db,
            settings,
            locks,
            transports: default_factory(),
        }
    }

    pub fn with_transport_factory(mut self, transports: TransportFactory) -> Self {
        self.transports = transports;
        self
    }

    /// Promotes the router to RADIUS-primary. The device is switched first;
    /// a rejected command leaves the stored mode untouched.
    pub async fn switch_to_radius(&self, router_id: i32) -> Result<ModeSwitch, FailoverError> {
        let router = router_service::find_by_id(&self.db, router_id)
            .await?
            .ok_or(FailoverError::RouterNotFound(router_id))?;
        if router.primary_auth == PrimaryAuth::Radius {
            return Ok(ModeSwitch {
                changed: false,
                primary_auth: PrimaryAuth::Radius,
                message: "router is already RADIUS-primary".to_string(),
            });
        }

        let _guard = self.locks.lock(router_id).await;
        let transport = (self.transports)(&router, self.settings.device_timeout)?;
        set_use_radius(transport.as_ref(), true, &self.settings).await?;
        let router = router_service::set_primary_auth(&self.db, router, PrimaryAuth::Radius).await?;
        info!(router_id, "router switched to RADIUS-primary");
        Ok(ModeSwitch {
            changed: true,
            primary_auth: router.primary_auth,
            message: "RADIUS is now the primary credential source".to_string(),
        })
    }

    /// Demotes the router to local-primary. Mirrors become authoritative, so
    /// the caller is pointed at a refresh.
    pub async fn switch_to_local(&self, router_id: i32) -> Result<ModeSwitch, FailoverError> {
        let router = router_service::find_by_id(&self.db, router_id)
            .await?
            .ok_or(FailoverError::RouterNotFound(router_id))?;
        if router.primary_auth == PrimaryAuth::Local {
            return Ok(ModeSwitch {
                changed: false,
                primary_auth: PrimaryAuth::Local,
                message: "router is already local-primary".to_string(),
            });
        }

        let _guard = self.locks.lock(router_id).await;
        let transport = (self.transports)(&router, self.settings.device_timeout)?;
        set_use_radius(transport.as_ref(), false, &self.settings).await?;
        let router = router_service::set_primary_auth(&self.db, router, PrimaryAuth::Local).await?;
        info!(router_id, "router switched to local-primary");
        Ok(ModeSwitch {
            changed: true,
            primary_auth: router.primary_auth,
            message: "local mirrors are now the primary credential source; run sync-router to refresh them"
                .to_string(),
        })
    }

    /// Reads the device's RADIUS wiring without changing anything.
    pub async fn radius_status(&self, router_id: i32) -> Result<RadiusStatus, FailoverError> {
        let router = router_service::find_by_id(&self.db, router_id)
            .await?
            .ok_or(FailoverError::RouterNotFound(router_id))?;
        let transport = (self.transports)(&router, self.settings.device_timeout)?;
        Ok(read_status(transport.as_ref(), router.primary_auth, &self.settings).await?)
    }
}

/// Points PPP authentication at RADIUS or back at local secrets. Accounting
/// and the interim update interval ride along on the way in; on the way out
/// only the source flips, so accounting history keeps its settings.
pub(crate) async fn set_use_radius(
    transport: &dyn RouterTransport,
    enabled: bool,
    settings: &Settings,
) -> Result<(), FailoverError> {
    let args = if enabled {
        row_from(&[
            ("interim-update", &settings.interim_update),
            ("use-radius", "yes"),
            ("accounting", "yes"),
        ])
    } else {
        row_from(&[("use-radius", "no")])
    };
    match transport.exec_command(commands::PPP_AAA_SET, &args).await? {
        Some(_) => Ok(()),
        None => Err(FailoverError::Rejected("/ppp/aaa/set")),
    }
}

pub(crate) async fn read_status(
    transport: &dyn RouterTransport,
    primary_auth: PrimaryAuth,
    settings: &Settings,
) -> Result<RadiusStatus, TransportError> {
    let aaa = transport.get_rows(menus::PPP_AAA, &Row::new()).await?;
    let use_radius = aaa
        .first()
        .and_then(|row| row.get("use-radius"))
        .is_some_and(|v| v == "yes");
    let client_filter = row_from(&[("address", &settings.radius_server_ip)]);
    let client_configured = !transport.get_rows(menus::RADIUS, &client_filter).await?.is_empty();
    let probe_filter = row_from(&[("host", &settings.radius_server_ip)]);
    let watchdog_installed = !transport
        .get_rows(menus::NETWATCH, &probe_filter)
        .await?
        .is_empty();
    Ok(RadiusStatus {
        primary_auth,
        use_radius,
        client_configured,
        watchdog_installed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entities::router;
    use crate::db::enums::{ProvisioningState, TransportKind};
    use crate::transport::fake::FakeTransport;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn test_settings() -> Settings {
        Settings {
            database_url: String::new(),
            radius_server_ip: "192.0.2.1".to_string(),
            radius_auth_port: 1812,
            radius_acct_port: 1813,
            radius_timeout: "3s".to_string(),
            interim_update: "5m".to_string(),
            netwatch_enabled: true,
            netwatch_required: false,
            netwatch_interval: "1m".to_string(),
            netwatch_timeout: "1s".to_string(),
            device_timeout: std::time::Duration::from_secs(5),
            sync_concurrency: 4,
            backup_encryption_key: String::new(),
        }
    }

    fn sample_router(primary_auth: PrimaryAuth) -> router::Model {
        let now = Utc::now();
        router::Model {
            id: 2,
            tenant_id: 1,
            nas_id: Some(5),
            name: "edge-02".to_string(),
            host: "192.0.2.20".to_string(),
            api_port: 8728,
            transport_kind: TransportKind::Binary,
            username: "admin".to_string(),
            password: "pw".to_string(),
            radius_secret: Some("s3cret".to_string()),
            primary_auth,
            provisioning_state: ProvisioningState::Provisioned,
            status: "active".to_string(),
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn service_with(device: &FakeTransport, db: Arc<DatabaseConnection>) -> FailoverService {
        let factory: TransportFactory = {
            let device = device.clone();
            Arc::new(move |_, _| Ok(Box::new(device.clone()) as Box<dyn RouterTransport>))
        };
        FailoverService::new(db, test_settings(), Arc::new(crate::locks::RouterLocks::new()))
            .with_transport_factory(factory)
    }

    #[tokio::test]
    async fn promotion_flips_the_device_and_the_stored_mode_together() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![sample_router(PrimaryAuth::Local)]])
                .append_query_results([vec![sample_router(PrimaryAuth::Radius)]])
                .into_connection(),
        );
        let device = FakeTransport::new();
        let service = service_with(&device, db);

        let outcome = service.switch_to_radius(2).await.expect("switch");
        assert!(outcome.changed);
        assert_eq!(outcome.primary_auth, PrimaryAuth::Radius);

        let executed = device.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].0, commands::PPP_AAA_SET);
        assert_eq!(executed[0].1.get("use-radius").unwrap(), "yes");
        assert_eq!(executed[0].1.get("accounting").unwrap(), "yes");
    }

    #[tokio::test]
    async fn promotion_of_a_radius_router_is_a_no_op() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![sample_router(PrimaryAuth::Radius)]])
                .into_connection(),
        );
        let device = FakeTransport::new();
        let service = service_with(&device, db);

        let outcome = service.switch_to_radius(2).await.expect("switch");
        assert!(!outcome.changed);
        assert!(device.executed().is_empty());
    }

    #[tokio::test]
    async fn rejected_device_command_leaves_the_stored_mode_untouched() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![sample_router(PrimaryAuth::Local)]])
                .into_connection(),
        );
        let device = FakeTransport::new();
        device.reject_command(commands::PPP_AAA_SET);
        let service = service_with(&device, db);

        let result = service.switch_to_radius(2).await;
        assert!(matches!(result, Err(FailoverError::Rejected(_))));
    }

    #[tokio::test]
    async fn demotion_turns_radius_off_without_touching_accounting() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![sample_router(PrimaryAuth::Radius)]])
                .append_query_results([vec![sample_router(PrimaryAuth::Local)]])
                .into_connection(),
        );
        let device = FakeTransport::new();
        let service = service_with(&device, db);

        let outcome = service.switch_to_local(2).await.expect("switch");
        assert!(outcome.changed);
        assert_eq!(outcome.primary_auth, PrimaryAuth::Local);

        let executed = device.executed();
        assert_eq!(executed[0].1.get("use-radius").unwrap(), "no");
        assert!(!executed[0].1.contains_key("accounting"));
    }

    #[tokio::test]
    async fn status_reflects_what_is_actually_on_the_device() {
        let settings = test_settings();
        let device = FakeTransport::new();
        device.seed(menus::PPP_AAA, vec![row_from(&[("use-radius", "yes")])]);
        device.seed(menus::RADIUS, vec![row_from(&[("address", "192.0.2.1")])]);
        device.seed(menus::NETWATCH, vec![row_from(&[("host", "192.0.2.1")])]);

        let status = read_status(&device, PrimaryAuth::Radius, &settings)
            .await
            .expect("status");
        assert!(status.use_radius);
        assert!(status.client_configured);
        assert!(status.watchdog_installed);
    }

    #[tokio::test]
    async fn status_of_an_unconfigured_device_is_all_false() {
        let settings = test_settings();
        let device = FakeTransport::new();
        let status = read_status(&device, PrimaryAuth::Local, &settings)
            .await
            .expect("status");
        assert!(!status.use_radius);
        assert!(!status.client_configured);
        assert!(!status.watchdog_installed);
    }
}
