//! Protocol-agnostic access to managed edge routers.
//!
//! Every device conversation goes through [`RouterTransport`] so the rest of
//! the crate never sees which protocol a router speaks. Two backends exist:
//! the v7 REST API ([`rest`]) and the binary sentence API ([`binary`]).

pub mod binary;
pub mod rest;
pub mod row;
pub mod sanitize;

#[cfg(test)]
pub mod fake;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::entities::router;
use crate::db::enums::TransportKind;

pub use row::{Row, normalize_row, row_from, to_device_row};
pub use sanitize::redact_row;

/// Menu paths used by provisioning, sync and backup.
pub mod menus {
    pub const RADIUS: &str = "/radius";
    pub const PPP_AAA: &str = "/ppp/aaa";
    pub const PPP_SECRET: &str = "/ppp/secret";
    pub const PPP_ACTIVE: &str = "/ppp/active";
    pub const PPP_PROFILE: &str = "/ppp/profile";
    pub const IP_POOL: &str = "/ip/pool";
    pub const FIREWALL_FILTER: &str = "/ip/firewall/filter";
    pub const NETWATCH: &str = "/tool/netwatch";
    pub const SYSTEM_IDENTITY: &str = "/system/identity";
}

/// Non-menu commands executed through [`RouterTransport::exec_command`].
pub mod commands {
    pub const PPP_AAA_SET: &str = "/ppp/aaa/set";
    pub const RADIUS_INCOMING_SET: &str = "/radius/incoming/set";
    pub const SYSTEM_BACKUP_SAVE: &str = "/system/backup/save";
    pub const PPP_SECRET_EXPORT: &str = "/ppp/secret/export";
}

/// Connectivity-class failures. Query-level problems (unknown menu, rejected
/// command, bad field) are reported in-band through return values instead.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {host}:{port} failed: {reason}")]
    Connection {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("authentication rejected by {host}")]
    Authentication { host: String },
    #[error("device did not answer within {0:?}")]
    Timeout(Duration),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Per-row outcome of a batch add. One bad row never aborts the batch.
#[derive(Debug, Default)]
pub struct AddReport {
    pub created: usize,
    pub errors: Vec<String>,
}

impl AddReport {
    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

#[async_trait]
pub trait RouterTransport: Send + Sync {
    /// Cheap reachability and credential probe.
    async fn check_connectivity(&self) -> Result<(), TransportError>;

    /// Reads rows from a menu, optionally filtered by exact field matches.
    /// Query-level failures yield an empty list.
    async fn get_rows(&self, menu: &str, filter: &Row) -> Result<Vec<Row>, TransportError>;

    /// Adds rows one at a time, collecting per-row failures.
    async fn add_rows(&self, menu: &str, rows: &[Row]) -> Result<AddReport, TransportError>;

    /// Applies `changes` to the row identified by `current`'s `.id`.
    /// Returns `false` when the target is missing or the device rejects the
    /// edit.
    async fn edit_row(&self, menu: &str, current: &Row, changes: &Row)
    -> Result<bool, TransportError>;

    /// Removes every row matching the filter, returning how many went away.
    async fn remove_rows(&self, menu: &str, filter: &Row) -> Result<u64, TransportError>;

    /// Runs a non-menu command. `None` means the device rejected it.
    async fn exec_command(
        &self,
        command: &str,
        args: &Row,
    ) -> Result<Option<Vec<Row>>, TransportError>;
}

/// How DB-coupled services obtain a device connection. Injectable so tests
/// can hand them an in-memory device.
pub type TransportFactory = std::sync::Arc<
    dyn Fn(&router::Model, Duration) -> Result<Box<dyn RouterTransport>, TransportError>
        + Send
        + Sync,
>;

/// The production factory: [`for_router`] behind the injectable seam.
pub fn default_factory() -> TransportFactory {
    std::sync::Arc::new(for_router)
}

/// Picks the backend matching the router's configured protocol.
pub fn for_router(
    router: &router::Model,
    timeout: Duration,
) -> Result<Box<dyn RouterTransport>, TransportError> {
    let port = u16::try_from(router.api_port).map_err(|_| {
        TransportError::Protocol(format!("api port {} out of range", router.api_port))
    })?;
    match router.transport_kind {
        TransportKind::Rest => Ok(Box::new(rest::RestTransport::new(
            &router.host,
            port,
            &router.username,
            &router.password,
            timeout,
        )?)),
        TransportKind::Binary => Ok(Box::new(binary::BinaryTransport::new(
            &router.host,
            port,
            &router.username,
            &router.password,
            timeout,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::{PrimaryAuth, ProvisioningState};
    use chrono::Utc;

    fn sample_router(api_port: i32) -> router::Model {
        let now = Utc::now();
        router::Model {
            id: 1,
            tenant_id: 1,
            nas_id: None,
            name: "edge-01".to_string(),
            host: "192.0.2.10".to_string(),
            api_port,
            transport_kind: TransportKind::Binary,
            username: "admin".to_string(),
            password: "pw".to_string(),
            radius_secret: None,
            primary_auth: PrimaryAuth::Local,
            provisioning_state: ProvisioningState::Pending,
            status: "active".to_string(),
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn out_of_range_api_port_is_rejected() {
        for port in [70000, -1] {
            let router = sample_router(port);
            assert!(matches!(
                for_router(&router, Duration::from_secs(1)),
                Err(TransportError::Protocol(_))
            ));
        }
    }

    #[test]
    fn in_range_api_port_builds_a_backend() {
        let router = sample_router(8728);
        assert!(for_router(&router, Duration::from_secs(1)).is_ok());
    }
}
