//! Configuration snapshots stored encrypted in the database.
//!
//! A snapshot reads five configuration sections off the device and restore
//! replays them in dependency order, pools before the profiles that use
//! them and profiles before the secrets that reference them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbErr};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::backup::encryption::{CryptoError, EncryptionService};
use crate::db::entities::{config_backup, router};
use crate::db::enums::BackupType;
use crate::db::services::backup_service;
use crate::transport::row::Row;
use crate::transport::{RouterTransport, TransportError, menus};

/// Sections in restore order. The names double as the payload's JSON keys,
/// so changing them breaks decoding of stored backups.
pub const SECTION_ORDER: [(&str, &str); 5] = [
    ("ip_pools", menus::IP_POOL),
    ("ppp_profiles", menus::PPP_PROFILE),
    ("radius_settings", menus::RADIUS),
    ("ppp_secrets", menus::PPP_SECRET),
    ("firewall_rules", menus::FIREWALL_FILTER),
];

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup {0} not found")]
    NotFound(i32),
    #[error("backup {backup_id} belongs to router {owner}, not {requested}")]
    WrongRouter {
        backup_id: i32,
        owner: i32,
        requested: i32,
    },
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("payload encoding: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct BackupPayload {
    pub taken_at: DateTime<Utc>,
    pub sections: BTreeMap<String, Vec<Row>>,
}

#[derive(Debug, Serialize)]
pub struct SectionRestore {
    pub name: String,
    pub restored: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct RestoreReport {
    /// Safety snapshot taken just before anything was written back.
    pub safety_backup_id: Option<i32>,
    pub sections: Vec<SectionRestore>,
}

impl RestoreReport {
    /// True when at least one section was restored and no row failed.
    pub fn succeeded(&self) -> bool {
        self.sections.iter().any(|s| s.restored > 0)
            && self.sections.iter().all(|s| s.errors.is_empty())
    }
}

#[derive(Clone)]
pub struct BackupService {
    db: Arc<DatabaseConnection>,
    crypto: Arc<EncryptionService>,
}

impl BackupService {
    pub fn new(db: Arc<DatabaseConnection>, crypto: Arc<EncryptionService>) -> Self {
        Self { db, crypto }
    }

    /// Reads all sections off the device. Unreadable menus come back as
    /// empty sections; only losing the device aborts the capture.
    pub async fn capture(
        &self,
        transport: &dyn RouterTransport,
    ) -> Result<BackupPayload, TransportError> {
        let empty = Row::new();
        let mut sections = BTreeMap::new();
        for (name, menu) in SECTION_ORDER {
            let rows = transport.get_rows(menu, &empty).await?;
            sections.insert(name.to_string(), rows);
        }
        Ok(BackupPayload {
            taken_at: Utc::now(),
            sections,
        })
    }

    /// Captures, encrypts and stores a snapshot. `None` when the device
    /// yielded nothing worth keeping.
    pub async fn backup_router(
        &self,
        router: &router::Model,
        transport: &dyn RouterTransport,
        backup_type: BackupType,
        created_by: Option<i32>,
        notes: Option<&str>,
    ) -> Result<Option<config_backup::Model>, BackupError> {
        let payload = self.capture(transport).await?;
        if payload.sections.values().all(Vec::is_empty) {
            return Ok(None);
        }
        let encrypted = self.crypto.encrypt(&serde_json::to_vec(&payload)?)?;
        let model = backup_service::insert(
            &self.db,
            router.id,
            created_by,
            backup_type,
            notes.map(str::to_string),
            encrypted,
        )
        .await?;
        info!(router_id = router.id, backup_id = model.id, "stored config backup");
        Ok(Some(model))
    }

    pub fn decode(&self, model: &config_backup::Model) -> Result<BackupPayload, BackupError> {
        let raw = self.crypto.decrypt(&model.payload)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub async fn list(
        &self,
        router_id: i32,
        backup_type: Option<BackupType>,
    ) -> Result<Vec<config_backup::Model>, BackupError> {
        Ok(backup_service::list_for_router(&self.db, router_id, backup_type).await?)
    }

    /// Deletes `scheduled` backups older than the retention window. Manual
    /// and pre-change snapshots are never reaped.
    pub async fn cleanup_old_backups(
        &self,
        router_id: i32,
        retention_days: i64,
    ) -> Result<u64, BackupError> {
        Ok(backup_service::delete_old_scheduled(&self.db, router_id, retention_days).await?)
    }

    /// Replays a stored snapshot onto the device, taking a safety snapshot
    /// first so a bad restore is itself recoverable.
    pub async fn restore(
        &self,
        router: &router::Model,
        transport: &dyn RouterTransport,
        backup_id: i32,
        actor: Option<i32>,
    ) -> Result<RestoreReport, BackupError> {
        let model = backup_service::find_by_id(&self.db, backup_id)
            .await?
            .ok_or(BackupError::NotFound(backup_id))?;
        if model.router_id != router.id {
            return Err(BackupError::WrongRouter {
                backup_id,
                owner: model.router_id,
                requested: router.id,
            });
        }
        let payload = self.decode(&model)?;

        let safety = self
            .backup_router(
                router,
                transport,
                BackupType::PreChange,
                actor,
                Some(&format!("pre-restore snapshot for backup #{backup_id}")),
            )
            .await?;

        let sections = apply_sections(transport, &payload).await?;
        info!(router_id = router.id, backup_id, "restored config backup");
        Ok(RestoreReport {
            safety_backup_id: safety.map(|b| b.id),
            sections,
        })
    }
}

/// Writes payload sections back in [`SECTION_ORDER`]. Device-assigned `.id`
/// values are stripped so the device hands out fresh ones.
async fn apply_sections(
    transport: &dyn RouterTransport,
    payload: &BackupPayload,
) -> Result<Vec<SectionRestore>, TransportError> {
    let mut results = Vec::new();
    for (name, menu) in SECTION_ORDER {
        let Some(rows) = payload.sections.get(name) else {
            continue;
        };
        let cleaned: Vec<Row> = rows.iter().map(strip_internal_keys).collect();
        let mut section = SectionRestore {
            name: name.to_string(),
            restored: 0,
            errors: Vec::new(),
        };
        if !cleaned.is_empty() {
            let report = transport.add_rows(menu, &cleaned).await?;
            section.restored = report.created;
            section.errors = report.errors;
        }
        results.push(section);
    }
    Ok(results)
}

fn strip_internal_keys(row: &Row) -> Row {
    row.iter()
        .filter(|(key, _)| !key.starts_with('.'))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use crate::transport::row::row_from;

    fn payload_with(sections: &[(&str, Vec<Row>)]) -> BackupPayload {
        BackupPayload {
            taken_at: Utc::now(),
            sections: sections
                .iter()
                .map(|(name, rows)| (name.to_string(), rows.clone()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn restore_replays_sections_in_dependency_order() {
        let payload = payload_with(&[
            ("ppp_secrets", vec![row_from(&[("name", "alice")])]),
            ("ip_pools", vec![row_from(&[("name", "pppoe-pool")])]),
            ("ppp_profiles", vec![row_from(&[("name", "10M")])]),
        ]);
        let device = FakeTransport::new();
        let sections = apply_sections(&device, &payload).await.expect("restore");

        let order: Vec<&str> = sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, ["ip_pools", "ppp_profiles", "ppp_secrets"]);
        assert_eq!(device.rows(menus::IP_POOL).len(), 1);
        assert_eq!(device.rows(menus::PPP_PROFILE).len(), 1);
        assert_eq!(device.rows(menus::PPP_SECRET).len(), 1);
    }

    #[tokio::test]
    async fn restore_strips_device_assigned_ids() {
        let payload = payload_with(&[(
            "ppp_secrets",
            vec![row_from(&[(".id", "*A"), ("name", "alice")])],
        )]);
        let device = FakeTransport::new();
        apply_sections(&device, &payload).await.expect("restore");

        let rows = device.rows(menus::PPP_SECRET);
        assert_eq!(rows.len(), 1);
        // The fake assigns its own id, proving the stored one was dropped.
        assert_ne!(rows[0].get(".id").unwrap(), "*A");
        assert_eq!(rows[0].get("name").unwrap(), "alice");
    }

    #[tokio::test]
    async fn capture_reads_every_section() {
        let device = FakeTransport::new();
        device.seed(menus::PPP_SECRET, vec![row_from(&[("name", "alice")])]);
        let crypto = Arc::new(EncryptionService::new(
            "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
        )
        .expect("key"));
        let service = BackupService::new(
            Arc::new(sea_orm::MockDatabase::new(sea_orm::DatabaseBackend::Postgres).into_connection()),
            crypto,
        );

        let payload = service.capture(&device).await.expect("capture");
        assert_eq!(payload.sections.len(), SECTION_ORDER.len());
        assert_eq!(payload.sections.get("ppp_secrets").unwrap().len(), 1);
        assert!(payload.sections.get("ip_pools").unwrap().is_empty());
    }

    #[test]
    fn payload_serializes_under_the_documented_section_keys() {
        let payload = payload_with(&[
            ("ip_pools", Vec::new()),
            ("ppp_profiles", Vec::new()),
            ("radius_settings", Vec::new()),
            ("ppp_secrets", Vec::new()),
            ("firewall_rules", Vec::new()),
        ]);
        let json = serde_json::to_value(&payload).expect("json");
        for (name, _) in SECTION_ORDER {
            assert!(
                json["sections"].get(name).is_some(),
                "missing section key {name}"
            );
        }
    }

    #[test]
    fn restore_report_success_requires_progress_and_no_failures() {
        let mut report = RestoreReport::default();
        assert!(!report.succeeded());

        report.sections.push(SectionRestore {
            name: "ip_pools".to_string(),
            restored: 2,
            errors: Vec::new(),
        });
        assert!(report.succeeded());

        report.sections.push(SectionRestore {
            name: "ppp_secrets".to_string(),
            restored: 1,
            errors: vec!["duplicate name".to_string()],
        });
        assert!(!report.succeeded());
    }

    #[test]
    fn payload_survives_encrypt_decrypt_json_cycle() {
        let crypto = EncryptionService::new(
            "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
        )
        .expect("key");
        let payload = payload_with(&[("ppp_secrets", vec![row_from(&[("name", "alice")])])]);
        let encrypted = crypto
            .encrypt(&serde_json::to_vec(&payload).expect("json"))
            .expect("encrypt");
        let decoded: BackupPayload =
            serde_json::from_slice(&crypto.decrypt(&encrypted).expect("decrypt")).expect("json");
        assert_eq!(decoded.sections, payload.sections);
    }
}
