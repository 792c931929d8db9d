//! Credential mirrors: local PPP records kept on non-RADIUS routers.
//!
//! On a RADIUS-primary router nothing is written at all; mirrors there are
//! the watchdog's business. Everywhere else each customer maps to one local
//! record whose `disabled` flag tracks the customer's status.

use serde::Serialize;

use crate::db::entities::{customer, package, router};
use crate::db::enums::PrimaryAuth;
use crate::transport::row::{Row, row_from};
use crate::transport::{RouterTransport, TransportError, menus, redact_row};
use tracing::{debug, warn};

/// Profile details copied onto the mirror record when present.
#[derive(Debug, Clone, Default)]
pub struct MirrorProfile {
    pub profile: Option<String>,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
}

impl MirrorProfile {
    pub fn from_package(package: Option<&package::Model>) -> Self {
        Self {
            profile: package
                .map(|p| p.profile_name.clone())
                .filter(|name| !name.is_empty()),
            local_address: None,
            remote_address: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
    Removed,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct SyncOutcome {
    pub action: SyncAction,
    pub success: bool,
    pub message: String,
}

impl SyncOutcome {
    fn new(action: SyncAction, success: bool, message: impl Into<String>) -> Self {
        Self {
            action,
            success,
            message: message.into(),
        }
    }

    fn skipped(message: impl Into<String>) -> Self {
        Self::new(SyncAction::Skipped, true, message)
    }
}

/// Running totals of a bulk sync. One customer's failure never stops the
/// batch.
#[derive(Debug, Default, Serialize)]
pub struct BulkSyncReport {
    pub total: usize,
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BulkSyncReport {
    pub fn absorb(&mut self, outcome: &SyncOutcome) {
        self.total += 1;
        if !outcome.success {
            self.failed += 1;
        } else if outcome.action == SyncAction::Skipped {
            self.skipped += 1;
        } else {
            self.synced += 1;
        }
    }

    pub fn merge(&mut self, other: &BulkSyncReport) {
        self.total += other.total;
        self.synced += other.synced;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// The canonical mirror row for a customer. The password is the stored
/// plaintext when available, otherwise 16 hex characters of fresh
/// randomness, never anything derived from the username.
pub fn build_secret_row(
    customer: &customer::Model,
    package: Option<&package::Model>,
    profile: &MirrorProfile,
) -> Row {
    let password = customer
        .password_plain
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| hex::encode(rand::random::<[u8; 8]>()));
    let disabled = if customer.is_active() { "no" } else { "yes" };

    let mut row = row_from(&[
        ("name", &customer.username),
        ("password", &password),
        ("service", "pppoe"),
        ("disabled", disabled),
    ]);
    row.insert("comment".to_string(), format!("Customer ID: {}", customer.id));

    if let Some(pkg) = package {
        if pkg.upload_mbps > 0 && pkg.download_mbps > 0 {
            row.insert("rate-limit".to_string(), rate_limit(pkg));
        }
    }
    if let Some(name) = &profile.profile {
        row.insert("profile".to_string(), name.clone());
    }
    if let Some(addr) = &profile.local_address {
        row.insert("local-address".to_string(), addr.clone());
    }
    if let Some(pool) = &profile.remote_address {
        row.insert("remote-address".to_string(), pool.clone());
    }
    row
}

/// Package speeds as a bits-per-second `upload/download` string.
fn rate_limit(package: &package::Model) -> String {
    format!(
        "{}/{}",
        package.upload_mbps as i64 * 1_000_000,
        package.download_mbps as i64 * 1_000_000
    )
}

/// Creates or updates the customer's mirror record, keyed by username.
/// RADIUS-primary routers are skipped without any device call.
pub async fn sync_customer(
    transport: &dyn RouterTransport,
    router: &router::Model,
    customer: &customer::Model,
    package: Option<&package::Model>,
    profile: &MirrorProfile,
) -> Result<SyncOutcome, TransportError> {
    if router.primary_auth == PrimaryAuth::Radius {
        return Ok(SyncOutcome::skipped("router authenticates via RADIUS"));
    }

    let row = build_secret_row(customer, package, profile);
    debug!(customer_id = customer.id, row = ?redact_row(&row), "syncing mirror record");

    let filter = row_from(&[("name", &customer.username)]);
    let existing = transport.get_rows(menus::PPP_SECRET, &filter).await?;
    if let Some(current) = existing.first() {
        match transport.edit_row(menus::PPP_SECRET, current, &row).await? {
            true => Ok(SyncOutcome::new(SyncAction::Updated, true, "mirror updated")),
            false => Ok(SyncOutcome::new(
                SyncAction::Updated,
                false,
                "device rejected the edit",
            )),
        }
    } else {
        let report = transport.add_rows(menus::PPP_SECRET, &[row]).await?;
        if report.all_succeeded() {
            Ok(SyncOutcome::new(SyncAction::Created, true, "mirror created"))
        } else {
            Ok(SyncOutcome::new(
                SyncAction::Created,
                false,
                report.errors.join("; "),
            ))
        }
    }
}

/// Syncs a batch of customers onto one router, sequentially. A customer
/// whose row the device refuses is counted failed and the batch moves on;
/// only losing the device aborts.
pub async fn sync_all(
    transport: &dyn RouterTransport,
    router: &router::Model,
    customers: &[(customer::Model, Option<package::Model>)],
) -> Result<BulkSyncReport, TransportError> {
    let mut report = BulkSyncReport::default();
    for (customer, package) in customers {
        let profile = MirrorProfile::from_package(package.as_ref());
        let outcome = sync_customer(transport, router, customer, package.as_ref(), &profile).await?;
        if !outcome.success {
            warn!(
                customer_id = customer.id,
                router_id = router.id,
                message = %outcome.message,
                "customer failed to sync"
            );
        }
        report.absorb(&outcome);
    }
    Ok(report)
}

/// Drops the customer's mirror record entirely.
pub async fn remove_customer(
    transport: &dyn RouterTransport,
    router: &router::Model,
    username: &str,
) -> Result<SyncOutcome, TransportError> {
    if router.primary_auth == PrimaryAuth::Radius {
        return Ok(SyncOutcome::skipped("router authenticates via RADIUS"));
    }
    let removed = transport
        .remove_rows(menus::PPP_SECRET, &row_from(&[("name", username)]))
        .await?;
    Ok(SyncOutcome::new(
        SyncAction::Removed,
        true,
        format!("removed {removed} record(s)"),
    ))
}

/// Disables the mirror without deleting it. A missing record is already in
/// the desired state.
pub async fn disable_customer(
    transport: &dyn RouterTransport,
    router: &router::Model,
    username: &str,
) -> Result<SyncOutcome, TransportError> {
    if router.primary_auth == PrimaryAuth::Radius {
        return Ok(SyncOutcome::skipped("router authenticates via RADIUS"));
    }
    let filter = row_from(&[("name", username)]);
    let existing = transport.get_rows(menus::PPP_SECRET, &filter).await?;
    let Some(current) = existing.first() else {
        return Ok(SyncOutcome::skipped("no mirror record to disable"));
    };
    let changed = transport
        .edit_row(menus::PPP_SECRET, current, &row_from(&[("disabled", "yes")]))
        .await?;
    Ok(SyncOutcome::new(
        SyncAction::Updated,
        changed,
        if changed {
            "mirror disabled"
        } else {
            "device rejected the edit"
        },
    ))
}

/// Enables the mirror; a missing record is created enabled, so "enable"
/// means "ensure present and enabled".
pub async fn enable_customer(
    transport: &dyn RouterTransport,
    router: &router::Model,
    customer: &customer::Model,
    package: Option<&package::Model>,
    profile: &MirrorProfile,
) -> Result<SyncOutcome, TransportError> {
    if router.primary_auth == PrimaryAuth::Radius {
        return Ok(SyncOutcome::skipped("router authenticates via RADIUS"));
    }
    let filter = row_from(&[("name", &customer.username)]);
    let existing = transport.get_rows(menus::PPP_SECRET, &filter).await?;
    if let Some(current) = existing.first() {
        let changed = transport
            .edit_row(menus::PPP_SECRET, current, &row_from(&[("disabled", "no")]))
            .await?;
        return Ok(SyncOutcome::new(
            SyncAction::Updated,
            changed,
            if changed {
                "mirror enabled"
            } else {
                "device rejected the edit"
            },
        ));
    }

    let mut row = build_secret_row(customer, package, profile);
    row.insert("disabled".to_string(), "no".to_string());
    let report = transport.add_rows(menus::PPP_SECRET, &[row]).await?;
    if report.all_succeeded() {
        Ok(SyncOutcome::new(SyncAction::Created, true, "mirror created enabled"))
    } else {
        Ok(SyncOutcome::new(
            SyncAction::Created,
            false,
            report.errors.join("; "),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::{CustomerStatus, ProvisioningState, TransportKind};
    use crate::transport::fake::FakeTransport;
    use chrono::Utc;

    fn sample_router(primary_auth: PrimaryAuth) -> router::Model {
        let now = Utc::now();
        router::Model {
            id: 1,
            tenant_id: 1,
            nas_id: None,
            name: "edge-01".to_string(),
            host: "192.0.2.10".to_string(),
            api_port: 8728,
            transport_kind: TransportKind::Binary,
            username: "admin".to_string(),
            password: "pw".to_string(),
            radius_secret: None,
            primary_auth,
            provisioning_state: ProvisioningState::Provisioned,
            status: "active".to_string(),
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_customer(id: i32, status: CustomerStatus, password: Option<&str>) -> customer::Model {
        let now = Utc::now();
        customer::Model {
            id,
            tenant_id: 1,
            username: format!("user{id}"),
            password_plain: password.map(str::to_string),
            status,
            package_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_package() -> package::Model {
        package::Model {
            id: 3,
            profile_name: "10M".to_string(),
            download_mbps: 10,
            upload_mbps: 5,
        }
    }

    #[test]
    fn mirror_disabled_flag_tracks_customer_status() {
        let profile = MirrorProfile::default();
        let active = sample_customer(1, CustomerStatus::Active, Some("pw"));
        let inactive = sample_customer(2, CustomerStatus::Inactive, Some("pw"));
        assert_eq!(
            build_secret_row(&active, None, &profile).get("disabled").unwrap(),
            "no"
        );
        assert_eq!(
            build_secret_row(&inactive, None, &profile).get("disabled").unwrap(),
            "yes"
        );
    }

    #[test]
    fn generated_password_is_high_entropy_not_username_derived() {
        let profile = MirrorProfile::default();
        let customer = sample_customer(1, CustomerStatus::Active, None);
        let row = build_secret_row(&customer, None, &profile);
        let password = row.get("password").unwrap();
        assert_eq!(password.len(), 16);
        assert!(password.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!password.contains(&customer.username));
    }

    #[test]
    fn rate_limit_scales_megabits_decimally() {
        let profile = MirrorProfile::default();
        let customer = sample_customer(1, CustomerStatus::Active, Some("pw"));
        let package = sample_package();
        let row = build_secret_row(&customer, Some(&package), &profile);
        assert_eq!(row.get("rate-limit").unwrap(), "5000000/10000000");
    }

    #[test]
    fn zero_speed_package_gets_no_rate_limit() {
        let profile = MirrorProfile::default();
        let customer = sample_customer(1, CustomerStatus::Active, Some("pw"));
        let mut package = sample_package();
        package.upload_mbps = 0;
        let row = build_secret_row(&customer, Some(&package), &profile);
        assert!(!row.contains_key("rate-limit"));
    }

    #[test]
    fn profile_fields_are_copied_when_present() {
        let profile = MirrorProfile {
            profile: Some("10M".to_string()),
            local_address: Some("10.0.0.1".to_string()),
            remote_address: Some("pppoe-pool".to_string()),
        };
        let customer = sample_customer(1, CustomerStatus::Active, Some("pw"));
        let row = build_secret_row(&customer, None, &profile);
        assert_eq!(row.get("profile").unwrap(), "10M");
        assert_eq!(row.get("local-address").unwrap(), "10.0.0.1");
        assert_eq!(row.get("remote-address").unwrap(), "pppoe-pool");
    }

    #[tokio::test]
    async fn radius_primary_router_is_skipped_without_device_calls() {
        let device = FakeTransport::new();
        let router = sample_router(PrimaryAuth::Radius);
        let customer = sample_customer(1, CustomerStatus::Active, Some("pw"));
        let outcome = sync_customer(&device, &router, &customer, None, &MirrorProfile::default())
            .await
            .expect("sync");
        assert_eq!(outcome.action, SyncAction::Skipped);
        assert!(device.rows(menus::PPP_SECRET).is_empty());
    }

    #[tokio::test]
    async fn resync_updates_the_same_record_instead_of_duplicating() {
        let device = FakeTransport::new();
        let router = sample_router(PrimaryAuth::Local);
        let profile = MirrorProfile::default();
        let mut customer = sample_customer(7, CustomerStatus::Inactive, Some("pw"));

        let first = sync_customer(&device, &router, &customer, None, &profile)
            .await
            .expect("first sync");
        assert_eq!(first.action, SyncAction::Created);
        assert_eq!(device.rows(menus::PPP_SECRET)[0].get("disabled").unwrap(), "yes");

        customer.status = CustomerStatus::Active;
        let second = sync_customer(&device, &router, &customer, None, &profile)
            .await
            .expect("second sync");
        assert_eq!(second.action, SyncAction::Updated);

        let rows = device.rows(menus::PPP_SECRET);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("disabled").unwrap(), "no");
        assert_eq!(rows[0].get("comment").unwrap(), "Customer ID: 7");
    }

    #[tokio::test]
    async fn enable_falls_back_to_creating_an_enabled_record() {
        let device = FakeTransport::new();
        let router = sample_router(PrimaryAuth::Local);
        let customer = sample_customer(9, CustomerStatus::Inactive, Some("pw"));

        let outcome = enable_customer(&device, &router, &customer, None, &MirrorProfile::default())
            .await
            .expect("enable");
        assert_eq!(outcome.action, SyncAction::Created);

        let rows = device.rows(menus::PPP_SECRET);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("disabled").unwrap(), "no");
    }

    #[tokio::test]
    async fn disable_of_missing_record_is_a_skip() {
        let device = FakeTransport::new();
        let router = sample_router(PrimaryAuth::Local);
        let outcome = disable_customer(&device, &router, "ghost").await.expect("disable");
        assert_eq!(outcome.action, SyncAction::Skipped);
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn remove_reports_how_many_records_went_away() {
        let device = FakeTransport::new();
        let router = sample_router(PrimaryAuth::Local);
        device.seed(menus::PPP_SECRET, vec![row_from(&[("name", "user5")])]);
        let outcome = remove_customer(&device, &router, "user5").await.expect("remove");
        assert_eq!(outcome.action, SyncAction::Removed);
        assert!(device.rows(menus::PPP_SECRET).is_empty());
    }

    #[tokio::test]
    async fn rejected_row_fails_the_customer_without_touching_the_device() {
        let device = FakeTransport::new();
        let router = sample_router(PrimaryAuth::Local);
        device.reject_add(menus::PPP_SECRET, "name", "user1");
        let customer = sample_customer(1, CustomerStatus::Active, Some("pw"));

        let outcome = sync_customer(&device, &router, &customer, None, &MirrorProfile::default())
            .await
            .expect("sync");
        assert_eq!(outcome.action, SyncAction::Created);
        assert!(!outcome.success);
        assert!(device.rows(menus::PPP_SECRET).is_empty());
    }

    #[tokio::test]
    async fn batch_counts_rejected_customers_and_keeps_going() {
        let device = FakeTransport::new();
        let router = sample_router(PrimaryAuth::Local);
        device.reject_add(menus::PPP_SECRET, "name", "user2");
        device.reject_add(menus::PPP_SECRET, "name", "user4");

        let batch: Vec<(customer::Model, Option<package::Model>)> = (1..=5)
            .map(|id| (sample_customer(id, CustomerStatus::Active, Some("pw")), None))
            .collect();
        let report = sync_all(&device, &router, &batch).await.expect("batch");

        assert_eq!(report.total, 5);
        assert_eq!(report.synced, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.skipped, 0);
        // Later customers still landed on the device.
        assert_eq!(device.rows(menus::PPP_SECRET).len(), 3);
    }

    #[tokio::test]
    async fn offline_device_aborts_the_batch() {
        let device = FakeTransport::new();
        let router = sample_router(PrimaryAuth::Local);
        device.set_offline(true);
        let batch = vec![(sample_customer(1, CustomerStatus::Active, Some("pw")), None)];
        assert!(sync_all(&device, &router, &batch).await.is_err());
    }

    #[test]
    fn bulk_report_counts_each_outcome_kind() {
        let mut report = BulkSyncReport::default();
        report.absorb(&SyncOutcome::new(SyncAction::Created, true, ""));
        report.absorb(&SyncOutcome::new(SyncAction::Updated, false, "boom"));
        report.absorb(&SyncOutcome::skipped("radius"));
        assert_eq!(report.total, 3);
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
    }
}
