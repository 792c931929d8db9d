use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, Set};

use crate::db::entities::provisioning_log;
use crate::db::enums::ProvisioningStatus;

pub async fn start(
    db: &DatabaseConnection,
    router_id: i32,
    actor: Option<i32>,
    action: &str,
) -> Result<provisioning_log::Model, DbErr> {
    provisioning_log::ActiveModel {
        router_id: Set(router_id),
        actor: Set(actor),
        action: Set(action.to_string()),
        status: Set(ProvisioningStatus::InProgress),
        steps: Set(serde_json::Value::Array(Vec::new())),
        error_message: Set(None),
        started_at: Set(Utc::now()),
        completed_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// Finalizes a run. Called exactly once per started log, on success and on
/// failure alike.
pub async fn complete(
    db: &DatabaseConnection,
    log: provisioning_log::Model,
    status: ProvisioningStatus,
    steps: serde_json::Value,
    error_message: Option<String>,
) -> Result<provisioning_log::Model, DbErr> {
    let mut active: provisioning_log::ActiveModel = log.into();
    active.status = Set(status);
    active.steps = Set(steps);
    active.error_message = Set(error_message);
    active.completed_at = Set(Some(Utc::now()));
    active.update(db).await
}
