use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::db::entities::config_backup;
use crate::db::enums::BackupType;

pub async fn insert(
    db: &DatabaseConnection,
    router_id: i32,
    created_by: Option<i32>,
    backup_type: BackupType,
    notes: Option<String>,
    payload_hex: String,
) -> Result<config_backup::Model, DbErr> {
    config_backup::ActiveModel {
        router_id: Set(router_id),
        created_by: Set(created_by),
        backup_type: Set(backup_type),
        notes: Set(notes),
        payload: Set(payload_hex),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn find_by_id(
    db: &DatabaseConnection,
    backup_id: i32,
) -> Result<Option<config_backup::Model>, DbErr> {
    config_backup::Entity::find_by_id(backup_id).one(db).await
}

pub async fn list_for_router(
    db: &DatabaseConnection,
    router_id: i32,
    backup_type: Option<BackupType>,
) -> Result<Vec<config_backup::Model>, DbErr> {
    let mut query = config_backup::Entity::find()
        .filter(config_backup::Column::RouterId.eq(router_id))
        .order_by_desc(config_backup::Column::CreatedAt);
    if let Some(kind) = backup_type {
        query = query.filter(config_backup::Column::BackupType.eq(kind));
    }
    query.all(db).await
}

/// Reaps `scheduled` backups past the retention window; other kinds stay.
pub async fn delete_old_scheduled(
    db: &DatabaseConnection,
    router_id: i32,
    retention_days: i64,
) -> Result<u64, DbErr> {
    let cutoff = Utc::now() - Duration::days(retention_days);
    let result = config_backup::Entity::delete_many()
        .filter(config_backup::Column::RouterId.eq(router_id))
        .filter(config_backup::Column::BackupType.eq(BackupType::Scheduled))
        .filter(config_backup::Column::CreatedAt.lt(cutoff))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}
