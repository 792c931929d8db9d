use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::BackupType;

/// Encrypted configuration snapshot. Append-only; rows are never updated.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "config_backups")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub router_id: i32,
    pub created_by: Option<i32>,
    pub backup_type: BackupType,
    pub notes: Option<String>,
    /// Hex-encoded AES-256-GCM ciphertext of the JSON payload.
    #[sea_orm(column_type = "Text")]
    pub payload: String,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::router::Entity",
        from = "Column::RouterId",
        to = "super::router::Column::Id"
    )]
    Router,
}

impl Related<super::router::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Router.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
