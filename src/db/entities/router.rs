use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{PrimaryAuth, ProvisioningState, TransportKind};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "routers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub tenant_id: i32,
    pub nas_id: Option<i32>,
    pub name: String,
    pub host: String,
    pub api_port: i32,
    pub transport_kind: TransportKind,
    pub username: String,
    pub password: String,
    pub radius_secret: Option<String>,
    pub primary_auth: PrimaryAuth,
    pub provisioning_state: ProvisioningState,
    pub status: String,
    pub last_checked_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::nas::Entity",
        from = "Column::NasId",
        to = "super::nas::Column::Id"
    )]
    Nas,
}

impl Related<super::nas::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Nas.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
