use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// RADIUS-client identity of a router. At most one per router; the `server`
/// address doubles as the watchdog probe target for that router.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "nas")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub tenant_id: i32,
    pub name: String,
    pub server: String,
    pub secret: String,
    pub auth_port: i32,
    pub acct_port: i32,
    pub status: String,
    pub description: Option<String>,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::router::Entity")]
    Router,
}

impl Related<super::router::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Router.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
