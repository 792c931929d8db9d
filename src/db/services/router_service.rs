use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};

use crate::db::entities::router;
use crate::db::enums::{PrimaryAuth, ProvisioningState};

pub async fn find_by_id(
    db: &DatabaseConnection,
    router_id: i32,
) -> Result<Option<router::Model>, DbErr> {
    router::Entity::find_by_id(router_id).one(db).await
}

/// Provisioned routers of a tenant, the population a fleet-wide sync walks.
pub async fn list_provisioned(
    db: &DatabaseConnection,
    tenant_id: i32,
) -> Result<Vec<router::Model>, DbErr> {
    router::Entity::find()
        .filter(router::Column::TenantId.eq(tenant_id))
        .filter(router::Column::ProvisioningState.eq(ProvisioningState::Provisioned))
        .all(db)
        .await
}

pub async fn set_provisioning_state(
    db: &DatabaseConnection,
    router: router::Model,
    state: ProvisioningState,
) -> Result<router::Model, DbErr> {
    let mut active: router::ActiveModel = router.into();
    active.provisioning_state = Set(state);
    active.updated_at = Set(Utc::now());
    active.update(db).await
}

/// Records which credential source the router authenticates against.
pub async fn set_primary_auth(
    db: &DatabaseConnection,
    router: router::Model,
    primary_auth: PrimaryAuth,
) -> Result<router::Model, DbErr> {
    let mut active: router::ActiveModel = router.into();
    active.primary_auth = Set(primary_auth);
    active.updated_at = Set(Utc::now());
    active.update(db).await
}

pub async fn touch_last_checked(
    db: &DatabaseConnection,
    router: router::Model,
) -> Result<router::Model, DbErr> {
    let now = Utc::now();
    let mut active: router::ActiveModel = router.into();
    active.last_checked_at = Set(Some(now));
    active.updated_at = Set(now);
    active.update(db).await
}
