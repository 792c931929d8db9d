use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};

use crate::db::entities::{customer, package};
use crate::db::enums::CustomerStatus;

pub async fn find_with_package(
    db: &DatabaseConnection,
    customer_id: i32,
) -> Result<Option<(customer::Model, Option<package::Model>)>, DbErr> {
    customer::Entity::find_by_id(customer_id)
        .find_also_related(package::Entity)
        .one(db)
        .await
}

/// Active customers of the tenant, package attached, for a bulk mirror sync.
pub async fn list_active_with_packages(
    db: &DatabaseConnection,
    tenant_id: i32,
) -> Result<Vec<(customer::Model, Option<package::Model>)>, DbErr> {
    customer::Entity::find()
        .filter(customer::Column::TenantId.eq(tenant_id))
        .filter(customer::Column::Status.eq(CustomerStatus::Active))
        .find_also_related(package::Entity)
        .all(db)
        .await
}
