use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, Set, TransactionError,
    TransactionTrait,
};
use tracing::info;

use crate::db::entities::{nas, router};

/// Result of [`ensure_nas_entry`]: the NAS row, the router carrying its
/// reference, and whether the row had to be created.
pub struct EnsuredNas {
    pub nas: nas::Model,
    pub router: router::Model,
    pub created: bool,
}

/// Guarantees the router is registered as a RADIUS client (a NAS row) on
/// the server side. `radius_server` is the RADIUS server address, the same
/// address the on-device watchdog probes.
///
/// Idempotent: an existing linked NAS row is returned unchanged. Otherwise a
/// row is created and linked to the router in one transaction, reusing the
/// router's shared secret or minting a fresh 32-hex-char one.
pub async fn ensure_nas_entry(
    db: &DatabaseConnection,
    router: &router::Model,
    radius_server: &str,
    auth_port: u16,
    acct_port: u16,
) -> Result<EnsuredNas, DbErr> {
    if let Some(nas_id) = router.nas_id {
        if let Some(existing) = nas::Entity::find_by_id(nas_id).one(db).await? {
            return Ok(EnsuredNas {
                nas: existing,
                router: router.clone(),
                created: false,
            });
        }
        // Dangling reference, fall through and recreate.
    }

    let snapshot = router.clone();
    let server = radius_server.to_string();
    let ensured = db
        .transaction::<_, EnsuredNas, DbErr>(|txn| {
            Box::pin(async move {
                let now = Utc::now();
                let secret = snapshot
                    .radius_secret
                    .clone()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(generate_shared_secret);

                let created = nas::ActiveModel {
                    tenant_id: Set(snapshot.tenant_id),
                    name: Set(format!("{} NAS", snapshot.name)),
                    server: Set(server),
                    secret: Set(secret.clone()),
                    auth_port: Set(auth_port as i32),
                    acct_port: Set(acct_port as i32),
                    status: Set("active".to_string()),
                    description: Set(Some(format!(
                        "Auto-created NAS entry for {}",
                        snapshot.name
                    ))),
                    created_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await?;

                let mut active: router::ActiveModel = snapshot.into();
                active.nas_id = Set(Some(created.id));
                active.radius_secret = Set(Some(secret));
                active.updated_at = Set(now);
                let router = active.update(txn).await?;

                Ok(EnsuredNas {
                    nas: created,
                    router,
                    created: true,
                })
            })
        })
        .await
        .map_err(flatten)?;

    info!(
        router_id = ensured.router.id,
        nas_id = ensured.nas.id,
        "created NAS entry"
    );
    Ok(ensured)
}

fn generate_shared_secret() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

fn flatten(err: TransactionError<DbErr>) -> DbErr {
    match err {
        TransactionError::Connection(e) => e,
        TransactionError::Transaction(e) => e,
    }
}
