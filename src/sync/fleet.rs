//! Database-backed sync entry points, including the bounded fleet walk.

use std::sync::Arc;

use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Settings;
use crate::db::enums::PrimaryAuth;
use crate::db::services::{customer_service, router_service};
use crate::locks::RouterLocks;
use crate::sync::customers::{self, BulkSyncReport, MirrorProfile, SyncOutcome};
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("router {0} not found")]
    RouterNotFound(i32),
    #[error("customer {0} not found")]
    CustomerNotFound(i32),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Default, Serialize)]
pub struct FleetReport {
    pub routers: usize,
    pub aggregate: BulkSyncReport,
    /// Routers whose whole sync aborted (unreachable, lookup failure).
    pub router_failures: Vec<(i32, String)>,
}

#[derive(Clone)]
pub struct SyncService {
    db: Arc<DatabaseConnection>,
    settings: Settings,
    locks: Arc<RouterLocks>,
}

impl SyncService {
    pub fn new(db: Arc<DatabaseConnection>, settings: Settings, locks: Arc<RouterLocks>) -> Self {
        Self {
            db,
            settings,
            locks,
        }
    }

    /// Syncs one customer's mirror onto one router.
    pub async fn sync_customer(
        &self,
        customer_id: i32,
        router_id: i32,
    ) -> Result<SyncOutcome, SyncError> {
        let router = router_service::find_by_id(&self.db, router_id)
            .await?
            .ok_or(SyncError::RouterNotFound(router_id))?;
        let (customer, package) = customer_service::find_with_package(&self.db, customer_id)
            .await?
            .ok_or(SyncError::CustomerNotFound(customer_id))?;

        let _guard = self.locks.lock(router_id).await;
        let transport = crate::transport::for_router(&router, self.settings.device_timeout)?;
        let profile = MirrorProfile::from_package(package.as_ref());
        let outcome = customers::sync_customer(
            transport.as_ref(),
            &router,
            &customer,
            package.as_ref(),
            &profile,
        )
        .await?;
        info!(customer_id, router_id, action = ?outcome.action, "customer sync finished");
        Ok(outcome)
    }

    /// Re-enables (creating if missing) one customer's mirror.
    pub async fn enable_customer(
        &self,
        customer_id: i32,
        router_id: i32,
    ) -> Result<SyncOutcome, SyncError> {
        let router = router_service::find_by_id(&self.db, router_id)
            .await?
            .ok_or(SyncError::RouterNotFound(router_id))?;
        let (customer, package) = customer_service::find_with_package(&self.db, customer_id)
            .await?
            .ok_or(SyncError::CustomerNotFound(customer_id))?;

        let _guard = self.locks.lock(router_id).await;
        let transport = crate::transport::for_router(&router, self.settings.device_timeout)?;
        let profile = MirrorProfile::from_package(package.as_ref());
        Ok(customers::enable_customer(
            transport.as_ref(),
            &router,
            &customer,
            package.as_ref(),
            &profile,
        )
        .await?)
    }

    pub async fn disable_customer(
        &self,
        customer_id: i32,
        router_id: i32,
    ) -> Result<SyncOutcome, SyncError> {
        let router = router_service::find_by_id(&self.db, router_id)
            .await?
            .ok_or(SyncError::RouterNotFound(router_id))?;
        let (customer, _) = customer_service::find_with_package(&self.db, customer_id)
            .await?
            .ok_or(SyncError::CustomerNotFound(customer_id))?;

        let _guard = self.locks.lock(router_id).await;
        let transport = crate::transport::for_router(&router, self.settings.device_timeout)?;
        Ok(customers::disable_customer(transport.as_ref(), &router, &customer.username).await?)
    }

    pub async fn remove_customer(
        &self,
        customer_id: i32,
        router_id: i32,
    ) -> Result<SyncOutcome, SyncError> {
        let router = router_service::find_by_id(&self.db, router_id)
            .await?
            .ok_or(SyncError::RouterNotFound(router_id))?;
        let (customer, _) = customer_service::find_with_package(&self.db, customer_id)
            .await?
            .ok_or(SyncError::CustomerNotFound(customer_id))?;

        let _guard = self.locks.lock(router_id).await;
        let transport = crate::transport::for_router(&router, self.settings.device_timeout)?;
        Ok(customers::remove_customer(transport.as_ref(), &router, &customer.username).await?)
    }

    /// Syncs every active customer of the router's tenant onto the router,
    /// sequentially, continuing past per-customer failures. Losing the
    /// device aborts the batch.
    pub async fn sync_router(&self, router_id: i32) -> Result<BulkSyncReport, SyncError> {
        let router = router_service::find_by_id(&self.db, router_id)
            .await?
            .ok_or(SyncError::RouterNotFound(router_id))?;
        let customers_with_packages =
            customer_service::list_active_with_packages(&self.db, router.tenant_id).await?;

        if router.primary_auth == PrimaryAuth::Radius {
            return Ok(BulkSyncReport {
                total: customers_with_packages.len(),
                skipped: customers_with_packages.len(),
                ..Default::default()
            });
        }

        let _guard = self.locks.lock(router_id).await;
        let transport = crate::transport::for_router(&router, self.settings.device_timeout)?;
        let report = customers::sync_all(transport.as_ref(), &router, &customers_with_packages).await?;
        info!(
            router_id,
            total = report.total,
            synced = report.synced,
            failed = report.failed,
            "router sync finished"
        );
        Ok(report)
    }

    /// Walks every provisioned router of a tenant, at most
    /// `sync_concurrency` routers in flight at once. One router's failure
    /// never stops the others.
    pub async fn sync_fleet(&self, tenant_id: i32) -> Result<FleetReport, SyncError> {
        let routers = router_service::list_provisioned(&self.db, tenant_id).await?;
        let semaphore = Arc::new(Semaphore::new(self.settings.sync_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for router in &routers {
            let service = self.clone();
            let semaphore = semaphore.clone();
            let router_id = router.id;
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (router_id, service.sync_router(router_id).await)
            });
        }

        let mut report = FleetReport {
            routers: routers.len(),
            ..Default::default()
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(bulk))) => report.aggregate.merge(&bulk),
                Ok((router_id, Err(e))) => {
                    warn!(router_id, error = %e, "router sync aborted");
                    report.router_failures.push((router_id, e.to_string()));
                }
                Err(e) => warn!(error = %e, "sync task panicked"),
            }
        }
        Ok(report)
    }
}
