pub mod backup_service;
pub mod customer_service;
pub mod nas_service;
pub mod provisioning_log_service;
pub mod router_service;
