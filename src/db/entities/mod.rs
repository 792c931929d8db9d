//! SeaORM entities for the central control-plane records.
//!
//! Device-side state (credential mirrors, watchdog probes) is deliberately
//! not represented here; it is derived, reproducible state that lives on the
//! routers themselves.

pub mod config_backup;
pub mod customer;
pub mod nas;
pub mod package;
pub mod provisioning_log;
pub mod router;
