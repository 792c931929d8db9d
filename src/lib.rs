pub mod backup;
pub mod config;
pub mod db;
pub mod locks;
pub mod provisioning;
pub mod sync;
pub mod transport;
