use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Runtime settings, loaded once from the environment at startup.
///
/// RADIUS port and timer defaults match what the routers themselves
/// default to (1812/1813, 3s client timeout, 5m interim updates).
#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    /// Address the routers should use to reach the RADIUS server.
    pub radius_server_ip: String,
    pub radius_auth_port: u16,
    pub radius_acct_port: u16,
    /// RADIUS client timeout as a RouterOS duration string, e.g. "3s".
    pub radius_timeout: String,
    /// Accounting interim-update interval, e.g. "5m".
    pub interim_update: String,
    pub netwatch_enabled: bool,
    /// When set, a failed watchdog install fails the whole provisioning run.
    pub netwatch_required: bool,
    pub netwatch_interval: String,
    pub netwatch_timeout: String,
    /// Bound on every device round trip.
    pub device_timeout: Duration,
    /// How many routers a fleet-wide sync touches concurrently.
    pub sync_concurrency: usize,
    /// 32-byte hex key for backup payload encryption.
    pub backup_encryption_key: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Settings {
            database_url: require("DATABASE_URL")?,
            radius_server_ip: env_or("RADIUS_SERVER_IP", "127.0.0.1"),
            radius_auth_port: parse("RADIUS_AUTH_PORT", 1812)?,
            radius_acct_port: parse("RADIUS_ACCT_PORT", 1813)?,
            radius_timeout: env_or("RADIUS_TIMEOUT", "3s"),
            interim_update: env_or("RADIUS_INTERIM_UPDATE", "5m"),
            netwatch_enabled: parse("NETWATCH_ENABLED", true)?,
            netwatch_required: parse("NETWATCH_REQUIRED", false)?,
            netwatch_interval: env_or("NETWATCH_INTERVAL", "1m"),
            netwatch_timeout: env_or("NETWATCH_TIMEOUT", "1s"),
            device_timeout: Duration::from_secs(parse("DEVICE_TIMEOUT_SECS", 30u64)?),
            sync_concurrency: parse("SYNC_CONCURRENCY", 4usize)?,
            backup_encryption_key: require("BACKUP_ENCRYPTION_KEY")?,
        })
    }
}

fn require(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid(key, e.to_string())),
        Err(_) => Ok(default),
    }
}
