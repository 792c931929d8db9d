//! Autonomous failover watchdog.
//!
//! A netwatch probe on the router pings the RADIUS server. While the server
//! answers, locally mirrored credentials stay disabled and any session that
//! slipped past RADIUS is dropped. The moment the server stops answering,
//! the mirrors are enabled and the router authenticates on its own. The
//! scripts run entirely on the device, so failover works even when this
//! service is down too.

use thiserror::Error;

use crate::config::Settings;
use crate::transport::row::row_from;
use crate::transport::{RouterTransport, TransportError, menus};

/// Runs while the RADIUS server answers: keep mirrors disabled, drop
/// sessions that were not authenticated by RADIUS.
pub const UP_SCRIPT: &str =
    "/ppp secret disable [find disabled=no];/ppp active remove [find radius=no];";

/// Runs when the RADIUS server stops answering: hand authentication to the
/// local mirrors.
pub const DOWN_SCRIPT: &str = "/ppp secret enable [find disabled=yes];";

/// Marks the probe as ours so reinstalls replace it instead of stacking.
pub const PROBE_COMMENT: &str = "radius";

#[derive(Debug, PartialEq, Eq)]
pub enum ProbeInstall {
    Created,
    Replaced,
}

#[derive(Debug, Error)]
pub enum NetwatchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("device rejected watchdog entry: {0}")]
    Rejected(String),
}

/// Installs the watchdog probe for `radius_host`, replacing any previous
/// probe for the same host. Keyed by host, so repeated provisioning runs
/// leave exactly one probe behind.
pub async fn install_probe(
    transport: &dyn RouterTransport,
    radius_host: &str,
    settings: &Settings,
) -> Result<ProbeInstall, NetwatchError> {
    let removed = transport
        .remove_rows(menus::NETWATCH, &row_from(&[("host", radius_host)]))
        .await?;

    let probe = row_from(&[
        ("host", radius_host),
        ("interval", &settings.netwatch_interval),
        ("timeout", &settings.netwatch_timeout),
        ("up-script", UP_SCRIPT),
        ("down-script", DOWN_SCRIPT),
        ("comment", PROBE_COMMENT),
    ]);
    let report = transport.add_rows(menus::NETWATCH, &[probe]).await?;
    if !report.all_succeeded() {
        return Err(NetwatchError::Rejected(report.errors.join("; ")));
    }

    Ok(if removed > 0 {
        ProbeInstall::Replaced
    } else {
        ProbeInstall::Created
    })
}
