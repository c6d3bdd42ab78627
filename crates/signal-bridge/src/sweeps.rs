//! One-shot sweeps triggered at lifecycle points.
//!
//! - Bridge info resend: runs as a startup action when
//!   `bridge.resend_bridge_info` is set
//! - Disappearing message expiry: launched detached after shutdown
//!
//! Both are idempotent and safe to interrupt or re-run.

use crate::config::ConfigHandle;
use crate::errors::BridgeError;
use crate::observability::metrics;
use crate::registry::PortalRegistry;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Outcome of a sweep over portals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Portals the sweep reached.
    pub visited: usize,
    /// Portals (or storage reads) that failed.
    pub failed: usize,
}

/// Re-send the bridge info state event to every portal with a room.
///
/// The `bridge.resend_bridge_info` flag is cleared and saved before the walk
/// starts, so an interrupted sweep is not re-triggered on the next startup.
/// Failures of individual portals are logged and the walk continues.
///
/// # Errors
///
/// Returns an error only when the config flag cannot be persisted.
pub async fn resend_bridge_info(
    config: &ConfigHandle,
    portals: &PortalRegistry,
) -> Result<SweepReport, BridgeError> {
    config.clear_resend_bridge_info().await?;

    info!(target: "bridge.sweep.bridge_info", "Re-sending bridge info state event to all portals");
    let mut report = SweepReport::default();
    let mut stream = portals.all_with_room();

    while let Some(item) = stream.next().await {
        let portal = match item {
            Ok(portal) => portal,
            Err(e) => {
                report.failed += 1;
                error!(
                    target: "bridge.sweep.bridge_info",
                    error = %e,
                    "Failed to load portal"
                );
                continue;
            }
        };

        report.visited += 1;
        match portal.update_bridge_info().await {
            Ok(()) => metrics::record_bridge_info_resend("success"),
            Err(e) => {
                report.failed += 1;
                metrics::record_bridge_info_resend("error");
                warn!(
                    target: "bridge.sweep.bridge_info",
                    room_id = portal.mxid().as_deref().unwrap_or("<none>"),
                    error = %e,
                    error_kind = e.kind(),
                    "Failed to update bridge info"
                );
            }
        }
    }

    info!(
        target: "bridge.sweep.bridge_info",
        visited = report.visited,
        failed = report.failed,
        "Finished re-sending bridge info state events"
    );
    Ok(report)
}

/// Expire every pending disappearing message.
pub async fn expire_disappearing_messages(portals: &PortalRegistry) -> Result<u64, BridgeError> {
    let expired = portals.start_disappearing_message_expirations().await?;
    info!(
        target: "bridge.sweep.disappearing",
        expired = expired,
        "Disappearing message expiration finished"
    );
    Ok(expired)
}

/// Launch the disappearing message sweep without waiting for it.
///
/// Failures are logged by the task itself. The handle may be dropped.
pub fn spawn_disappearing_message_expiration(portals: Arc<PortalRegistry>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = expire_disappearing_messages(&portals).await {
            error!(
                target: "bridge.sweep.disappearing",
                error = %e,
                "Disappearing message expiration failed"
            );
        }
    })
}
