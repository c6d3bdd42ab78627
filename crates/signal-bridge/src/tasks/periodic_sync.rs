//! Periodic full resync background task.
//!
//! Every `bridge.periodic_sync` seconds, walks a snapshot of the logged-in
//! users and resyncs each one with Signal. Before each user the task sleeps a
//! random delay in `[0, SYNC_JITTER_SECONDS)` so thousands of sessions do not
//! hit Signal at the same instant.
//!
//! # Failure isolation
//!
//! A failed sync is logged and counted; the walk continues with the next user.
//!
//! # Graceful Shutdown
//!
//! Cancellation is checked at every suspension point (interval sleep, jitter
//! sleep, the sync call itself). A cancelled task stops immediately without
//! visiting the remaining users of the current pass.

use crate::observability::metrics;
use crate::registry::UserRegistry;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Upper bound (exclusive) of the random delay before each user's sync.
pub const SYNC_JITTER_SECONDS: f64 = 10.0;

/// Interval for a configured `bridge.periodic_sync` value.
///
/// Returns `None` when periodic sync is disabled (`seconds <= 0`).
#[must_use]
pub fn sync_interval(seconds: i64) -> Option<Duration> {
    u64::try_from(seconds)
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

/// Draw the delay before one user's sync.
pub fn jitter_delay<R: Rng + ?Sized>(rng: &mut R) -> Duration {
    Duration::from_secs_f64(rng.gen_range(0.0..SYNC_JITTER_SECONDS))
}

/// Spawn the periodic sync loop for a configured `bridge.periodic_sync`.
///
/// Returns `None` without spawning anything when periodic sync is disabled.
pub fn spawn_periodic_sync(
    users: Arc<UserRegistry>,
    periodic_sync: i64,
    cancel_token: CancellationToken,
) -> Option<JoinHandle<()>> {
    let Some(interval) = sync_interval(periodic_sync) else {
        debug!(
            target: "bridge.task.periodic_sync",
            periodic_sync = periodic_sync,
            "Periodic sync is not enabled"
        );
        return None;
    };
    Some(tokio::spawn(start_periodic_sync(users, interval, cancel_token)))
}

/// Run the periodic sync loop until `cancel_token` is cancelled.
#[instrument(skip_all, name = "bridge.task.periodic_sync")]
pub async fn start_periodic_sync(
    users: Arc<UserRegistry>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "bridge.task.periodic_sync",
        interval_seconds = interval.as_secs(),
        "Starting periodic sync loop"
    );

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }

        info!(target: "bridge.task.periodic_sync", "Executing periodic syncs");
        if !sync_all_users(&users, &cancel_token).await {
            break;
        }
    }

    info!(target: "bridge.task.periodic_sync", "Periodic sync stopped");
}

/// Resync every user in a snapshot of the registry.
///
/// Returns `false` if the pass was cut short by cancellation.
pub(crate) async fn sync_all_users(users: &UserRegistry, cancel_token: &CancellationToken) -> bool {
    // Users registered after this point are picked up on the next pass
    let snapshot = users.all().await;
    debug!(
        target: "bridge.task.periodic_sync",
        users = snapshot.len(),
        "Took user snapshot"
    );

    for user in snapshot {
        let delay = jitter_delay(&mut rand::thread_rng());
        tokio::select! {
            () = cancel_token.cancelled() => return false,
            () = tokio::time::sleep(delay) => {}
        }

        tokio::select! {
            () = cancel_token.cancelled() => return false,
            result = user.sync() => match result {
                Ok(()) => metrics::record_periodic_sync("success"),
                Err(e) => {
                    metrics::record_periodic_sync("error");
                    error!(
                        target: "bridge.task.periodic_sync",
                        mxid = %user.mxid(),
                        error = %e,
                        error_kind = e.kind(),
                        transient = e.is_transient(),
                        "Error while syncing user"
                    );
                }
            }
        }
    }

    true
}
