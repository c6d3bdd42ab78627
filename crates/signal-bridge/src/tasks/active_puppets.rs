//! Active puppet count and admission control.
//!
//! Once a minute the task counts puppets that have been active long enough
//! and recently enough, publishes the count, and decides whether the bridge
//! is over its puppet limit and should block new work.
//!
//! A puppet is active when both hold:
//! - `puppet_inactivity_days` is unset, or its last activity is at most that
//!   many days ago
//! - its days of activity exceed `min_puppet_activity_days`
//!
//! Days of activity are computed as
//! `(last_activity_ts - first_activity_ts / 1000) / ONE_DAY_MS`.
//! Note the mixed units (ms against ms/1000).
//!
//! # Graceful Shutdown
//!
//! Cancellation during the sleep or the evaluation ends the task immediately.

use crate::activity::ActivityWindow;
use crate::config::{ConfigHandle, LimitsConfig};
use crate::errors::BridgeError;
use crate::observability::metrics;
use crate::registry::PuppetRegistry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// How often the active puppet count is recomputed.
pub const ACTIVE_PUPPET_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Milliseconds per day.
pub const ONE_DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Days of activity for a window, `None` if nothing was recorded.
#[must_use]
#[allow(clippy::cast_precision_loss)] // ms timestamps fit in f64 mantissa
pub fn days_of_activity(window: &ActivityWindow) -> Option<f64> {
    let first = window.first_activity_ts? as f64;
    let last = window.last_activity_ts? as f64;
    Some((last - first / 1000.0) / ONE_DAY_MS as f64)
}

/// Whether one puppet counts towards the active total at `now_ms`.
#[must_use]
pub fn is_active(window: &ActivityWindow, limits: &LimitsConfig, now_ms: i64) -> bool {
    let (Some(last), Some(days)) = (window.last_activity_ts, days_of_activity(window)) else {
        return false;
    };

    let recent = match limits.puppet_inactivity_days {
        None => true,
        Some(max_days) => now_ms.saturating_sub(last) <= max_days.saturating_mul(ONE_DAY_MS),
    };

    recent && days > limits.min_puppet_activity_days
}

/// Number of active puppets among `windows` at `now_ms`.
#[must_use]
pub fn count_active_puppets(windows: &[ActivityWindow], limits: &LimitsConfig, now_ms: i64) -> u64 {
    let active = windows
        .iter()
        .filter(|window| is_active(window, limits, now_ms))
        .count();
    u64::try_from(active).unwrap_or(u64::MAX)
}

/// Process-wide admission control state.
///
/// Written only by the active puppet task, read by anything that wants to
/// refuse new work while the bridge is over its limit.
#[derive(Debug, Default)]
pub struct BridgeBlockState {
    blocked: AtomicBool,
    active_puppets: AtomicU64,
}

impl BridgeBlockState {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Last computed active puppet count.
    #[must_use]
    pub fn active_puppets(&self) -> u64 {
        self.active_puppets.load(Ordering::SeqCst)
    }

    /// Apply a fresh active count and publish both gauges.
    ///
    /// The blocked flag is only recomputed when both `block_on_limit_reached`
    /// and `max_puppet_limit` are present; otherwise it keeps its previous
    /// value. Returns the resulting blocked flag.
    pub fn apply(&self, active_puppets: u64, limits: &LimitsConfig) -> bool {
        self.active_puppets.store(active_puppets, Ordering::SeqCst);

        if let (Some(_), Some(max_puppet_limit)) =
            (limits.block_on_limit_reached, limits.max_puppet_limit)
        {
            // A negative limit is rejected by config validation; treat it as 0
            let limit = u64::try_from(max_puppet_limit).unwrap_or(0);
            self.blocked.store(limit < active_puppets, Ordering::SeqCst);
        }

        let blocked = self.is_blocked();
        metrics::set_block_state(active_puppets, blocked);
        blocked
    }
}

/// Current wall clock time in milliseconds since epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Run one evaluation: fetch activity, count, update block state.
///
/// Returns the active puppet count.
pub async fn update_active_puppet_metric(
    puppets: &PuppetRegistry,
    config: &ConfigHandle,
    state: &BridgeBlockState,
    now_ms: i64,
) -> Result<u64, BridgeError> {
    let limits = config.snapshot().await.bridge.limits;
    let windows = puppets.all_with_recorded_activity().await?;

    let active = count_active_puppets(&windows, &limits, now_ms);
    let blocked = state.apply(active, &limits);

    debug!(
        target: "bridge.task.active_puppets",
        active_puppets = active,
        blocked = blocked,
        "Current active puppet count is {}", active
    );
    Ok(active)
}

/// Run the active puppet loop until `cancel_token` is cancelled.
#[instrument(skip_all, name = "bridge.task.active_puppets")]
pub async fn start_active_puppet_task(
    puppets: Arc<PuppetRegistry>,
    config: Arc<ConfigHandle>,
    state: Arc<BridgeBlockState>,
    cancel_token: CancellationToken,
) {
    info!(
        target: "bridge.task.active_puppets",
        interval_seconds = ACTIVE_PUPPET_CHECK_INTERVAL.as_secs(),
        "Starting active puppet metric loop"
    );

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            () = tokio::time::sleep(ACTIVE_PUPPET_CHECK_INTERVAL) => {}
        }

        info!(target: "bridge.task.active_puppets", "Executing periodic active puppet metric check");
        tokio::select! {
            () = cancel_token.cancelled() => break,
            result = update_active_puppet_metric(&puppets, &config, &state, now_ms()) => {
                if let Err(e) = result {
                    error!(
                        target: "bridge.task.active_puppets",
                        error = %e,
                        error_kind = e.kind(),
                        "Error while checking active puppets"
                    );
                }
            }
        }
    }

    info!(target: "bridge.task.active_puppets", "Active puppet metric loop stopped");
}
