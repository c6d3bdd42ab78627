//! Per-puppet activity window.
//!
//! Every puppet carries the timestamp (milliseconds since epoch) of the first
//! and the most recent activity observed from its Signal user. The admission
//! controller reads these windows to decide how many puppets are "active".
//!
//! Invariants:
//! - `first_activity_ts` is set once and never overwritten
//! - `last_activity_ts >= first_activity_ts` whenever both are set

use serde::{Deserialize, Serialize};

/// First/last activity timestamps for one puppet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityWindow {
    /// Matrix ID of the puppet.
    pub mxid: String,
    /// First observed activity (ms since epoch).
    pub first_activity_ts: Option<i64>,
    /// Most recent observed activity (ms since epoch).
    pub last_activity_ts: Option<i64>,
}

impl ActivityWindow {
    /// A puppet that has not been seen doing anything yet.
    #[must_use]
    pub fn new(mxid: impl Into<String>) -> Self {
        Self {
            mxid: mxid.into(),
            first_activity_ts: None,
            last_activity_ts: None,
        }
    }

    /// A window with both timestamps already known (e.g. loaded from storage).
    ///
    /// `last` is clamped so it never precedes `first`.
    #[must_use]
    pub fn with_range(mxid: impl Into<String>, first: i64, last: i64) -> Self {
        Self {
            mxid: mxid.into(),
            first_activity_ts: Some(first),
            last_activity_ts: Some(last.max(first)),
        }
    }

    /// Record an activity event at `ts`.
    ///
    /// Out-of-order events older than the current `last_activity_ts` leave it
    /// unchanged.
    pub fn record_activity(&mut self, ts: i64) {
        let first = *self.first_activity_ts.get_or_insert(ts);
        let last = self.last_activity_ts.map_or(ts, |last| last.max(ts));
        self.last_activity_ts = Some(last.max(first));
    }

    /// Whether at least one activity has been recorded.
    #[must_use]
    pub fn has_recorded_activity(&self) -> bool {
        self.first_activity_ts.is_some() && self.last_activity_ts.is_some()
    }
}
