//! Pre-configured test data fixtures for bridge testing.
//!
//! Provides builders and test data for:
//! - Bridge configurations (periodic sync, resend flag, limits)
//! - Puppet activity windows relative to the current time

use signal_bridge::activity::ActivityWindow;
use signal_bridge::config::{Config, LimitsConfig};
use signal_bridge::tasks::active_puppets::ONE_DAY_MS;

/// Homeserver domain used by every fixture.
pub const TEST_DOMAIN: &str = "example.com";

/// Test configuration builder.
#[derive(Debug, Clone)]
pub struct TestConfig {
    config: Config,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfig {
    /// Defaults with periodic sync disabled and the resend flag off.
    #[must_use]
    pub fn new() -> Self {
        let mut config = Config::default();
        config.homeserver.domain = TEST_DOMAIN.to_string();
        Self { config }
    }

    /// Set `bridge.periodic_sync` in seconds.
    #[must_use]
    pub fn periodic_sync(mut self, seconds: i64) -> Self {
        self.config.bridge.periodic_sync = seconds;
        self
    }

    /// Set `bridge.resend_bridge_info`.
    #[must_use]
    pub fn resend_bridge_info(mut self, resend: bool) -> Self {
        self.config.bridge.resend_bridge_info = resend;
        self
    }

    /// Set the `bridge.limits` section.
    #[must_use]
    pub fn limits(mut self, limits: LimitsConfig) -> Self {
        self.config.bridge.limits = limits;
        self
    }

    /// Enable blocking above `max_puppet_limit` active puppets.
    #[must_use]
    pub fn block_above(mut self, max_puppet_limit: i64) -> Self {
        self.config.bridge.limits.block_on_limit_reached = Some(true);
        self.config.bridge.limits.max_puppet_limit = Some(max_puppet_limit);
        self
    }

    #[must_use]
    pub fn build(self) -> Config {
        self.config
    }
}

/// Ghost mxid for a Signal user ID under the default template.
#[must_use]
pub fn ghost_mxid(remote_id: &str) -> String {
    format!("@signal_{remote_id}:{TEST_DOMAIN}")
}

/// Wall clock milliseconds `days` days ago.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn days_ago_ms(days: f64) -> i64 {
    chrono::Utc::now().timestamp_millis() - (days * ONE_DAY_MS as f64) as i64
}

/// Activity window with both ends given in days before now.
#[must_use]
pub fn activity_window(remote_id: &str, first_days_ago: f64, last_days_ago: f64) -> ActivityWindow {
    ActivityWindow::with_range(
        ghost_mxid(remote_id),
        days_ago_ms(first_days_ago),
        days_ago_ms(last_days_ago),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TestConfig::new()
            .periodic_sync(3600)
            .resend_bridge_info(true)
            .block_above(5)
            .build();

        assert_eq!(config.homeserver.domain, TEST_DOMAIN);
        assert_eq!(config.bridge.periodic_sync, 3600);
        assert!(config.bridge.resend_bridge_info);
        assert_eq!(config.bridge.limits.max_puppet_limit, Some(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_activity_window_ordering() {
        let window = activity_window("x", 10.0, 1.0);
        assert!(window.first_activity_ts.unwrap() < window.last_activity_ts.unwrap());
        assert_eq!(window.mxid, "@signal_x:example.com");
    }
}
