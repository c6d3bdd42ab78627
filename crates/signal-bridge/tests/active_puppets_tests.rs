//! Tests for the active puppet task and admission control.
//!
//! Activity windows are anchored to the wall clock (the task compares them
//! against `now_ms()`), while the task's one-minute sleep runs on tokio's
//! paused clock.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bridge_test_utils::{activity_window, TestBridge, TestConfig};
use signal_bridge::activity::ActivityWindow;
use signal_bridge::config::{ConfigHandle, LimitsConfig};
use signal_bridge::registry::{GhostIdTemplate, PuppetRegistry};
use signal_bridge::tasks::active_puppets::{
    now_ms, update_active_puppet_metric, ACTIVE_PUPPET_CHECK_INTERVAL,
};
use signal_bridge::tasks::BridgeBlockState;
use std::sync::Arc;
use std::time::Duration;

fn active_windows(count: usize) -> Vec<ActivityWindow> {
    (0..count)
        .map(|i| activity_window(&format!("active{i}"), 30.0, 1.0))
        .collect()
}

async fn tick() {
    tokio::time::sleep(ACTIVE_PUPPET_CHECK_INTERVAL + Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_first_evaluation_after_one_interval() {
    let harness = TestBridge::builder()
        .with_activity(active_windows(2))
        .build()
        .await;
    harness.bridge.start().await.unwrap();

    tokio::time::sleep(ACTIVE_PUPPET_CHECK_INTERVAL - Duration::from_secs(1)).await;
    assert_eq!(harness.puppets.activity_calls(), 0);
    assert_eq!(harness.bridge.active_puppet_count(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.puppets.activity_calls(), 1);
    assert_eq!(harness.bridge.active_puppet_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_blocks_over_limit_and_unblocks() {
    let harness = TestBridge::builder()
        .config(TestConfig::new().block_above(2).build())
        .with_activity(active_windows(3))
        .build()
        .await;
    harness.bridge.start().await.unwrap();

    tick().await;
    assert_eq!(harness.bridge.active_puppet_count(), 3);
    assert!(harness.bridge.is_blocked());

    harness.puppets.set_activity(active_windows(2));
    tick().await;
    assert_eq!(harness.bridge.active_puppet_count(), 2);
    assert!(!harness.bridge.is_blocked());
}

#[tokio::test(start_paused = true)]
async fn test_never_blocks_without_limit() {
    let harness = TestBridge::builder()
        .with_activity(active_windows(500))
        .build()
        .await;
    harness.bridge.start().await.unwrap();

    tick().await;
    assert_eq!(harness.bridge.active_puppet_count(), 500);
    assert!(!harness.bridge.is_blocked());
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_keeps_previous_state() {
    let harness = TestBridge::builder()
        .config(TestConfig::new().block_above(1).build())
        .with_activity(active_windows(2))
        .build()
        .await;
    harness.bridge.start().await.unwrap();

    tick().await;
    assert!(harness.bridge.is_blocked());

    harness.puppets.set_fail_activity(true);
    harness.puppets.set_activity(Vec::new());
    tick().await;
    assert_eq!(harness.puppets.activity_calls(), 2);
    assert!(harness.bridge.is_blocked());
    assert_eq!(harness.bridge.active_puppet_count(), 2);

    // The loop keeps running after the failure
    harness.puppets.set_fail_activity(false);
    tick().await;
    assert!(!harness.bridge.is_blocked());
}

#[tokio::test(start_paused = true)]
async fn test_stop_ends_active_puppet_task() {
    let harness = TestBridge::builder().build().await;
    harness.bridge.start().await.unwrap();

    tick().await;
    assert_eq!(harness.puppets.activity_calls(), 1);

    drop(harness.bridge.stop().await);
    tokio::time::sleep(ACTIVE_PUPPET_CHECK_INTERVAL * 10).await;
    assert_eq!(harness.puppets.activity_calls(), 1);
}

// ============================================================================
// Single evaluation
// ============================================================================

async fn evaluate(limits: LimitsConfig, windows: Vec<ActivityWindow>) -> (u64, bool) {
    let config = TestConfig::new().limits(limits).build();
    let template = GhostIdTemplate::from_config(&config);
    let source = bridge_test_utils::MockPuppetSource::new(template.clone()).with_activity(windows);
    let registry = PuppetRegistry::new(Arc::new(source), template);
    let handle = ConfigHandle::in_memory(config);
    let state = BridgeBlockState::new();

    let active = update_active_puppet_metric(&registry, &handle, &state, now_ms())
        .await
        .unwrap();
    (active, state.is_blocked())
}

#[tokio::test]
async fn test_inactive_puppets_are_not_counted() {
    let limits = LimitsConfig {
        puppet_inactivity_days: Some(7),
        ..LimitsConfig::default()
    };
    let windows = vec![
        activity_window("recent", 60.0, 1.0),
        activity_window("stale", 60.0, 30.0),
    ];

    let (active, blocked) = evaluate(limits, windows).await;

    assert_eq!(active, 1);
    assert!(!blocked);
}

#[tokio::test]
async fn test_windows_without_activity_are_ignored() {
    let windows = vec![
        ActivityWindow::new("@signal_idle:example.com"),
        activity_window("recent", 10.0, 1.0),
    ];

    let (active, _) = evaluate(LimitsConfig::default(), windows).await;

    assert_eq!(active, 1);
}

#[tokio::test]
async fn test_block_flag_presence_is_enough() {
    let limits = LimitsConfig {
        block_on_limit_reached: Some(false),
        max_puppet_limit: Some(0),
        ..LimitsConfig::default()
    };

    let (active, blocked) = evaluate(limits, active_windows(1)).await;

    assert_eq!(active, 1);
    assert!(blocked);
}
