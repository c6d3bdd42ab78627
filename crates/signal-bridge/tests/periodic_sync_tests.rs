//! Tests for the periodic sync background task.
//!
//! Uses tokio's paused clock so hour-long intervals and per-user jitter run
//! instantly. Verifies:
//! - The task is not spawned when `bridge.periodic_sync <= 0`
//! - Each logged-in user is synced exactly once per pass
//! - One failing user does not stop the pass
//! - Users registered during a pass wait for the next one
//! - Stopping the bridge ends the task mid-pass, even inside a sync

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bridge_test_utils::{EventLog, MockSession, MockSessionSource, TestBridge, TestConfig};
use signal_bridge::registry::{Session, UserRegistry};
use signal_bridge::tasks::start_periodic_sync;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const HOUR: u64 = 3600;

fn sessions(count: usize) -> Vec<Arc<MockSession>> {
    (0..count)
        .map(|i| {
            Arc::new(MockSession::logged_in(
                &format!("@user{i}:example.com"),
                &format!("+1555000{i:04}"),
            ))
        })
        .collect()
}

fn total_syncs(sessions: &[Arc<MockSession>]) -> usize {
    sessions.iter().map(|s| s.sync_count()).sum()
}

async fn bridge_with(periodic_sync: i64, sessions: &[Arc<MockSession>]) -> TestBridge {
    sessions
        .iter()
        .fold(
            TestBridge::builder().config(TestConfig::new().periodic_sync(periodic_sync).build()),
            |builder, session| builder.with_session(Arc::clone(session)),
        )
        .build()
        .await
}

#[tokio::test(start_paused = true)]
async fn test_periodic_sync_disabled() {
    for periodic_sync in [0, -1] {
        let sessions = sessions(2);
        let harness = bridge_with(periodic_sync, &sessions).await;
        harness.bridge.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(24 * HOUR)).await;

        assert_eq!(total_syncs(&sessions), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_each_user_synced_once_per_pass() {
    let sessions = sessions(3);
    let harness = bridge_with(3600, &sessions).await;
    harness.bridge.start().await.unwrap();

    // Nothing happens before the first interval elapses
    tokio::time::sleep(Duration::from_secs(HOUR - 1)).await;
    assert_eq!(total_syncs(&sessions), 0);

    // First pass finishes within 3 jitter delays of the interval
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert!(sessions.iter().all(|s| s.sync_count() == 1));

    // Second pass starts one interval after the first one ends
    tokio::time::sleep(Duration::from_secs(HOUR)).await;
    assert!(sessions.iter().all(|s| s.sync_count() == 2));
}

#[tokio::test(start_paused = true)]
async fn test_failing_user_does_not_stop_pass() {
    let alice = Arc::new(MockSession::logged_in("@alice:example.com", "+15550001"));
    let broken = Arc::new(MockSession::logged_in("@bob:example.com", "+15550002").failing_sync());
    let carol = Arc::new(MockSession::logged_in("@carol:example.com", "+15550003"));
    let all = vec![Arc::clone(&alice), Arc::clone(&broken), Arc::clone(&carol)];
    let harness = bridge_with(60, &all).await;
    harness.bridge.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(60 + 40)).await;

    assert_eq!(alice.sync_count(), 1);
    assert_eq!(broken.sync_count(), 1);
    assert_eq!(carol.sync_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_logged_out_users_are_not_synced() {
    let alice = Arc::new(MockSession::logged_in("@alice:example.com", "+15550001"));
    let guest = Arc::new(MockSession::logged_out("@guest:example.com"));
    let all = vec![Arc::clone(&alice), Arc::clone(&guest)];
    let harness = bridge_with(60, &all).await;
    harness.bridge.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(60 + 20)).await;

    assert_eq!(alice.sync_count(), 1);
    assert_eq!(guest.sync_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_user_registered_mid_pass_waits_for_next_pass() {
    // Alice's slow sync keeps the first pass open
    let alice = Arc::new(
        MockSession::logged_in("@alice:example.com", "+15550001")
            .with_sync_delay(Duration::from_secs(30)),
    );
    let harness = bridge_with(3600, &[Arc::clone(&alice)]).await;
    harness.bridge.start().await.unwrap();

    // The pass took its snapshot at HOUR and ends by HOUR + 40
    tokio::time::sleep(Duration::from_secs(HOUR + 5)).await;
    let bob = Arc::new(MockSession::logged_in("@bob:example.com", "+15550002"));
    harness
        .bridge
        .users()
        .register(Arc::clone(&bob) as Arc<dyn Session>)
        .await;

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(alice.sync_count(), 1);
    assert_eq!(bob.sync_count(), 0);

    // Second pass starts by 2 * HOUR + 40 and lasts at most 50s
    tokio::time::sleep(Duration::from_secs(HOUR + 50)).await;
    assert_eq!(alice.sync_count(), 2);
    assert_eq!(bob.sync_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pass_in_progress() {
    let sessions = sessions(50);
    let harness = bridge_with(60, &sessions).await;
    harness.bridge.start().await.unwrap();

    // 50 users need ~250s of jitter on average; stop well before that
    tokio::time::sleep(Duration::from_secs(60 + 30)).await;
    drop(harness.bridge.stop().await);
    let synced_at_stop = total_syncs(&sessions);
    assert!(synced_at_stop < sessions.len());

    tokio::time::sleep(Duration::from_secs(HOUR)).await;
    assert_eq!(total_syncs(&sessions), synced_at_stop);
}

#[tokio::test(start_paused = true)]
async fn test_task_exits_on_cancellation_during_interval() {
    let registry = Arc::new(UserRegistry::new(Arc::new(
        bridge_test_utils::MockSessionSource::new(sessions(1)),
    )));
    registry.init().await.unwrap();
    let cancel_token = CancellationToken::new();

    let handle = tokio::spawn(start_periodic_sync(
        Arc::clone(&registry),
        Duration::from_secs(HOUR),
        cancel_token.clone(),
    ));

    tokio::time::sleep(Duration::from_secs(10)).await;
    cancel_token.cancel();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("task should exit promptly")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_task_exits_on_cancellation_during_sync() {
    let log = EventLog::new();
    let first = Arc::new(
        MockSession::logged_in("@first:example.com", "+15550001")
            .with_sync_delay(Duration::from_secs(HOUR))
            .with_log(log.clone()),
    );
    let second = Arc::new(
        MockSession::logged_in("@second:example.com", "+15550002").with_log(log.clone()),
    );
    let registry = Arc::new(UserRegistry::new(Arc::new(MockSessionSource::new(vec![
        Arc::clone(&first),
        Arc::clone(&second),
    ]))));
    registry.init().await.unwrap();
    let cancel_token = CancellationToken::new();

    let handle = tokio::spawn(start_periodic_sync(
        Arc::clone(&registry),
        Duration::from_secs(60),
        cancel_token.clone(),
    ));

    // Past the first jitter delay, inside the first user's sync
    tokio::time::sleep(Duration::from_secs(60 + 15)).await;
    assert_eq!(first.sync_count(), 1);
    cancel_token.cancel();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("task should exit promptly")
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2 * HOUR)).await;
    assert_eq!(first.sync_count(), 1);
    assert_eq!(second.sync_count(), 0);
    assert!(log.events().is_empty());
}
