//! Deferred startup and shutdown actions.
//!
//! Startup is an ordered list of inline prerequisites (awaited one by one by
//! the orchestrator) followed by a set of deferred actions collected in an
//! [`ActionQueue`] and run concurrently. Deferred actions have no ordering
//! guarantee among themselves.

use crate::errors::BridgeError;
use futures::future::{join_all, try_join_all, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use tracing::{debug, error};

/// A deferred unit of startup or shutdown work.
pub type Action = BoxFuture<'static, Result<(), BridgeError>>;

/// Named, queued action.
struct NamedAction {
    name: &'static str,
    action: Action,
}

/// Queue of deferred actions, drained by `run_startup` or `run_shutdown`.
#[derive(Default)]
pub struct ActionQueue {
    actions: Vec<NamedAction>,
}

impl ActionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an action under a name used in logs and errors.
    pub fn push<F>(&mut self, name: &'static str, action: F)
    where
        F: Future<Output = Result<(), BridgeError>> + Send + 'static,
    {
        self.actions.push(NamedAction {
            name,
            action: action.boxed(),
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Names of the queued actions in enqueue order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.actions.iter().map(|named| named.name).collect()
    }

    /// Run every queued action concurrently, failing on the first error.
    ///
    /// Startup failures are fatal: the error names the failing action and the
    /// remaining actions are dropped.
    pub async fn run_startup(self) -> Result<(), BridgeError> {
        let actions = self.actions.into_iter().map(|NamedAction { name, action }| {
            action.map(move |result| {
                result.map_err(|e| BridgeError::startup(name, e))?;
                debug!(target: "bridge.lifecycle", action = name, "Startup action finished");
                Ok::<(), BridgeError>(())
            })
        });
        try_join_all(actions).await?;
        Ok(())
    }

    /// Run every queued action concurrently and log failures.
    ///
    /// Returns the number of failed actions. Shutdown never stops early.
    pub async fn run_shutdown(self) -> usize {
        let results = join_all(self.actions.into_iter().map(|NamedAction { name, action }| {
            action.map(move |result| (name, result))
        }))
        .await;

        let mut failures = 0;
        for (name, result) in results {
            if let Err(e) = result {
                failures += 1;
                error!(
                    target: "bridge.lifecycle",
                    action = name,
                    error = %e,
                    "Shutdown action failed"
                );
            }
        }
        failures
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_empty_queue_succeeds() {
        let queue = ActionQueue::new();
        assert!(queue.is_empty());
        queue.run_startup().await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_runs_all_actions() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut queue = ActionQueue::new();
        for name in ["a", "b", "c"] {
            let counter = Arc::clone(&counter);
            queue.push(name, async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        assert_eq!(queue.names(), vec!["a", "b", "c"]);
        queue.run_startup().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_startup_failure_names_action() {
        let mut queue = ActionQueue::new();
        queue.push("ok", async { Ok(()) });
        queue.push("signal", async {
            Err(BridgeError::Network("connection refused".to_string()))
        });

        let err = queue.run_startup().await.unwrap_err();
        assert!(
            matches!(err, BridgeError::Startup { step: "signal", .. }),
            "expected startup error for 'signal', got {err:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_actions_run_concurrently() {
        let mut queue = ActionQueue::new();
        for name in ["slow_a", "slow_b"] {
            queue.push(name, async {
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                Ok(())
            });
        }

        let started = tokio::time::Instant::now();
        queue.run_startup().await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_shutdown_runs_every_action_despite_failures() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut queue = ActionQueue::new();

        queue.push("fails", async { Err(BridgeError::Internal("boom".to_string())) });
        let c = Arc::clone(&counter);
        queue.push("runs", async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        queue.push("also_fails", async {
            Err(BridgeError::Network("gone".to_string()))
        });

        assert_eq!(queue.run_shutdown().await, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
