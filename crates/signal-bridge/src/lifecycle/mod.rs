//! `SignalBridge` - lifecycle orchestrator for the bridge runtime core.
//!
//! # Startup Flow
//!
//! 1. Initialize the user registry (inline, fatal on failure)
//! 2. Initialize the puppet registry; double puppet startup is deferred
//! 3. Initialize the portal registry
//! 4. Defer the bridge info resend if `bridge.resend_bridge_info` is set
//! 5. Defer starting the Signal connection handler
//! 6. Run every deferred action concurrently (first failure is fatal)
//! 7. Spawn the periodic sync and active puppet background tasks
//!
//! # Shutdown Flow
//!
//! 1. Mark not ready and cancel the background tasks
//! 2. Run shutdown actions: stop the Signal handler and every double puppet
//! 3. Stop the database
//! 4. Launch the disappearing message sweep detached (never awaited)

pub mod actions;

pub use actions::{Action, ActionQueue};

use crate::config::{Config, ConfigHandle};
use crate::errors::BridgeError;
use crate::observability::HealthState;
use crate::registry::{
    Database, GhostIdTemplate, Portal, PortalRegistry, PortalSource, Puppet, PuppetRegistry,
    PuppetSource, RemoteHandler, Session, SessionSource, UserRegistry,
};
use crate::sweeps;
use crate::tasks::{self, BridgeBlockState};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long `stop` waits for background tasks to observe cancellation.
pub const BACKGROUND_TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// External collaborators the orchestrator is built from.
pub struct BridgeComponents {
    pub config: Arc<ConfigHandle>,
    pub sessions: Arc<dyn SessionSource>,
    pub puppets: Arc<dyn PuppetSource>,
    pub portals: Arc<dyn PortalSource>,
    pub remote: Arc<dyn RemoteHandler>,
    pub database: Arc<dyn Database>,
}

/// Top-level controller of the bridge process.
///
/// Owns the registries and hands out `Arc` references to them. Owns the root
/// `CancellationToken` of every background task.
pub struct SignalBridge {
    config: Arc<ConfigHandle>,
    users: Arc<UserRegistry>,
    puppets: Arc<PuppetRegistry>,
    portals: Arc<PortalRegistry>,
    remote: Arc<dyn RemoteHandler>,
    database: Arc<dyn Database>,
    block_state: Arc<BridgeBlockState>,
    health: Arc<HealthState>,
    cancel_token: CancellationToken,
    started: AtomicBool,
    stop_prepared: AtomicBool,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_actions: Mutex<ActionQueue>,
}

impl SignalBridge {
    /// Build the orchestrator and its registries. Nothing is started.
    pub async fn new(components: BridgeComponents) -> Self {
        let template = GhostIdTemplate::from_config(&components.config.snapshot().await);

        Self {
            users: Arc::new(UserRegistry::new(components.sessions)),
            puppets: Arc::new(PuppetRegistry::new(components.puppets, template)),
            portals: Arc::new(PortalRegistry::new(components.portals)),
            config: components.config,
            remote: components.remote,
            database: components.database,
            block_state: BridgeBlockState::new(),
            health: Arc::new(HealthState::new()),
            cancel_token: CancellationToken::new(),
            started: AtomicBool::new(false),
            stop_prepared: AtomicBool::new(false),
            background_tasks: Mutex::new(Vec::new()),
            shutdown_actions: Mutex::new(ActionQueue::new()),
        }
    }

    /// Start the bridge.
    ///
    /// # Errors
    ///
    /// Any failure of a sequenced step or a deferred startup action aborts
    /// startup and is returned as `BridgeError::Startup`.
    pub async fn start(&self) -> Result<(), BridgeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::Internal("Bridge already started".to_string()));
        }
        info!(target: "bridge.lifecycle", "Starting bridge");

        let config = self.config.snapshot().await;
        let mut startup = ActionQueue::new();

        self.users
            .init()
            .await
            .map_err(|e| BridgeError::startup("user_registry", e))?;

        startup.push("puppet_registry", self.puppets.init());

        self.portals.init();

        if config.bridge.resend_bridge_info {
            let config_handle = Arc::clone(&self.config);
            let portals = Arc::clone(&self.portals);
            startup.push("resend_bridge_info", async move {
                // A failed resend does not keep the bridge from starting
                if let Err(e) = sweeps::resend_bridge_info(&config_handle, &portals).await {
                    error!(
                        target: "bridge.lifecycle",
                        error = %e,
                        "Bridge info resend failed"
                    );
                }
                Ok(())
            });
        }

        let remote = Arc::clone(&self.remote);
        startup.push("remote_handler", async move { remote.start().await });

        debug!(
            target: "bridge.lifecycle",
            actions = ?startup.names(),
            "Running startup actions"
        );
        startup.run_startup().await.map_err(|e| {
            error!(target: "bridge.lifecycle", error = %e, "Bridge startup failed");
            e
        })?;

        self.spawn_background_tasks(&config).await;
        self.health.mark_running();
        info!(target: "bridge.lifecycle", "Bridge started");
        Ok(())
    }

    async fn spawn_background_tasks(&self, config: &Config) {
        let mut handles = self.background_tasks.lock().await;

        if let Some(handle) = tasks::spawn_periodic_sync(
            Arc::clone(&self.users),
            config.bridge.periodic_sync,
            self.cancel_token.child_token(),
        ) {
            handles.push(handle);
        }

        handles.push(tokio::spawn(tasks::start_active_puppet_task(
            Arc::clone(&self.puppets),
            Arc::clone(&self.config),
            Arc::clone(&self.block_state),
            self.cancel_token.child_token(),
        )));
    }

    /// Enqueue this bridge's shutdown actions.
    ///
    /// Stops the Signal handler and every puppet with a double puppet session.
    /// Only the first call enqueues anything; `stop` calls this as well.
    pub async fn prepare_stop(&self) {
        if self.stop_prepared.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut queue = self.shutdown_actions.lock().await;

        let remote = Arc::clone(&self.remote);
        queue.push("remote_handler", async move { remote.stop().await });

        for puppet in self.puppets.with_custom_mxid().await {
            queue.push("double_puppet", async move { puppet.stop().await });
        }
    }

    /// Stop the bridge.
    ///
    /// Returns the handle of the detached disappearing message sweep. Callers
    /// normally drop it; shutdown never waits for the sweep.
    pub async fn stop(&self) -> JoinHandle<()> {
        info!(target: "bridge.lifecycle", "Stopping bridge");
        self.health.mark_stopping();

        self.prepare_stop().await;
        self.cancel_token.cancel();
        self.join_background_tasks().await;

        let queue = std::mem::take(&mut *self.shutdown_actions.lock().await);
        let failures = queue.run_shutdown().await;
        if failures > 0 {
            warn!(
                target: "bridge.lifecycle",
                failures = failures,
                "Some shutdown actions failed"
            );
        }

        if let Err(e) = self.database.stop().await {
            error!(target: "bridge.lifecycle", error = %e, "Failed to stop database");
        }

        let sweep = sweeps::spawn_disappearing_message_expiration(Arc::clone(&self.portals));
        info!(target: "bridge.lifecycle", "Bridge stopped");
        sweep
    }

    async fn join_background_tasks(&self) {
        let mut handles = std::mem::take(&mut *self.background_tasks.lock().await);
        if handles.is_empty() {
            return;
        }

        let joined = tokio::time::timeout(
            BACKGROUND_TASK_SHUTDOWN_TIMEOUT,
            futures::future::join_all(handles.iter_mut()),
        )
        .await;

        if joined.is_err() {
            warn!(
                target: "bridge.lifecycle",
                timeout_seconds = BACKGROUND_TASK_SHUTDOWN_TIMEOUT.as_secs(),
                "Background tasks did not stop in time, aborting"
            );
            for handle in &handles {
                handle.abort();
            }
        }
    }

    /// Start, wait for `shutdown`, then stop.
    ///
    /// # Errors
    ///
    /// Returns the startup error if the bridge fails to start.
    pub async fn run_until_shutdown<F>(&self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        info!(target: "bridge.lifecycle", "Shutdown signal received");
        drop(self.stop().await);
        Ok(())
    }

    /// Look up a user session by Matrix ID.
    pub async fn get_user(
        &self,
        mxid: &str,
        create: bool,
    ) -> Result<Option<Arc<dyn Session>>, BridgeError> {
        self.users.get_by_mxid(mxid, create).await
    }

    /// Look up a portal by Matrix room ID.
    pub async fn get_portal(&self, room_id: &str) -> Result<Option<Arc<dyn Portal>>, BridgeError> {
        self.portals.get_by_mxid(room_id).await
    }

    /// Look up a ghost by Matrix ID.
    pub async fn get_puppet(
        &self,
        mxid: &str,
        create: bool,
    ) -> Result<Option<Arc<dyn Puppet>>, BridgeError> {
        self.puppets.get_by_mxid(mxid, create).await
    }

    /// Look up the puppet double-puppeted by a real Matrix account.
    pub async fn get_double_puppet(&self, mxid: &str) -> Option<Arc<dyn Puppet>> {
        self.puppets.get_by_custom_mxid(mxid).await
    }

    #[must_use]
    pub fn is_bridge_ghost(&self, mxid: &str) -> bool {
        self.puppets.is_ghost(mxid)
    }

    pub async fn count_logged_in_users(&self) -> usize {
        self.users.count_logged_in().await
    }

    /// Whether admission control currently refuses new work.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.block_state.is_blocked()
    }

    #[must_use]
    pub fn active_puppet_count(&self) -> u64 {
        self.block_state.active_puppets()
    }

    #[must_use]
    pub fn users(&self) -> &Arc<UserRegistry> {
        &self.users
    }

    #[must_use]
    pub fn puppets(&self) -> &Arc<PuppetRegistry> {
        &self.puppets
    }

    #[must_use]
    pub fn portals(&self) -> &Arc<PortalRegistry> {
        &self.portals
    }

    #[must_use]
    pub fn config(&self) -> &Arc<ConfigHandle> {
        &self.config
    }

    #[must_use]
    pub fn block_state(&self) -> &Arc<BridgeBlockState> {
        &self.block_state
    }

    #[must_use]
    pub fn health_state(&self) -> Arc<HealthState> {
        Arc::clone(&self.health)
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the bridge
/// cannot shut down gracefully.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
