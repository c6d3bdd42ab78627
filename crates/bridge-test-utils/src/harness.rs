//! Test harness wiring a real `SignalBridge` to mock collaborators.
//!
//! # Example
//! ```rust,ignore
//! #[tokio::test]
//! async fn test_startup() {
//!     let harness = TestBridge::builder()
//!         .config(TestConfig::new().resend_bridge_info(true).build())
//!         .with_portal(Arc::new(MockPortal::with_room("!a:example.com")))
//!         .build()
//!         .await;
//!
//!     harness.bridge.start().await.unwrap();
//!     assert!(harness.log.contains("remote:start"));
//! }
//! ```

use crate::fixtures::TestConfig;
use crate::mocks::{
    EventLog, MockDatabase, MockPortal, MockPortalSource, MockPuppet, MockPuppetSource,
    MockRemoteHandler, MockSession, MockSessionSource,
};
use signal_bridge::activity::ActivityWindow;
use signal_bridge::config::{Config, ConfigHandle};
use signal_bridge::lifecycle::BridgeComponents;
use signal_bridge::registry::GhostIdTemplate;
use signal_bridge::SignalBridge;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A `SignalBridge` plus handles to every mock behind it.
pub struct TestBridge {
    pub bridge: SignalBridge,
    pub log: EventLog,
    pub config: Arc<ConfigHandle>,
    pub sessions: Arc<MockSessionSource>,
    pub puppets: Arc<MockPuppetSource>,
    pub portals: Arc<MockPortalSource>,
    pub remote: Arc<MockRemoteHandler>,
    pub database: Arc<MockDatabase>,
}

impl TestBridge {
    #[must_use]
    pub fn builder() -> TestBridgeBuilder {
        TestBridgeBuilder::default()
    }
}

/// Builder for [`TestBridge`].
pub struct TestBridgeBuilder {
    config: Config,
    config_path: Option<PathBuf>,
    log: EventLog,
    sessions: Vec<Arc<MockSession>>,
    fail_user_load: bool,
    puppets: Vec<(String, Arc<MockPuppet>)>,
    activity: Vec<ActivityWindow>,
    fail_puppet_load: bool,
    portals: Vec<Arc<MockPortal>>,
    portal_stream_errors: usize,
    pending_expirations: u64,
    expire_delay: Option<Duration>,
    remote: MockRemoteHandler,
    database: MockDatabase,
}

impl Default for TestBridgeBuilder {
    fn default() -> Self {
        Self {
            config: TestConfig::new().build(),
            config_path: None,
            log: EventLog::new(),
            sessions: Vec::new(),
            fail_user_load: false,
            puppets: Vec::new(),
            activity: Vec::new(),
            fail_puppet_load: false,
            portals: Vec::new(),
            portal_stream_errors: 0,
            pending_expirations: 0,
            expire_delay: None,
            remote: MockRemoteHandler::new(),
            database: MockDatabase::new(),
        }
    }
}

impl TestBridgeBuilder {
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Persist config writes to `path`.
    #[must_use]
    pub fn config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Share `log` with the sources, remote handler and database.
    #[must_use]
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: Arc<MockSession>) -> Self {
        self.sessions.push(session);
        self
    }

    #[must_use]
    pub fn failing_user_load(mut self) -> Self {
        self.fail_user_load = true;
        self
    }

    #[must_use]
    pub fn with_puppet(mut self, remote_id: &str, puppet: Arc<MockPuppet>) -> Self {
        self.puppets.push((remote_id.to_string(), puppet));
        self
    }

    #[must_use]
    pub fn with_activity(mut self, windows: Vec<ActivityWindow>) -> Self {
        self.activity = windows;
        self
    }

    #[must_use]
    pub fn failing_puppet_load(mut self) -> Self {
        self.fail_puppet_load = true;
        self
    }

    #[must_use]
    pub fn with_portal(mut self, portal: Arc<MockPortal>) -> Self {
        self.portals.push(portal);
        self
    }

    #[must_use]
    pub fn with_portal_stream_errors(mut self, count: usize) -> Self {
        self.portal_stream_errors = count;
        self
    }

    #[must_use]
    pub fn with_pending_expirations(mut self, count: u64) -> Self {
        self.pending_expirations = count;
        self
    }

    #[must_use]
    pub fn with_expire_delay(mut self, delay: Duration) -> Self {
        self.expire_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn remote(mut self, remote: MockRemoteHandler) -> Self {
        self.remote = remote;
        self
    }

    #[must_use]
    pub fn database(mut self, database: MockDatabase) -> Self {
        self.database = database;
        self
    }

    /// Build the bridge. Nothing is started.
    pub async fn build(self) -> TestBridge {
        let log = self.log;
        let template = GhostIdTemplate::from_config(&self.config);

        let mut sessions = MockSessionSource::new(self.sessions).with_log(log.clone());
        if self.fail_user_load {
            sessions = sessions.failing_load();
        }

        let mut puppets = self
            .puppets
            .into_iter()
            .fold(MockPuppetSource::new(template), |source, (id, puppet)| {
                source.with_puppet(&id, puppet)
            })
            .with_activity(self.activity)
            .with_log(log.clone());
        if self.fail_puppet_load {
            puppets = puppets.failing_load();
        }

        let mut portals = MockPortalSource::new(self.portals)
            .with_stream_errors(self.portal_stream_errors)
            .with_pending_expirations(self.pending_expirations)
            .with_log(log.clone());
        if let Some(delay) = self.expire_delay {
            portals = portals.with_expire_delay(delay);
        }

        let config = Arc::new(match self.config_path {
            Some(path) => ConfigHandle::new(self.config, path),
            None => ConfigHandle::in_memory(self.config),
        });
        let sessions = Arc::new(sessions);
        let puppets = Arc::new(puppets);
        let portals = Arc::new(portals);
        let remote = Arc::new(self.remote.with_log(log.clone()));
        let database = Arc::new(self.database.with_log(log.clone()));

        let bridge = SignalBridge::new(BridgeComponents {
            config: Arc::clone(&config),
            sessions: Arc::clone(&sessions) as _,
            puppets: Arc::clone(&puppets) as _,
            portals: Arc::clone(&portals) as _,
            remote: Arc::clone(&remote) as _,
            database: Arc::clone(&database) as _,
        })
        .await;

        TestBridge {
            bridge,
            log,
            config,
            sessions,
            puppets,
            portals,
            remote,
            database,
        }
    }
}
