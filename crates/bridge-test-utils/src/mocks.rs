//! Mock collaborators for bridge testing.
//!
//! Every mock counts its calls and can be told to fail. Mocks that share an
//! [`EventLog`] record what they did in order, which lets tests assert on the
//! sequencing of startup and shutdown.
//!
//! # Example
//!
//! ```rust,ignore
//! use bridge_test_utils::{EventLog, MockSession};
//!
//! let log = EventLog::new();
//! let session = MockSession::logged_in("@alice:example.com", "+15550001")
//!     .failing_sync()
//!     .with_log(log.clone());
//! ```

use futures::stream::{self, StreamExt};
use signal_bridge::activity::ActivityWindow;
use signal_bridge::errors::BridgeError;
use signal_bridge::registry::{
    Database, GhostIdTemplate, Portal, PortalSource, PortalStream, Puppet, PuppetSource,
    RemoteHandler, Session, SessionSource,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared, ordered record of mock events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    /// Copy of every event recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Index of the first occurrence of `event`.
    #[must_use]
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().unwrap().iter().position(|e| e == event)
    }

    /// Whether `event` was recorded.
    #[must_use]
    pub fn contains(&self, event: &str) -> bool {
        self.position(event).is_some()
    }

    /// Number of times `event` was recorded.
    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == event)
            .count()
    }
}

fn record(log: &Option<EventLog>, event: impl Into<String>) {
    if let Some(log) = log {
        log.record(event);
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Mock user session.
#[derive(Debug)]
pub struct MockSession {
    mxid: String,
    username: Option<String>,
    fail_sync: bool,
    sync_delay: Option<Duration>,
    sync_count: AtomicUsize,
    log: Option<EventLog>,
}

impl MockSession {
    /// Session logged in to Signal as `username`.
    #[must_use]
    pub fn logged_in(mxid: &str, username: &str) -> Self {
        Self {
            mxid: mxid.to_string(),
            username: Some(username.to_string()),
            fail_sync: false,
            sync_delay: None,
            sync_count: AtomicUsize::new(0),
            log: None,
        }
    }

    /// Session that never logged in.
    #[must_use]
    pub fn logged_out(mxid: &str) -> Self {
        Self {
            username: None,
            ..Self::logged_in(mxid, "")
        }
    }

    /// Make every `sync` call fail with a network error.
    #[must_use]
    pub fn failing_sync(mut self) -> Self {
        self.fail_sync = true;
        self
    }

    /// Make `sync` take `delay`. The `sync:<mxid>` event is recorded once the
    /// delay has passed, so a sync dropped mid-flight leaves no event.
    #[must_use]
    pub fn with_sync_delay(mut self, delay: Duration) -> Self {
        self.sync_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Number of `sync` calls started, including failed and unfinished ones.
    pub fn sync_count(&self) -> usize {
        self.sync_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Session for MockSession {
    fn mxid(&self) -> &str {
        &self.mxid
    }

    fn username(&self) -> Option<String> {
        self.username.clone()
    }

    async fn sync(&self) -> Result<(), BridgeError> {
        self.sync_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.sync_delay {
            tokio::time::sleep(delay).await;
        }
        record(&self.log, format!("sync:{}", self.mxid));
        if self.fail_sync {
            return Err(BridgeError::Network(format!(
                "sync failed for {}",
                self.mxid
            )));
        }
        Ok(())
    }
}

/// Mock ghost, optionally double puppeted.
#[derive(Debug)]
pub struct MockPuppet {
    mxid: String,
    custom_mxid: Option<String>,
    fail_start: bool,
    fail_stop: bool,
    start_count: AtomicUsize,
    stop_count: AtomicUsize,
    log: Option<EventLog>,
}

impl MockPuppet {
    #[must_use]
    pub fn new(mxid: &str) -> Self {
        Self {
            mxid: mxid.to_string(),
            custom_mxid: None,
            fail_start: false,
            fail_stop: false,
            start_count: AtomicUsize::new(0),
            stop_count: AtomicUsize::new(0),
            log: None,
        }
    }

    /// Ghost double puppeted by the real account `custom_mxid`.
    #[must_use]
    pub fn double_puppet(mxid: &str, custom_mxid: &str) -> Self {
        Self {
            custom_mxid: Some(custom_mxid.to_string()),
            ..Self::new(mxid)
        }
    }

    #[must_use]
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    #[must_use]
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Puppet for MockPuppet {
    fn mxid(&self) -> &str {
        &self.mxid
    }

    fn custom_mxid(&self) -> Option<String> {
        self.custom_mxid.clone()
    }

    async fn start(&self) -> Result<(), BridgeError> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        record(&self.log, format!("puppet:start:{}", self.mxid));
        if self.fail_start {
            return Err(BridgeError::Network("double puppet login failed".to_string()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), BridgeError> {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        record(&self.log, format!("puppet:stop:{}", self.mxid));
        if self.fail_stop {
            return Err(BridgeError::Network("double puppet stop failed".to_string()));
        }
        Ok(())
    }
}

/// Mock portal.
#[derive(Debug)]
pub struct MockPortal {
    mxid: Option<String>,
    fail_update: bool,
    update_count: AtomicUsize,
    log: Option<EventLog>,
}

impl MockPortal {
    /// Portal with a Matrix room.
    #[must_use]
    pub fn with_room(room_id: &str) -> Self {
        Self {
            mxid: Some(room_id.to_string()),
            fail_update: false,
            update_count: AtomicUsize::new(0),
            log: None,
        }
    }

    /// Portal whose room has not been created yet.
    #[must_use]
    pub fn without_room() -> Self {
        Self {
            mxid: None,
            ..Self::with_room("")
        }
    }

    #[must_use]
    pub fn failing_update(mut self) -> Self {
        self.fail_update = true;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn update_count(&self) -> usize {
        self.update_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Portal for MockPortal {
    fn mxid(&self) -> Option<String> {
        self.mxid.clone()
    }

    async fn update_bridge_info(&self) -> Result<(), BridgeError> {
        self.update_count.fetch_add(1, Ordering::SeqCst);
        record(
            &self.log,
            format!("portal:update:{}", self.mxid.as_deref().unwrap_or("-")),
        );
        if self.fail_update {
            return Err(BridgeError::Network("state event rejected".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Storage sources
// ============================================================================

/// Mock session storage.
#[derive(Debug, Default)]
pub struct MockSessionSource {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    fail_load: bool,
    load_count: AtomicUsize,
    log: Option<EventLog>,
}

impl MockSessionSource {
    #[must_use]
    pub fn new(sessions: Vec<Arc<MockSession>>) -> Self {
        Self {
            sessions: Mutex::new(sessions),
            ..Self::default()
        }
    }

    /// Make `load_logged_in` fail with a storage error.
    #[must_use]
    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Add a session to storage after construction.
    pub fn insert(&self, session: Arc<MockSession>) {
        self.sessions.lock().unwrap().push(session);
    }

    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }

    fn find(&self, predicate: impl Fn(&MockSession) -> bool) -> Option<Arc<MockSession>> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|session| predicate(session))
            .cloned()
    }
}

#[async_trait::async_trait]
impl SessionSource for MockSessionSource {
    async fn load_logged_in(&self) -> Result<Vec<Arc<dyn Session>>, BridgeError> {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        record(&self.log, "users:load");
        if self.fail_load {
            return Err(BridgeError::Storage("user table unavailable".to_string()));
        }
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|session| session.username.is_some())
            .map(|session| Arc::clone(session) as Arc<dyn Session>)
            .collect())
    }

    async fn get_by_mxid(
        &self,
        mxid: &str,
        create: bool,
    ) -> Result<Option<Arc<dyn Session>>, BridgeError> {
        if let Some(session) = self.find(|s| s.mxid == mxid) {
            return Ok(Some(session as Arc<dyn Session>));
        }
        if !create {
            return Ok(None);
        }
        let session = Arc::new(MockSession::logged_out(mxid));
        self.insert(Arc::clone(&session));
        Ok(Some(session as Arc<dyn Session>))
    }

    async fn get_by_username(
        &self,
        username: &str,
        _create: bool,
    ) -> Result<Option<Arc<dyn Session>>, BridgeError> {
        Ok(self
            .find(|s| s.username.as_deref() == Some(username))
            .map(|session| session as Arc<dyn Session>))
    }
}

/// Mock puppet storage.
#[derive(Debug)]
pub struct MockPuppetSource {
    template: GhostIdTemplate,
    puppets: Mutex<HashMap<String, Arc<MockPuppet>>>,
    activity: Mutex<Vec<ActivityWindow>>,
    fail_load: bool,
    fail_activity: AtomicBool,
    activity_calls: AtomicUsize,
    log: Option<EventLog>,
}

impl MockPuppetSource {
    /// Empty storage creating ghosts through `template`.
    #[must_use]
    pub fn new(template: GhostIdTemplate) -> Self {
        Self {
            template,
            puppets: Mutex::new(HashMap::new()),
            activity: Mutex::new(Vec::new()),
            fail_load: false,
            fail_activity: AtomicBool::new(false),
            activity_calls: AtomicUsize::new(0),
            log: None,
        }
    }

    /// Add a stored puppet keyed by its Signal user ID.
    #[must_use]
    pub fn with_puppet(self, remote_id: &str, puppet: Arc<MockPuppet>) -> Self {
        self.puppets
            .lock()
            .unwrap()
            .insert(remote_id.to_string(), puppet);
        self
    }

    #[must_use]
    pub fn with_activity(self, windows: Vec<ActivityWindow>) -> Self {
        self.set_activity(windows);
        self
    }

    /// Make `load_with_custom_mxid` fail with a storage error.
    #[must_use]
    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Replace the stored activity windows.
    pub fn set_activity(&self, windows: Vec<ActivityWindow>) {
        *self.activity.lock().unwrap() = windows;
    }

    /// Toggle failure of `all_with_recorded_activity`.
    pub fn set_fail_activity(&self, fail: bool) {
        self.fail_activity.store(fail, Ordering::SeqCst);
    }

    pub fn activity_calls(&self) -> usize {
        self.activity_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PuppetSource for MockPuppetSource {
    async fn load_with_custom_mxid(&self) -> Result<Vec<Arc<dyn Puppet>>, BridgeError> {
        record(&self.log, "puppets:load");
        if self.fail_load {
            return Err(BridgeError::Storage("puppet table unavailable".to_string()));
        }
        Ok(self
            .puppets
            .lock()
            .unwrap()
            .values()
            .filter(|puppet| puppet.custom_mxid.is_some())
            .map(|puppet| Arc::clone(puppet) as Arc<dyn Puppet>)
            .collect())
    }

    async fn get_by_remote_id(
        &self,
        remote_id: &str,
        create: bool,
    ) -> Result<Option<Arc<dyn Puppet>>, BridgeError> {
        let mut puppets = self.puppets.lock().unwrap();
        if let Some(puppet) = puppets.get(remote_id) {
            return Ok(Some(Arc::clone(puppet) as Arc<dyn Puppet>));
        }
        if !create {
            return Ok(None);
        }
        let puppet = Arc::new(MockPuppet::new(&self.template.format_mxid(remote_id)));
        puppets.insert(remote_id.to_string(), Arc::clone(&puppet));
        Ok(Some(puppet as Arc<dyn Puppet>))
    }

    async fn all_with_recorded_activity(&self) -> Result<Vec<ActivityWindow>, BridgeError> {
        self.activity_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_activity.load(Ordering::SeqCst) {
            return Err(BridgeError::Storage("activity query failed".to_string()));
        }
        Ok(self.activity.lock().unwrap().clone())
    }
}

/// Mock portal storage.
#[derive(Debug, Default)]
pub struct MockPortalSource {
    portals: Vec<Arc<MockPortal>>,
    stream_errors: usize,
    pending_expirations: u64,
    expire_delay: Option<Duration>,
    fail_expire: bool,
    expire_calls: AtomicUsize,
    expired: AtomicU64,
    log: Option<EventLog>,
}

impl MockPortalSource {
    #[must_use]
    pub fn new(portals: Vec<Arc<MockPortal>>) -> Self {
        Self {
            portals,
            ..Self::default()
        }
    }

    /// Append `count` storage errors to the end of every portal stream.
    #[must_use]
    pub fn with_stream_errors(mut self, count: usize) -> Self {
        self.stream_errors = count;
        self
    }

    /// Number of messages the expiry sweep reports.
    #[must_use]
    pub fn with_pending_expirations(mut self, count: u64) -> Self {
        self.pending_expirations = count;
        self
    }

    /// Make the expiry sweep take `delay` before finishing.
    #[must_use]
    pub fn with_expire_delay(mut self, delay: Duration) -> Self {
        self.expire_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn failing_expire(mut self) -> Self {
        self.fail_expire = true;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn expire_calls(&self) -> usize {
        self.expire_calls.load(Ordering::SeqCst)
    }

    /// Messages expired by completed sweeps.
    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PortalSource for MockPortalSource {
    fn all_with_room(&self) -> PortalStream {
        let portals = self
            .portals
            .iter()
            .filter(|portal| portal.mxid.is_some())
            .map(|portal| Ok(Arc::clone(portal) as Arc<dyn Portal>));
        let errors = (0..self.stream_errors)
            .map(|i| Err(BridgeError::Storage(format!("corrupt portal row {i}"))));
        let items: Vec<Result<Arc<dyn Portal>, BridgeError>> = portals.chain(errors).collect();
        stream::iter(items).boxed()
    }

    async fn get_by_mxid(&self, room_id: &str) -> Result<Option<Arc<dyn Portal>>, BridgeError> {
        Ok(self
            .portals
            .iter()
            .find(|portal| portal.mxid.as_deref() == Some(room_id))
            .map(|portal| Arc::clone(portal) as Arc<dyn Portal>))
    }

    async fn expire_disappearing_messages(&self) -> Result<u64, BridgeError> {
        self.expire_calls.fetch_add(1, Ordering::SeqCst);
        record(&self.log, "portals:expire:begin");
        if let Some(delay) = self.expire_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_expire {
            return Err(BridgeError::Storage("message table unavailable".to_string()));
        }
        self.expired
            .fetch_add(self.pending_expirations, Ordering::SeqCst);
        record(&self.log, "portals:expire:end");
        Ok(self.pending_expirations)
    }
}

// ============================================================================
// Remote handler and database
// ============================================================================

type StartHook = Box<dyn Fn() + Send + Sync>;

/// Mock Signal connection handler.
#[derive(Default)]
pub struct MockRemoteHandler {
    fail_start: bool,
    fail_stop: bool,
    start_delay: Option<Duration>,
    on_start: Mutex<Option<StartHook>>,
    started: AtomicBool,
    stopped: AtomicBool,
    log: Option<EventLog>,
}

impl MockRemoteHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    #[must_use]
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Make `start` take `delay` before connecting.
    #[must_use]
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Run `hook` at the beginning of every `start` call.
    pub fn set_on_start(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_start.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RemoteHandler for MockRemoteHandler {
    async fn start(&self) -> Result<(), BridgeError> {
        if let Some(hook) = self.on_start.lock().unwrap().as_ref() {
            hook();
        }
        record(&self.log, "remote:start");
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_start {
            return Err(BridgeError::Network("signald unreachable".to_string()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BridgeError> {
        record(&self.log, "remote:stop");
        self.stopped.store(true, Ordering::SeqCst);
        if self.fail_stop {
            return Err(BridgeError::Network("disconnect failed".to_string()));
        }
        Ok(())
    }
}

/// Mock database.
#[derive(Debug, Default)]
pub struct MockDatabase {
    fail_stop: bool,
    stopped: AtomicBool,
    log: Option<EventLog>,
}

impl MockDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Database for MockDatabase {
    async fn stop(&self) -> Result<(), BridgeError> {
        record(&self.log, "database:stop");
        self.stopped.store(true, Ordering::SeqCst);
        if self.fail_stop {
            return Err(BridgeError::Storage("pool close timed out".to_string()));
        }
        Ok(())
    }
}
