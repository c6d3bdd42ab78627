//! Registry of Matrix users and their Signal sessions.

use super::{IndexedStore, Session, SessionSource};
use crate::errors::BridgeError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// In-memory index of user sessions.
///
/// Sessions are indexed by Matrix ID and, once logged in, by Signal username.
/// Only sessions that finished loading are ever inserted.
pub struct UserRegistry {
    source: Arc<dyn SessionSource>,
    by_mxid: IndexedStore<dyn Session>,
    by_username: IndexedStore<dyn Session>,
    initialized: AtomicBool,
}

impl UserRegistry {
    #[must_use]
    pub fn new(source: Arc<dyn SessionSource>) -> Self {
        Self {
            source,
            by_mxid: IndexedStore::new(),
            by_username: IndexedStore::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Load every logged-in session from storage.
    ///
    /// Runs once during startup; a failure here aborts startup.
    pub async fn init(&self) -> Result<(), BridgeError> {
        let sessions = self.source.load_logged_in().await?;
        let count = sessions.len();
        for session in sessions {
            self.register(session).await;
        }
        self.initialized.store(true, Ordering::SeqCst);
        info!(target: "bridge.registry", users = count, "User registry initialized");
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Index a session, returning the instance that ends up registered.
    pub async fn register(&self, session: Arc<dyn Session>) -> Arc<dyn Session> {
        let session = self
            .by_mxid
            .insert(session.mxid().to_string(), session)
            .await;
        if let Some(username) = session.username() {
            self.by_username
                .insert(username, Arc::clone(&session))
                .await;
        }
        session
    }

    /// Snapshot of every logged-in session in registration order.
    pub async fn all(&self) -> Vec<Arc<dyn Session>> {
        self.by_username.values().await
    }

    /// Find a session by Matrix ID, asking storage when it is not cached.
    pub async fn get_by_mxid(
        &self,
        mxid: &str,
        create: bool,
    ) -> Result<Option<Arc<dyn Session>>, BridgeError> {
        if let Some(session) = self.by_mxid.get(mxid).await {
            return Ok(Some(session));
        }
        match self.source.get_by_mxid(mxid, create).await? {
            Some(session) => {
                debug!(target: "bridge.registry", mxid = %mxid, "Loaded user session");
                Ok(Some(self.register(session).await))
            }
            None => Ok(None),
        }
    }

    /// Find a session by Signal username, asking storage when it is not cached.
    pub async fn get_by_remote_id(
        &self,
        username: &str,
        create: bool,
    ) -> Result<Option<Arc<dyn Session>>, BridgeError> {
        if let Some(session) = self.by_username.get(username).await {
            return Ok(Some(session));
        }
        match self.source.get_by_username(username, create).await? {
            Some(session) => Ok(Some(self.register(session).await)),
            None => Ok(None),
        }
    }

    /// Number of registered sessions that currently have a Signal username.
    pub async fn count_logged_in(&self) -> usize {
        self.by_username
            .values()
            .await
            .iter()
            .filter(|session| session.username().is_some())
            .count()
    }
}
