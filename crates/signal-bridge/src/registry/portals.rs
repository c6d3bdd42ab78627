//! Registry of portals (bridged rooms).

use super::{IndexedStore, Portal, PortalSource, PortalStream};
use crate::errors::BridgeError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// In-memory index of portals by Matrix room ID.
///
/// Portals are loaded lazily; bulk walks go straight to storage through
/// [`PortalRegistry::all_with_room`].
pub struct PortalRegistry {
    source: Arc<dyn PortalSource>,
    by_mxid: IndexedStore<dyn Portal>,
    initialized: AtomicBool,
}

impl PortalRegistry {
    #[must_use]
    pub fn new(source: Arc<dyn PortalSource>) -> Self {
        Self {
            source,
            by_mxid: IndexedStore::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Initialize the registry. Nothing is preloaded.
    pub fn init(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        info!(target: "bridge.registry", "Portal registry initialized");
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Lazy stream over every portal that has a Matrix room.
    ///
    /// The stream is finite and can be restarted by calling this again.
    #[must_use]
    pub fn all_with_room(&self) -> PortalStream {
        self.source.all_with_room()
    }

    /// Find a portal by Matrix room ID, asking storage when it is not cached.
    pub async fn get_by_mxid(&self, room_id: &str) -> Result<Option<Arc<dyn Portal>>, BridgeError> {
        if let Some(portal) = self.by_mxid.get(room_id).await {
            return Ok(Some(portal));
        }
        match self.source.get_by_mxid(room_id).await? {
            Some(portal) => {
                debug!(target: "bridge.registry", room_id = %room_id, "Loaded portal");
                Ok(Some(self.by_mxid.insert(room_id, portal).await))
            }
            None => Ok(None),
        }
    }

    /// Expire every pending disappearing message.
    pub async fn start_disappearing_message_expirations(&self) -> Result<u64, BridgeError> {
        self.source.expire_disappearing_messages().await
    }
}
