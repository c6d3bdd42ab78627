//! Registries of live bridge entities and the collaborator traits behind them.
//!
//! The bridge keeps three process-wide in-memory indexes:
//!
//! - [`UserRegistry`] - logged-in Matrix users and their Signal sessions
//! - [`PuppetRegistry`] - ghosts for Signal users, plus double puppets
//! - [`PortalRegistry`] - bridged rooms
//!
//! Each registry is owned by the `SignalBridge` orchestrator and handed out as
//! `Arc` references. Entries are never removed during normal operation.
//!
//! The entities themselves (sessions, puppets, portals) and the storage layer
//! that loads them are external collaborators. They are expressed as traits so
//! the orchestrator can be driven by mocks in tests.

pub mod portals;
pub mod puppets;
pub mod store;
pub mod users;

pub use portals::PortalRegistry;
pub use puppets::{GhostIdTemplate, PuppetRegistry};
pub use store::IndexedStore;
pub use users::UserRegistry;

use crate::activity::ActivityWindow;
use crate::errors::BridgeError;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Lazy, finite stream of portals loaded from storage.
pub type PortalStream = BoxStream<'static, Result<Arc<dyn Portal>, BridgeError>>;

/// A Matrix user's bridge session.
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Matrix ID of the user owning the session.
    fn mxid(&self) -> &str;

    /// Signal username once logged in, `None` for unauthenticated sessions.
    fn username(&self) -> Option<String>;

    /// Full resync of contacts, groups and profile with Signal.
    async fn sync(&self) -> Result<(), BridgeError>;
}

/// A ghost user representing a Signal user on Matrix.
#[async_trait::async_trait]
pub trait Puppet: Send + Sync {
    /// Matrix ID of the ghost.
    fn mxid(&self) -> &str;

    /// Real Matrix account linked for double puppeting, if any.
    fn custom_mxid(&self) -> Option<String>;

    /// Start the double puppet session (sync loop on the custom account).
    async fn start(&self) -> Result<(), BridgeError>;

    /// Stop the double puppet session.
    async fn stop(&self) -> Result<(), BridgeError>;
}

/// A bridged room.
#[async_trait::async_trait]
pub trait Portal: Send + Sync {
    /// Matrix room ID, `None` until the room has been created.
    fn mxid(&self) -> Option<String>;

    /// Re-send the bridge info state event to the room.
    async fn update_bridge_info(&self) -> Result<(), BridgeError>;
}

/// Storage access for user sessions.
#[async_trait::async_trait]
pub trait SessionSource: Send + Sync {
    /// Every session that has a Signal username.
    async fn load_logged_in(&self) -> Result<Vec<Arc<dyn Session>>, BridgeError>;

    /// Look up a session by Matrix ID, optionally creating it.
    async fn get_by_mxid(
        &self,
        mxid: &str,
        create: bool,
    ) -> Result<Option<Arc<dyn Session>>, BridgeError>;

    /// Look up a session by Signal username, optionally creating it.
    async fn get_by_username(
        &self,
        username: &str,
        create: bool,
    ) -> Result<Option<Arc<dyn Session>>, BridgeError>;
}

/// Storage access for puppets.
#[async_trait::async_trait]
pub trait PuppetSource: Send + Sync {
    /// Every puppet that has a double puppet account linked.
    async fn load_with_custom_mxid(&self) -> Result<Vec<Arc<dyn Puppet>>, BridgeError>;

    /// Look up a puppet by Signal user ID, optionally creating it.
    async fn get_by_remote_id(
        &self,
        remote_id: &str,
        create: bool,
    ) -> Result<Option<Arc<dyn Puppet>>, BridgeError>;

    /// Activity windows of every puppet with at least one recorded activity.
    async fn all_with_recorded_activity(&self) -> Result<Vec<ActivityWindow>, BridgeError>;
}

/// Storage access for portals.
#[async_trait::async_trait]
pub trait PortalSource: Send + Sync {
    /// Every portal that has a Matrix room.
    fn all_with_room(&self) -> PortalStream;

    /// Look up a portal by Matrix room ID.
    async fn get_by_mxid(&self, room_id: &str) -> Result<Option<Arc<dyn Portal>>, BridgeError>;

    /// Schedule expiry of every pending disappearing message.
    ///
    /// Returns the number of messages handled.
    async fn expire_disappearing_messages(&self) -> Result<u64, BridgeError>;
}

/// The Signal connection handler.
#[async_trait::async_trait]
pub trait RemoteHandler: Send + Sync {
    /// Connect and start receiving from Signal.
    async fn start(&self) -> Result<(), BridgeError>;

    /// Disconnect from Signal.
    async fn stop(&self) -> Result<(), BridgeError>;
}

/// Persistent storage lifecycle.
#[async_trait::async_trait]
pub trait Database: Send + Sync {
    /// Close all connections.
    async fn stop(&self) -> Result<(), BridgeError>;
}
