//! Background tasks for the bridge.
//!
//! Long-running loops spawned by the orchestrator after startup. Both exit
//! when their cancellation token is triggered.
//!
//! # Tasks
//!
//! - `periodic_sync` - Jittered full resync of every logged-in user
//! - `active_puppets` - Active puppet count and admission control

pub mod active_puppets;
pub mod periodic_sync;

pub use active_puppets::{start_active_puppet_task, BridgeBlockState};
pub use periodic_sync::{spawn_periodic_sync, start_periodic_sync, sync_interval};
