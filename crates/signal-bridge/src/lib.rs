//! Signal Bridge Runtime Core
//!
//! This library provides the runtime core of the Matrix-Signal puppeting
//! bridge - the layer that owns process lifecycle and the background work
//! that keeps both networks in sync:
//!
//! - Dependency-ordered startup and graceful shutdown of the bridge's
//!   stateful registries and the Signal connection handler
//! - Jittered periodic full resync of every logged-in user session
//! - Activity-based admission control (active puppet count, blocked flag)
//! - One-shot sweeps (bridge info re-announcement, disappearing message expiry)
//!
//! # Architecture
//!
//! ```text
//! SignalBridge (orchestrator, owns everything below)
//! ├── UserRegistry      (logged-in sessions, indexed by mxid and username)
//! ├── PuppetRegistry    (ghosts + double puppets)
//! ├── PortalRegistry    (bridged rooms)
//! ├── RemoteHandler     (Signal connection, external)
//! ├── periodic sync task      ─┐
//! └── active puppet task      ─┴─ cancelled through one root CancellationToken
//! ```
//!
//! Protocol translation, storage and provisioning are external collaborators;
//! this crate talks to them through the traits in [`registry`].
//!
//! # Modules
//!
//! - [`activity`] - Per-puppet activity window
//! - [`config`] - YAML configuration with write-back
//! - [`errors`] - Error types
//! - [`lifecycle`] - `SignalBridge` orchestrator and action queues
//! - [`observability`] - Logging, metrics and health endpoints
//! - [`registry`] - Collaborator traits and in-memory registries
//! - [`sweeps`] - Bridge info resend and disappearing message expiry
//! - [`tasks`] - Periodic sync and active puppet background loops

#![warn(clippy::pedantic)]

pub mod activity;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod sweeps;
pub mod tasks;

pub use lifecycle::SignalBridge;
