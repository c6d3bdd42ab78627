//! # Bridge Test Utilities
//!
//! Shared test utilities for the Signal bridge runtime core.
//!
//! This crate provides mock implementations of the bridge's collaborators and
//! fixtures so the orchestrator, background tasks and sweeps can be tested
//! without a homeserver, a Signal connection or a database.
//!
//! ## Modules
//!
//! - `mocks` - Mock sessions, puppets, portals, storage sources, remote handler
//!   and database, all sharing an optional [`EventLog`]
//! - `fixtures` - Pre-configured configs and activity windows
//! - `harness` - [`TestBridge`], a `SignalBridge` wired to mocks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = TestBridge::builder()
//!         .with_session(MockSession::logged_in("@alice:example.com", "+15550001"))
//!         .build()
//!         .await;
//!
//!     harness.bridge.start().await.unwrap();
//!     assert!(harness.remote.started());
//! }
//! ```

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
