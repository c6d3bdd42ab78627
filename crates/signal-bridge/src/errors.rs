//! Bridge error types.
//!
//! Errors never reach an API caller from this crate: startup errors abort the
//! process, everything else is logged where it happens. The variants exist so
//! logs and metrics can tell transient remote failures apart from local ones.

use crate::config::ConfigError;
use thiserror::Error;

/// Bridge runtime error type.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration could not be read, validated or persisted.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Persistent storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network failure talking to Matrix or Signal.
    #[error("Network error: {0}")]
    Network(String),

    /// Signal protocol level failure (unexpected response, bad state).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A sequenced startup step failed.
    #[error("Startup step '{step}' failed: {source}")]
    Startup {
        step: &'static str,
        #[source]
        source: Box<BridgeError>,
    },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Wrap an error as a fatal failure of the named startup step.
    #[must_use]
    pub fn startup(step: &'static str, source: BridgeError) -> Self {
        BridgeError::Startup {
            step,
            source: Box::new(source),
        }
    }

    /// Whether the failure is a per-unit remote failure worth retrying on the
    /// next scheduled tick.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Network(_) | BridgeError::Protocol(_) => true,
            BridgeError::Startup { source, .. } => source.is_transient(),
            BridgeError::Config(_) | BridgeError::Storage(_) | BridgeError::Internal(_) => false,
        }
    }

    /// Short label for metrics and structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "config",
            BridgeError::Storage(_) => "storage",
            BridgeError::Network(_) => "network",
            BridgeError::Protocol(_) => "protocol",
            BridgeError::Startup { .. } => "startup",
            BridgeError::Internal(_) => "internal",
        }
    }
}
