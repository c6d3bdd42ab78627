//! HTTP health endpoints for the bridge.
//!
//! - `GET /health` answers 200 for as long as the process serves requests.
//! - `GET /ready` answers 200 only while the bridge is running. The body is
//!   the current [`BridgePhase`] so operators can tell a slow startup from a
//!   shutdown in progress.
//!
//! [`serve_health`] binds `health.bind_address` and serves the router until
//! its token is cancelled. The embedding process may merge a `/metrics` route
//! rendered from the handle returned by `init_metrics_recorder` before
//! serving.

use crate::config::HealthConfig;
use crate::errors::BridgeError;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Where the bridge is in its lifecycle, as seen by the readiness endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    Starting,
    Running,
    Stopping,
}

impl BridgePhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            BridgePhase::Starting => "starting",
            BridgePhase::Running => "running",
            BridgePhase::Stopping => "stopping",
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            BridgePhase::Starting => 0,
            BridgePhase::Running => 1,
            BridgePhase::Stopping => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => BridgePhase::Running,
            2 => BridgePhase::Stopping,
            _ => BridgePhase::Starting,
        }
    }
}

/// Lifecycle phase shared between the orchestrator and the health endpoints.
#[derive(Debug, Default)]
pub struct HealthState {
    phase: AtomicU8,
}

impl HealthState {
    /// New state in [`BridgePhase::Starting`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> BridgePhase {
        BridgePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Startup finished; the bridge accepts work.
    pub fn mark_running(&self) {
        self.phase
            .store(BridgePhase::Running.to_u8(), Ordering::SeqCst);
    }

    /// Shutdown has begun. The bridge never becomes ready again.
    pub fn mark_stopping(&self) {
        self.phase
            .store(BridgePhase::Stopping.to_u8(), Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase() == BridgePhase::Running
    }
}

/// Router with `/health` and `/ready`.
pub fn health_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ready", get(readiness))
        .with_state(state)
}

async fn readiness(State(state): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    let phase = state.phase();
    let status = if phase == BridgePhase::Running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, phase.as_str())
}

/// Bind `config.bind_address` and serve `router` on a spawned task.
///
/// Binding happens before spawning so a bad address fails the caller. The
/// server drains and exits once `cancel_token` is cancelled.
///
/// # Errors
///
/// Returns `BridgeError::Network` if the address cannot be bound.
pub async fn serve_health(
    config: &HealthConfig,
    router: Router,
    cancel_token: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>), BridgeError> {
    let bind_address = config.bind_address.as_str();
    let listener = TcpListener::bind(bind_address).await.map_err(|e| {
        error!(
            target: "bridge.health",
            error = %e,
            addr = bind_address,
            "Failed to bind health server"
        );
        BridgeError::Network(format!("Failed to bind health server to {bind_address}: {e}"))
    })?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| BridgeError::Network(format!("Health server has no local address: {e}")))?;
    info!(target: "bridge.health", addr = %local_addr, "Health server listening");

    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            info!(target: "bridge.health", "Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(target: "bridge.health", error = %e, "Health server failed");
        }
    });

    Ok((local_addr, handle))
}
