//! `HuddleServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{FromRef, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use huddle_core::{IdentityProvider, RandomIdentityProvider};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::registry::RoomRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::relay::{self, Relay};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handshake and connection runner.
    pub relay: Relay,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl FromRef<AppState> for Relay {
    fn from_ref(state: &AppState) -> Self {
        state.relay.clone()
    }
}

/// The relay server.
pub struct HuddleServer {
    config: Arc<ServerConfig>,
    relay: Relay,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl HuddleServer {
    /// Create a server with a fresh registry and random identities.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(RoomRegistry::new()),
            Arc::new(RandomIdentityProvider),
        )
    }

    /// Create a server over an existing registry and identity provider.
    pub fn with_parts(
        config: ServerConfig,
        registry: Arc<RoomRegistry>,
        identities: Arc<dyn IdentityProvider>,
    ) -> Self {
        let config = Arc::new(config);
        let relay = Relay::new(
            config.clone(),
            registry,
            identities,
            Arc::new(ShutdownCoordinator::new()),
        );
        Self {
            config,
            relay,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    ///
    /// Every path other than `/health` and `/metrics` is a WebSocket room.
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: self.relay.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .fallback(relay::ws_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the relay.
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Get the room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        self.relay.registry()
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        self.relay.shutdown_coordinator()
    }

    /// Bind the listener and start serving in the background.
    pub async fn bind(self) -> Result<ServerHandle, ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        let router = self.router();
        let token = self.shutdown().token();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server stopped with error");
            }
        });

        info!(%local_addr, "huddle listening");
        Ok(ServerHandle {
            local_addr,
            relay: self.relay,
            task,
            shutdown_timeout: self.config.shutdown_timeout,
        })
    }
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    relay: Relay,
    task: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The relay serving connections.
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// The room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        self.relay.registry()
    }

    /// Stop accepting and close every live connection without waiting.
    pub fn shutdown(&self) -> usize {
        self.relay.shutdown()
    }

    /// Shut down and wait for the listener and connection tasks to finish,
    /// bounded by the configured shutdown timeout.
    ///
    /// Returns `true` if everything finished in time.
    pub async fn shutdown_and_wait(self) -> bool {
        let _ = self.relay.shutdown();
        self.relay
            .shutdown_coordinator()
            .drain(self.task, self.shutdown_timeout)
            .await
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.relay.registry();
    Json(health::health_check(
        state.start_time,
        registry.connection_count(),
        registry.room_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
