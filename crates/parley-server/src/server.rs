use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use parley_core::ConnectionId;
use parley_realtime::CredentialIssuer;
use parley_store::SessionStore;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::connection;
use crate::gateway::{Gateway, Inbound};
use crate::handlers;
use crate::registry::ConnectionRegistry;

const INBOUND_QUEUE: usize = 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Outbound events buffered per connection before deliveries are dropped.
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    /// Connections silent for this long are disconnected.
    pub client_timeout: Duration,
}

impl ServerConfig {
    /// Reject values the transport cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_send_queue == 0 {
            return Err(ServerError::InvalidConfig(
                "max_send_queue must be at least 1".into(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ServerError::InvalidConfig(
                "heartbeat_interval must be non-zero".into(),
            ));
        }
        if self.client_timeout <= self.heartbeat_interval {
            return Err(ServerError::InvalidConfig(
                "client_timeout must exceed heartbeat_interval".into(),
            ));
        }
        Ok(())
    }
}

/// Errors from starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid server config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub inbound_tx: mpsc::Sender<(ConnectionId, Inbound)>,
    pub issuer: Arc<dyn CredentialIssuer>,
    pub heartbeat_interval: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/sessions", get(handlers::list_sessions))
        .route("/api/sessions", get(handlers::list_sessions))
        .route("/token", get(handlers::issue_token))
        .route("/api/token", get(handlers::issue_token))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    issuer: Arc<dyn CredentialIssuer>,
) -> Result<ServerHandle, ServerError> {
    config.validate()?;

    let store = Arc::new(SessionStore::new());
    let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));
    let gateway = Arc::new(Gateway::new(store, Arc::clone(&registry)));

    let (inbound_tx, inbound_rx) = mpsc::channel::<(ConnectionId, Inbound)>(INBOUND_QUEUE);
    let dispatcher = tokio::spawn(Arc::clone(&gateway).run(inbound_rx));

    let liveness = start_liveness_task(
        registry,
        inbound_tx.clone(),
        config.heartbeat_interval,
        config.client_timeout,
    );

    let app_state = AppState {
        gateway,
        inbound_tx,
        issuer,
        heartbeat_interval: config.heartbeat_interval,
    };

    let router = build_router(app_state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "Parley relay started");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown: shutdown_tx,
        server,
        dispatcher,
        liveness,
    })
}

/// Handle returned by `start()` that keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    shutdown: oneshot::Sender<()>,
    server: tokio::task::JoinHandle<()>,
    dispatcher: tokio::task::JoinHandle<()>,
    liveness: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and tear down background tasks.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        self.liveness.abort();

        let mut server = self.server;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
            tracing::warn!("Open connections outlived shutdown grace period");
            server.abort();
        }
        self.dispatcher.abort();
        tracing::info!("Parley relay stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection_id, rx) = state.gateway.attach();

    connection::handle_ws_connection(
        socket,
        connection_id,
        rx,
        Arc::clone(state.gateway.registry()),
        state.inbound_tx,
        state.heartbeat_interval,
    )
    .await;
}

/// Periodically disconnect connections that stopped answering pings. The
/// disconnect goes through the dispatcher like any other teardown.
pub fn start_liveness_task(
    registry: Arc<ConnectionRegistry>,
    inbound_tx: mpsc::Sender<(ConnectionId, Inbound)>,
    interval: Duration,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for connection_id in registry.stale_connections(timeout) {
                tracing::info!(connection_id = %connection_id, "Disconnecting unresponsive connection");
                if inbound_tx
                    .send((connection_id, Inbound::Disconnect))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    })
}
