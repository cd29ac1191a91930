use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use pulse_core::settings::FeedbackSettings;
use pulse_core::{Clock, ConnectionId, PulseSettings, SystemClock};
use pulse_engine::IngestionPipeline;
use pulse_store::{Database, RoomRepo};

use crate::broadcaster::{self, Broadcaster};
use crate::client;
use crate::handlers;
use crate::wire::{ClientMessage, ServerMessage};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub cleanup_interval: Duration,
    pub join_code_length: usize,
    /// Origin prefixed to the `joinUrl` and `hostUrl` of a new room.
    pub base_url: String,
    pub feedback: FeedbackSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&PulseSettings::default())
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &PulseSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_send_queue: settings.server.max_send_queue,
            cleanup_interval: Duration::from_secs(60),
            join_code_length: settings.rooms.join_code_length,
            base_url: settings.server.base_url.trim_end_matches('/').to_string(),
            feedback: settings.feedback.clone(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestionPipeline>,
    pub rooms: Arc<RoomRepo>,
    pub broadcaster: Arc<Broadcaster>,
    pub base_url: Arc<str>,
    pub message_tx: mpsc::Sender<(ConnectionId, String)>,
}

impl AppState {
    /// Wire the repos, broadcaster and pipeline around one database.
    /// Returns the receiving end of the socket message channel.
    pub fn new(
        config: &ServerConfig,
        db: &Database,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::Receiver<(ConnectionId, String)>) {
        let broadcaster = Arc::new(Broadcaster::new(config.max_send_queue));
        let pipeline = Arc::new(IngestionPipeline::from_database(
            db,
            broadcaster.clone(),
            clock,
            &config.feedback,
        ));
        let rooms = Arc::new(RoomRepo::new(db.clone(), config.join_code_length));
        let (message_tx, message_rx) = mpsc::channel(1024);

        let state = Self {
            pipeline,
            rooms,
            broadcaster,
            base_url: Arc::from(config.base_url.as_str()),
            message_tx,
        };
        (state, message_rx)
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/rooms", post(handlers::create_room))
        .route("/api/rooms/join", post(handlers::join_room))
        .route("/api/rooms/host-lookup", get(handlers::host_lookup))
        .route("/api/rooms/{id}/host", get(handlers::host_view))
        .route("/api/rooms/{id}/aggregate", get(handlers::get_aggregate))
        .route("/api/rooms/{id}/feedback", post(handlers::submit_feedback))
        .route("/api/rooms/{id}/lock", post(handlers::lock_room))
        .route("/api/rooms/{id}/reset", post(handlers::reset_room))
        .route("/ws", get(ws_handler))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create and start the server on the wall clock.
pub async fn start(config: ServerConfig, db: Database) -> Result<ServerHandle, std::io::Error> {
    start_with_clock(config, db, Arc::new(SystemClock)).await
}

/// Create and start the server. Returns a handle that keeps it running.
pub async fn start_with_clock(
    config: ServerConfig,
    db: Database,
    clock: Arc<dyn Clock>,
) -> Result<ServerHandle, std::io::Error> {
    let (app_state, message_rx) = AppState::new(&config, &db, clock);

    let cleanup = broadcaster::start_cleanup_task(
        Arc::clone(&app_state.broadcaster),
        config.cleanup_interval,
    );
    let messages = tokio::spawn(process_client_messages(message_rx, app_state.clone()));

    let router = build_router(app_state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, db = %db.path().display(), "RoomPulse server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "server stopped");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
        messages,
        cleanup,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
    messages: tokio::task::JoinHandle<()>,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and end the background tasks.
    pub fn shutdown(&self) {
        self.server.abort();
        self.messages.abort();
        self.cleanup.abort();
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection_id, rx) = state.broadcaster.register();
    tracing::info!(connection_id = %connection_id, "websocket client connected");

    if let Ok(json) = (ServerMessage::Connected { connection_id: &connection_id }).to_json() {
        state.broadcaster.send_to(&connection_id, json);
    }

    client::handle_ws_connection(
        socket,
        connection_id,
        rx,
        state.broadcaster,
        state.message_tx,
    )
    .await;
}

/// Apply `joinRoom` / `leaveRoom` requests from sockets, in arrival order.
async fn process_client_messages(
    mut rx: mpsc::Receiver<(ConnectionId, String)>,
    state: AppState,
) {
    while let Some((connection_id, raw)) = rx.recv().await {
        let reply = match serde_json::from_str::<ClientMessage>(&raw) {
            Ok(ClientMessage::JoinRoom { room_id }) => match state.rooms.exists(&room_id) {
                Ok(true) => {
                    state.broadcaster.subscribe(&connection_id, &room_id);
                    ServerMessage::Joined { room_id: &room_id }.to_json()
                }
                Ok(false) => ServerMessage::Error {
                    message: format!("unknown room {room_id}"),
                }
                .to_json(),
                Err(e) => {
                    tracing::warn!(error = %e, "room lookup failed");
                    ServerMessage::Error {
                        message: "room lookup failed".into(),
                    }
                    .to_json()
                }
            },
            Ok(ClientMessage::LeaveRoom { room_id }) => {
                state.broadcaster.leave(&connection_id, &room_id);
                ServerMessage::Left { room_id: &room_id }.to_json()
            }
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "bad client message");
                ServerMessage::Error {
                    message: format!("invalid message: {e}"),
                }
                .to_json()
            }
        };

        if let Ok(json) = reply {
            state.broadcaster.send_to(&connection_id, json);
        }
    }
}
