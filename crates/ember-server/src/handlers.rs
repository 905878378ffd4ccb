//! Connection handlers for the Ember server.
//!
//! This module handles the socket lifecycle, event dispatch and the small
//! HTTP surface (health and history).

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::BytesMut;
use ember_core::{
    ConnectionHandle, ConnectionId, ConnectionLifecycle, MemoryStore, MessageRouter, RouterError,
};
use ember_protocol::{codec, error_code, ChatMessage, ClientEvent, ProtocolError, ServerEvent};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The message router.
    pub router: Arc<MessageRouter>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state backed by the in-memory store.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let router = MessageRouter::new(Arc::new(MemoryStore::new()), config.router_config());
        Self {
            router: Arc::new(router),
            config,
        }
    }
}

/// Encoding used for events sent to a socket.
///
/// A socket is answered in the encoding it last wrote in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Json,
    MessagePack,
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/messages/:sender_id/:receiver_id", get(history_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until interrupted.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Ember server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.router.scheduler().shutdown();
    info!("Ember server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Chat history between two users, oldest first.
async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path((sender_id, receiver_id)): Path<(String, String)>,
) -> Response {
    match state.router.history(&sender_id, &receiver_id).await {
        Ok(messages) => {
            let body: Vec<ChatMessage> = messages.iter().map(|m| m.to_wire()).collect();
            Json(body).into_response()
        }
        Err(e) => {
            warn!(error = %e, "History lookup failed");
            metrics::record_error("history");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Failed to fetch messages" })),
            )
                .into_response()
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.router.connections().len() >= state.config.limits.max_connections {
        warn!("Connection limit reached, rejecting upgrade");
        metrics::record_error("capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (handle, mut outbound) = ConnectionHandle::new(ConnectionId::generate());
    let connection_id = handle.id().clone();
    handle.send(ServerEvent::connected(
        connection_id.as_str(),
        state.config.heartbeat.interval_ms,
    ));
    let mut conn = ConnectionLifecycle::open(state.router.clone(), handle);

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut format = WireFormat::Json;
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            // Events queued for this connection by any component
            Some(event) = outbound.recv() => {
                if let Err(e) = send_event(&mut sender, &event, format).await {
                    debug!(connection = %connection_id, error = %e, "Failed to write event");
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        format = WireFormat::Json;
                        metrics::record_message(text.len(), "inbound");
                        match codec::decode_text::<ClientEvent>(&text) {
                            Ok(event) => handle_event(event, &mut conn, &state).await,
                            Err(e) => reject_malformed(&conn, &e),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        format = WireFormat::MessagePack;
                        metrics::record_message(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => handle_event(event, &mut conn, &state).await,
                                Ok(None) => break,
                                Err(e) => {
                                    reject_malformed(&conn, &e);
                                    read_buffer.clear();
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    debug!(connection = %connection_id, state = ?conn.state(), "WebSocket disconnected");

    conn.close();
    metrics::set_users_online(state.router.presence().count());
}

/// Dispatch one decoded client event.
async fn handle_event(event: ClientEvent, conn: &mut ConnectionLifecycle, state: &AppState) {
    let start = Instant::now();
    let kind = event.kind();
    debug!(connection = %conn.id(), user = ?conn.user(), event = %kind, "Event");

    match event {
        ClientEvent::Login(user) => {
            if conn.login(&user) {
                metrics::set_users_online(state.router.presence().count());
            }
        }

        ClientEvent::JoinRoom(room) => {
            if let Err(e) = conn.join_room(&room.sender_id, &room.receiver_id) {
                conn.handle()
                    .send(ServerEvent::error(error_code::VALIDATION, e.to_string()));
            }
        }

        ClientEvent::PrivateMessage(request) => {
            match state.router.send(conn.id(), request.into()).await {
                Ok(delivery) => {
                    if delivery.burn_armed {
                        metrics::record_burn_armed();
                    }
                }
                Err(e @ RouterError::Validation(_)) => {
                    debug!(connection = %conn.id(), error = %e, "Rejected message");
                    conn.handle()
                        .send(ServerEvent::error(error_code::VALIDATION, e.to_string()));
                }
                Err(e @ RouterError::Persistence(_)) => {
                    metrics::record_error("persistence");
                    conn.handle()
                        .send(ServerEvent::error(error_code::PERSISTENCE, e.to_string()));
                }
            }
        }

        ClientEvent::MessageSeen(id) => {
            if state.router.message_seen(id).await {
                metrics::record_burn_armed();
            }
        }

        ClientEvent::Ping { timestamp } => {
            conn.handle().send(ServerEvent::pong(timestamp));
        }
    }

    metrics::set_burns_pending(state.router.scheduler().pending_count());
    metrics::record_latency(start.elapsed().as_secs_f64());
}

fn reject_malformed(conn: &ConnectionLifecycle, e: &ProtocolError) {
    warn!(connection = %conn.id(), error = %e, "Malformed event");
    metrics::record_error("decode");
    conn.handle()
        .send(ServerEvent::error(error_code::MALFORMED, e.to_string()));
}

/// Write an event to the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    format: WireFormat,
) -> Result<()> {
    let message = match format {
        WireFormat::Json => Message::Text(codec::encode_text(event)?),
        WireFormat::MessagePack => Message::Binary(codec::encode(event)?.to_vec()),
    };
    let len = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_message(len, "outbound");
    sender.send(message).await?;
    Ok(())
}
