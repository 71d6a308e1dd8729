//! Connection handlers for the relay server.
//!
//! This module handles the connection lifecycle and event processing.

use crate::api::{self, bearer_token, ApiError};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rtc_core::{
    Authenticator, Collaborators, EventReceiver, MemoryMessageStore, MemoryUserDirectory, Relay,
    Session,
};
use rtc_protocol::codec::{self, MAX_FRAME_SIZE};
use rtc_protocol::{ClientEvent, ServerEvent, Version, PROTOCOL_VERSION};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{Instant, MissedTickBehavior};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Error code for frames that could not be decoded.
pub const DECODE_ERROR_CODE: u16 = 1001;

/// Error code for frames over the configured size limit.
pub const FRAME_TOO_LARGE_CODE: u16 = 1009;

/// Shared server state.
pub struct AppState {
    /// The presence and signaling relay.
    pub relay: Relay,
    /// Server configuration.
    pub config: Config,
    connections: AtomicUsize,
}

impl AppState {
    /// Create new app state backed by in-memory stores.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let directory = Arc::new(MemoryUserDirectory::with_users(
            config.users.iter().map(|seed| seed.to_profile()),
        ));
        let relay = Relay::new(
            Authenticator::with_leeway(config.auth.jwt_secret.as_bytes(), config.auth.leeway_secs),
            Collaborators {
                messages: Arc::new(MemoryMessageStore::new()),
                users: directory.clone(),
                status: directory,
            },
            config.relay_config(),
        );

        Self {
            relay,
            config,
            connections: AtomicUsize::new(0),
        }
    }

    /// Number of open sockets.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// A reserved connection slot, released on drop.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let max = state.config.limits.max_connections;
        state
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()?;
        Some(Self {
            state: Arc::clone(state),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .merge(api::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("rtc-relay listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops abnormally.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, build_app(state)).await?;
    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION.to_string(),
        "online": state.relay.presence().count(),
    }))
}

/// Upgrade query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Session token; an `Authorization: Bearer` header also works.
    pub token: Option<String>,
    /// Protocol version the client speaks, `major.minor`.
    pub v: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The credential, protocol version and connection limit are all checked
/// before the handshake, so a refused client gets a plain HTTP status.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Some(requested) = params.v.as_deref() {
        let compatible = requested
            .parse::<Version>()
            .map(|v| v.is_compatible_with(&PROTOCOL_VERSION))
            .unwrap_or(false);
        if !compatible {
            metrics::record_rejection("version");
            return ApiError::BadRequest(format!(
                "Unsupported protocol version {}; server speaks {}",
                requested, PROTOCOL_VERSION
            ))
            .into_response();
        }
    }

    let token = params.token.or_else(|| bearer_token(&headers));
    let (session, events) = match state.relay.authenticate(token.as_deref()) {
        Ok(accepted) => accepted,
        Err(e) => {
            metrics::record_rejection("auth");
            return ApiError::from(e).into_response();
        }
    };

    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!(
            user = %session.user(),
            limit = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_rejection("capacity");
        return ApiError::Unavailable("Server is at capacity".to_string()).into_response();
    };

    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_websocket(socket, state, session, events, slot))
}

/// Encoding used for outbound events on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Json,
    MessagePack,
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    mut session: Session,
    mut events: EventReceiver,
    _slot: ConnectionSlot,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection = session.handle().id();
    let user = session.user().clone();

    let (mut sender, mut receiver) = socket.split();

    if let Some(previous) = state.relay.open(&mut session).await {
        debug!(user = %user, previous = %previous.id(), "Previous connection superseded");
    }
    metrics::set_users_online(state.relay.presence().count());
    debug!(user = %user, connection = %connection, "WebSocket connected");

    let max_message_size = state.config.limits.max_message_size;
    let idle_timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + Duration::from_millis(state.config.heartbeat.interval_ms),
        Duration::from_millis(state.config.heartbeat.interval_ms),
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut format = WireFormat::Json;
    let mut read_buffer = BytesMut::with_capacity(4096);
    let mut last_seen = Instant::now();

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Events queued for this connection
            Some(event) = events.recv() => {
                if send_event(&mut sender, &event, format).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                if matches!(msg, Some(Ok(_))) {
                    last_seen = Instant::now();
                }

                match msg {
                    Some(Ok(Message::Text(text))) => {
                        format = WireFormat::Json;
                        if text.len() > max_message_size {
                            reject_oversized(&session, text.len(), max_message_size);
                            continue;
                        }

                        match codec::decode_text::<ClientEvent>(&text) {
                            Ok(event) => handle_event(&state, &session, event, text.len()).await,
                            Err(e) => reject_undecodable(&session, &e),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        format = WireFormat::MessagePack;
                        if read_buffer.len() + data.len() > max_message_size {
                            read_buffer.clear();
                            reject_oversized(&session, data.len(), max_message_size);
                            continue;
                        }
                        read_buffer.extend_from_slice(&data);

                        // Drain every complete frame; keep a trailing partial one
                        loop {
                            let before = read_buffer.len();
                            match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => {
                                    let used = before - read_buffer.len();
                                    handle_event(&state, &session, event, used).await;
                                }
                                Ok(None) => break,
                                Err(e @ rtc_protocol::ProtocolError::FrameTooLarge(_)) => {
                                    read_buffer.clear();
                                    reject_undecodable(&session, &e);
                                    break;
                                }
                                Err(e) => reject_undecodable(&session, &e),
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= idle_timeout {
                    info!(user = %user, connection = %connection, "Heartbeat timeout");
                    metrics::record_error("heartbeat_timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.relay.close(&mut session).await;
    metrics::set_users_online(state.relay.presence().count());
    let _ = sender.close().await;

    debug!(user = %user, connection = %connection, "WebSocket disconnected");
}

/// Dispatch one decoded event, recording metrics.
async fn handle_event(state: &AppState, session: &Session, event: ClientEvent, bytes: usize) {
    let kind = event.kind();
    metrics::record_event(kind, "inbound", bytes);

    let start = std::time::Instant::now();
    match state.relay.dispatch(session, event).await {
        Ok(()) => {
            if matches!(kind, "privateMessage") {
                metrics::record_persisted();
            }
        }
        Err(e) => {
            debug!(user = %session.user(), event = kind, error = %e, "Event not handled");
            metrics::record_error(e.kind());
        }
    }
    metrics::record_dispatch(kind, start.elapsed().as_secs_f64());
}

fn reject_undecodable(session: &Session, error: &rtc_protocol::ProtocolError) {
    warn!(user = %session.user(), error = %error, "Undecodable frame");
    metrics::record_error("decode");
    session.handle().send(ServerEvent::error(
        DECODE_ERROR_CODE,
        format!("Invalid frame: {}", error),
    ));
}

fn reject_oversized(session: &Session, size: usize, limit: usize) {
    warn!(user = %session.user(), size, limit, "Frame over size limit");
    metrics::record_error("frame_too_large");
    session.handle().send(ServerEvent::error(
        FRAME_TOO_LARGE_CODE,
        format!("Frame of {} bytes exceeds limit of {} bytes", size, limit),
    ));
}

/// Send an event to the WebSocket in the connection's current format.
///
/// Only a transport failure is returned; an event that cannot be encoded is
/// logged and skipped.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    format: WireFormat,
) -> Result<()> {
    let encoded = match format {
        WireFormat::Json => codec::encode_text(event).map(|text| (text.len(), Message::Text(text))),
        WireFormat::MessagePack => {
            codec::encode_binary(event).map(|data| (data.len(), Message::Binary(data.to_vec())))
        }
    };

    let (len, message) = match encoded {
        Ok(encoded) => encoded,
        Err(e) => {
            error!(event = event.kind(), error = %e, "Failed to encode event");
            metrics::record_error("encode");
            return Ok(());
        }
    };

    metrics::record_event(event.kind(), "outbound", len);
    sender.send(message).await?;
    Ok(())
}
