//! Connection handlers for the BlinkRoom server.
//!
//! This module handles the connection lifecycle: decoding client events off
//! the WebSocket, running them through the coordinator, dispatching the
//! resulting intents, and scheduling vanish timers.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use blink_core::{Coordinator, CoordinatorConfig, EventSink, Gateway, Intent, VanishSchedule};
use blink_protocol::{codec, ClientEvent, ServerEvent};
use bytes::BytesMut;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Per-session outbound queues; the transport side of the gateway.
#[derive(Default)]
pub struct SessionSinks {
    senders: DashMap<String, mpsc::UnboundedSender<ServerEvent>>,
}

impl SessionSinks {
    fn register(&self, session_id: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(session_id.to_string(), tx);
        rx
    }

    fn remove(&self, session_id: &str) {
        self.senders.remove(session_id);
    }

    /// Number of sessions with a live outbound queue.
    fn active(&self) -> usize {
        self.senders.len()
    }
}

/// Newtype over the shared sinks; the orphan rule forbids implementing the
/// foreign `EventSink` trait directly on `Arc<SessionSinks>`.
pub struct SinkHandle(Arc<SessionSinks>);

#[async_trait]
impl EventSink for SinkHandle {
    async fn deliver(&self, session_id: &str, event: ServerEvent) {
        // Fire-and-forget: a missing or closed queue means the session is
        // already gone, which is an expected race.
        if let Some(tx) = self.0.senders.get(session_id) {
            let _ = tx.send(event);
        }
    }
}

/// Shared server state.
pub struct AppState {
    /// The room/session coordinator.
    pub core: Arc<Coordinator>,
    /// Intent fan-out over the session sinks.
    pub gateway: Gateway<SinkHandle>,
    /// Outbound queues by session id.
    pub sinks: Arc<SessionSinks>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let core = Arc::new(Coordinator::with_config(CoordinatorConfig {
            instance: blink_core::coordinator::instance_id(),
            max_rooms: config.limits.max_rooms,
        }));
        let sinks = Arc::new(SessionSinks::default());
        let gateway = Gateway::new(Arc::clone(&core), SinkHandle(Arc::clone(&sinks)));

        Self {
            core,
            gateway,
            sinks,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    info!(instance = %state.core.instance(), "Server instance created");

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("BlinkRoom server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
///
/// Refuses the upgrade once the connection limit is reached.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.sinks.active() >= state.config.limits.max_connections {
        warn!(
            limit = state.config.limits.max_connections,
            "Connection limit reached, refusing upgrade"
        );
        metrics::record_error("capacity");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
        .into_response()
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    // Generate session ID
    let session_id = format!(
        "sess_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );

    debug!(session = %session_id, "WebSocket connected");

    let mut outbound = state.sinks.register(&session_id);

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Send the Welcome handshake
    let welcome = ServerEvent::Welcome {
        session_id: session_id.clone(),
        instance: state.core.instance().to_string(),
        heartbeat: heartbeat_ms(&state.config),
    };
    if let Ok(data) = codec::encode(&welcome) {
        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
            error!(session = %session_id, "Failed to send Welcome event");
            state.sinks.remove(&session_id);
            return;
        }
    }

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Message processing loop
    'conn: loop {
        tokio::select! {
            biased;

            // Deliver events addressed to this session
            Some(event) = outbound.recv() => {
                match codec::encode(&event) {
                    Ok(data) => {
                        metrics::record_message(data.len(), "outbound");
                        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                            break 'conn;
                        }
                    }
                    Err(e) => {
                        warn!(session = %session_id, error = %e, "Failed to encode event");
                        metrics::record_error("encode");
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        metrics::record_message(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => {
                                    handle_event(event, &session_id, &state).await;
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(session = %session_id, error = %e, "Protocol error");
                                    metrics::record_error("decode");
                                    break 'conn;
                                }
                            }
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break 'conn;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(session = %session_id, "Received close frame");
                        break 'conn;
                    }
                    Some(Err(e)) => {
                        warn!(session = %session_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break 'conn;
                    }
                    None => {
                        debug!(session = %session_id, "WebSocket stream ended");
                        break 'conn;
                    }
                }
            }
        }
    }

    // Cleanup: drop the outbound queue first so the leave broadcast only
    // reaches the remaining members, then run the disconnect transition.
    state.sinks.remove(&session_id);
    let intents = state.core.disconnect(&session_id);
    state.gateway.dispatch(intents).await;
    metrics::set_active_rooms(state.core.stats().room_count);

    debug!(session = %session_id, "WebSocket disconnected");
}

/// Handle a decoded client event.
async fn handle_event(event: ClientEvent, session_id: &str, state: &Arc<AppState>) {
    match event {
        ClientEvent::JoinRoom { username, room_id } => {
            debug!(session = %session_id, room = %room_id, "Join request");

            match state.core.join(session_id, &username, &room_id) {
                Ok(intents) => {
                    state.gateway.dispatch(intents).await;
                    metrics::set_active_rooms(state.core.stats().room_count);
                }
                Err(e) => {
                    debug!(session = %session_id, error = %e, "Join rejected");
                    metrics::record_error("join");
                    state
                        .gateway
                        .dispatch(vec![Intent::session(
                            session_id,
                            ServerEvent::login_failed(e.to_string()),
                        )])
                        .await;
                }
            }
        }

        ClientEvent::StatusChange { status } => {
            let intents = state.core.set_status(session_id, status);
            state.gateway.dispatch(intents).await;
        }

        ClientEvent::TypingStart => {
            let intents = state.core.set_typing(session_id, true);
            state.gateway.dispatch(intents).await;
        }

        ClientEvent::TypingStop => {
            let intents = state.core.set_typing(session_id, false);
            state.gateway.dispatch(intents).await;
        }

        ClientEvent::ChatMessage { text, vanish_secs } => {
            if text.len() > state.config.limits.max_message_size {
                warn!(session = %session_id, size = text.len(), "Oversize message dropped");
                metrics::record_error("oversize");
                return;
            }

            let (intents, schedule) = state.core.submit_text(session_id, &text, vanish_secs);
            state.gateway.dispatch(intents).await;

            if let Some(schedule) = schedule {
                spawn_vanish_timer(Arc::clone(state), schedule);
            }
        }

        ClientEvent::MarkRead { message_id } => {
            let intents = state.core.mark_read(session_id, message_id);
            state.gateway.dispatch(intents).await;
        }

        ClientEvent::SendFlashPic { payload } => {
            if payload.len() > state.config.limits.max_flashpic_bytes {
                warn!(session = %session_id, size = payload.len(), "Oversize FlashPic dropped");
                metrics::record_error("oversize");
                return;
            }

            let intents = state.core.submit_image(session_id, payload);
            state.gateway.dispatch(intents).await;
        }

        ClientEvent::ViewFlashPic { message_id } => {
            metrics::record_flashpic_view();
            let intents = state.core.view_image(session_id, message_id);
            state.gateway.dispatch(intents).await;
        }
    }
}

/// The advertised heartbeat interval, saturated to the wire field's width.
fn heartbeat_ms(config: &Config) -> u32 {
    u32::try_from(config.heartbeat.interval_ms).unwrap_or(u32::MAX)
}

/// Schedule a deferred message expiry.
///
/// The timer always fires; `expire_message` tolerates the room or receipt
/// having already gone away.
fn spawn_vanish_timer(state: Arc<AppState>, schedule: VanishSchedule) {
    tokio::spawn(async move {
        tokio::time::sleep(schedule.delay).await;
        let intents = state.core.expire_message(
            &schedule.room_id,
            schedule.message_id,
            &schedule.sender_name,
        );
        metrics::record_vanish();
        state.gateway.dispatch(intents).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_sinks_track_active_connections() {
        let sinks = SessionSinks::default();
        let _rx1 = sinks.register("s1");
        let _rx2 = sinks.register("s2");
        assert_eq!(sinks.active(), 2);

        sinks.remove("s1");
        assert_eq!(sinks.active(), 1);
    }

    #[test]
    fn test_heartbeat_saturates_instead_of_truncating() {
        let mut config = Config::default();

        config.heartbeat.interval_ms = 30_000;
        assert_eq!(heartbeat_ms(&config), 30_000);

        config.heartbeat.interval_ms = u64::from(u32::MAX) + 1;
        assert_eq!(heartbeat_ms(&config), u32::MAX);
    }
}
