//! Connection handlers for Rendezvous server.
//!
//! This module handles the connection lifecycle and event processing.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use rendezvous_core::{ConnectionId, Dispatch, Router as SignalRouter, RouterConfig};
use rendezvous_protocol::{codec, ClientEvent, Encoding, ProtocolError, ServerEvent};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The presence and relay router.
    pub router: SignalRouter,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let router_config = RouterConfig {
            enforce_sender_identity: config.routing.enforce_sender_identity,
        };

        Self {
            router: SignalRouter::with_config(router_config),
            config,
        }
    }
}

/// Build the HTTP/WebSocket application.
pub fn app(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/users", get(users_handler));

    let router = if state.config.cors.enabled {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST]),
        )
    } else {
        router
    };

    router.with_state(state)
}

/// Run the HTTP/WebSocket server.
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

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;
    let addr = listener.local_addr()?;

    info!("Signaling server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connection_count,
        "registered": stats.registered_count,
    }))
}

/// Current presence set.
async fn users_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.router.presence())
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    let mut inbox = state.router.connect(&connection_id);

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Replies follow the encoding of the client's first data message.
    let mut encoding: Option<Encoding> = None;

    // Read buffer for partial MessagePack events
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            // Events routed to this connection
            Some(event) = inbox.recv() => {
                let message = match encode_event(&event, encoding.unwrap_or_default()) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(connection = %connection_id, event = event.name(), error = %e, "Skipping unencodable event");
                        metrics::record_error("encode");
                        continue;
                    }
                };
                if let Err(e) = sender.send(message).await {
                    debug!(connection = %connection_id, error = %e, "Send failed");
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        encoding.get_or_insert(Encoding::Json);
                        metrics::record_message(text.len(), "inbound");

                        match codec::decode_json::<ClientEvent>(&text) {
                            Ok(event) => handle_event(&state, &connection_id, event),
                            Err(e) => {
                                warn!(connection = %connection_id, error = %e, "Ignoring malformed event");
                                metrics::record_error("decode");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        encoding.get_or_insert(Encoding::MessagePack);
                        metrics::record_message(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => handle_event(&state, &connection_id, event),
                                Ok(None) => break,
                                Err(ProtocolError::EventTooLarge(size)) => {
                                    // The length prefix cannot be trusted, so nothing after it can either.
                                    warn!(connection = %connection_id, size, "Discarding oversized event");
                                    metrics::record_error("decode");
                                    read_buffer.clear();
                                    break;
                                }
                                Err(e) => {
                                    warn!(connection = %connection_id, error = %e, "Ignoring malformed event");
                                    metrics::record_error("decode");
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Pings are answered by the WebSocket layer
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

    state.router.disconnect(&connection_id);
    metrics::set_presence_size(state.router.stats().registered_count);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Hand a decoded event to the router.
fn handle_event(state: &AppState, connection_id: &ConnectionId, event: ClientEvent) {
    debug!(connection = %connection_id, event = event.name(), "Event");

    match state.router.dispatch(connection_id, event) {
        Dispatch::Registered(change) => {
            metrics::record_registration();
            metrics::set_presence_size(state.router.stats().registered_count);

            if let Some(displaced) = change.displaced {
                debug!(connection = %connection_id, displaced = %displaced, "Identity taken over");
            }
        }
        Dispatch::Forwarded(kind, outcome) if outcome.is_delivered() => {
            metrics::record_forwarded(kind.inbound_event());
        }
        Dispatch::Forwarded(kind, outcome) => {
            metrics::record_dropped(kind.inbound_event(), outcome.as_str());
        }
    }
}

/// Encode an outbound event in the connection's encoding.
fn encode_event(event: &ServerEvent, encoding: Encoding) -> Result<Message, ProtocolError> {
    let message = match encoding {
        Encoding::Json => {
            let text = codec::encode_json(event)?;
            metrics::record_message(text.len(), "outbound");
            Message::Text(text)
        }
        Encoding::MessagePack => {
            let data = codec::encode(event)?;
            metrics::record_message(data.len(), "outbound");
            Message::Binary(data.to_vec())
        }
    };

    Ok(message)
}
