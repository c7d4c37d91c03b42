//! `GatewayServer` — Axum HTTP + WebSocket surface.
//!
//! - `GET /health`: liveness and connection count
//! - `GET /ws?token=...`: authenticated WebSocket upgrade
//! - `POST /send`: enqueue a message for one or more recipients

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use crossbar_core::RecipientId;
use crossbar_router::{DeliveryStatus, RouteError, Router as MessageRouter};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth;
use crate::config::GatewayConfig;
use crate::connection::{GatewayConnection, TransportFrame, connection_pair};
use crate::health::{self, HealthResponse};
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;

/// Frames buffered per connection before sends start dropping.
const WRITE_CHANNEL_CAPACITY: usize = 64;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// This gateway's connection registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Routing client for `/send`.
    pub router: MessageRouter,
    /// Gateway configuration.
    pub config: Arc<GatewayConfig>,
    /// When the gateway started.
    pub start_time: Instant,
}

/// The gateway server.
pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    registry: Arc<ConnectionRegistry>,
    router: MessageRouter,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl GatewayServer {
    /// Create a new server over an already-wired registry and router.
    pub fn new(
        config: GatewayConfig,
        registry: Arc<ConnectionRegistry>,
        router: MessageRouter,
    ) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: Arc::new(ShutdownCoordinator::new(registry.clone())),
            registry,
            router,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            router: self.router.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .route("/send", post(send_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let resp = health::health_check(
        state.start_time,
        state.registry.shard().as_str(),
        state.registry.count(),
    );
    Json(resp)
}

#[derive(Deserialize)]
struct WsParams {
    token: String,
}

/// GET /ws — authenticated WebSocket upgrade.
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let recipient = match auth::verify_token(&params.token, state.config.auth_secret.as_bytes()) {
        Ok(recipient) => recipient,
        Err(err) => {
            warn!(error = %err, "rejecting upgrade");
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    };

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, recipient))
}

/// Drive one WebSocket connection from upgrade to teardown.
async fn handle_socket(socket: WebSocket, state: AppState, recipient: RecipientId) {
    let (connection, mut frames) = connection_pair(recipient.clone(), WRITE_CHANNEL_CAPACITY);

    if let Err(err) = state.registry.register(connection.clone()).await {
        warn!(recipient = %recipient, error = %err, "registration failed, closing socket");
        let mut socket = socket;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let (mut sink, mut stream) = socket.split();

    // Write half: owned by its own task so the registry, sweeper, and
    // dispatcher can all hand frames to this socket without blocking.
    let write_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let outcome = match frame {
                TransportFrame::Payload(bytes) => sink.send(Message::Binary(bytes)).await,
                TransportFrame::Probe => sink.send(Message::Ping(Bytes::new())).await,
                TransportFrame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if outcome.is_err() {
                break;
            }
        }
    });

    // Read half: this gateway pushes, clients only answer probes. Anything a
    // client does send still counts as proof of life.
    read_loop(&mut stream, &state.registry, &connection).await;

    write_task.abort();
    state.registry.deregister(&connection).await;
}

async fn read_loop(
    stream: &mut futures::stream::SplitStream<WebSocket>,
    registry: &ConnectionRegistry,
    connection: &Arc<GatewayConnection>,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Pong(_)) => registry.acknowledge(&connection.recipient),
            Ok(Message::Close(_)) => {
                debug!(recipient = %connection.recipient, "client closed");
                break;
            }
            Ok(_) => connection.mark_alive(),
            Err(err) => {
                debug!(recipient = %connection.recipient, error = %err, "socket read failed");
                break;
            }
        }
    }
}

/// POST /send request body. The message travels base64-encoded; recipients
/// receive the decoded bytes verbatim.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    /// Base64-encoded message bytes.
    pub message: String,
    /// Recipients, in the order results should be reported.
    pub targets: Vec<String>,
}

/// One entry of a POST /send response.
#[derive(Debug, Serialize)]
pub struct SendResult {
    /// The recipient this entry reports on.
    pub recipient: String,
    /// Final status for this recipient.
    pub status: DeliveryStatus,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// POST /send
async fn send_handler(State(state): State<AppState>, Json(req): Json<SendRequest>) -> Response {
    let message = match BASE64.decode(&req.message) {
        Ok(bytes) => Bytes::from(bytes),
        Err(err) => return bad_request(format!("message is not valid base64: {err}")),
    };
    let targets: Vec<RecipientId> = req.targets.into_iter().map(RecipientId::from).collect();

    match state.router.send(message, targets).await {
        Ok(report) => {
            info!(
                delivered = report.delivered(),
                total = report.results().len(),
                "send handled"
            );
            let results: Vec<SendResult> = report
                .results()
                .iter()
                .map(|(recipient, status)| SendResult {
                    recipient: recipient.as_str().into(),
                    status: *status,
                })
                .collect();
            Json(results).into_response()
        }
        Err(err @ RouteError::EmptyTargets) => bad_request(err.to_string()),
        Err(err @ RouteError::Codec(_)) => bad_request(err.to_string()),
    }
}
