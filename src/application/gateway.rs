//! Connection Gateway
//!
//! The axum surface of the service: the `/ws` upgrade endpoint that feeds
//! the sync protocol handler, the webview bootstrap routes, and the health
//! endpoint. Each accepted socket gets a writer task draining its outbound
//! event channel and a read loop that parses envelopes and dispatches them;
//! the rest of the system only ever sees `ServerEvent` channels.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::application::protocol::{Envelope, ServerEvent};
use crate::application::rooms::RoomRegistry;
use crate::application::sync::SyncHandler;
use crate::domain::presence::{next_connection_id, ConnectionId, PresenceRegistry};
use crate::persistence::repository::PortfolioRepository;
use crate::rate_limit::{rate_limit_middleware, GlobalRateLimiter};

/// Shared application state behind every route
pub struct AppState {
    pub handler: SyncHandler,
    pub presence: Arc<PresenceRegistry>,
    pub rooms: Arc<RoomRegistry>,
    pub portfolios: PortfolioRepository,
    /// Socket address the webview is told to connect back to
    pub socket_address: String,
    pub demo: bool,
}

/// What the webview needs to boot: which portfolio to join, where the
/// realtime socket lives, and whether the server runs offline
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapPayload {
    pub portfolio_id: i64,
    pub socket_address: String,
    pub demo: bool,
}

/// Assemble the service router
pub fn create_router(state: Arc<AppState>, limiter: GlobalRateLimiter) -> Router {
    let bootstrap = Router::new()
        .route("/portfolios/new", get(create_portfolio))
        .route("/portfolios/:portfolio_id", get(portfolio_bootstrap))
        .layer(middleware::from_fn(
            move |request: axum::extract::Request, next: middleware::Next| {
                let limiter = limiter.clone();
                async move { rate_limit_middleware(limiter, request, next).await }
            },
        ));

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .merge(bootstrap)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(32 * 1024))
        .with_state(state)
}

/// Liveness plus a view of the realtime load
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "clients": state.presence.len().await,
        "rooms": state.rooms.room_count().await,
    }))
}

/// `GET /portfolios/new`: create a portfolio and hand back its bootstrap
/// parameters
async fn create_portfolio(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let portfolio = state.portfolios.create(None).await.map_err(|e| {
        error!("Failed to create portfolio: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "failed to create portfolio"})),
        )
    })?;

    info!("Created portfolio {} via bootstrap route", portfolio.id);
    Ok((
        StatusCode::CREATED,
        Json(BootstrapPayload {
            portfolio_id: portfolio.id,
            socket_address: state.socket_address.clone(),
            demo: state.demo,
        }),
    ))
}

/// `GET /portfolios/:id`: bootstrap parameters for an existing portfolio.
/// Existence is not checked here; a stale id surfaces as `noportfolio` when
/// the webview joins.
async fn portfolio_bootstrap(
    State(state): State<Arc<AppState>>,
    Path(portfolio_id): Path<i64>,
) -> Json<BootstrapPayload> {
    Json(BootstrapPayload {
        portfolio_id,
        socket_address: state.socket_address.clone(),
        demo: state.demo,
    })
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one connection: writer task plus read loop, then the disconnect
/// flow once the transport goes away.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn = next_connection_id();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    info!("Connection {} established", conn);

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => dispatch_frame(&state, conn, &tx, text.as_bytes()).await,
            Ok(Message::Binary(data)) => dispatch_frame(&state, conn, &tx, &data).await,
            // The transport answers pings on its own
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!("Connection {} transport error: {}", conn, e);
                break;
            }
        }
    }

    state.handler.handle_disconnect(conn).await;
    writer.abort();
    info!("Connection {} closed", conn);
}

/// Parse a raw frame and hand it to the protocol handler. A frame that does
/// not parse is acknowledged with the error status (echoing its `seq` when
/// one is readable) and the connection carries on.
async fn dispatch_frame(
    state: &Arc<AppState>,
    conn: ConnectionId,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    raw: &[u8],
) {
    match serde_json::from_slice::<Envelope>(raw) {
        Ok(envelope) => state.handler.handle_request(conn, tx, envelope).await,
        Err(e) => {
            warn!("Unparseable frame on connection {}: {}", conn, e);
            let seq = serde_json::from_slice::<serde_json::Value>(raw)
                .ok()
                .and_then(|value| value.get("seq").and_then(serde_json::Value::as_u64));
            state.handler.reject_unparsed(tx, seq);
        }
    }
}
