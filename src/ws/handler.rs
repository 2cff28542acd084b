//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::verify_jwt;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::outbox::{self, OutboxReceiver};
use crate::ws::protocol::{ClientMsg, ServerMsg};
use crate::ws::session::ParticipantSession;

/// One-off replies buffered per connection; match state is never queued
const OUTBOX_CAPACITY: usize = 64;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    match verify_jwt(&query.token, &state.config.supabase_jwt_secret) {
        Ok(claims) => {
            info!(user_id = %claims.sub, "WebSocket upgrade for authenticated user");
            ws.on_upgrade(move |socket| handle_socket(socket, claims.sub, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, state: AppState) {
    let (ws_sink, ws_stream) = socket.split();
    let (outbox, outbox_rx) = outbox::channel(OUTBOX_CAPACITY);

    let session = ParticipantSession::new(user_id, state.engine.clone(), outbox);
    let connection_id = session.connection_id();
    info!(user_id = %user_id, connection_id = %connection_id, "New WebSocket connection");

    let writer_handle = tokio::spawn(run_writer(connection_id, ws_sink, outbox_rx));

    let session = run_reader(session, ws_stream).await;

    let binding = session.binding();
    info!(
        user_id = %user_id,
        connection_id = %connection_id,
        match_id = ?binding.match_id(),
        role = ?binding.role(),
        "WebSocket connection closed"
    );

    session.disconnect().await;
    writer_handle.abort();
}

/// Writer task: outbox -> WebSocket
async fn run_writer(
    connection_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbox: OutboxReceiver,
) {
    while let Some(msg) = outbox.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Reader loop: WebSocket -> session. Returns the session once the
/// connection is gone.
async fn run_reader<S>(mut session: ParticipantSession, mut ws_stream: S) -> ParticipantSession
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let connection_id = session.connection_id();
    let rate_limiter = ConnectionRateLimiter::new();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(connection_id = %connection_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => session.handle(client_msg).await,
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(connection_id = %connection_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    session
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
