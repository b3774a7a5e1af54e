//! WebSocket endpoints for students and admins.

use std::{fmt::Display, sync::Arc};

use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use classroom_core::{OutboundReceiver, SessionId, StudentId, SyncError};
use classroom_session::{ChannelRole, SessionHub};
use futures::{SinkExt, StreamExt};

use crate::router::MessageRouter;

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    pub router: MessageRouter,
}

impl WsState {
    #[must_use]
    pub const fn new(hub: Arc<SessionHub>) -> Self {
        Self {
            router: MessageRouter::new(hub),
        }
    }
}

/// Upgrade handler for `/ws/student/{session_id}/{student_id}`.
pub async fn student_ws_handler(
    ws: WebSocketUpgrade,
    Path((session_id, student_id)): Path<(SessionId, StudentId)>,
    State(state): State<WsState>,
) -> Response {
    upgrade(ws, state, session_id, ChannelRole::Student(student_id)).await
}

/// Upgrade handler for `/ws/admin/{session_id}`.
pub async fn admin_ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<SessionId>,
    State(state): State<WsState>,
) -> Response {
    upgrade(ws, state, session_id, ChannelRole::Admin).await
}

async fn upgrade(
    ws: WebSocketUpgrade,
    state: WsState,
    session_id: SessionId,
    role: ChannelRole,
) -> Response {
    match state.router.hub().session_exists(&session_id).await {
        Ok(true) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, session_id, role))
            .into_response(),
        Ok(false) => {
            tracing::debug!(%session_id, %role, "Refusing connection to unknown session");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            tracing::error!(%session_id, "Session lookup failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, state: WsState, session_id: SessionId, role: ChannelRole) {
    let hub = state.router.hub();
    let (mut sender, mut receiver) = socket.split();

    let (tx, rx) = hub.outbound_channel();
    let handle = match hub.register(&session_id, role, tx).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(%session_id, "Registration refused: {e}");
            let code = match e {
                SyncError::DuplicateIdentity { .. } => close_code::POLICY,
                _ => close_code::ERROR,
            };
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };
    tracing::info!(
        %session_id,
        channel_id = %handle.channel_id,
        role = %handle.role,
        "Channel opened"
    );

    // Ends when the hub drops our sender (replaced, session closed) or the
    // socket stops accepting writes.
    let mut send_task = tokio::spawn(forward_outbound(rx, sender));

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::warn!(
                                %session_id,
                                channel_id = %handle.channel_id,
                                "Dropped client message: binary frame is not UTF-8: {e}"
                            );
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let err = SyncError::TransportFailure(e.to_string());
                        tracing::debug!(channel_id = %handle.channel_id, "{err}");
                        break;
                    }
                };
                if let Err(e) = state.router.route(&handle, &text).await {
                    tracing::warn!(
                        %session_id,
                        channel_id = %handle.channel_id,
                        "Dropped client message: {e}"
                    );
                }
            }
            sent = &mut send_task => {
                match sent {
                    Ok(Ok(dropped)) if dropped > 0 => tracing::warn!(
                        %session_id,
                        channel_id = %handle.channel_id,
                        dropped,
                        "Slow consumer: oldest events were dropped"
                    ),
                    Ok(Err(e)) => tracing::debug!(channel_id = %handle.channel_id, "{e}"),
                    _ => {}
                }
                break;
            }
        }
    }

    send_task.abort();
    hub.unregister(&handle).await;
    tracing::info!(%session_id, channel_id = %handle.channel_id, "Channel closed");
}

/// Drain a channel's outbound queue into the socket.
///
/// Returns the number of events the queue overwrote once the hub closes
/// it, or `TransportFailure` if the socket rejects a write.
async fn forward_outbound<S>(mut rx: OutboundReceiver, mut sender: S) -> Result<u64, SyncError>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(event) = rx.recv().await {
        let json = match serde_json::to_string(&event) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize message: {e}");
                continue;
            }
        };
        sender
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| SyncError::TransportFailure(e.to_string()))?;
    }
    let _ = sender.send(Message::Close(None)).await;
    Ok(rx.dropped())
}

/// Create the WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(hub));
/// ```
#[must_use]
pub fn create_ws_router(hub: Arc<SessionHub>) -> axum::Router {
    axum::Router::new()
        .route("/ws/student/{session_id}/{student_id}", get(student_ws_handler))
        .route("/ws/admin/{session_id}", get(admin_ws_handler))
        .with_state(WsState::new(hub))
}
