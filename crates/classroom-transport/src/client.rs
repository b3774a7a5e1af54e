//! WebSocket connector for [`ReconnectManager`](crate::ReconnectManager).

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::{
    protocol::{ClientMessage, ServerMessage},
    reconnect::{ClientError, Connector, Transport},
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Opens WebSocket transports to a classroom endpoint such as
/// `ws://host/ws/student/{session_id}/{student_id}`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Transport, ClientError> {
        tracing::info!(url = %self.url, "Connecting");
        let (stream, _) = tokio::time::timeout(
            CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async(self.url.as_str()),
        )
        .await
        .map_err(|_| ClientError::Connect("timed out".into()))?
        .map_err(|e| ClientError::Connect(e.to_string()))?;

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (incoming_tx, incoming) = mpsc::unbounded_channel::<ServerMessage>();
        let (mut ws_write, mut ws_read) = stream.split();

        // Runs until either side closes; dropping `incoming_tx` reports the loss.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    out = outgoing_rx.recv() => {
                        let Some(msg) = out else {
                            let _ = ws_write.send(WsMessage::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&msg) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize message: {e}");
                                continue;
                            }
                        };
                        if ws_write.send(WsMessage::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    frame = ws_read.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<ServerMessage>(&text) {
                                Ok(msg) => {
                                    if incoming_tx.send(msg).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => tracing::debug!("Unrecognized server message: {e}"),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WebSocket error");
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                }
            }
        });

        Ok(Transport { outgoing, incoming })
    }
}
