//! WebSocket transport
//!
//! One connection carries one voice session. Text frames are parsed as
//! control messages, and anything that is not JSON is raw PCM16 audio. A
//! writer task serializes outbound messages so the coordinator never waits
//! on the socket directly.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use voice_session_core::{InboundFrame, ServerMessage};

use crate::coordinator::{SessionCoordinator, SessionEvent};
use crate::state::AppState;

/// Upgrade handler for the session websocket
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_config = &state.settings.session;
    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(session_config.event_queue_capacity);
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<ServerMessage>(session_config.outbound_queue_capacity);

    let coordinator =
        match SessionCoordinator::new(state.clone(), events_tx.clone(), events_rx, outbound_tx) {
            Ok(coordinator) => coordinator,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create session coordinator");
                return;
            }
        };

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize server message");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    let mut coordinator_task = tokio::spawn(coordinator.run());

    let reader = async {
        while let Some(message) = ws_receiver.next().await {
            let frame = match message {
                Ok(Message::Text(text)) => InboundFrame::from_text(&text),
                Ok(Message::Binary(data)) => InboundFrame::from_binary(Bytes::from(data)),
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket receive error");
                    break;
                }
            };
            if events_tx.send(SessionEvent::Inbound(frame)).await.is_err() {
                break;
            }
        }
        let _ = events_tx.send(SessionEvent::Disconnected).await;
    };

    // The coordinator ends on its own when the session expires
    tokio::select! {
        _ = &mut coordinator_task => {}
        _ = reader => {
            let _ = (&mut coordinator_task).await;
        }
    }

    let _ = writer.await;
    tracing::debug!("WebSocket connection finished");
}
