//! Media WebSocket
//!
//! One socket per call at `/ws/{call_id}`. The upgrade is token-gated: the
//! query token must be a live JWT bound to the call id. Binary frames are
//! raw PCM routed into the session's control queue; text frames are parsed
//! control messages. A sender task drains the session's outbound channel
//! so event ordering matches production order.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::AppState;
use crate::audio::{EGRESS_SAMPLE_RATE_CARRIER, EGRESS_SAMPLE_RATE_WEB};
use crate::error::EngineError;
use crate::security::verify_media_token;
use crate::session::{ClientControl, Outbound, Session, SessionControl, SessionParams};
use crate::types::{Assistant, Call, CallKind};

/// WebSocket frame ceiling
const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Outbound channel depth; the socket drains fast
const OUTBOUND_QUEUE_SIZE: usize = 64;

#[derive(Debug, Deserialize)]
pub struct MediaWsQuery {
    #[serde(default)]
    token: String,
}

pub async fn media_ws_handler(
    ws: WebSocketUpgrade,
    Path(call_id): Path<String>,
    Query(query): Query<MediaWsQuery>,
    State(state): State<AppState>,
) -> Result<Response, EngineError> {
    if !verify_media_token(&state.config.secrets.jwt_secret, &call_id, &query.token) {
        return Err(EngineError::Auth(format!(
            "invalid or expired media token for call {}",
            call_id
        )));
    }

    let call = state
        .store
        .get_call(&call_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("call {} not found", call_id)))?;
    let assistant = state
        .store
        .get_assistant(&call.assistant_id)
        .await?
        .ok_or_else(|| {
            EngineError::NotFound(format!("assistant {} not found", call.assistant_id))
        })?;

    Ok(ws
        .max_message_size(MAX_FRAME_BYTES)
        .max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| run_media_session(socket, state, call, assistant)))
}

async fn run_media_session(
    mut socket: WebSocket,
    state: AppState,
    call: Call,
    assistant: Assistant,
) {
    info!("Media socket connected for call {}", call.id);
    let egress_sample_rate = match call.kind {
        CallKind::Web => EGRESS_SAMPLE_RATE_WEB,
        CallKind::Inbound | CallKind::Outbound => EGRESS_SAMPLE_RATE_CARRIER,
    };

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE_SIZE);
    let params = SessionParams {
        call_id: call.id.clone(),
        org_id: call.org_id.clone(),
        assistant,
        egress_sample_rate,
        store: state.store.clone(),
        registry: state.registry.clone(),
        provider_keys: state.config.provider_keys.clone(),
        recordings_dir: state.config.recordings_dir.clone().into(),
    };

    let (session, handle, control_rx) = match Session::new(params, outbound_tx) {
        Ok(parts) => parts,
        Err(e) => {
            warn!("Failed to build session for {}: {}", call.id, e);
            let _ = socket.close().await;
            return;
        }
    };
    if let Err(e) = state.registry.register(handle.clone()).await {
        warn!("Refusing duplicate session for {}: {}", call.id, e);
        let _ = socket.close().await;
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Drain session output onto the socket in production order
    let sender_task = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            let result = match out {
                Outbound::Event(event) => {
                    ws_tx.send(Message::Text(event.to_frame().into())).await
                }
                Outbound::Audio(pcm) => ws_tx.send(Message::Binary(pcm.into())).await,
                Outbound::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    let actor = tokio::spawn(session.run(control_rx));

    // Feed the socket into the actor queue; arrival order is preserved
    let control = handle.sender();
    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Binary(data) => {
                if control
                    .send(SessionControl::Audio(data.to_vec()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Message::Text(text) => match serde_json::from_str::<ClientControl>(&text) {
                Ok(parsed) => {
                    if control.send(SessionControl::Client(parsed)).await.is_err() {
                        break;
                    }
                }
                Err(e) => debug!("Unparseable control frame on {}: {}", call.id, e),
            },
            Message::Close(_) => {
                debug!("Client closed media socket for {}", call.id);
                break;
            }
            _ => {}
        }
    }

    // Socket gone (or close frame): let the actor tear down if it hasn't
    let _ = control.send(SessionControl::Disconnected).await;
    let _ = actor.await;
    sender_task.abort();
    info!("Media socket finished for {}", call.id);
}
