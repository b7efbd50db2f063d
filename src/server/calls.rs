//! Call lifecycle endpoints
//!
//! Creation of web calls (returning the media URL + token the widget needs),
//! single outbound-call initiation, live session introspection, and
//! API-requested call end.

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::AppState;
use crate::error::{EngineError, EngineResult};
use crate::security::issue_media_token;
use crate::session::SessionInfo;
use crate::telephony::OutboundDial;
use crate::types::{Call, CallKind};

#[derive(Debug, Deserialize)]
pub struct CreateCallRequest {
    pub assistant_id: String,
    #[serde(default)]
    pub org_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateCallResponse {
    pub call_id: String,
    pub ws_url: String,
    pub token: String,
}

/// Create a web call: the Call row plus the media URL and token the widget
/// connects with. The session itself starts on WebSocket accept.
pub async fn create_call_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateCallRequest>,
) -> EngineResult<Json<CreateCallResponse>> {
    if state
        .store
        .get_assistant(&request.assistant_id)
        .await?
        .is_none()
    {
        return Err(EngineError::NotFound(format!(
            "assistant {} not found",
            request.assistant_id
        )));
    }

    let call_id = Uuid::new_v4().to_string();
    let call = Call::new(
        call_id.clone(),
        request.org_id.unwrap_or_else(|| "default".to_string()),
        CallKind::Web,
        request.assistant_id,
    );
    state.store.create_call(&call).await?;

    let token = issue_media_token(&state.config.secrets.jwt_secret, &call_id)
        .map_err(|e| EngineError::Fatal(e.to_string()))?;
    let ws_url = state.config.media_ws_url(&call_id, &token);
    Ok(Json(CreateCallResponse {
        call_id,
        ws_url,
        token,
    }))
}

#[derive(Debug, Deserialize)]
pub struct OutboundCallRequest {
    pub assistant_id: String,
    pub to: String,
    pub from: String,
    #[serde(default)]
    pub org_id: Option<String>,
}

/// Initiate a single outbound call through the configured carrier
pub async fn outbound_call_handler(
    State(state): State<AppState>,
    Json(request): Json<OutboundCallRequest>,
) -> EngineResult<Json<Value>> {
    let carrier = state
        .carrier
        .clone()
        .ok_or_else(|| EngineError::Validation("no carrier configured".to_string()))?;
    if state
        .store
        .get_assistant(&request.assistant_id)
        .await?
        .is_none()
    {
        return Err(EngineError::NotFound(format!(
            "assistant {} not found",
            request.assistant_id
        )));
    }

    let call_id = Uuid::new_v4().to_string();
    let mut call = Call::new(
        call_id.clone(),
        request.org_id.unwrap_or_else(|| "default".to_string()),
        CallKind::Outbound,
        request.assistant_id,
    );
    call.from_number = Some(request.from.clone());
    call.to_number = Some(request.to.clone());
    state.store.create_call(&call).await?;

    let api_url = state.config.api_url.trim_end_matches('/');
    let dial = OutboundDial {
        to: request.to,
        from: request.from,
        answer_url: format!("{}/telephony/twilio/answer?call_id={}", api_url, call_id),
        status_callback_url: format!("{}/telephony/twilio/status", api_url),
    };
    let carrier_call_id = carrier.dial(&dial).await?;
    state
        .store
        .set_carrier_metadata(&call_id, &json!({ "call_sid": carrier_call_id }))
        .await?;

    Ok(Json(json!({
        "call_id": call_id,
        "carrier_call_id": carrier_call_id,
        "status": "queued",
    })))
}

#[derive(Debug, Serialize)]
pub struct SessionInfoResponse {
    #[serde(flatten)]
    pub info: SessionInfo,
    pub duration_seconds: u64,
}

/// Live-session introspection: state, duration, message count, rolling
/// average latencies
pub async fn session_info_handler(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> EngineResult<Json<SessionInfoResponse>> {
    let handle = state
        .registry
        .lookup(&call_id)
        .await
        .ok_or_else(|| EngineError::NotFound(format!("no live session for call {}", call_id)))?;
    let info = handle.info();
    let duration_seconds = (Utc::now() - info.started_at).num_seconds().max(0) as u64;
    Ok(Json(SessionInfoResponse {
        info,
        duration_seconds,
    }))
}

/// End a live session on API request. Telephony calls also get their
/// carrier leg hung up so the PSTN side does not linger.
pub async fn end_call_handler(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> EngineResult<Json<Value>> {
    let handle = state
        .registry
        .lookup(&call_id)
        .await
        .ok_or_else(|| EngineError::NotFound(format!("no live session for call {}", call_id)))?;
    handle.request_end("api-request").await;

    if let (Some(carrier), Some(sid)) = (state.carrier.as_ref(), carrier_sid(&state, &call_id).await?)
    {
        if let Err(e) = carrier.hangup(&sid).await {
            tracing::warn!("Carrier hangup failed for {}: {}", call_id, e);
        }
    }
    Ok(Json(json!({ "call_id": call_id, "status": "ending" })))
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub destination: String,
}

/// Patch a telephony call's carrier leg to a new destination. This is the
/// side channel behind the session's `transfer.started` event.
pub async fn transfer_call_handler(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(request): Json<TransferRequest>,
) -> EngineResult<Json<Value>> {
    let carrier = state
        .carrier
        .clone()
        .ok_or_else(|| EngineError::Validation("no carrier configured".to_string()))?;
    let sid = carrier_sid(&state, &call_id)
        .await?
        .ok_or_else(|| EngineError::Validation(format!("call {} has no carrier leg", call_id)))?;
    carrier.transfer(&sid, &request.destination).await?;

    // The engine-side session is done with the caller once the leg moves
    if let Some(handle) = state.registry.lookup(&call_id).await {
        handle.request_end("assistant-forwarded").await;
    }
    Ok(Json(json!({ "call_id": call_id, "status": "transferring" })))
}

#[derive(Debug, Deserialize)]
pub struct DtmfRequest {
    pub digits: String,
}

/// Play DTMF digits into a telephony call's carrier leg
pub async fn dtmf_handler(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(request): Json<DtmfRequest>,
) -> EngineResult<Json<Value>> {
    let carrier = state
        .carrier
        .clone()
        .ok_or_else(|| EngineError::Validation("no carrier configured".to_string()))?;
    let sid = carrier_sid(&state, &call_id)
        .await?
        .ok_or_else(|| EngineError::Validation(format!("call {} has no carrier leg", call_id)))?;
    carrier.send_dtmf(&sid, &request.digits).await?;
    Ok(Json(json!({ "call_id": call_id, "status": "sent" })))
}

async fn carrier_sid(state: &AppState, call_id: &str) -> EngineResult<Option<String>> {
    let Some(call) = state.store.get_call(call_id).await? else {
        return Ok(None);
    };
    Ok(call
        .carrier_metadata
        .get("call_sid")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string()))
}

/// Service health and live-session count
pub async fn status_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": crate::NAME,
        "version": crate::VERSION,
        "live_sessions": state.registry.len().await,
    }))
}
