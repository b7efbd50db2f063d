//! Carrier webhook handlers
//!
//! Twilio posts form-encoded webhooks; the answers are TwiML directives.
//! Inbound ring resolves the dialled number to its assistant, creates the
//! Call row, and bridges the media stream to the engine's WebSocket. Status
//! callbacks keep the Call row in step with the carrier's view of the leg.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Form;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::error::{EngineError, EngineResult};
use crate::security::issue_media_token;
use crate::telephony::twilio::{TwilioInboundForm, TwilioStatusForm};
use crate::telephony::{CarrierAdapter, CarrierDirective};
use crate::types::{Call, CallKind, CallStatus};

fn directive_response(directive: CarrierDirective) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, directive.content_type)],
        directive.body,
    )
        .into_response()
}

fn require_carrier(state: &AppState) -> EngineResult<std::sync::Arc<dyn CarrierAdapter>> {
    state
        .carrier
        .clone()
        .ok_or_else(|| EngineError::Validation("no carrier configured".to_string()))
}

/// Inbound ring: resolve the number, create the Call, bridge the media
pub async fn twilio_inbound_handler(
    State(state): State<AppState>,
    Form(form): Form<TwilioInboundForm>,
) -> EngineResult<Response> {
    let carrier = require_carrier(&state)?;
    info!(
        "Inbound ring {} -> {} (sid {})",
        form.from, form.to, form.call_sid
    );

    let Some(assistant) = state.store.assistant_for_number(&form.to).await? else {
        warn!("No assistant configured for {}", form.to);
        return Ok(directive_response(carrier.reject_directive(
            "This number is not configured. Goodbye.",
        )));
    };

    let call_id = Uuid::new_v4().to_string();
    let mut call = Call::new(
        call_id.clone(),
        "default".to_string(),
        CallKind::Inbound,
        assistant.id.clone(),
    );
    call.status = CallStatus::Ringing;
    call.from_number = Some(form.from.clone());
    call.to_number = Some(form.to.clone());
    call.carrier_metadata = json!({ "call_sid": form.call_sid });
    state.store.create_call(&call).await?;
    state
        .store
        .update_call_status(&call_id, CallStatus::Ringing)
        .await?;

    let token = issue_media_token(&state.config.secrets.jwt_secret, &call_id)
        .map_err(|e| EngineError::Fatal(e.to_string()))?;
    let ws_url = state.config.media_ws_url(&call_id, &token);
    Ok(directive_response(carrier.bridge_directive(&ws_url)))
}

#[derive(Debug, Deserialize)]
pub struct AnswerQuery {
    pub call_id: String,
}

/// Outbound leg answered: bridge it to the engine's media socket
pub async fn twilio_answer_handler(
    State(state): State<AppState>,
    Query(query): Query<AnswerQuery>,
    Form(_form): Form<TwilioInboundForm>,
) -> EngineResult<Response> {
    let carrier = require_carrier(&state)?;
    let call = state
        .store
        .get_call(&query.call_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("call {} not found", query.call_id)))?;
    info!("Outbound call {} answered", call.id);

    let token = issue_media_token(&state.config.secrets.jwt_secret, &call.id)
        .map_err(|e| EngineError::Fatal(e.to_string()))?;
    let ws_url = state.config.media_ws_url(&call.id, &token);
    Ok(directive_response(carrier.bridge_directive(&ws_url)))
}

/// Status callback: mirror the carrier's leg state onto the Call row. A
/// terminal status while a session is live ends the session; the session
/// then owns the final row update.
pub async fn twilio_status_handler(
    State(state): State<AppState>,
    Form(form): Form<TwilioStatusForm>,
) -> EngineResult<StatusCode> {
    let carrier = require_carrier(&state)?;
    let Some(status) = carrier.map_status(&form.call_status) else {
        warn!("Unknown carrier status {:?}", form.call_status);
        return Ok(StatusCode::OK);
    };
    let Some(call) = state.store.find_call_by_carrier_sid(&form.call_sid).await? else {
        warn!("Status callback for unknown carrier sid {}", form.call_sid);
        return Ok(StatusCode::OK);
    };
    info!("Carrier status for {}: {}", call.id, status.as_str());

    let terminal = matches!(
        status,
        CallStatus::Completed | CallStatus::Failed | CallStatus::NoAnswer | CallStatus::Busy
    );
    match state.registry.lookup(&call.id).await {
        Some(handle) if terminal => {
            // The session finalises the row during teardown
            handle.request_end("client-disconnect").await;
        }
        Some(_) => {}
        None => {
            state.store.update_call_status(&call.id, status).await?;
        }
    }
    Ok(StatusCode::OK)
}
