//! Twilio carrier adapter
//!
//! Webhooks arrive as form posts and are answered with TwiML; call control
//! goes through the Calls REST resource with basic auth. The media bridge
//! uses `<Connect><Stream>` pointed at the engine's WebSocket URL.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::{CarrierAdapter, CarrierDirective, OutboundDial};
use crate::error::{EngineError, EngineResult};
use crate::types::CallStatus;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";
const CARRIER_TIMEOUT: Duration = Duration::from_secs(10);

/// Inbound-ring webhook payload (the fields the engine uses)
#[derive(Debug, Clone, Deserialize)]
pub struct TwilioInboundForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "AccountSid", default)]
    pub account_sid: String,
}

/// Status-callback webhook payload
#[derive(Debug, Clone, Deserialize)]
pub struct TwilioStatusForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
    #[serde(rename = "CallDuration", default)]
    pub call_duration: Option<String>,
}

pub struct TwilioAdapter {
    client: Client,
    account_sid: String,
    auth_token: String,
}

impl TwilioAdapter {
    pub fn new(account_sid: String, auth_token: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(CARRIER_TIMEOUT)
                .build()
                .unwrap_or_default(),
            account_sid,
            auth_token,
        }
    }

    fn calls_url(&self, suffix: &str) -> String {
        format!(
            "{}/Accounts/{}/Calls{}",
            TWILIO_API_BASE, self.account_sid, suffix
        )
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> EngineResult<Value> {
        let response = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| EngineError::provider("twilio", format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::provider(
                "twilio",
                format!("HTTP {}: {}", status, crate::truncate_safe(&body, 300)),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| EngineError::provider("twilio", format!("invalid JSON: {}", e)))
    }
}

#[async_trait]
impl CarrierAdapter for TwilioAdapter {
    fn name(&self) -> &'static str {
        "twilio"
    }

    fn bridge_directive(&self, media_ws_url: &str) -> CarrierDirective {
        CarrierDirective {
            content_type: "application/xml",
            body: format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                 <Response><Connect><Stream url=\"{}\"/></Connect></Response>",
                xml_escape(media_ws_url)
            ),
        }
    }

    fn reject_directive(&self, message: &str) -> CarrierDirective {
        CarrierDirective {
            content_type: "application/xml",
            body: format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                 <Response><Say>{}</Say><Hangup/></Response>",
                xml_escape(message)
            ),
        }
    }

    fn map_status(&self, carrier_status: &str) -> Option<CallStatus> {
        match carrier_status {
            "queued" | "initiated" => Some(CallStatus::Queued),
            "ringing" => Some(CallStatus::Ringing),
            "in-progress" | "answered" => Some(CallStatus::InProgress),
            "completed" => Some(CallStatus::Completed),
            "busy" => Some(CallStatus::Busy),
            "no-answer" => Some(CallStatus::NoAnswer),
            "failed" | "canceled" => Some(CallStatus::Failed),
            _ => None,
        }
    }

    async fn dial(&self, request: &OutboundDial) -> EngineResult<String> {
        info!("Twilio dial {} -> {}", request.from, request.to);
        let body = self
            .post_form(
                &self.calls_url(".json"),
                &[
                    ("To", request.to.as_str()),
                    ("From", request.from.as_str()),
                    ("Url", request.answer_url.as_str()),
                    ("StatusCallback", request.status_callback_url.as_str()),
                    (
                        "StatusCallbackEvent",
                        "initiated ringing answered completed",
                    ),
                ],
            )
            .await?;
        body.get("sid")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| EngineError::provider("twilio", "dial response had no sid"))
    }

    async fn hangup(&self, carrier_call_id: &str) -> EngineResult<()> {
        debug!("Twilio hangup {}", carrier_call_id);
        self.post_form(
            &self.calls_url(&format!("/{}.json", carrier_call_id)),
            &[("Status", "completed")],
        )
        .await?;
        Ok(())
    }

    async fn transfer(&self, carrier_call_id: &str, destination: &str) -> EngineResult<()> {
        info!("Twilio transfer {} -> {}", carrier_call_id, destination);
        let twiml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Response><Dial>{}</Dial></Response>",
            xml_escape(destination)
        );
        self.post_form(
            &self.calls_url(&format!("/{}.json", carrier_call_id)),
            &[("Twiml", twiml.as_str())],
        )
        .await?;
        Ok(())
    }

    async fn send_dtmf(&self, carrier_call_id: &str, digits: &str) -> EngineResult<()> {
        debug!("Twilio DTMF {} on {}", digits, carrier_call_id);
        let twiml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Response><Play digits=\"{}\"/></Response>",
            xml_escape(digits)
        );
        self.post_form(
            &self.calls_url(&format!("/{}.json", carrier_call_id)),
            &[("Twiml", twiml.as_str())],
        )
        .await?;
        Ok(())
    }
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
