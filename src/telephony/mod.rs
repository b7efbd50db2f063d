//! Telephony control plane
//!
//! Carrier adapters translate carrier signalling (webhooks in, REST out)
//! onto the engine's internal contract. The only control-plane action a
//! successful call needs is "connect this leg to the engine's media
//! socket"; everything else is status bookkeeping, dialling, hangup, and
//! transfer.

pub mod twilio;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::CallStatus;

/// A carrier-native response body for a webhook (e.g. TwiML)
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierDirective {
    pub content_type: &'static str,
    pub body: String,
}

/// Parameters for a single outbound dial
#[derive(Debug, Clone)]
pub struct OutboundDial {
    pub to: String,
    pub from: String,
    /// Webhook the carrier fetches when the callee answers
    pub answer_url: String,
    /// Webhook receiving status callbacks for the leg
    pub status_callback_url: String,
}

/// One object per supported carrier, speaking its REST and webhook
/// conventions
#[async_trait]
pub trait CarrierAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Directive connecting an answered leg to the engine's media socket
    fn bridge_directive(&self, media_ws_url: &str) -> CarrierDirective;

    /// Directive that plays a short error prompt and hangs up (used when a
    /// dialled number has no assistant)
    fn reject_directive(&self, message: &str) -> CarrierDirective;

    /// Map the carrier's status vocabulary onto the engine's
    fn map_status(&self, carrier_status: &str) -> Option<CallStatus>;

    /// Start an outbound dial; returns the carrier's call id
    async fn dial(&self, request: &OutboundDial) -> EngineResult<String>;

    /// Hang up a live leg
    async fn hangup(&self, carrier_call_id: &str) -> EngineResult<()>;

    /// Patch a live leg to dial a new destination
    async fn transfer(&self, carrier_call_id: &str, destination: &str) -> EngineResult<()>;

    /// Play DTMF digits into a live leg
    async fn send_dtmf(&self, carrier_call_id: &str, digits: &str) -> EngineResult<()>;
}
