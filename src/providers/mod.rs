//! Provider adapters (STT / LLM / TTS)
//!
//! Three small interface families, one concrete implementation per
//! supported vendor. The engine performs no speech or language computation
//! itself; these adapters are pure request/response boundaries over HTTPS.
//! Each session owns its own adapter instances, bound to env credentials
//! and per-assistant config by the factory functions below.

pub mod llm;
pub mod stt;
pub mod tts;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ProviderKeys;
use crate::error::{EngineError, EngineResult};
use crate::types::{Assistant, Role};

/// Non-2xx response or network failure from a vendor. Within a session this
/// is a recoverable turn failure, never a call terminator.
#[derive(Debug, Error)]
#[error("{provider}: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

impl From<ProviderError> for EngineError {
    fn from(e: ProviderError) -> Self {
        EngineError::Provider {
            provider: e.provider,
            message: e.message,
        }
    }
}

/// Map a reqwest failure (timeout, DNS, connect) into a ProviderError
pub(crate) fn request_error(provider: &str, e: reqwest::Error) -> ProviderError {
    ProviderError::new(provider, format!("request failed: {}", e))
}

/// Map a non-2xx response into a ProviderError, keeping the body for context
pub(crate) async fn status_error(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    ProviderError::new(
        provider,
        format!("HTTP {}: {}", status, crate::truncate_safe(&body, 300)),
    )
}

/// One entry of the message list handed to the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: Role,
    pub content: String,
    /// Vendor call id this message answers (tool role only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool calls carried by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// Tool descriptor in the engine's neutral shape; adapters translate to the
/// vendor-native format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema, passed through opaque
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// LLM turn output
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Speech-to-text: linear-PCM 16-bit mono 16 kHz in, transcript out
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, pcm: &[u8]) -> Result<String, ProviderError>;
}

/// Chat completion with tool support
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(
        &self,
        messages: &[LlmMessage],
        tools: &[LlmToolSpec],
    ) -> Result<LlmResponse, ProviderError>;
}

/// Text-to-speech: linear-PCM 16-bit mono at `sample_rate()` out
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError>;

    /// Egress sample rate this adapter was constructed for
    fn sample_rate(&self) -> u32;
}

/// Build the STT adapter an assistant's transcriber config names
pub fn stt_for(assistant: &Assistant, keys: &ProviderKeys) -> EngineResult<Box<dyn SpeechToText>> {
    let cfg = &assistant.transcriber;
    match cfg.provider.as_str() {
        "deepgram" => Ok(Box::new(stt::DeepgramStt::new(
            keys.require("deepgram")?.to_string(),
            cfg.model.clone(),
            cfg.language.clone(),
        ))),
        "openai" => Ok(Box::new(stt::WhisperStt::new(
            keys.require("openai")?.to_string(),
            cfg.language.clone(),
        ))),
        other => Err(EngineError::Validation(format!(
            "unknown transcriber provider {:?}",
            other
        ))),
    }
}

/// Build the LLM adapter an assistant's model config names
pub fn llm_for(assistant: &Assistant, keys: &ProviderKeys) -> EngineResult<Box<dyn LanguageModel>> {
    let cfg = &assistant.model;
    match cfg.provider.as_str() {
        "openai" => Ok(Box::new(llm::OpenAiLlm::new(
            keys.require("openai")?.to_string(),
            cfg.clone(),
        ))),
        "anthropic" => Ok(Box::new(llm::AnthropicLlm::new(
            keys.require("anthropic")?.to_string(),
            cfg.clone(),
        ))),
        other => Err(EngineError::Validation(format!(
            "unknown model provider {:?}",
            other
        ))),
    }
}

/// Build the TTS adapter an assistant's voice config names, bound to the
/// session's egress sample rate
pub fn tts_for(
    assistant: &Assistant,
    keys: &ProviderKeys,
    sample_rate: u32,
) -> EngineResult<Box<dyn TextToSpeech>> {
    let cfg = &assistant.voice;
    match cfg.provider.as_str() {
        "elevenlabs" => Ok(Box::new(tts::ElevenLabsTts::new(
            keys.require("elevenlabs")?.to_string(),
            cfg.clone(),
            sample_rate,
        )?)),
        "cartesia" => Ok(Box::new(tts::CartesiaTts::new(
            keys.require("cartesia")?.to_string(),
            cfg.clone(),
            sample_rate,
        ))),
        other => Err(EngineError::Validation(format!(
            "unknown voice provider {:?}",
            other
        ))),
    }
}
