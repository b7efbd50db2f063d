//! Shared domain types
//!
//! The entities the engine touches: assistants (read-only input resolved by
//! the control surface), tools, calls, and the append-only conversation log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who speaks first when a session opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FirstMessageMode {
    #[default]
    AssistantSpeaksFirst,
    AssistantWaitsForUser,
}

/// LLM provider + model settings for an assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// TTS provider + voice settings for an assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub provider: String,
    pub voice_id: String,
    /// Opaque provider-specific settings, passed through verbatim
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            provider: "elevenlabs".to_string(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            settings: serde_json::Value::Null,
        }
    }
}

/// STT provider settings for an assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    pub provider: String,
    #[serde(default = "default_stt_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_stt_model() -> String {
    "nova-2".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            provider: "deepgram".to_string(),
            model: default_stt_model(),
            language: default_language(),
        }
    }
}

/// Resolved assistant configuration handed to the engine by the control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub transcriber: TranscriberConfig,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub first_message: Option<String>,
    #[serde(default)]
    pub first_message_mode: FirstMessageMode,
    #[serde(default = "default_true")]
    pub interruption_enabled: bool,
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,
    #[serde(default = "default_max_call_duration_secs")]
    pub max_call_duration_secs: u64,
    /// 0..1, 0.5 reproduces the baseline VAD threshold
    #[serde(default = "default_endpointing_sensitivity")]
    pub endpointing_sensitivity: f32,
    #[serde(default = "default_true")]
    pub end_call_enabled: bool,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

fn default_system_prompt() -> String {
    "You are a helpful voice assistant. Keep responses short and conversational.".to_string()
}

fn default_true() -> bool {
    true
}

fn default_silence_timeout_ms() -> u64 {
    800
}

fn default_max_call_duration_secs() -> u64 {
    1800
}

fn default_endpointing_sensitivity() -> f32 {
    0.5
}

impl Default for Assistant {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            model: ModelConfig::default(),
            voice: VoiceConfig::default(),
            transcriber: TranscriberConfig::default(),
            system_prompt: default_system_prompt(),
            first_message: None,
            first_message_mode: FirstMessageMode::default(),
            interruption_enabled: true,
            silence_timeout_ms: default_silence_timeout_ms(),
            max_call_duration_secs: default_max_call_duration_secs(),
            endpointing_sensitivity: default_endpointing_sensitivity(),
            end_call_enabled: true,
            tools: Vec::new(),
        }
    }
}

/// Tool kinds the executor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolKind {
    Function,
    Transfer,
    Query,
    Dtmf,
    EndCall,
}

/// Transfer handover mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransferMode {
    #[default]
    Blind,
    WarmSummary,
    WarmMessage,
}

/// A tool configured on an assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub id: String,
    pub name: String,
    pub kind: ToolKind,
    #[serde(default)]
    pub description: String,
    /// JSON-schema parameters for `function` tools, passed through verbatim
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    /// HTTP endpoint for `function` tools
    #[serde(default)]
    pub server_url: Option<String>,
    /// Destinations for `transfer` tools
    #[serde(default)]
    pub destinations: Vec<String>,
    #[serde(default)]
    pub transfer_mode: TransferMode,
    /// Knowledge-base id for `query` tools
    #[serde(default)]
    pub knowledge_base_id: Option<String>,
}

/// How the call reached the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Web,
    Inbound,
    Outbound,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "web" => Some(Self::Web),
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// Carrier-level call status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Queued,
    Ringing,
    InProgress,
    Completed,
    Failed,
    NoAnswer,
    Busy,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Ringing => "ringing",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NoAnswer => "no-answer",
            Self::Busy => "busy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "ringing" => Some(Self::Ringing),
            "in-progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "no-answer" => Some(Self::NoAnswer),
            "busy" => Some(Self::Busy),
            _ => None,
        }
    }
}

/// Cost breakdown in cents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub stt: u32,
    pub llm: u32,
    pub tts: u32,
    pub total: u32,
}

/// A call row as the engine persists it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: String,
    pub org_id: String,
    pub kind: CallKind,
    pub status: CallStatus,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub assistant_id: String,
    /// Opaque carrier metadata (e.g. the carrier's own call id)
    #[serde(default)]
    pub carrier_metadata: serde_json::Value,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u64>,
    pub ended_reason: Option<String>,
    #[serde(default)]
    pub cost: CostBreakdown,
    pub user_recording_uri: Option<String>,
    pub assistant_recording_uri: Option<String>,
}

impl Call {
    pub fn new(id: String, org_id: String, kind: CallKind, assistant_id: String) -> Self {
        Self {
            id,
            org_id,
            kind,
            status: CallStatus::Queued,
            from_number: None,
            to_number: None,
            assistant_id,
            carrier_metadata: serde_json::Value::Null,
            started_at: None,
            ended_at: None,
            duration_seconds: None,
            ended_reason: None,
            cost: CostBreakdown::default(),
            user_recording_uri: None,
            assistant_recording_uri: None,
        }
    }
}

/// Conversation roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// Per-turn pipeline latencies in milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TurnLatencies {
    #[serde(default)]
    pub stt_ms: Option<u64>,
    #[serde(default)]
    pub llm_ms: Option<u64>,
    #[serde(default)]
    pub tts_ms: Option<u64>,
}

/// One entry of the append-only conversation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMessage {
    pub id: String,
    pub call_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_arguments: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_result: Option<serde_json::Value>,
    /// Milliseconds since call start
    pub timestamp_ms: u64,
    #[serde(default)]
    pub latencies: TurnLatencies,
}

impl CallMessage {
    pub fn new(call_id: &str, role: Role, content: &str, timestamp_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            call_id: call_id.to_string(),
            role,
            content: content.to_string(),
            tool_name: None,
            tool_arguments: None,
            tool_result: None,
            timestamp_ms,
            latencies: TurnLatencies::default(),
        }
    }
}
