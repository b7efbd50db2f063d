//! Media-socket wire frames
//!
//! Text frames between the engine and the client. Server-to-client events
//! serialize to `{type, data, timestamp}`; client-to-server control frames
//! are a small tagged enum. Binary frames (raw PCM) never pass through
//! here.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-to-client session events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "test")]
    Test { message: String },
    #[serde(rename = "call.started")]
    CallStarted {
        #[serde(rename = "callId")]
        call_id: String,
        assistant: Value,
    },
    #[serde(rename = "call.ended")]
    CallEnded {
        reason: String,
        duration: u64,
        costs: Value,
    },
    #[serde(rename = "speech.started")]
    SpeechStarted,
    #[serde(rename = "speech.ended")]
    SpeechEnded,
    #[serde(rename = "transcript.partial")]
    TranscriptPartial { text: String },
    #[serde(rename = "transcript.final")]
    TranscriptFinal { text: String },
    #[serde(rename = "assistant.thinking")]
    AssistantThinking,
    #[serde(rename = "assistant.message")]
    AssistantMessage { text: String },
    #[serde(rename = "assistant.speaking")]
    AssistantSpeaking,
    #[serde(rename = "assistant.audio.done")]
    AssistantAudioDone,
    #[serde(rename = "assistant.interrupted")]
    AssistantInterrupted {
        #[serde(rename = "clearAudio")]
        clear_audio: bool,
        reason: String,
    },
    #[serde(rename = "tool.called")]
    ToolCalled { name: String, arguments: Value },
    #[serde(rename = "tool.result")]
    ToolResult { name: String, result: Value },
    #[serde(rename = "transfer.started")]
    TransferStarted { destination: String },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Serialize to the `{type, data, timestamp}` wire frame
    pub fn to_frame(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| Value::Null);
        if let Value::Object(ref mut map) = value {
            map.insert(
                "timestamp".to_string(),
                Value::from(Utc::now().timestamp_millis()),
            );
        }
        value.to_string()
    }
}

/// Client-to-server control frames
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientControl {
    #[serde(rename = "end")]
    End,
    #[serde(rename = "interrupt")]
    Interrupt,
    /// Reserved; accepted and ignored
    #[serde(rename = "config")]
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_envelope() {
        let event = ServerEvent::TranscriptFinal {
            text: "what time is it".into(),
        };
        let frame: Value = serde_json::from_str(&event.to_frame()).unwrap();
        assert_eq!(frame["type"], "transcript.final");
        assert_eq!(frame["data"]["text"], "what time is it");
        assert!(frame["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_unit_event_has_no_data() {
        let frame: Value =
            serde_json::from_str(&ServerEvent::SpeechStarted.to_frame()).unwrap();
        assert_eq!(frame["type"], "speech.started");
        assert!(frame.get("data").is_none());
    }

    #[test]
    fn test_interrupted_wire_keys() {
        let event = ServerEvent::AssistantInterrupted {
            clear_audio: true,
            reason: "user-speech".into(),
        };
        let frame: Value = serde_json::from_str(&event.to_frame()).unwrap();
        assert_eq!(frame["data"]["clearAudio"], json!(true));
        assert_eq!(frame["data"]["reason"], "user-speech");
    }

    #[test]
    fn test_client_control_parsing() {
        let end: ClientControl = serde_json::from_str(r#"{"type":"end"}"#).unwrap();
        assert_eq!(end, ClientControl::End);
        let config: ClientControl =
            serde_json::from_str(r#"{"type":"config","sampleRate":24000}"#).unwrap();
        assert_eq!(config, ClientControl::Config);
        assert!(serde_json::from_str::<ClientControl>(r#"{"type":"bogus"}"#).is_err());
    }
}
