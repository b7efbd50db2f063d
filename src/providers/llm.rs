//! LLM adapters
//!
//! Translate the engine's neutral message list into each vendor's chat
//! shape and back. OpenAI keeps the system prompt in the message list and
//! uses `tool` role results; Anthropic hoists the system prompt into a
//! top-level field and represents tool traffic as content blocks.
//!
//! Responses are parsed from raw JSON values rather than strict structs:
//! vendors disagree on field types (string vs array content, string vs
//! object tool arguments) and a strict struct breaks on the long tail.

use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{
    request_error, status_error, LanguageModel, LlmMessage, LlmResponse, LlmToolSpec,
    ProviderError, TokenUsage, ToolCallRequest,
};
use crate::types::{ModelConfig, Role};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const LLM_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenAI-compatible chat completion adapter
pub struct OpenAiLlm {
    client: Client,
    api_key: String,
    config: ModelConfig,
}

impl OpenAiLlm {
    pub fn new(api_key: String, config: ModelConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(LLM_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            config,
        }
    }

    fn to_wire_messages(messages: &[LlmMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::Tool => json!({
                    "role": "tool",
                    "content": m.content,
                    "tool_call_id": m.tool_call_id,
                }),
                Role::Assistant if !m.tool_calls.is_empty() => {
                    let calls: Vec<Value> = m
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments.to_string(),
                                },
                            })
                        })
                        .collect();
                    json!({
                        "role": "assistant",
                        "content": m.content,
                        "tool_calls": calls,
                    })
                }
                role => json!({ "role": role.as_str(), "content": m.content }),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiLlm {
    async fn generate(
        &self,
        messages: &[LlmMessage],
        tools: &[LlmToolSpec],
    ) -> Result<LlmResponse, ProviderError> {
        let mut request = json!({
            "model": self.config.model,
            "messages": Self::to_wire_messages(messages),
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        if !tools.is_empty() {
            let wire_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect();
            request["tools"] = Value::Array(wire_tools);
            request["tool_choice"] = json!("auto");
        }

        debug!(model = %self.config.model, messages = messages.len(), "LLM request");
        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error("openai", e))?;

        if !response.status().is_success() {
            return Err(status_error("openai", response).await);
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| request_error("openai", e))?;
        parse_openai_response(&raw)
    }
}

fn parse_openai_response(raw: &Value) -> Result<LlmResponse, ProviderError> {
    let message = raw
        .pointer("/choices/0/message")
        .ok_or_else(|| ProviderError::new("openai", "no message in response"))?;

    let content = match message.get("content") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        // Some compatible backends return content as an array of parts
        Some(Value::Array(parts)) => {
            let text: String = parts
                .iter()
                .filter_map(|p| {
                    (p.get("type").and_then(|t| t.as_str()) == Some("text"))
                        .then(|| p.get("text").and_then(|t| t.as_str()))
                        .flatten()
                })
                .collect();
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    };

    let tool_calls = message
        .get("tool_calls")
        .and_then(|tc| tc.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    // arguments arrive as a JSON string or a raw object
                    let arguments = match func.get("arguments") {
                        Some(Value::String(s)) => {
                            serde_json::from_str(s).unwrap_or(Value::Object(Default::default()))
                        }
                        Some(other) => other.clone(),
                        None => Value::Object(Default::default()),
                    };
                    Some(ToolCallRequest {
                        id: tc
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = raw.get("usage").map(|u| TokenUsage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        completion_tokens: u
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
    });

    Ok(LlmResponse {
        content,
        tool_calls,
        usage,
    })
}

/// Anthropic Messages API adapter
pub struct AnthropicLlm {
    client: Client,
    api_key: String,
    config: ModelConfig,
}

impl AnthropicLlm {
    pub fn new(api_key: String, config: ModelConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(LLM_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            config,
        }
    }

    /// Split the neutral message list into Anthropic's (system, messages)
    /// pair: the system prompt becomes a top-level field, tool results
    /// become `tool_result` user blocks, assistant tool calls become
    /// `tool_use` blocks.
    fn to_wire_messages(messages: &[LlmMessage]) -> (Option<String>, Vec<Value>) {
        let mut system = None;
        let mut wire = Vec::new();
        for m in messages {
            match m.role {
                Role::System => {
                    system = Some(m.content.clone());
                }
                Role::Tool => {
                    wire.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": m.tool_call_id,
                            "content": m.content,
                        }],
                    }));
                }
                Role::Assistant if !m.tool_calls.is_empty() => {
                    let mut blocks = Vec::new();
                    if !m.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": m.content }));
                    }
                    for tc in &m.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments,
                        }));
                    }
                    wire.push(json!({ "role": "assistant", "content": blocks }));
                }
                role => {
                    wire.push(json!({ "role": role.as_str(), "content": m.content }));
                }
            }
        }
        (system, wire)
    }
}

#[async_trait::async_trait]
impl LanguageModel for AnthropicLlm {
    async fn generate(
        &self,
        messages: &[LlmMessage],
        tools: &[LlmToolSpec],
    ) -> Result<LlmResponse, ProviderError> {
        let (system, wire_messages) = Self::to_wire_messages(messages);
        let mut request = json!({
            "model": self.config.model,
            "messages": wire_messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        if let Some(system) = system {
            request["system"] = json!(system);
        }
        if !tools.is_empty() {
            let wire_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            request["tools"] = Value::Array(wire_tools);
        }

        debug!(model = %self.config.model, messages = messages.len(), "LLM request");
        let response = self
            .client
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error("anthropic", e))?;

        if !response.status().is_success() {
            return Err(status_error("anthropic", response).await);
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| request_error("anthropic", e))?;
        parse_anthropic_response(&raw)
    }
}

fn parse_anthropic_response(raw: &Value) -> Result<LlmResponse, ProviderError> {
    let blocks = raw
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ProviderError::new("anthropic", "no content in response"))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                tool_calls.push(ToolCallRequest {
                    id: block
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    name: block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    arguments: block
                        .get("input")
                        .cloned()
                        .unwrap_or(Value::Object(Default::default())),
                });
            }
            _ => {}
        }
    }

    let usage = raw.get("usage").map(|u| TokenUsage {
        prompt_tokens: u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        completion_tokens: u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
    });

    Ok(LlmResponse {
        content: (!text.is_empty()).then_some(text),
        tool_calls,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_wire_tool_result() {
        let messages = vec![
            LlmMessage::system("be brief"),
            LlmMessage::tool_result("call_9", r#"{"ok":true}"#),
        ];
        let wire = OpenAiLlm::to_wire_messages(&messages);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_9");
    }

    #[test]
    fn test_openai_wire_assistant_tool_calls_stringify_arguments() {
        let messages = vec![LlmMessage::assistant_with_tools(
            "",
            vec![ToolCallRequest {
                id: "call_1".into(),
                name: "endCall".into(),
                arguments: json!({"reason": "done"}),
            }],
        )];
        let wire = OpenAiLlm::to_wire_messages(&messages);
        let args = wire[0]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        let parsed: Value = serde_json::from_str(args).unwrap();
        assert_eq!(parsed["reason"], "done");
    }

    #[test]
    fn test_parse_openai_string_arguments() {
        let raw = json!({
            "choices": [{ "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "function": { "name": "transferCall", "arguments": "{\"destination\":\"+15551234\"}" },
                }],
            }}],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5 },
        });
        let parsed = parse_openai_response(&raw).unwrap();
        assert!(parsed.content.is_none());
        assert_eq!(parsed.tool_calls[0].arguments["destination"], "+15551234");
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 10);
    }

    #[test]
    fn test_parse_openai_object_arguments() {
        // Some models return arguments as a raw object instead of a string
        let raw = json!({
            "choices": [{ "message": {
                "tool_calls": [{
                    "id": "c",
                    "function": { "name": "pressDigits", "arguments": {"digits": "12#"} },
                }],
            }}],
        });
        let parsed = parse_openai_response(&raw).unwrap();
        assert_eq!(parsed.tool_calls[0].arguments["digits"], "12#");
    }

    #[test]
    fn test_anthropic_system_hoisted() {
        let messages = vec![LlmMessage::system("prompt"), LlmMessage::user("hi")];
        let (system, wire) = AnthropicLlm::to_wire_messages(&messages);
        assert_eq!(system.as_deref(), Some("prompt"));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
    }

    #[test]
    fn test_anthropic_tool_result_becomes_user_block() {
        let messages = vec![LlmMessage::tool_result("toolu_1", "42")];
        let (_, wire) = AnthropicLlm::to_wire_messages(&messages);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[0]["content"][0]["type"], "tool_result");
        assert_eq!(wire[0]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_parse_anthropic_mixed_blocks() {
        let raw = json!({
            "content": [
                { "type": "text", "text": "One moment." },
                { "type": "tool_use", "id": "toolu_1", "name": "endCall", "input": {"reason": "bye"} },
            ],
            "usage": { "input_tokens": 3, "output_tokens": 7 },
        });
        let parsed = parse_anthropic_response(&raw).unwrap();
        assert_eq!(parsed.content.as_deref(), Some("One moment."));
        assert_eq!(parsed.tool_calls[0].name, "endCall");
        assert_eq!(parsed.usage.unwrap().completion_tokens, 7);
    }
}
