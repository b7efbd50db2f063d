//! Tool executor
//!
//! Projects an assistant's configured tools into JSON-schema definitions
//! for the LLM and routes tool invocations back: built-in call-control
//! actions are returned as action envelopes for the orchestrator to
//! interpret, knowledge queries go to the (external) retrieval
//! collaborator, and user-defined functions are POSTed to their server URL
//! with a hard deadline. A failing tool produces an `{error}` data result
//! for the model, never a session failure.

use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::providers::LlmToolSpec;
use crate::types::{ToolKind, ToolSpec};

/// Deadline for user-defined function servers
const FUNCTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Name of the built-in call-ending tool
pub const TOOL_END_CALL: &str = "endCall";

/// Name of the built-in transfer tool
pub const TOOL_TRANSFER: &str = "transferCall";

/// Name of the built-in DTMF tool
pub const TOOL_PRESS_DIGITS: &str = "pressDigits";

/// Prefix of knowledge-query tools; the knowledge-base id follows
pub const TOOL_QUERY_PREFIX: &str = "queryKnowledge_";

fn digits_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9*#]+$").expect("valid digit pattern"))
}

/// Executes the tools configured on one assistant
pub struct ToolExecutor {
    tools: Vec<ToolSpec>,
    client: Client,
}

impl ToolExecutor {
    pub fn new(tools: Vec<ToolSpec>) -> Self {
        Self {
            tools,
            client: Client::builder()
                .timeout(FUNCTION_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Project each configured tool into the descriptor the LLM sees
    pub fn definitions(&self) -> Vec<LlmToolSpec> {
        self.tools
            .iter()
            .map(|tool| match tool.kind {
                ToolKind::Transfer => LlmToolSpec {
                    name: TOOL_TRANSFER.to_string(),
                    description: if tool.description.is_empty() {
                        format!(
                            "Transfer the call to another destination. Available: {}",
                            tool.destinations.join(", ")
                        )
                    } else {
                        tool.description.clone()
                    },
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "destination": { "type": "string", "description": "Phone number or endpoint to transfer to" },
                            "reason": { "type": "string" },
                        },
                        "required": ["destination"],
                    }),
                },
                ToolKind::EndCall => LlmToolSpec {
                    name: TOOL_END_CALL.to_string(),
                    description: if tool.description.is_empty() {
                        "End the call when the conversation is complete".to_string()
                    } else {
                        tool.description.clone()
                    },
                    parameters: json!({
                        "type": "object",
                        "properties": { "reason": { "type": "string" } },
                    }),
                },
                ToolKind::Dtmf => LlmToolSpec {
                    name: TOOL_PRESS_DIGITS.to_string(),
                    description: if tool.description.is_empty() {
                        "Press phone keypad digits".to_string()
                    } else {
                        tool.description.clone()
                    },
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "digits": { "type": "string", "pattern": "^[0-9*#]+$" },
                        },
                        "required": ["digits"],
                    }),
                },
                ToolKind::Query => LlmToolSpec {
                    name: format!(
                        "{}{}",
                        TOOL_QUERY_PREFIX,
                        tool.knowledge_base_id.as_deref().unwrap_or(&tool.id)
                    ),
                    description: if tool.description.is_empty() {
                        "Search the knowledge base".to_string()
                    } else {
                        tool.description.clone()
                    },
                    parameters: json!({
                        "type": "object",
                        "properties": { "query": { "type": "string" } },
                        "required": ["query"],
                    }),
                },
                ToolKind::Function => LlmToolSpec {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool
                        .parameters
                        .clone()
                        .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
                },
            })
            .collect()
    }

    /// Execute a tool call requested by the LLM. The returned value is a
    /// data result for the model; built-in actions carry an `action` field
    /// the orchestrator interprets.
    pub async fn execute(&self, name: &str, arguments: &Value) -> Value {
        match name {
            TOOL_END_CALL => json!({
                "action": "end_call",
                "reason": arguments.get("reason").and_then(|v| v.as_str()).unwrap_or("requested"),
            }),
            TOOL_TRANSFER => json!({
                "action": "transfer",
                "destination": arguments.get("destination").and_then(|v| v.as_str()).unwrap_or(""),
                "reason": arguments.get("reason").and_then(|v| v.as_str()),
            }),
            TOOL_PRESS_DIGITS => {
                let digits = arguments
                    .get("digits")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                if digits_pattern().is_match(digits) {
                    json!({ "action": "dtmf", "digits": digits })
                } else {
                    json!({ "error": format!("invalid digits {:?}: only 0-9, * and # are allowed", digits) })
                }
            }
            _ if name.starts_with(TOOL_QUERY_PREFIX) => {
                // Knowledge retrieval is an external collaborator; return a
                // well-formed empty result in its absence.
                let query = arguments.get("query").and_then(|v| v.as_str()).unwrap_or("");
                debug!("Knowledge query {:?} on {}", query, name);
                json!({ "results": [], "query": query })
            }
            _ => self.execute_function(name, arguments).await,
        }
    }

    /// POST a user-defined function's arguments to its server URL
    async fn execute_function(&self, name: &str, arguments: &Value) -> Value {
        let Some(tool) = self
            .tools
            .iter()
            .find(|t| t.kind == ToolKind::Function && t.name == name)
        else {
            return json!({ "error": format!("unknown tool {:?}", name) });
        };
        let Some(server_url) = tool.server_url.as_deref() else {
            return json!({ "error": format!("tool {:?} has no server URL", name) });
        };

        let envelope = json!({ "tool": name, "arguments": arguments });
        let result = self
            .client
            .post(server_url)
            .json(&envelope)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                response.json::<Value>().await.unwrap_or_else(|e| {
                    json!({ "error": format!("tool returned invalid JSON: {}", e) })
                })
            }
            Ok(response) => {
                let status = response.status();
                warn!("Tool {} returned HTTP {}", name, status);
                json!({ "error": format!("tool server returned HTTP {}", status) })
            }
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                json!({ "error": format!("tool call failed: {}", e) })
            }
        }
    }
}
