//! Formatting helpers shared across MCP handlers and resources.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, ResourceContents},
};
use serde::Serialize;
use serde_json::json;

use crate::retrieval::AgentType;

pub(crate) const APPLICATION_JSON: &str = "application/json";

const AGENT_TYPES: [AgentType; 3] = [
    AgentType::Default,
    AgentType::Verification,
    AgentType::Specification,
];

/// Wrap a serializable response as a structured tool result.
pub(crate) fn structured<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    serde_json::to_value(value)
        .map(CallToolResult::structured)
        .map_err(|err| McpError::internal_error(format!("Failed to encode result: {err}"), None))
}

/// Format the agent types manifest, with the chat session prefix each one uses.
pub(crate) fn agent_types_payload() -> String {
    let types: Vec<_> = AGENT_TYPES
        .into_iter()
        .map(|agent_type| {
            json!({
                "agent_type": agent_type.as_str(),
                "session_prefix": agent_type.session_prefix().unwrap_or(""),
            })
        })
        .collect();
    serialize_json(
        &json!({ "agent_types": types, "default": AgentType::default().as_str() }),
        "mcp://agent-types",
    )
}

/// Serialize a value to JSON, falling back to compact formatting on error.
pub(crate) fn serialize_json<T: Serialize>(value: &T, context_uri: &str) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|error| {
        tracing::warn!(uri = context_uri, %error, "Failed to serialize JSON prettily");
        serde_json::to_string(value).unwrap_or_else(|_| "{}".into())
    })
}

/// Build JSON resource contents for MCP resource responses.
pub(crate) fn json_resource_contents(uri: &str, text: String) -> ResourceContents {
    ResourceContents::TextResourceContents {
        uri: uri.to_string(),
        mime_type: Some(APPLICATION_JSON.into()),
        text,
        meta: None,
    }
}
