//! The retrieval capability the conversational agent calls back into.
//!
//! The agent passes the question and the session's `(folder_path, job_id)` pairs; the answer is
//! returned inside the agent's function-response envelope. Failures never escape as errors: they
//! become an envelope carrying a fixed apology and the error text.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use super::engine::QueryEngine;
use super::sources::sign_sources;
use super::{RetrievalError, Selector};
use crate::storage::signer::UrlSigner;

const MESSAGE_VERSION: &str = "1.0";
const ERROR_ANSWER: &str = "エラーが発生しました。管理者に連絡してください。";
const SESSION_REFERENCE_PREFIX: &str = "{{session.";

/// Action group invocation as sent by the agent runtime.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentActionEvent {
    /// Action group name, echoed back.
    #[serde(default)]
    pub action_group: Option<String>,
    /// Function name, echoed back.
    #[serde(default)]
    pub function: Option<String>,
    /// Named string parameters.
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
    /// Session-scoped state set by the caller of the agent.
    #[serde(default)]
    pub session_attributes: HashMap<String, String>,
}

/// One named parameter of an action invocation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionParameter {
    /// Parameter name.
    pub name: String,
    /// Declared parameter type.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Raw value.
    #[serde(default)]
    pub value: String,
}

impl AgentActionEvent {
    fn parameter(&self, name: &str) -> &str {
        self.parameters
            .iter()
            .find(|parameter| parameter.name == name)
            .map(|parameter| parameter.value.trim())
            .unwrap_or_default()
    }

    /// Question and selectors named by the invocation.
    ///
    /// A `{{session.*}}` placeholder for the pairs is resolved from the session attributes.
    pub fn parse(&self) -> Result<(String, Vec<Selector>), RetrievalError> {
        let query = self.parameter("query");
        let mut pairs = self.parameter("folder_job_pairs");
        if pairs.starts_with(SESSION_REFERENCE_PREFIX) && pairs.ends_with("}}") {
            pairs = self
                .session_attributes
                .get("folder_job_pairs")
                .map(|value| value.trim())
                .unwrap_or_default();
        }

        if query.is_empty() {
            return Err(RetrievalError::InvalidRequest(
                "Query parameter is missing".into(),
            ));
        }
        if pairs.is_empty() {
            return Err(RetrievalError::InvalidRequest(
                "Folder job pairs parameter is missing".into(),
            ));
        }
        Ok((query.to_string(), parse_pairs(pairs)?))
    }
}

fn parse_pairs(raw: &str) -> Result<Vec<Selector>, RetrievalError> {
    let parsed: Value = serde_json::from_str(raw).map_err(|error| {
        RetrievalError::InvalidRequest(format!("Invalid JSON format for folder_job_pairs: {error}"))
    })?;
    let entries = parsed.as_array().ok_or_else(|| {
        RetrievalError::InvalidRequest("folder_job_pairs must be a JSON array".into())
    })?;

    entries
        .iter()
        .map(|entry| {
            let object = entry.as_object().ok_or_else(|| {
                RetrievalError::InvalidRequest("Each pair must be a JSON object".into())
            })?;
            let field = |name: &str| {
                object
                    .get(name)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or_default()
            };
            let (folder_path, job_id) = (field("folder_path"), field("job_id"));
            if folder_path.is_empty() || job_id.is_empty() {
                return Err(RetrievalError::InvalidRequest(
                    "Each pair must have folder_path and job_id".into(),
                ));
            }
            Ok(Selector::new(folder_path, job_id))
        })
        .collect()
}

/// Serves agent action invocations with filtered retrieval.
pub struct AgentActionHandler {
    engine: Arc<QueryEngine>,
    signer: Arc<UrlSigner>,
}

impl AgentActionHandler {
    /// Create a handler answering through `engine`.
    pub fn new(engine: Arc<QueryEngine>, signer: Arc<UrlSigner>) -> Self {
        Self { engine, signer }
    }

    /// Answer one invocation and wrap the result in the function-response envelope.
    pub async fn handle(&self, event: &AgentActionEvent) -> Value {
        match self.answer(event).await {
            Ok(body) => envelope(
                event.action_group.as_deref().unwrap_or_default(),
                event.function.as_deref().unwrap_or_default(),
                &body,
            ),
            Err(error) => {
                tracing::error!(error = %error, "Agent action failed");
                envelope(
                    event.action_group.as_deref().unwrap_or("unknown"),
                    event.function.as_deref().unwrap_or("unknown"),
                    &json!({
                        "error": error.to_string(),
                        "answer": ERROR_ANSWER,
                        "sources": [],
                    }),
                )
            }
        }
    }

    async fn answer(&self, event: &AgentActionEvent) -> Result<Value, RetrievalError> {
        let (query, selectors) = event.parse()?;
        tracing::info!(selectors = selectors.len(), "Agent action retrieval");
        let answer = self.engine.retrieve(&query, &selectors).await?;
        Ok(json!({
            "answer": answer.answer,
            "sources": sign_sources(&self.signer, &answer.sources),
        }))
    }
}

fn envelope(action_group: &str, function: &str, body: &Value) -> Value {
    json!({
        "messageVersion": MESSAGE_VERSION,
        "response": {
            "actionGroup": action_group,
            "function": function,
            "functionResponse": {
                "responseBody": {
                    "TEXT": { "body": body.to_string() }
                }
            }
        }
    })
}
