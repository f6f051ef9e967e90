//! Query answering in direct and agent mode.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;

use super::client::{AgentClient, AgentEvent, AgentInvocation, RetrievalClient};
use super::context::build_query;
use super::filters::build_filter;
use super::sources::{SourceRef, collect_sources, sources_from_value};
use super::{AgentType, RetrievalError, Selector};
use crate::config::{AgentDirectory, AgentRef};
use crate::history::ChatMessage;

const FOLDER_JOB_PAIRS: &str = "folder_job_pairs";

/// One question to answer.
#[derive(Debug, Clone, Copy)]
pub struct QueryRequest<'a> {
    /// Current user question.
    pub query: &'a str,
    /// Visible `(folder_path, job_id)` scopes.
    pub selectors: &'a [Selector],
    /// Conversation id, used as the agent memory key.
    pub session_id: &'a str,
    /// Delegate to the conversational agent instead of calling retrieval directly.
    pub use_agent: bool,
    /// Agent persona in agent mode.
    pub agent_type: AgentType,
    /// Earlier turns of the conversation, oldest first; direct mode only.
    pub history: &'a [ChatMessage],
}

/// Answer text and the documents it cites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineAnswer {
    /// Answer text.
    pub answer: String,
    /// Unique cited documents in first-seen order.
    pub sources: Vec<SourceRef>,
}

/// Answers questions against the knowledge index.
pub struct QueryEngine {
    retrieval: Arc<dyn RetrievalClient>,
    agents: Arc<dyn AgentClient>,
    directory: AgentDirectory,
    max_context_length: usize,
}

impl QueryEngine {
    /// Create an engine; `max_context_length` bounds the rendered history in direct mode.
    pub fn new(
        retrieval: Arc<dyn RetrievalClient>,
        agents: Arc<dyn AgentClient>,
        directory: AgentDirectory,
        max_context_length: usize,
    ) -> Self {
        Self {
            retrieval,
            agents,
            directory,
            max_context_length,
        }
    }

    /// Answer one question.
    ///
    /// Direct mode embeds the rendered history in the query text. Agent mode sends only the bare
    /// question because the agent keeps its own memory per session.
    pub async fn answer(&self, request: &QueryRequest<'_>) -> Result<EngineAnswer, RetrievalError> {
        if request.selectors.is_empty() {
            return Err(RetrievalError::NoSelectors);
        }
        tracing::info!(
            session_id = %request.session_id,
            selectors = request.selectors.len(),
            use_agent = request.use_agent,
            agent_type = %request.agent_type,
            "Answering query"
        );
        if request.use_agent {
            self.ask_agent(request).await
        } else {
            let query = build_query(request.history, request.query, self.max_context_length);
            self.retrieve(&query, request.selectors).await
        }
    }

    /// Filtered retrieve-and-generate for `query`.
    pub async fn retrieve(
        &self,
        query: &str,
        selectors: &[Selector],
    ) -> Result<EngineAnswer, RetrievalError> {
        let filter = build_filter(selectors)?;
        let generated = self.retrieval.retrieve_and_generate(query, &filter).await?;
        let sources = collect_sources(&generated.citations);
        tracing::debug!(
            citations = generated.citations.len(),
            sources = sources.len(),
            "Retrieved answer"
        );
        Ok(EngineAnswer {
            answer: generated.text,
            sources,
        })
    }

    async fn ask_agent(&self, request: &QueryRequest<'_>) -> Result<EngineAnswer, RetrievalError> {
        let agent = select_agent(&self.directory, request.agent_type)?.clone();
        let pairs = serde_json::to_string(request.selectors)
            .map_err(|error| RetrievalError::InvalidRequest(error.to_string()))?;

        let mut events = self
            .agents
            .invoke(AgentInvocation {
                agent,
                session_id: request.session_id.to_string(),
                input_text: request.query.to_string(),
                session_attributes: HashMap::from([(FOLDER_JOB_PAIRS.to_string(), pairs)]),
            })
            .await?;

        let mut answer_bytes = Vec::new();
        let mut observed_sources: Option<Vec<SourceRef>> = None;
        while let Some(event) = events.next().await {
            match event? {
                AgentEvent::Chunk(bytes) => answer_bytes.extend_from_slice(&bytes),
                AgentEvent::Observation(text) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => {
                        if let Some(sources) = value.get("sources") {
                            observed_sources = Some(sources_from_value(sources));
                        }
                    }
                    Err(error) => {
                        tracing::debug!(error = %error, "Ignoring non-JSON action group output");
                    }
                },
            }
        }

        let answer = String::from_utf8_lossy(&answer_bytes).into_owned();
        match observed_sources.filter(|sources| !sources.is_empty()) {
            Some(sources) => Ok(EngineAnswer { answer, sources }),
            None => Ok(unwrap_envelope(answer)),
        }
    }
}

/// Agent for `agent_type`, falling back to the default agent.
pub fn select_agent(
    directory: &AgentDirectory,
    agent_type: AgentType,
) -> Result<&AgentRef, RetrievalError> {
    let typed = match agent_type {
        AgentType::Default => None,
        AgentType::Verification => directory.verification.as_ref(),
        AgentType::Specification => directory.specification.as_ref(),
    };
    typed
        .or(directory.default.as_ref())
        .ok_or(RetrievalError::AgentNotConfigured(agent_type))
}

/// Older agent configurations answer with a JSON `{answer, sources}` envelope as the text.
fn unwrap_envelope(answer: String) -> EngineAnswer {
    let trimmed = answer.trim();
    if trimmed.starts_with('{')
        && trimmed.ends_with('}')
        && let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && let (Some(text), Some(sources)) = (
            value.get("answer").and_then(Value::as_str),
            value.get("sources"),
        )
    {
        return EngineAnswer {
            answer: text.to_string(),
            sources: sources_from_value(sources),
        };
    }
    EngineAnswer {
        answer,
        sources: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Role;
    use crate::retrieval::Citation;
    use crate::test_support::{ScriptedAgent, ScriptedRetrieval};
    use serde_json::{Map, json};

    fn agent(id: &str) -> AgentRef {
        AgentRef {
            agent_id: id.into(),
            alias_id: format!("{id}-alias"),
        }
    }

    fn directory() -> AgentDirectory {
        AgentDirectory {
            default: Some(agent("default")),
            verification: Some(agent("verify")),
            specification: None,
        }
    }

    fn citation(file_name: &str, key: &str) -> Citation {
        let mut metadata = Map::new();
        metadata.insert("FileName".into(), json!(file_name));
        metadata.insert("s3Key".into(), json!(key));
        Citation {
            uri: None,
            metadata,
        }
    }

    fn history_message(role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            job_id: "1".into(),
            message_id: "m".into(),
            chat_session_id: "s".into(),
            role,
            content: content.into(),
            timestamp: "2025-01-01T10:00:00+09:00".into(),
            sources: Vec::new(),
            selected_folder_paths: None,
            selected_job_id: None,
            rating: None,
            comment: None,
            updated_at: None,
            expires_at: i64::MAX,
        }
    }

    fn request<'a>(
        selectors: &'a [Selector],
        history: &'a [ChatMessage],
        use_agent: bool,
    ) -> QueryRequest<'a> {
        QueryRequest {
            query: "締付トルクは?",
            selectors,
            session_id: "session-1",
            use_agent,
            agent_type: AgentType::Default,
            history,
        }
    }

    #[tokio::test]
    async fn direct_mode_embeds_history_and_filters_by_selector() {
        let retrieval = Arc::new(ScriptedRetrieval::answering(
            "40 Nm",
            vec![
                citation("a.pdf", "PDF/f/1/a.pdf"),
                citation("a.pdf", "PDF/f/1/a.pdf"),
            ],
        ));
        let agents = Arc::new(ScriptedAgent::default());
        let engine = QueryEngine::new(retrieval.clone(), agents.clone(), directory(), 10_000);
        let selectors = [Selector::new("f", "1")];
        let history = [
            history_message(Role::User, "前の質問"),
            history_message(Role::Assistant, "前の回答"),
        ];

        let answer = engine
            .answer(&request(&selectors, &history, false))
            .await
            .expect("answer");

        assert_eq!(answer.answer, "40 Nm");
        assert_eq!(answer.sources.len(), 1);
        let calls = retrieval.calls().await;
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.contains("[10:00:00] ユーザー: 前の質問"));
        assert!(calls[0].0.contains("ユーザー: 締付トルクは?"));
        assert_eq!(calls[0].1["andAll"][1]["equals"]["value"], "1");
        assert!(agents.invocations().await.is_empty());
    }

    #[tokio::test]
    async fn agent_mode_sends_bare_query_and_reads_observed_sources() {
        let agents = Arc::new(ScriptedAgent::new(vec![
            AgentEvent::Chunk("40 ".as_bytes().to_vec()),
            AgentEvent::Observation(
                json!({ "answer": "x", "sources": [{ "fileName": "old.pdf", "s3Key": "PDF/old.pdf" }] })
                    .to_string(),
            ),
            AgentEvent::Observation("not json".into()),
            AgentEvent::Observation(
                json!({ "answer": "x", "sources": [{ "fileName": "b.pdf", "s3Key": "PDF/b.pdf" }] })
                    .to_string(),
            ),
            AgentEvent::Chunk("Nm".as_bytes().to_vec()),
        ]));
        let retrieval = Arc::new(ScriptedRetrieval::failing("unused"));
        let engine = QueryEngine::new(retrieval.clone(), agents.clone(), directory(), 10_000);
        let selectors = [Selector::new("f", "1"), Selector::new("g", "2")];
        let history = [history_message(Role::User, "前の質問")];

        let answer = engine
            .answer(&request(&selectors, &history, true))
            .await
            .expect("answer");

        assert_eq!(answer.answer, "40 Nm");
        assert_eq!(
            answer.sources,
            vec![SourceRef {
                file_name: "b.pdf".into(),
                s3_key: "PDF/b.pdf".into()
            }]
        );
        let invocations = agents.invocations().await;
        assert_eq!(invocations[0].input_text, "締付トルクは?");
        assert_eq!(invocations[0].session_id, "session-1");
        assert_eq!(invocations[0].agent, agent("default"));
        let pairs: Value =
            serde_json::from_str(&invocations[0].session_attributes[FOLDER_JOB_PAIRS])
                .expect("pairs");
        assert_eq!(
            pairs,
            json!([
                { "folder_path": "f", "job_id": "1" },
                { "folder_path": "g", "job_id": "2" }
            ])
        );
        assert!(retrieval.calls().await.is_empty());
    }

    #[tokio::test]
    async fn agent_json_envelope_is_unwrapped_when_no_sources_were_observed() {
        let envelope = json!({
            "answer": "本文",
            "sources": [{ "fileName": "a.pdf", "s3Key": "PDF/a.pdf" }]
        })
        .to_string();
        let agents = Arc::new(ScriptedAgent::answering(&format!("  {envelope}\n")));
        let engine = QueryEngine::new(
            Arc::new(ScriptedRetrieval::failing("unused")),
            agents,
            directory(),
            10_000,
        );
        let selectors = [Selector::new("f", "1")];

        let answer = engine
            .answer(&request(&selectors, &[], true))
            .await
            .expect("answer");
        assert_eq!(answer.answer, "本文");
        assert_eq!(answer.sources.len(), 1);
    }

    #[test]
    fn plain_agent_text_is_kept_verbatim() {
        let answer = unwrap_envelope("{not an envelope}".into());
        assert_eq!(answer.answer, "{not an envelope}");
        assert!(answer.sources.is_empty());
        let answer = unwrap_envelope(r#"{"answer": "only answer"}"#.into());
        assert_eq!(answer.answer, r#"{"answer": "only answer"}"#);
    }

    #[test]
    fn unconfigured_agent_types_fall_back_to_default() {
        let directory = directory();
        assert_eq!(
            select_agent(&directory, AgentType::Verification).expect("agent"),
            &agent("verify")
        );
        assert_eq!(
            select_agent(&directory, AgentType::Specification).expect("agent"),
            &agent("default")
        );
        assert!(matches!(
            select_agent(&AgentDirectory::default(), AgentType::Default),
            Err(RetrievalError::AgentNotConfigured(AgentType::Default))
        ));
    }

    #[tokio::test]
    async fn empty_selectors_are_rejected() {
        let engine = QueryEngine::new(
            Arc::new(ScriptedRetrieval::failing("unused")),
            Arc::new(ScriptedAgent::default()),
            directory(),
            10_000,
        );
        assert!(matches!(
            engine.answer(&request(&[], &[], false)).await,
            Err(RetrievalError::NoSelectors)
        ));
    }
}
