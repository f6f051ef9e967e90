//! Clients for the knowledge index retrieve-and-generate API and the agent runtime.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::{Client, Method, Url};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::RetrievalError;
use crate::config::AgentRef;

const CANDIDATE_RESULTS: u32 = 80;
const RERANKED_RESULTS: u32 = 20;

/// One retrieved reference backing a generated answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Citation {
    /// Location of the cited knowledge object.
    pub uri: Option<String>,
    /// Metadata attributes stored next to the knowledge object.
    pub metadata: Map<String, Value>,
}

/// Generated answer with the references it cites.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedAnswer {
    /// Answer text.
    pub text: String,
    /// Cited references in response order.
    pub citations: Vec<Citation>,
}

/// Filtered retrieval followed by answer generation.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// Answer `query` using only knowledge matching `filter`.
    async fn retrieve_and_generate(
        &self,
        query: &str,
        filter: &Value,
    ) -> Result<GeneratedAnswer, RetrievalError>;
}

/// A single agent turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    /// Agent to invoke.
    pub agent: AgentRef,
    /// Agent memory key.
    pub session_id: String,
    /// Bare user question for this turn.
    pub input_text: String,
    /// Structured state visible to the agent's action groups.
    pub session_attributes: HashMap<String, String>,
}

/// Incremental output of an agent turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Raw bytes of an answer fragment.
    Chunk(Vec<u8>),
    /// Text returned by an action group invocation.
    Observation(String),
}

/// Stream of agent events.
pub type AgentEventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, RetrievalError>> + Send>>;

/// Conversational agent runtime.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Start a turn and stream its events.
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentEventStream, RetrievalError>;
}

fn build_http(
    user_agent: &str,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, RetrievalError> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .build()
        .map_err(|error| RetrievalError::Unavailable(error.to_string()))
}

fn parse_base_url(base_url: &str) -> Result<Url, RetrievalError> {
    let url = Url::parse(base_url)
        .map_err(|error| RetrievalError::Unavailable(format!("invalid base URL: {error}")))?;
    if url.cannot_be_a_base() {
        return Err(RetrievalError::Unavailable(format!(
            "invalid base URL: {base_url}"
        )));
    }
    Ok(url)
}

fn authorized_request(
    http: &Client,
    base_url: &Url,
    api_key: Option<&str>,
    method: Method,
    segments: &[&str],
) -> reqwest::RequestBuilder {
    let mut url = base_url.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    let mut request = http.request(method, url);
    if let Some(api_key) = api_key
        && !api_key.is_empty()
    {
        request = request.header("api-key", api_key);
    }
    request
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RetrievalError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!(%status, "Retrieval provider request failed");
    Err(RetrievalError::Provider { status, body })
}

/// Identifiers of the knowledge base and the models used to answer from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeBaseSettings {
    /// Knowledge base identifier.
    pub knowledge_base_id: String,
    /// Generation model.
    pub model_arn: String,
    /// Reranking model.
    pub rerank_model_arn: String,
}

/// Retrieve-and-generate client: hybrid search, 80 candidates reranked to 20, query decomposition.
pub struct KnowledgeBaseClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
    settings: KnowledgeBaseSettings,
}

#[derive(Debug, Deserialize)]
struct RetrieveAndGenerateResponse {
    #[serde(default)]
    output: Option<OutputBody>,
    #[serde(default)]
    citations: Vec<CitationBody>,
}

#[derive(Debug, Deserialize)]
struct OutputBody {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CitationBody {
    #[serde(default)]
    retrieved_references: Vec<ReferenceBody>,
}

#[derive(Debug, Deserialize)]
struct ReferenceBody {
    #[serde(default)]
    location: Option<LocationBody>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationBody {
    #[serde(default)]
    s3_location: Option<S3LocationBody>,
}

#[derive(Debug, Deserialize)]
struct S3LocationBody {
    #[serde(default)]
    uri: Option<String>,
}

impl KnowledgeBaseClient {
    /// Build a client with the given connect and read timeouts.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        settings: KnowledgeBaseSettings,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, RetrievalError> {
        let http = build_http("doctoknow/retrieval", connect_timeout, read_timeout)?;
        tracing::debug!(
            url = %base_url,
            knowledge_base_id = %settings.knowledge_base_id,
            "Initialized retrieval client"
        );
        Ok(Self {
            http,
            base_url: parse_base_url(base_url)?,
            api_key,
            settings,
        })
    }

    fn payload(&self, query: &str, filter: &Value) -> Value {
        json!({
            "input": { "text": query },
            "retrieveAndGenerateConfiguration": {
                "type": "KNOWLEDGE_BASE",
                "knowledgeBaseConfiguration": {
                    "knowledgeBaseId": self.settings.knowledge_base_id,
                    "modelArn": self.settings.model_arn,
                    "retrievalConfiguration": {
                        "vectorSearchConfiguration": {
                            "numberOfResults": CANDIDATE_RESULTS,
                            "overrideSearchType": "HYBRID",
                            "filter": filter,
                            "rerankingConfiguration": {
                                "type": "BEDROCK_RERANKING_MODEL",
                                "bedrockRerankingConfiguration": {
                                    "numberOfRerankedResults": RERANKED_RESULTS,
                                    "modelConfiguration": {
                                        "modelArn": self.settings.rerank_model_arn
                                    }
                                }
                            }
                        }
                    },
                    "orchestrationConfiguration": {
                        "queryTransformationConfiguration": { "type": "QUERY_DECOMPOSITION" }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl RetrievalClient for KnowledgeBaseClient {
    async fn retrieve_and_generate(
        &self,
        query: &str,
        filter: &Value,
    ) -> Result<GeneratedAnswer, RetrievalError> {
        let response = authorized_request(
            &self.http,
            &self.base_url,
            self.api_key.as_deref(),
            Method::POST,
            &["retrieveAndGenerate"],
        )
        .json(&self.payload(query, filter))
        .send()
        .await
        .map_err(|error| {
            RetrievalError::Unavailable(format!(
                "failed to reach retrieval provider at {}: {error}",
                self.base_url
            ))
        })?;
        let response = ensure_success(response).await?;

        let body: RetrieveAndGenerateResponse = response.json().await.map_err(|error| {
            RetrievalError::InvalidResponse(format!("failed to decode response: {error}"))
        })?;

        let citations = body
            .citations
            .into_iter()
            .flat_map(|citation| citation.retrieved_references)
            .map(|reference| Citation {
                uri: reference
                    .location
                    .and_then(|location| location.s3_location)
                    .and_then(|s3| s3.uri),
                metadata: reference.metadata,
            })
            .collect();

        Ok(GeneratedAnswer {
            text: body.output.map(|output| output.text).unwrap_or_default(),
            citations,
        })
    }
}

/// Agent runtime client consuming the newline-delimited JSON event stream of a turn.
pub struct AgentRuntimeClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl AgentRuntimeClient {
    /// Build a client with the given connect and read timeouts.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, RetrievalError> {
        let http = build_http("doctoknow/agent", connect_timeout, read_timeout)?;
        Ok(Self {
            http,
            base_url: parse_base_url(base_url)?,
            api_key,
        })
    }
}

#[async_trait]
impl AgentClient for AgentRuntimeClient {
    async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentEventStream, RetrievalError> {
        let AgentInvocation {
            agent,
            session_id,
            input_text,
            session_attributes,
        } = invocation;
        let response = authorized_request(
            &self.http,
            &self.base_url,
            self.api_key.as_deref(),
            Method::POST,
            &[
                "agents",
                &agent.agent_id,
                "agentAliases",
                &agent.alias_id,
                "sessions",
                &session_id,
                "text",
            ],
        )
        .json(&json!({
            "inputText": input_text,
            "enableTrace": true,
            "sessionState": { "sessionAttributes": session_attributes },
        }))
        .send()
        .await
        .map_err(|error| {
            RetrievalError::Unavailable(format!(
                "failed to reach agent runtime at {}: {error}",
                self.base_url
            ))
        })?;
        let response = ensure_success(response).await?;
        tracing::debug!(agent_id = %agent.agent_id, session_id = %session_id, "Agent turn started");

        Ok(Box::pin(try_stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(next) = bytes.next().await {
                let next = next.map_err(|error| {
                    RetrievalError::Unavailable(format!("agent stream interrupted: {error}"))
                })?;
                buffer.extend_from_slice(&next);
                while let Some(position) = buffer.iter().position(|byte| *byte == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=position).collect();
                    if let Some(event) = parse_event_line(&line)? {
                        yield event;
                    }
                }
            }
            if let Some(event) = parse_event_line(&buffer)? {
                yield event;
            }
        }))
    }
}

/// Decode one line of the agent event stream; blank lines and unrecognised events yield `None`.
pub fn parse_event_line(line: &[u8]) -> Result<Option<AgentEvent>, RetrievalError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let event: Value = serde_json::from_str(text)
        .map_err(|error| RetrievalError::InvalidResponse(format!("bad agent event: {error}")))?;

    if let Some(encoded) = event.pointer("/chunk/bytes").and_then(Value::as_str) {
        let bytes = STANDARD.decode(encoded).map_err(|error| {
            RetrievalError::InvalidResponse(format!("bad chunk encoding: {error}"))
        })?;
        return Ok(Some(AgentEvent::Chunk(bytes)));
    }

    Ok(event
        .pointer("/trace/trace/orchestrationTrace/observation/actionGroupInvocationOutput/text")
        .and_then(Value::as_str)
        .map(|text| AgentEvent::Observation(text.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn knowledge_base(server: &MockServer) -> KnowledgeBaseClient {
        KnowledgeBaseClient::new(
            &server.base_url(),
            Some("secret".into()),
            KnowledgeBaseSettings {
                knowledge_base_id: "KB1".into(),
                model_arn: "model".into(),
                rerank_model_arn: "rerank".into(),
            },
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .expect("client")
    }

    #[tokio::test]
    async fn retrieve_and_generate_sends_fixed_search_configuration() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/retrieveAndGenerate")
                    .header("api-key", "secret")
                    .json_body_partial(
                        r#"{
                            "input": { "text": "torque?" },
                            "retrieveAndGenerateConfiguration": {
                                "type": "KNOWLEDGE_BASE",
                                "knowledgeBaseConfiguration": {
                                    "knowledgeBaseId": "KB1",
                                    "retrievalConfiguration": {
                                        "vectorSearchConfiguration": {
                                            "numberOfResults": 80,
                                            "overrideSearchType": "HYBRID",
                                            "filter": { "equals": { "key": "job_id", "value": "1" } },
                                            "rerankingConfiguration": {
                                                "bedrockRerankingConfiguration": {
                                                    "numberOfRerankedResults": 20
                                                }
                                            }
                                        }
                                    },
                                    "orchestrationConfiguration": {
                                        "queryTransformationConfiguration": { "type": "QUERY_DECOMPOSITION" }
                                    }
                                }
                            }
                        }"#,
                    );
                then.status(200).json_body(json!({
                    "output": { "text": "40 Nm" },
                    "citations": [
                        { "retrievedReferences": [
                            {
                                "location": { "s3Location": { "uri": "s3://b/Knowledge/1/a.txt" } },
                                "metadata": { "FileName": "a.pdf" }
                            },
                            { "metadata": {} }
                        ] }
                    ]
                }));
            })
            .await;

        let answer = knowledge_base(&server)
            .retrieve_and_generate("torque?", &json!({ "equals": { "key": "job_id", "value": "1" } }))
            .await
            .expect("answer");

        mock.assert_async().await;
        assert_eq!(answer.text, "40 Nm");
        assert_eq!(answer.citations.len(), 2);
        assert_eq!(answer.citations[0].uri.as_deref(), Some("s3://b/Knowledge/1/a.txt"));
        assert_eq!(answer.citations[0].metadata["FileName"], "a.pdf");
        assert_eq!(answer.citations[1].uri, None);
    }

    #[tokio::test]
    async fn retrieve_and_generate_reports_provider_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/retrieveAndGenerate");
                then.status(429).body("throttled");
            })
            .await;

        let error = knowledge_base(&server)
            .retrieve_and_generate("q", &json!({}))
            .await
            .expect_err("error");
        match error {
            RetrievalError::Provider { status, body } => {
                assert_eq!(status.as_u16(), 429);
                assert_eq!(body, "throttled");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn agent_events_are_streamed_from_ndjson() {
        let server = MockServer::start_async().await;
        let first = STANDARD.encode("40 ");
        let second = STANDARD.encode("Nm");
        let body = format!(
            "{{\"chunk\":{{\"bytes\":\"{first}\"}}}}\n\
             {{\"trace\":{{\"trace\":{{\"orchestrationTrace\":{{\"observation\":{{\"actionGroupInvocationOutput\":{{\"text\":\"{{}}\"}}}}}}}}}}}}\n\
             {{\"trace\":{{\"trace\":{{\"preProcessingTrace\":{{}}}}}}}}\n\
             \n\
             {{\"chunk\":{{\"bytes\":\"{second}\"}}}}"
        );
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/agents/A1/agentAliases/AL1/sessions/s-1/text")
                    .json_body_partial(
                        r#"{ "inputText": "torque?", "enableTrace": true,
                             "sessionState": { "sessionAttributes": { "folder_job_pairs": "[]" } } }"#,
                    );
                then.status(200).body(body);
            })
            .await;

        let client = AgentRuntimeClient::new(
            &server.base_url(),
            None,
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .expect("client");
        let stream = client
            .invoke(AgentInvocation {
                agent: AgentRef {
                    agent_id: "A1".into(),
                    alias_id: "AL1".into(),
                },
                session_id: "s-1".into(),
                input_text: "torque?".into(),
                session_attributes: HashMap::from([(
                    "folder_job_pairs".to_string(),
                    "[]".to_string(),
                )]),
            })
            .await
            .expect("stream");
        let events: Vec<AgentEvent> = stream
            .map(|event| event.expect("event"))
            .collect()
            .await;

        mock.assert_async().await;
        assert_eq!(
            events,
            vec![
                AgentEvent::Chunk(b"40 ".to_vec()),
                AgentEvent::Observation("{}".into()),
                AgentEvent::Chunk(b"Nm".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn slow_agent_stream_outlives_the_read_timeout() {
        let router = axum::Router::new().fallback(|| async {
            axum::body::Body::from_stream(async_stream::stream! {
                for text in ["a", "b", "c", "d", "e"] {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    let bytes = STANDARD.encode(text);
                    yield Ok::<_, std::io::Error>(format!("{{\"chunk\":{{\"bytes\":\"{bytes}\"}}}}\n"));
                }
            })
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move { axum::serve(listener, router).await });

        let client = AgentRuntimeClient::new(
            &format!("http://{address}"),
            None,
            Duration::from_secs(5),
            Duration::from_millis(500),
        )
        .expect("client");
        let stream = client
            .invoke(AgentInvocation {
                agent: AgentRef {
                    agent_id: "A1".into(),
                    alias_id: "AL1".into(),
                },
                session_id: "s-1".into(),
                input_text: "torque?".into(),
                session_attributes: HashMap::new(),
            })
            .await
            .expect("stream");
        let events: Vec<AgentEvent> = stream
            .map(|event| event.expect("event"))
            .collect()
            .await;

        assert_eq!(events.len(), 5);
        assert_eq!(events[4], AgentEvent::Chunk(b"e".to_vec()));
    }

    #[test]
    fn malformed_event_lines_are_errors() {
        assert!(parse_event_line(b"   ").expect("blank").is_none());
        assert!(matches!(
            parse_event_line(b"{not json"),
            Err(RetrievalError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_event_line(br#"{"chunk":{"bytes":"%%%"}}"#),
            Err(RetrievalError::InvalidResponse(_))
        ));
    }
}
