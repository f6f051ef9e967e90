//! Long-running queries: start, execute in the background, poll for the result.

mod coordinator;
mod reaper;
mod store;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retrieval::{AgentType, RetrievalError, SourceRef};
use crate::tasks::TaskError;

pub use coordinator::{AskResponse, AsyncQueryCoordinator, QueryStatusView, QueryTaskHandler};
pub use reaper::{ReaperReport, reap_expired, spawn_reaper};
pub use store::{MemoryQueryStore, QueryStore};

/// Errors raised by the query services.
#[derive(Debug, Error)]
pub enum QueryError {
    /// No record carries the requested id, or it has expired.
    #[error("Query not found: {0}")]
    NotFound(String),
    /// Request failed validation.
    #[error("{0}")]
    InvalidRequest(String),
    /// Answering failed.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    /// Record store failure.
    #[error("Query store error: {0}")]
    Store(String),
    /// Background execution could not be scheduled.
    #[error(transparent)]
    Queue(#[from] TaskError),
}

/// A question with its scope, as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryInput {
    /// Question text.
    pub query: String,
    /// Conversation id.
    pub chat_session_id: String,
    /// Folders to search.
    #[serde(default)]
    pub folder_paths: Vec<String>,
    /// Job to search for each folder.
    #[serde(default)]
    pub folder_default_job_ids: HashMap<String, String>,
    /// Answer through the conversational agent.
    #[serde(default = "default_use_agent")]
    pub use_agent: bool,
    /// Agent persona.
    #[serde(default)]
    pub agent_type: AgentType,
}

fn default_use_agent() -> bool {
    true
}

impl QueryInput {
    fn validate(&self) -> Result<(), QueryError> {
        if self.query.trim().is_empty() {
            return Err(QueryError::InvalidRequest("query is required".into()));
        }
        if self.chat_session_id.trim().is_empty() {
            return Err(QueryError::InvalidRequest(
                "chat_session_id is required".into(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle of an async query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// Accepted, answer pending.
    Processing,
    /// Answer available.
    Completed,
    /// Execution failed.
    Failed,
}

/// Persisted state of one async query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRecord {
    /// Primary key.
    pub query_id: String,
    /// Current status.
    pub status: QueryStatus,
    /// Submitted question and scope.
    pub input: QueryInput,
    /// Answer text once completed.
    #[serde(default)]
    pub answer: Option<String>,
    /// Unsigned cited documents once completed.
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    /// Assistant message recorded for the answer.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Failure description.
    #[serde(default)]
    pub error: Option<String>,
    /// ISO-8601 creation time.
    pub created_at: String,
    /// ISO-8601 time of the last status change.
    pub updated_at: String,
    /// Unix time after which the record is gone.
    pub expires_at: i64,
}

/// Terminal result written to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Answer produced.
    Completed {
        /// Answer text.
        answer: String,
        /// Unsigned cited documents.
        sources: Vec<SourceRef>,
        /// Assistant message id, when history was saved.
        message_id: Option<String>,
    },
    /// Execution failed.
    Failed {
        /// Failure description.
        error: String,
    },
}

/// Background task payload: the id of the record to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTask {
    /// Record to execute.
    pub query_id: String,
}
