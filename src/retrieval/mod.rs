//! Retrieval over the knowledge index.
//!
//! Every call is scoped to `(folder_path, job_id)` selectors; the filter built from them is the
//! isolation boundary between jobs and folders.

mod agent_action;
pub mod client;
pub mod context;
mod engine;
pub mod filters;
pub mod sources;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use agent_action::{ActionParameter, AgentActionEvent, AgentActionHandler};
pub use client::{
    AgentClient, AgentEvent, AgentEventStream, AgentInvocation, AgentRuntimeClient, Citation,
    GeneratedAnswer, KnowledgeBaseClient, KnowledgeBaseSettings, RetrievalClient,
};
pub use engine::{EngineAnswer, QueryEngine, QueryRequest, select_agent};
pub use sources::{Source, SourceRef};

/// Errors raised while answering a query.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// No selector was supplied.
    #[error("At least one folder_path/job_id pair is required")]
    NoSelectors,
    /// A requested folder has no job mapped to it.
    #[error("No default job_id supplied for folder {0}")]
    MissingDefaultJob(String),
    /// Request failed validation.
    #[error("Invalid retrieval request: {0}")]
    InvalidRequest(String),
    /// No agent is configured for the requested type or as the default.
    #[error("No agent configured for type {0}")]
    AgentNotConfigured(AgentType),
    /// Provider answered with a non-success status.
    #[error("Retrieval provider returned {status}: {body}")]
    Provider {
        /// HTTP status.
        status: StatusCode,
        /// Response body.
        body: String,
    },
    /// Provider could not be reached.
    #[error("Retrieval provider unavailable: {0}")]
    Unavailable(String),
    /// Provider response could not be interpreted.
    #[error("Malformed retrieval response: {0}")]
    InvalidResponse(String),
}

/// One `(folder_path, job_id)` scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    /// Folder the job processed.
    pub folder_path: String,
    /// Job whose knowledge is visible.
    pub job_id: String,
}

impl Selector {
    /// Build a selector.
    pub fn new(folder_path: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            folder_path: folder_path.into(),
            job_id: job_id.into(),
        }
    }
}

/// Map every folder to its supplied job; a folder without one is a client error.
pub fn resolve_selectors(
    folder_paths: &[String],
    default_job_ids: &HashMap<String, String>,
) -> Result<Vec<Selector>, RetrievalError> {
    if folder_paths.is_empty() {
        return Err(RetrievalError::NoSelectors);
    }
    folder_paths
        .iter()
        .map(|folder| match default_job_ids.get(folder).map(|id| id.trim()) {
            Some(job_id) if !job_id.is_empty() => Ok(Selector::new(folder.clone(), job_id)),
            _ => Err(RetrievalError::MissingDefaultJob(folder.clone())),
        })
        .collect()
}

/// Map folders to their supplied jobs, skipping folders without one.
///
/// Fails only when no folder resolves.
pub fn resolve_available_selectors(
    folder_paths: &[String],
    default_job_ids: &HashMap<String, String>,
) -> Result<Vec<Selector>, RetrievalError> {
    let selectors: Vec<Selector> = folder_paths
        .iter()
        .filter_map(|folder| {
            let job_id = default_job_ids.get(folder).map(|id| id.trim())?;
            if job_id.is_empty() {
                tracing::warn!(folder_path = %folder, "No default job supplied; skipping folder");
                return None;
            }
            Some(Selector::new(folder.clone(), job_id))
        })
        .collect();
    if selectors.is_empty() {
        return Err(RetrievalError::NoSelectors);
    }
    Ok(selectors)
}

/// Agent persona used in agent mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// General question answering.
    #[default]
    Default,
    /// Verification against reference documents.
    Verification,
    /// Specification lookup.
    Specification,
}

impl AgentType {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Verification => "verification",
            Self::Specification => "specification",
        }
    }

    /// Chat session id prefix used by sessions of this type, if any.
    pub fn session_prefix(self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Verification => Some("verification_"),
            Self::Specification => Some("specification_"),
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "default" | "query_support" => Ok(Self::Default),
            "verification" => Ok(Self::Verification),
            "specification" => Ok(Self::Specification),
            other => Err(format!("unknown agent type: {other}")),
        }
    }
}
