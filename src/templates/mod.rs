//! Editable output-format templates, one set per agent type.
//!
//! Users insert a template's `editablePrompt` into their questions; the agent's fixed
//! instructions live with the agent itself. At most one template per agent type is the
//! default. Built-in defaults are seeded the first time an empty store is used.

mod defaults;
mod memory;
mod service;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retrieval::AgentType;

pub use memory::MemoryTemplateStore;
pub use service::{NewTemplate, TemplateList, TemplateService, TemplateUpdate};

/// Errors raised by template stores and the template service.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Request failed validation.
    #[error("{0}")]
    InvalidRequest(String),
    /// No template exists under the requested key.
    #[error("Template not found: {0}")]
    NotFound(String),
    /// Backend failure.
    #[error("Template store error: {0}")]
    Store(String),
}

/// One stored template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
    /// Partition key.
    pub agent_type: AgentType,
    /// Sort key: `tmpl-{YYYYMMDDhhmmss}-{8 hex}` or `default-{agent_type}`.
    pub template_id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Text inserted into user questions.
    pub editable_prompt: String,
    /// Whether this is the agent type's default template.
    pub is_default: bool,
    /// Starts at 1 and grows with every update.
    pub version: u32,
    /// Unix time of creation.
    pub created_at: i64,
    /// Unix time of the last update.
    pub updated_at: i64,
}

/// Storage backend for prompt templates.
#[async_trait]
pub trait PromptTemplateStore: Send + Sync {
    /// Fetch one template.
    async fn get(
        &self,
        agent_type: AgentType,
        template_id: &str,
    ) -> Result<Option<PromptTemplate>, TemplateError>;

    /// Every template of an agent type, in no particular order.
    async fn list(&self, agent_type: AgentType) -> Result<Vec<PromptTemplate>, TemplateError>;

    /// Insert or replace a template.
    async fn put(&self, template: PromptTemplate) -> Result<(), TemplateError>;

    /// Remove a template; returns whether one existed.
    async fn delete(&self, agent_type: AgentType, template_id: &str)
    -> Result<bool, TemplateError>;

    /// Whether the store holds no template at all.
    async fn is_empty(&self) -> Result<bool, TemplateError>;
}
