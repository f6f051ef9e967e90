//! In-memory template backend.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{PromptTemplate, PromptTemplateStore, TemplateError};
use crate::retrieval::AgentType;

/// Template store kept in process memory.
#[derive(Default)]
pub struct MemoryTemplateStore {
    templates: RwLock<HashMap<(AgentType, String), PromptTemplate>>,
}

impl MemoryTemplateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PromptTemplateStore for MemoryTemplateStore {
    async fn get(
        &self,
        agent_type: AgentType,
        template_id: &str,
    ) -> Result<Option<PromptTemplate>, TemplateError> {
        Ok(self
            .templates
            .read()
            .await
            .get(&(agent_type, template_id.to_string()))
            .cloned())
    }

    async fn list(&self, agent_type: AgentType) -> Result<Vec<PromptTemplate>, TemplateError> {
        Ok(self
            .templates
            .read()
            .await
            .values()
            .filter(|template| template.agent_type == agent_type)
            .cloned()
            .collect())
    }

    async fn put(&self, template: PromptTemplate) -> Result<(), TemplateError> {
        self.templates.write().await.insert(
            (template.agent_type, template.template_id.clone()),
            template,
        );
        Ok(())
    }

    async fn delete(
        &self,
        agent_type: AgentType,
        template_id: &str,
    ) -> Result<bool, TemplateError> {
        Ok(self
            .templates
            .write()
            .await
            .remove(&(agent_type, template_id.to_string()))
            .is_some())
    }

    async fn is_empty(&self) -> Result<bool, TemplateError> {
        Ok(self.templates.read().await.is_empty())
    }
}
