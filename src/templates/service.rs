//! Template CRUD with the one-default-per-agent-type rule.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

use super::{PromptTemplate, PromptTemplateStore, TemplateError, defaults};
use crate::clock;
use crate::retrieval::AgentType;

/// Body of a create request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTemplate {
    /// Agent type name, case-insensitive.
    #[serde(default)]
    pub agent_type: String,
    /// Display name; required.
    #[serde(default)]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Template text; required.
    #[serde(default)]
    pub editable_prompt: String,
    /// Make this the agent type's default, demoting the current one.
    #[serde(default)]
    pub is_default: bool,
}

/// Body of an update request; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateUpdate {
    /// Agent type name, case-insensitive.
    #[serde(default)]
    pub agent_type: String,
    /// Template to update.
    #[serde(default)]
    pub template_id: String,
    /// New display name.
    #[serde(default)]
    pub name: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// New template text.
    #[serde(default)]
    pub editable_prompt: Option<String>,
    /// New default flag.
    #[serde(default)]
    pub is_default: Option<bool>,
}

/// Templates of one agent type, most recently updated first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateList {
    /// Agent type listed.
    pub agent_type: AgentType,
    /// Templates.
    pub templates: Vec<PromptTemplate>,
    /// Number of templates.
    pub count: usize,
}

/// Manages the templates of every agent type.
pub struct TemplateService {
    store: Arc<dyn PromptTemplateStore>,
    // Held across read-modify-write sequences that move the default flag.
    writes: Mutex<()>,
    seeded: OnceCell<()>,
}

impl TemplateService {
    /// Wrap a store; built-in defaults are seeded on first use when it is empty.
    pub fn new(store: Arc<dyn PromptTemplateStore>) -> Self {
        Self {
            store,
            writes: Mutex::new(()),
            seeded: OnceCell::new(),
        }
    }

    /// Add the built-in template of every agent type that lacks one and return how many were
    /// written. A seeded template is only marked default when its agent type has none.
    pub async fn seed_defaults(&self) -> Result<usize, TemplateError> {
        let _guard = self.writes.lock().await;
        let now = clock::now().unix_timestamp();
        let mut written = 0;
        for agent_type in defaults::AGENT_TYPES {
            let template_id = defaults::template_id(agent_type);
            if self.store.get(agent_type, &template_id).await?.is_some() {
                continue;
            }
            let has_default = self
                .store
                .list(agent_type)
                .await?
                .iter()
                .any(|template| template.is_default);
            self.store
                .put(PromptTemplate {
                    agent_type,
                    template_id: template_id.clone(),
                    name: format!("{} デフォルト", label(agent_type)),
                    description: format!("{} のデフォルトテンプレート", label(agent_type)),
                    editable_prompt: defaults::editable_prompt(agent_type).to_string(),
                    is_default: !has_default,
                    version: 1,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            tracing::info!(
                agent_type = %agent_type,
                template_id = %template_id,
                "Default template seeded"
            );
            written += 1;
        }
        Ok(written)
    }

    async fn ensure_seeded(&self) {
        self.seeded
            .get_or_init(|| async {
                match self.store.is_empty().await {
                    Ok(true) => {
                        if let Err(error) = self.seed_defaults().await {
                            tracing::error!(error = %error, "Seeding default templates failed");
                        }
                    }
                    Ok(false) => tracing::debug!("Template store already populated"),
                    Err(error) => {
                        tracing::error!(error = %error, "Template store emptiness check failed")
                    }
                }
            })
            .await;
    }

    /// Templates of an agent type, most recently updated first.
    pub async fn list(&self, agent_type: &str) -> Result<TemplateList, TemplateError> {
        let agent_type = parse_agent_type(agent_type)?;
        self.ensure_seeded().await;
        let mut templates = self.store.list(agent_type).await?;
        templates.sort_by(|left, right| {
            right
                .updated_at
                .cmp(&left.updated_at)
                .then_with(|| left.template_id.cmp(&right.template_id))
        });
        Ok(TemplateList {
            agent_type,
            count: templates.len(),
            templates,
        })
    }

    /// One template.
    pub async fn get(
        &self,
        agent_type: &str,
        template_id: &str,
    ) -> Result<PromptTemplate, TemplateError> {
        let agent_type = parse_agent_type(agent_type)?;
        self.ensure_seeded().await;
        self.store
            .get(agent_type, template_id)
            .await?
            .ok_or_else(|| TemplateError::NotFound(template_id.to_string()))
    }

    /// Store a new template, demoting the current default when the new one claims it.
    pub async fn create(&self, request: NewTemplate) -> Result<PromptTemplate, TemplateError> {
        let agent_type = parse_agent_type(&request.agent_type)?;
        let name = required(&request.name, "name")?;
        let editable_prompt = required(&request.editable_prompt, "editablePrompt")?;
        self.ensure_seeded().await;

        let now = clock::now();
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let template = PromptTemplate {
            agent_type,
            template_id: format!("tmpl-{}-{suffix}", clock::job_id_at(now)),
            name,
            description: request.description.trim().to_string(),
            editable_prompt,
            is_default: request.is_default,
            version: 1,
            created_at: now.unix_timestamp(),
            updated_at: now.unix_timestamp(),
        };

        let _guard = self.writes.lock().await;
        if template.is_default {
            self.demote_defaults(agent_type, &template.template_id).await?;
        }
        self.store.put(template.clone()).await?;
        tracing::info!(
            agent_type = %agent_type,
            template_id = %template.template_id,
            is_default = template.is_default,
            "Template created"
        );
        Ok(template)
    }

    /// Apply the fields present in `request`, bumping the version.
    pub async fn update(&self, request: TemplateUpdate) -> Result<PromptTemplate, TemplateError> {
        let template_id = request.template_id.trim();
        if request.agent_type.trim().is_empty() || template_id.is_empty() {
            return Err(TemplateError::InvalidRequest(
                "agentType and templateId are required".into(),
            ));
        }
        let agent_type = parse_agent_type(&request.agent_type)?;
        self.ensure_seeded().await;

        let _guard = self.writes.lock().await;
        let existing = self
            .store
            .get(agent_type, template_id)
            .await?
            .ok_or_else(|| TemplateError::NotFound(template_id.to_string()))?;

        let mut updated = existing.clone();
        if let Some(name) = &request.name {
            updated.name = required(name, "name")?;
        }
        if let Some(description) = &request.description {
            updated.description = description.trim().to_string();
        }
        if let Some(editable_prompt) = &request.editable_prompt {
            updated.editable_prompt = required(editable_prompt, "editablePrompt")?;
        }
        if let Some(is_default) = request.is_default {
            updated.is_default = is_default;
        }
        updated.version = existing.version + 1;
        updated.updated_at = clock::now().unix_timestamp();

        if updated.is_default && !existing.is_default {
            self.demote_defaults(agent_type, template_id).await?;
        }
        self.store.put(updated.clone()).await?;
        tracing::info!(
            agent_type = %agent_type,
            template_id,
            version = updated.version,
            "Template updated"
        );
        Ok(updated)
    }

    /// Remove a template.
    pub async fn delete(&self, agent_type: &str, template_id: &str) -> Result<(), TemplateError> {
        let template_id = template_id.trim();
        if agent_type.trim().is_empty() || template_id.is_empty() {
            return Err(TemplateError::InvalidRequest(
                "agentType and templateId are required".into(),
            ));
        }
        let agent_type = parse_agent_type(agent_type)?;
        self.ensure_seeded().await;

        let _guard = self.writes.lock().await;
        if !self.store.delete(agent_type, template_id).await? {
            return Err(TemplateError::NotFound(template_id.to_string()));
        }
        tracing::info!(agent_type = %agent_type, template_id, "Template deleted");
        Ok(())
    }

    async fn demote_defaults(&self, agent_type: AgentType, keep: &str) -> Result<(), TemplateError> {
        for mut template in self.store.list(agent_type).await? {
            if template.is_default && template.template_id != keep {
                tracing::info!(
                    agent_type = %agent_type,
                    template_id = %template.template_id,
                    "Default template demoted"
                );
                template.is_default = false;
                self.store.put(template).await?;
            }
        }
        Ok(())
    }
}

fn parse_agent_type(raw: &str) -> Result<AgentType, TemplateError> {
    if raw.trim().is_empty() {
        return Err(TemplateError::InvalidRequest("agentType is required".into()));
    }
    raw.parse().map_err(|_| {
        TemplateError::InvalidRequest(format!(
            "Invalid agentType {raw}. Must be one of: verification, specification, query_support"
        ))
    })
}

fn required(value: &str, field: &str) -> Result<String, TemplateError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TemplateError::InvalidRequest(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn label(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::Verification => "VERIFICATION",
        AgentType::Specification => "SPECIFICATION",
        AgentType::Default => "QUERY_SUPPORT",
    }
}
