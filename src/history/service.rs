//! History recording and browsing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ChatHistoryStore, ChatMessage, HistoryError, Role};
use crate::clock;
use crate::retrieval::sources::{Source, SourceRef, dedupe, sign_sources};
use crate::retrieval::AgentType;
use crate::storage::signer::UrlSigner;

const SECONDS_PER_DAY: i64 = 86_400;

/// A message about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Partition job id.
    pub job_id: String,
    /// Conversation id.
    pub chat_session_id: String,
    /// Author.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Cited documents, kept for assistant messages only.
    pub sources: Vec<SourceRef>,
    /// Selected folders, kept for user messages only.
    pub selected_folder_paths: Option<Vec<String>>,
    /// Selected job, kept for user messages only.
    pub selected_job_id: Option<String>,
}

impl NewMessage {
    /// A user question.
    pub fn user(
        job_id: impl Into<String>,
        chat_session_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            chat_session_id: chat_session_id.into(),
            role: Role::User,
            content: content.into(),
            sources: Vec::new(),
            selected_folder_paths: None,
            selected_job_id: None,
        }
    }

    /// A generated answer with its citations.
    pub fn assistant(
        job_id: impl Into<String>,
        chat_session_id: impl Into<String>,
        content: impl Into<String>,
        sources: Vec<SourceRef>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            sources,
            ..Self::user(job_id, chat_session_id, content)
        }
    }

    /// Attach the session's folder/job selection.
    pub fn with_selection(mut self, folder_paths: Vec<String>, job_id: impl Into<String>) -> Self {
        self.selected_folder_paths = Some(folder_paths);
        self.selected_job_id = Some(job_id.into());
        self
    }
}

/// Result of a best-effort history write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryWrite {
    /// Message persisted.
    Saved {
        /// Id of the new message.
        message_id: String,
    },
    /// Write failed; the primary operation carries on.
    Failed {
        /// Failure description.
        reason: String,
    },
}

impl HistoryWrite {
    /// Id of the saved message, if the write succeeded.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Saved { message_id } => Some(message_id),
            Self::Failed { .. } => None,
        }
    }
}

/// Feedback update for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Feedback {
    /// Rating from 1 to 10.
    #[serde(default)]
    pub rating: Option<u8>,
    /// Free-text comment.
    #[serde(default)]
    pub comment: Option<String>,
}

impl Feedback {
    fn validate(&self) -> Result<(), HistoryError> {
        if self.rating.is_none() && self.comment.is_none() {
            return Err(HistoryError::InvalidFeedback(
                "rating or comment is required".into(),
            ));
        }
        if let Some(rating) = self.rating
            && !(1..=10).contains(&rating)
        {
            return Err(HistoryError::InvalidFeedback(format!(
                "rating must be between 1 and 10, got {rating}"
            )));
        }
        Ok(())
    }
}

/// One conversation in the session list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Conversation id.
    pub chat_session_id: String,
    /// First user question.
    pub first_question: String,
    /// Timestamp of the first user question.
    pub timestamp: String,
    /// Id of the first user question.
    pub message_id: String,
    /// Messages in the session.
    pub message_count: usize,
}

/// A full conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDetail {
    /// Conversation id.
    pub chat_session_id: String,
    /// Every message, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Documents cited anywhere in the session, with fresh links.
    pub sources: Vec<Source>,
    /// Number of messages.
    pub message_count: usize,
    /// Folders selected when the session started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_folder_paths: Option<Vec<String>>,
    /// Job selected when the session started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_job_id: Option<String>,
}

/// A question/answer exchange matching a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    /// Conversation id.
    pub chat_session_id: String,
    /// Question opening the exchange.
    pub first_question: String,
    /// Timestamp of the question.
    pub timestamp: String,
    /// Id of the question.
    pub message_id: String,
    /// Messages in the exchange.
    pub message_count: usize,
    /// First message of the exchange containing the search text.
    pub matched_content: String,
}

/// Records chat turns and serves history browsing.
pub struct HistoryService {
    store: Arc<dyn ChatHistoryStore>,
    signer: Arc<UrlSigner>,
    ttl_days: u64,
}

impl HistoryService {
    /// Create a service keeping messages for `ttl_days`.
    pub fn new(store: Arc<dyn ChatHistoryStore>, signer: Arc<UrlSigner>, ttl_days: u64) -> Self {
        Self {
            store,
            signer,
            ttl_days,
        }
    }

    /// Persist a message and return it.
    pub async fn append(&self, message: NewMessage) -> Result<ChatMessage, HistoryError> {
        let now = clock::now();
        let timestamp = clock::iso_timestamp(now);
        let ttl = i64::try_from(self.ttl_days)
            .unwrap_or(i64::MAX / SECONDS_PER_DAY)
            .saturating_mul(SECONDS_PER_DAY);
        let is_user = message.role == Role::User;

        let stored = ChatMessage {
            message_id: format!("{timestamp}#{}", Uuid::new_v4()),
            job_id: message.job_id,
            chat_session_id: message.chat_session_id,
            role: message.role,
            content: message.content,
            timestamp,
            sources: if is_user { Vec::new() } else { message.sources },
            selected_folder_paths: message.selected_folder_paths.filter(|_| is_user),
            selected_job_id: message.selected_job_id.filter(|_| is_user),
            rating: None,
            comment: None,
            updated_at: None,
            expires_at: now.unix_timestamp().saturating_add(ttl),
        };
        self.store.append(stored.clone()).await?;
        Ok(stored)
    }

    /// Persist a message without failing the caller.
    pub async fn record(&self, message: NewMessage) -> HistoryWrite {
        let chat_session_id = message.chat_session_id.clone();
        let role = message.role;
        match self.append(message).await {
            Ok(stored) => HistoryWrite::Saved {
                message_id: stored.message_id,
            },
            Err(error) => {
                tracing::warn!(
                    chat_session_id = %chat_session_id,
                    ?role,
                    error = %error,
                    "Failed to save chat message"
                );
                HistoryWrite::Failed {
                    reason: error.to_string(),
                }
            }
        }
    }

    /// Messages of a session, oldest first.
    pub async fn session_messages(
        &self,
        chat_session_id: &str,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        self.store.session(chat_session_id).await
    }

    /// One summary per session with a user message, newest first.
    pub async fn summaries(
        &self,
        mode: Option<AgentType>,
    ) -> Result<Vec<SessionSummary>, HistoryError> {
        let sessions = self.sessions(mode).await?;
        let mut summaries: Vec<SessionSummary> = sessions
            .into_iter()
            .filter_map(|(chat_session_id, messages)| {
                let first = messages.iter().find(|message| message.role == Role::User)?;
                Some(SessionSummary {
                    first_question: first.content.clone(),
                    timestamp: first.timestamp.clone(),
                    message_id: first.message_id.clone(),
                    message_count: messages.len(),
                    chat_session_id,
                })
            })
            .collect();
        summaries.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        Ok(summaries)
    }

    /// The whole session containing `message_id`.
    pub async fn detail(&self, message_id: &str) -> Result<SessionDetail, HistoryError> {
        let target = self
            .store
            .find(message_id)
            .await?
            .ok_or_else(|| HistoryError::NotFound(message_id.to_string()))?;
        let messages = self.store.session(&target.chat_session_id).await?;

        let first_user = messages.iter().find(|message| message.role == Role::User);
        let selected_folder_paths = first_user.and_then(|message| message.selected_folder_paths.clone());
        let selected_job_id = first_user.and_then(|message| message.selected_job_id.clone());

        let cited = dedupe(
            messages
                .iter()
                .filter(|message| message.role == Role::Assistant)
                .flat_map(|message| message.sources.iter().cloned()),
        );

        Ok(SessionDetail {
            chat_session_id: target.chat_session_id,
            sources: sign_sources(&self.signer, &cited),
            message_count: messages.len(),
            messages,
            selected_folder_paths,
            selected_job_id,
        })
    }

    /// Exchanges whose question or answer contains `query`, case-insensitively.
    ///
    /// Every user message opens an exchange; following assistant messages belong to it.
    pub async fn search(
        &self,
        query: &str,
        mode: Option<AgentType>,
    ) -> Result<Vec<SearchHit>, HistoryError> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();

        for (chat_session_id, messages) in self.sessions(mode).await? {
            let mut current: Option<SearchHit> = None;
            for message in messages {
                let matches = message.content.to_lowercase().contains(&needle);
                match message.role {
                    Role::User => {
                        hits.extend(current.take().filter(|hit| !hit.matched_content.is_empty()));
                        current = Some(SearchHit {
                            chat_session_id: chat_session_id.clone(),
                            first_question: message.content.clone(),
                            timestamp: message.timestamp,
                            message_id: message.message_id,
                            message_count: 1,
                            matched_content: if matches { message.content } else { String::new() },
                        });
                    }
                    Role::Assistant => {
                        if let Some(hit) = current.as_mut() {
                            hit.message_count += 1;
                            if matches && hit.matched_content.is_empty() {
                                hit.matched_content = message.content;
                            }
                        }
                    }
                }
            }
            hits.extend(current.filter(|hit| !hit.matched_content.is_empty()));
        }
        Ok(hits)
    }

    /// Set rating and/or comment on a message.
    pub async fn feedback(
        &self,
        message_id: &str,
        feedback: &Feedback,
    ) -> Result<ChatMessage, HistoryError> {
        feedback.validate()?;
        let updated = self
            .store
            .update_feedback(message_id, feedback, &clock::now_iso())
            .await?;
        tracing::info!(message_id, rating = ?feedback.rating, "Feedback saved");
        Ok(updated)
    }

    async fn sessions(
        &self,
        mode: Option<AgentType>,
    ) -> Result<BTreeMap<String, Vec<ChatMessage>>, HistoryError> {
        let mut grouped: HashMap<String, Vec<ChatMessage>> = HashMap::new();
        for message in self.store.scan().await? {
            if matches_mode(&message.chat_session_id, mode) {
                grouped
                    .entry(message.chat_session_id.clone())
                    .or_default()
                    .push(message);
            }
        }
        Ok(grouped
            .into_iter()
            .map(|(chat_session_id, mut messages)| {
                messages.sort_by(|left, right| {
                    left.timestamp
                        .cmp(&right.timestamp)
                        .then_with(|| left.message_id.cmp(&right.message_id))
                });
                (chat_session_id, messages)
            })
            .collect())
    }
}

/// Whether a session id belongs to the given mode.
///
/// Typed modes require their prefix; the default mode excludes every typed prefix.
pub fn matches_mode(chat_session_id: &str, mode: Option<AgentType>) -> bool {
    match mode {
        None => true,
        Some(AgentType::Default) => [AgentType::Verification, AgentType::Specification]
            .iter()
            .filter_map(|agent| agent.session_prefix())
            .all(|prefix| !chat_session_id.starts_with(prefix)),
        Some(agent) => agent
            .session_prefix()
            .is_some_and(|prefix| chat_session_id.starts_with(prefix)),
    }
}
