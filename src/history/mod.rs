//! Conversation history: an append-only per-session message log.
//!
//! Messages are keyed by `(job_id, message_id)` where `message_id` is `{timestamp}#{uuid}`, so a
//! lexical sort of ids within a partition follows creation order. Feedback fields are the only
//! fields mutated after creation.

mod memory;
mod service;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retrieval::SourceRef;

pub use memory::MemoryHistoryStore;
pub use service::{
    Feedback, HistoryService, HistoryWrite, NewMessage, SearchHit, SessionDetail, SessionSummary,
};

/// Errors raised by history stores and the history service.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// No message carries the requested id.
    #[error("Message not found: {0}")]
    NotFound(String),
    /// Feedback update failed validation.
    #[error("Invalid feedback: {0}")]
    InvalidFeedback(String),
    /// Backend failure.
    #[error("History store error: {0}")]
    Store(String),
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user question.
    User,
    /// Generated answer.
    Assistant,
}

/// One persisted chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Partition key: the job the session queried first.
    pub job_id: String,
    /// Sort key: `{timestamp}#{uuid}`.
    pub message_id: String,
    /// Conversation the message belongs to.
    pub chat_session_id: String,
    /// Author.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// ISO-8601 creation time.
    pub timestamp: String,
    /// Cited documents; assistant messages only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,
    /// Folders selected when the session started; first user message only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_folder_paths: Option<Vec<String>>,
    /// Job selected when the session started; first user message only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_job_id: Option<String>,
    /// Feedback rating from 1 to 10.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    /// Feedback comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Time of the last feedback update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Unix time after which the message is no longer returned.
    pub expires_at: i64,
}

/// Storage backend for chat messages.
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    /// Persist a new message.
    async fn append(&self, message: ChatMessage) -> Result<(), HistoryError>;

    /// Every live message, in no particular order.
    async fn scan(&self) -> Result<Vec<ChatMessage>, HistoryError>;

    /// Live messages of one session, oldest first.
    async fn session(&self, chat_session_id: &str) -> Result<Vec<ChatMessage>, HistoryError>;

    /// Look up a live message by id.
    async fn find(&self, message_id: &str) -> Result<Option<ChatMessage>, HistoryError>;

    /// Set feedback fields on a message and return the updated message.
    async fn update_feedback(
        &self,
        message_id: &str,
        feedback: &Feedback,
        updated_at: &str,
    ) -> Result<ChatMessage, HistoryError>;
}
