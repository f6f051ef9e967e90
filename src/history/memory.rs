//! In-memory history backend.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ChatHistoryStore, ChatMessage, Feedback, HistoryError};
use crate::clock;

/// History store kept in process memory.
#[derive(Default)]
pub struct MemoryHistoryStore {
    // message_id -> message
    messages: RwLock<HashMap<String, ChatMessage>>,
}

impl MemoryHistoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_live(message: &ChatMessage, now: i64) -> bool {
    message.expires_at > now
}

fn oldest_first(messages: &mut [ChatMessage]) {
    messages.sort_by(|left, right| left.message_id.cmp(&right.message_id));
}

#[async_trait]
impl ChatHistoryStore for MemoryHistoryStore {
    async fn append(&self, message: ChatMessage) -> Result<(), HistoryError> {
        let mut messages = self.messages.write().await;
        if messages.contains_key(&message.message_id) {
            return Err(HistoryError::Store(format!(
                "duplicate message id {}",
                message.message_id
            )));
        }
        messages.insert(message.message_id.clone(), message);
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<ChatMessage>, HistoryError> {
        let now = clock::now().unix_timestamp();
        Ok(self
            .messages
            .read()
            .await
            .values()
            .filter(|message| is_live(message, now))
            .cloned()
            .collect())
    }

    async fn session(&self, chat_session_id: &str) -> Result<Vec<ChatMessage>, HistoryError> {
        let now = clock::now().unix_timestamp();
        let mut messages: Vec<ChatMessage> = self
            .messages
            .read()
            .await
            .values()
            .filter(|message| message.chat_session_id == chat_session_id && is_live(message, now))
            .cloned()
            .collect();
        oldest_first(&mut messages);
        Ok(messages)
    }

    async fn find(&self, message_id: &str) -> Result<Option<ChatMessage>, HistoryError> {
        let now = clock::now().unix_timestamp();
        Ok(self
            .messages
            .read()
            .await
            .get(message_id)
            .filter(|message| is_live(message, now))
            .cloned())
    }

    async fn update_feedback(
        &self,
        message_id: &str,
        feedback: &Feedback,
        updated_at: &str,
    ) -> Result<ChatMessage, HistoryError> {
        let mut messages = self.messages.write().await;
        let message = messages
            .get_mut(message_id)
            .ok_or_else(|| HistoryError::NotFound(message_id.to_string()))?;
        if let Some(rating) = feedback.rating {
            message.rating = Some(rating);
        }
        if let Some(comment) = feedback.comment.as_ref() {
            message.comment = Some(comment.clone());
        }
        message.updated_at = Some(updated_at.to_string());
        Ok(message.clone())
    }
}
