//! Async query record storage.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{QueryError, QueryOutcome, QueryRecord, QueryStatus};
use crate::clock;

/// Storage backend for async query records.
///
/// Records past their `expires_at` are invisible to reads whether or not they were purged yet.
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Persist a new record.
    async fn insert(&self, record: QueryRecord) -> Result<(), QueryError>;

    /// Look up a live record.
    async fn get(&self, query_id: &str) -> Result<Option<QueryRecord>, QueryError>;

    /// Write a terminal outcome and return the updated record.
    async fn finish(
        &self,
        query_id: &str,
        outcome: QueryOutcome,
        updated_at: &str,
    ) -> Result<QueryRecord, QueryError>;

    /// Delete every record that expired at or before `now` and return how many were removed.
    async fn purge_expired(&self, now: i64) -> Result<usize, QueryError>;
}

/// Query records kept in process memory.
#[derive(Default)]
pub struct MemoryQueryStore {
    records: RwLock<HashMap<String, QueryRecord>>,
}

impl MemoryQueryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueryStore for MemoryQueryStore {
    async fn insert(&self, record: QueryRecord) -> Result<(), QueryError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.query_id) {
            return Err(QueryError::Store(format!(
                "duplicate query id {}",
                record.query_id
            )));
        }
        records.insert(record.query_id.clone(), record);
        Ok(())
    }

    async fn get(&self, query_id: &str) -> Result<Option<QueryRecord>, QueryError> {
        let now = clock::now().unix_timestamp();
        Ok(self
            .records
            .read()
            .await
            .get(query_id)
            .filter(|record| record.expires_at > now)
            .cloned())
    }

    async fn finish(
        &self,
        query_id: &str,
        outcome: QueryOutcome,
        updated_at: &str,
    ) -> Result<QueryRecord, QueryError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(query_id)
            .ok_or_else(|| QueryError::NotFound(query_id.to_string()))?;
        match outcome {
            QueryOutcome::Completed {
                answer,
                sources,
                message_id,
            } => {
                record.status = QueryStatus::Completed;
                record.answer = Some(answer);
                record.sources = sources;
                record.message_id = message_id;
                record.error = None;
            }
            QueryOutcome::Failed { error } => {
                record.status = QueryStatus::Failed;
                record.error = Some(error);
            }
        }
        record.updated_at = updated_at.to_string();
        Ok(record.clone())
    }

    async fn purge_expired(&self, now: i64) -> Result<usize, QueryError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.expires_at > now);
        Ok(before - records.len())
    }
}
