//! Periodic removal of expired async query records.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use super::{QueryError, QueryStore};
use crate::clock;

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReaperReport {
    /// Records deleted.
    pub purged: usize,
}

/// Delete every record expired at `now`.
pub async fn reap_expired(store: &dyn QueryStore, now: i64) -> Result<ReaperReport, QueryError> {
    let purged = store.purge_expired(now).await?;
    if purged > 0 {
        tracing::info!(purged, "Purged expired query records");
    }
    Ok(ReaperReport { purged })
}

/// Sweep `store` every `interval` until the returned task is aborted.
pub fn spawn_reaper(store: Arc<dyn QueryStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(error) = reap_expired(store.as_ref(), clock::now().unix_timestamp()).await {
                tracing::warn!(error = %error, "Query reaper sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{MemoryQueryStore, QueryInput, QueryRecord, QueryStatus};
    use std::collections::HashMap;

    fn record(query_id: &str, expires_at: i64) -> QueryRecord {
        QueryRecord {
            query_id: query_id.into(),
            status: QueryStatus::Processing,
            input: QueryInput {
                query: "q".into(),
                chat_session_id: "s".into(),
                folder_paths: Vec::new(),
                folder_default_job_ids: HashMap::new(),
                use_agent: false,
                agent_type: Default::default(),
            },
            answer: None,
            sources: Vec::new(),
            message_id: None,
            error: None,
            created_at: "2025-01-01T00:00:00+09:00".into(),
            updated_at: "2025-01-01T00:00:00+09:00".into(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_records() {
        let store = MemoryQueryStore::new();
        store.insert(record("old", 100)).await.expect("insert");
        store.insert(record("edge", 200)).await.expect("insert");
        store.insert(record("live", i64::MAX)).await.expect("insert");

        let report = reap_expired(&store, 200).await.expect("sweep");

        assert_eq!(report, ReaperReport { purged: 2 });
        assert!(store.get("live").await.expect("get").is_some());
        assert_eq!(reap_expired(&store, 200).await.expect("sweep").purged, 0);
    }

    #[tokio::test]
    async fn expired_records_are_invisible_before_the_sweep() {
        let store = MemoryQueryStore::new();
        store.insert(record("old", 1)).await.expect("insert");
        assert!(store.get("old").await.expect("get").is_none());
    }
}
