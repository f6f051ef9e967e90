//! Named batch executions.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::BatchError;
use crate::knowledge::WorkItem;
use crate::tasks::{RetryPolicy, TaskHandler, deliver};

/// Runs a whole batch as one named execution.
#[async_trait]
pub trait BatchOrchestrator: Send + Sync {
    /// Start execution `name` over `items` and return without waiting for it.
    ///
    /// Names are unique: reusing one yields [`BatchError::Conflict`].
    async fn start_execution(&self, name: &str, items: Vec<WorkItem>) -> Result<(), BatchError>;
}

/// In-process orchestrator running every item of an execution concurrently with retries.
pub struct LocalOrchestrator<H> {
    handler: Arc<H>,
    policy: RetryPolicy,
    names: Mutex<HashSet<String>>,
    running: Mutex<Vec<JoinHandle<usize>>>,
}

impl<H> LocalOrchestrator<H>
where
    H: TaskHandler<WorkItem> + 'static,
{
    /// Create an orchestrator delivering items to `handler`.
    pub fn new(handler: Arc<H>, policy: RetryPolicy) -> Self {
        Self {
            handler,
            policy,
            names: Mutex::new(HashSet::new()),
            running: Mutex::new(Vec::new()),
        }
    }

    /// Wait for every started execution and return how many items failed permanently.
    pub async fn wait_idle(&self) -> usize {
        let handles: Vec<_> = self.running.lock().await.drain(..).collect();
        let mut failed = 0;
        for handle in handles {
            match handle.await {
                Ok(count) => failed += count,
                Err(error) => {
                    tracing::error!(error = %error, "Batch execution panicked");
                    failed += 1;
                }
            }
        }
        failed
    }
}

#[async_trait]
impl<H> BatchOrchestrator for LocalOrchestrator<H>
where
    H: TaskHandler<WorkItem> + 'static,
{
    async fn start_execution(&self, name: &str, items: Vec<WorkItem>) -> Result<(), BatchError> {
        if !self.names.lock().await.insert(name.to_string()) {
            return Err(BatchError::Conflict(name.to_string()));
        }

        let handler = self.handler.clone();
        let policy = self.policy;
        let execution = name.to_string();
        let handle = tokio::spawn(async move {
            let total = items.len();
            let failed = stream::iter(items)
                .map(|item| {
                    let handler = handler.clone();
                    async move { deliver(item, handler.as_ref(), policy).await }
                })
                .buffer_unordered(total.max(1))
                .fold(0usize, |failed, succeeded| {
                    std::future::ready(if succeeded { failed } else { failed + 1 })
                })
                .await;
            tracing::info!(execution = %execution, total, failed, "Batch execution finished");
            failed
        });
        self.running.lock().await.push(handle);
        Ok(())
    }
}
