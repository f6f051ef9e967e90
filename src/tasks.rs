//! At-least-once task delivery.
//!
//! A task may be handed to its handler more than once: a failed attempt is redelivered until the
//! retry policy gives up, and a crashed worker may leave a task that a later worker repeats.
//! Handlers must therefore tolerate duplicate execution.

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Errors raised by task queues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// No worker is consuming the queue any more.
    #[error("Task queue is closed")]
    Closed,
}

/// One delivery of a task to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery<T> {
    /// Task payload.
    pub task: T,
    /// 1-based delivery attempt.
    pub attempt: u32,
}

/// Producer side of a task queue.
#[async_trait]
pub trait TaskQueue<T>: Send + Sync {
    /// Enqueue `task` for asynchronous execution and return without waiting for it.
    async fn enqueue(&self, task: T) -> Result<(), TaskError>;
}

/// Consumer of delivered tasks.
#[async_trait]
pub trait TaskHandler<T>: Send + Sync {
    /// Error type reported for failed attempts.
    type Error: Display + Send;

    /// Execute one delivery. Returning an error requests redelivery.
    async fn handle(&self, delivery: &Delivery<T>) -> Result<(), Self::Error>;
}

/// Redelivery limits applied by [`run_worker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per task, including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Outcome counters of a drained worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Tasks that eventually succeeded.
    pub completed: usize,
    /// Tasks abandoned after exhausting every attempt.
    pub dead_lettered: usize,
}

/// In-process queue backed by an unbounded tokio channel.
pub struct ChannelQueue<T> {
    sender: mpsc::UnboundedSender<T>,
}

impl<T> Clone for ChannelQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Consumer half of a [`ChannelQueue`].
pub struct TaskReceiver<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T: Send + 'static> ChannelQueue<T> {
    /// Create a queue and the receiver a worker drains.
    pub fn channel() -> (Self, TaskReceiver<T>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, TaskReceiver { receiver })
    }
}

#[async_trait]
impl<T: Send + 'static> TaskQueue<T> for ChannelQueue<T> {
    async fn enqueue(&self, task: T) -> Result<(), TaskError> {
        self.sender.send(task).map_err(|_| TaskError::Closed)
    }
}

/// Drain `receiver`, running every task concurrently on its own tokio task.
///
/// Returns once every producer handle is dropped and all in-flight tasks have finished.
pub async fn run_worker<T, H>(
    mut receiver: TaskReceiver<T>,
    handler: Arc<H>,
    policy: RetryPolicy,
) -> WorkerReport
where
    T: Send + Sync + 'static,
    H: TaskHandler<T> + 'static,
{
    let mut join_set = JoinSet::new();
    let mut report = WorkerReport::default();

    loop {
        tokio::select! {
            next = receiver.receiver.recv() => match next {
                Some(task) => {
                    let handler = handler.clone();
                    join_set.spawn(async move { deliver(task, handler.as_ref(), policy).await });
                }
                None => break,
            },
            Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                tally(&mut report, joined);
            }
        }
    }

    while let Some(joined) = join_set.join_next().await {
        tally(&mut report, joined);
    }
    tracing::debug!(
        completed = report.completed,
        dead_lettered = report.dead_lettered,
        "Task worker drained"
    );
    report
}

fn tally(report: &mut WorkerReport, joined: Result<bool, tokio::task::JoinError>) {
    match joined {
        Ok(true) => report.completed += 1,
        Ok(false) => report.dead_lettered += 1,
        Err(error) => {
            tracing::error!(error = %error, "Task panicked");
            report.dead_lettered += 1;
        }
    }
}

/// Hand `task` to `handler` until it succeeds or the policy's attempts are used up.
///
/// Returns whether the task eventually succeeded; exhausted tasks are logged as dead-lettered.
pub async fn deliver<T, H>(task: T, handler: &H, policy: RetryPolicy) -> bool
where
    H: TaskHandler<T> + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delivery = Delivery { task, attempt: 1 };
    loop {
        match handler.handle(&delivery).await {
            Ok(()) => return true,
            Err(error) if delivery.attempt < max_attempts => {
                tracing::warn!(
                    attempt = delivery.attempt,
                    max_attempts,
                    error = %error,
                    "Task failed; redelivering"
                );
                delivery.attempt += 1;
            }
            Err(error) => {
                tracing::error!(
                    attempts = delivery.attempt,
                    error = %error,
                    "Task dead-lettered"
                );
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FlakyHandler {
        failures_before_success: u32,
        seen: Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl TaskHandler<String> for FlakyHandler {
        type Error = String;

        async fn handle(&self, delivery: &Delivery<String>) -> Result<(), String> {
            self.seen
                .lock()
                .await
                .push((delivery.task.clone(), delivery.attempt));
            if delivery.attempt <= self.failures_before_success {
                Err(format!("attempt {} failed", delivery.attempt))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn failed_attempts_are_redelivered() {
        let (queue, receiver) = ChannelQueue::channel();
        let handler = Arc::new(FlakyHandler {
            failures_before_success: 1,
            ..Default::default()
        });
        queue.enqueue("a".to_string()).await.expect("enqueue");
        drop(queue);

        let report = run_worker(receiver, handler.clone(), RetryPolicy { max_attempts: 3 }).await;

        assert_eq!(
            report,
            WorkerReport {
                completed: 1,
                dead_lettered: 0
            }
        );
        assert_eq!(
            *handler.seen.lock().await,
            vec![("a".to_string(), 1), ("a".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn exhausted_tasks_are_dead_lettered() {
        let (queue, receiver) = ChannelQueue::channel();
        let handler = Arc::new(FlakyHandler {
            failures_before_success: 10,
            ..Default::default()
        });
        queue.enqueue("a".to_string()).await.expect("enqueue");
        queue.enqueue("b".to_string()).await.expect("enqueue");
        drop(queue);

        let report = run_worker(receiver, handler.clone(), RetryPolicy { max_attempts: 2 }).await;

        assert_eq!(report.dead_lettered, 2);
        assert_eq!(handler.seen.lock().await.len(), 4);
    }

    #[tokio::test]
    async fn enqueue_fails_once_the_worker_is_gone() {
        let (queue, receiver) = ChannelQueue::<String>::channel();
        drop(receiver);
        assert_eq!(queue.enqueue("a".into()).await, Err(TaskError::Closed));
    }
}
