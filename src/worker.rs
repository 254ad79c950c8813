//! Task lifecycle and the worker pool.
//!
//! [`TaskManager`] owns the queue. A delivery moves a task
//! `pending → processing`, runs one attempt through a [`TaskExecutor`] under a
//! wall-clock limit, then either completes the task, re-queues it after the
//! fixed backoff, or fails it once the [`RetryPolicy`] is exhausted.
//!
//! ```text
//! submit ──▶ mpsc ──▶ for_each_concurrent(workers) ──▶ process_delivery
//!              ▲                                           │
//!              └──────── sleep(backoff) ◀── Retry ─────────┘
//! ```
//!
//! Deliveries for a task id that is already running are skipped. A later
//! redelivery of a finished task re-runs it with a fresh retry budget and
//! overwrites its result. A failed status write spends a retry like any other
//! attempt failure, so the task is never left in `processing` while budget
//! remains.

use crate::config::{ProcessorConfig, ValidationLevel};
use crate::error::ValidatorError;
use crate::model::{TaskStatus, ValidationTask};
use crate::process::TaskExecutor;
use crate::progress::ProgressCallback;
use crate::repository::Repository;
use futures::stream::StreamExt;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info, info_span, warn, Instrument};

// ── Retry policy ─────────────────────────────────────────────────────────

/// Bounded retries with a fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `max_retries + 1` attempts in total.
    pub max_retries: u32,
    pub backoff: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Redeliver after `after`; `attempt` is the 1-based number of the next try.
    Retry { attempt: u32, after: Duration },
    GiveUp,
}

impl RetryPolicy {
    pub fn from_config(config: &ProcessorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.retry_backoff(),
        }
    }

    /// Decide what follows the `failed_attempts`-th failure.
    pub fn decide(&self, failed_attempts: u32, err: &ValidatorError) -> RetryDecision {
        if !err.is_retryable() || failed_attempts > self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            attempt: failed_attempts + 1,
            after: self.backoff,
        }
    }
}

/// What one delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completed,
    Retrying { attempt: u32, after: Duration },
    Failed { message: String },
    /// Cancelled task or an attempt for the same id already running.
    Skipped,
}

// ── Idle tracking ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Outstanding {
    count: AtomicUsize,
    idle: Notify,
}

impl Outstanding {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Removes the task id from the in-flight set when dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    task_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.task_id);
        }
    }
}

/// One queued delivery. `attempt` is the attempt the manager expects to run;
/// it stays ahead of the stored retry count when a status update was lost.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Delivery {
    task_id: String,
    attempt: u32,
}

// ── Manager ──────────────────────────────────────────────────────────────

pub struct TaskManager {
    repo: Arc<dyn Repository>,
    executor: Arc<dyn TaskExecutor>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    workers: usize,
    default_level: ValidationLevel,
    progress: Option<ProgressCallback>,
    queue_tx: mpsc::UnboundedSender<Delivery>,
    queue_rx: tokio::sync::Mutex<UnboundedReceiverStream<Delivery>>,
    in_flight: Mutex<HashSet<String>>,
    outstanding: Arc<Outstanding>,
}

impl TaskManager {
    pub fn new(
        repo: Arc<dyn Repository>,
        executor: Arc<dyn TaskExecutor>,
        config: &ProcessorConfig,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            repo,
            executor,
            policy: RetryPolicy::from_config(config),
            attempt_timeout: config.attempt_timeout(),
            workers: config.workers.max(1),
            default_level: config.validation_level,
            progress: config.progress_callback.clone(),
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(UnboundedReceiverStream::new(queue_rx)),
            in_flight: Mutex::new(HashSet::new()),
            outstanding: Arc::new(Outstanding::default()),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn task(&self, task_id: &str) -> Result<Option<ValidationTask>, ValidatorError> {
        self.repo.get_task(task_id).await
    }

    /// Create a pending task for `source` and queue it. Returns the task id.
    pub async fn submit(
        &self,
        source: impl Into<String>,
        level: Option<ValidationLevel>,
    ) -> Result<String, ValidatorError> {
        let task = ValidationTask::new(
            uuid::Uuid::new_v4().to_string(),
            source,
            level.unwrap_or(self.default_level),
            self.policy.max_retries,
        );
        self.submit_task(task).await
    }

    /// Queue a caller-built task (custom id, correlation id, retry budget).
    pub async fn submit_task(&self, task: ValidationTask) -> Result<String, ValidatorError> {
        let task_id = task.task_id.clone();
        self.repo.insert_task(task).await?;
        self.enqueue(&task_id)?;
        info!("task {}: queued", task_id);
        Ok(task_id)
    }

    /// Submit every source; each task runs its own lifecycle.
    pub async fn submit_batch<I, S>(
        &self,
        sources: I,
        level: Option<ValidationLevel>,
    ) -> Result<Vec<String>, ValidatorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids = Vec::new();
        for source in sources {
            ids.push(self.submit(source, level).await?);
        }
        Ok(ids)
    }

    /// Cancel a task that has not been dequeued yet.
    pub async fn cancel(&self, task_id: &str) -> Result<(), ValidatorError> {
        let mut task = self
            .repo
            .get_task(task_id)
            .await?
            .ok_or_else(|| ValidatorError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        task.cancel()?;
        self.repo.update_task(&task).await?;
        info!("task {}: cancelled", task_id);
        Ok(())
    }

    /// Push a delivery for `task_id` onto the queue.
    pub fn enqueue(&self, task_id: &str) -> Result<(), ValidatorError> {
        self.outstanding.add();
        let delivery = Delivery {
            task_id: task_id.to_string(),
            attempt: 1,
        };
        self.queue_tx.send(delivery).map_err(|_| {
            self.outstanding.done();
            ValidatorError::Internal("task queue closed".into())
        })
    }

    /// Consume the queue with `workers` concurrent slots until `shutdown`
    /// resolves. Undelivered ids stay queued for the next call.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut queue = self.queue_rx.lock().await;
        info!("worker pool started ({} workers)", self.workers);
        queue
            .by_ref()
            .take_until(shutdown)
            .for_each_concurrent(self.workers, |delivery| async move {
                self.handle_delivery(delivery).await;
            })
            .await;
        info!("worker pool stopped");
    }

    /// Run the pool until every queued delivery and scheduled retry is done.
    pub async fn run_until_idle(self: &Arc<Self>) -> Result<(), ValidatorError> {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let manager = Arc::clone(self);
        let pool = tokio::spawn(async move {
            manager
                .run(async {
                    let _ = stop_rx.await;
                })
                .await
        });
        self.wait_idle().await;
        let _ = stop_tx.send(());
        pool.await
            .map_err(|e| ValidatorError::Internal(format!("Worker pool panicked: {}", e)))
    }

    /// Wait until no delivery is queued, running or waiting on backoff.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.outstanding.idle.notified();
            if self.outstanding.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        let Delivery { task_id, attempt } = delivery;
        match self.deliver(&task_id, attempt).await {
            Ok(DeliveryOutcome::Retrying { attempt, after }) => {
                self.schedule_retry(task_id, attempt, after)
            }
            Ok(_) => {}
            // Nothing about this attempt could be recorded; it still spends
            // one retry so a lasting outage ends the task.
            Err(e) => match self.policy.decide(attempt, &e) {
                RetryDecision::Retry { attempt: next, after } => {
                    warn!(
                        "task {}: delivery failed, redelivering as attempt {} in {:?}: {}",
                        task_id, next, after, e
                    );
                    self.schedule_retry(task_id, next, after);
                }
                RetryDecision::GiveUp => error!("task {}: delivery dropped: {}", task_id, e),
            },
        }
        self.outstanding.done();
    }

    fn schedule_retry(&self, task_id: String, attempt: u32, after: Duration) {
        self.outstanding.add();
        let tx = self.queue_tx.clone();
        let outstanding = Arc::clone(&self.outstanding);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if tx.send(Delivery { task_id, attempt }).is_err() {
                outstanding.done();
            }
        });
    }

    /// Handle one delivery of `task_id`. Scheduling a retry is left to the
    /// caller.
    pub async fn process_delivery(&self, task_id: &str) -> Result<DeliveryOutcome, ValidatorError> {
        self.deliver(task_id, 1).await
    }

    async fn deliver(
        &self,
        task_id: &str,
        expected_attempt: u32,
    ) -> Result<DeliveryOutcome, ValidatorError> {
        let _guard = {
            let mut set = self
                .in_flight
                .lock()
                .map_err(|_| ValidatorError::Internal("in-flight set poisoned".into()))?;
            if !set.insert(task_id.to_string()) {
                warn!("task {}: attempt already running, delivery skipped", task_id);
                return Ok(DeliveryOutcome::Skipped);
            }
            InFlight {
                set: &self.in_flight,
                task_id: task_id.to_string(),
            }
        };

        let mut task = self
            .repo
            .get_task(task_id)
            .await?
            .ok_or_else(|| ValidatorError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        if task.status == TaskStatus::Cancelled {
            info!("task {}: cancelled, delivery skipped", task_id);
            return Ok(DeliveryOutcome::Skipped);
        }

        task.start()?;
        if expected_attempt > task.retry_count + 1 {
            // a requeue update was lost; resume the count the manager kept
            task.retry_count = expected_attempt - 1;
        }
        let attempt = task.retry_count + 1;
        self.repo.update_task(&task).await?;
        if let Some(cb) = &self.progress {
            cb.on_task_start(task_id, attempt);
        }

        let span = info_span!("attempt", task_id = %task_id, attempt);
        let result = async {
            info!("attempt started");
            match tokio::time::timeout(self.attempt_timeout, self.executor.execute(&task)).await {
                Ok(result) => result,
                Err(_) => Err(ValidatorError::AttemptTimeout {
                    secs: self.attempt_timeout.as_secs(),
                }),
            }
        }
        .instrument(span)
        .await;

        let summary = match result {
            Ok(summary) => summary,
            Err(err) => return self.attempt_failed(task, attempt, err).await,
        };

        let page_count = summary.page_count;
        let mut done = task.clone();
        done.complete(summary)?;
        if let Err(err) = self.repo.update_task(&done).await {
            warn!("task {}: completion not recorded: {}", task_id, err);
            return self.attempt_failed(task, attempt, err).await;
        }
        info!("task {}: completed on attempt {}", task_id, attempt);
        if let Some(cb) = &self.progress {
            cb.on_task_complete(task_id, page_count);
        }
        Ok(DeliveryOutcome::Completed)
    }

    async fn attempt_failed(
        &self,
        mut task: ValidationTask,
        attempt: u32,
        err: ValidatorError,
    ) -> Result<DeliveryOutcome, ValidatorError> {
        let task_id = task.task_id.clone();
        let cause = err.to_string();
        if let Some(cb) = &self.progress {
            cb.on_attempt_failed(&task_id, attempt, &cause);
        }

        let policy = RetryPolicy {
            max_retries: task.max_retries,
            ..self.policy
        };
        match policy.decide(attempt, &err) {
            RetryDecision::Retry { attempt: next, after } => {
                warn!(
                    "task {}: attempt {} failed, retry {}/{} in {:?}: {}",
                    task_id, attempt, attempt, task.max_retries, after, cause
                );
                task.requeue(cause)?;
                if let Err(e) = self.repo.update_task(&task).await {
                    // the delivery carries the attempt number forward
                    warn!("task {}: requeue not recorded: {}", task_id, e);
                }
                Ok(DeliveryOutcome::Retrying {
                    attempt: next,
                    after,
                })
            }
            RetryDecision::GiveUp => {
                let message = if err.is_retryable() {
                    ValidatorError::RetryBudgetExceeded {
                        task_id: task_id.clone(),
                        attempts: attempt,
                        last_error: cause,
                    }
                    .to_string()
                } else {
                    cause
                };
                error!("task {}: failed: {}", task_id, message);
                task.fail(message.clone())?;
                self.repo.update_task(&task).await?;
                if let Some(cb) = &self.progress {
                    cb.on_task_failed(&task_id, &message);
                }
                Ok(DeliveryOutcome::Failed { message })
            }
        }
    }
}
