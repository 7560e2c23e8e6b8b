//! Poll-and-process loop.
//!
//! One cycle fetches the tasks this worker may claim, picks the most urgent
//! one and runs it through claim → start → handler → complete/fail. The
//! loop is single-task and cooperative: a slow handler delays the next
//! poll. Run several workers for concurrency; the claim guard keeps them
//! from doing the same task twice.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatch::registry::HandlerRegistry;
use crate::error::TaskError;
use crate::tasks::{Task, TaskQueue};

/// What happened to the task a cycle picked.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Handler succeeded; the task is `done`.
    Completed(Task),
    /// Handler failed, panicked or was missing; the task is `failed`.
    Failed(Task),
    /// Another worker got there first, or the task left `pending`.
    ClaimLost { task_id: Uuid, reason: String },
}

impl ProcessOutcome {
    pub fn task_id(&self) -> Uuid {
        match self {
            Self::Completed(task) | Self::Failed(task) => task.id,
            Self::ClaimLost { task_id, .. } => *task_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::ClaimLost { .. } => "claim_lost",
        }
    }
}

/// Cooperative stop signal shared between a poller and its owner.
#[derive(Debug, Default)]
pub struct Shutdown {
    flag: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask the loop to stop. In-flight handler work is not interrupted.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless triggered first. Returns `false` when
    /// woken by a trigger.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_triggered() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = &mut notified => false,
        }
    }
}

/// Runs registered handlers against the task queue.
#[derive(Clone)]
pub struct Poller {
    queue: TaskQueue,
    registry: Arc<HandlerRegistry>,
    shutdown: Arc<Shutdown>,
}

impl Poller {
    pub fn new(queue: TaskQueue, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            queue,
            registry,
            shutdown: Shutdown::new(),
        }
    }

    /// Builder: share an existing stop signal.
    pub fn with_shutdown(mut self, shutdown: Arc<Shutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown(&self) -> Arc<Shutdown> {
        Arc::clone(&self.shutdown)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Claim, start, run the handler and record the result.
    ///
    /// Handler errors and panics end in `fail`; they are never returned as
    /// `Err`. Only store failures are.
    pub async fn process_task(&self, task: &Task) -> Result<ProcessOutcome, TaskError> {
        let id = task.id;
        match self.queue.claim(id).await {
            Ok(_) => {}
            Err(e @ (TaskError::ClaimConflict { .. }
            | TaskError::InvalidTransition { .. }
            | TaskError::NotFound { .. })) => {
                info!(task_id = %id, reason = %e, "Skipping task");
                return Ok(ProcessOutcome::ClaimLost {
                    task_id: id,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
        let task = match self.queue.start(id).await {
            Ok(task) => task,
            Err(e) => return Err(self.release(id, e).await),
        };

        let Some(handler) = self.registry.resolve(task.kind()).await else {
            let message = format!("No handler registered for task_type '{}'", task.kind());
            warn!(task_id = %id, task_type = %task.kind(), "No handler for task");
            let failed = self.queue.fail(id, &message).await?;
            return Ok(ProcessOutcome::Failed(failed));
        };

        debug!(task_id = %id, task_type = %task.kind(), "Running handler");
        let run = AssertUnwindSafe(handler.handle(&task)).catch_unwind().await;
        let message = match run {
            Ok(Ok(result)) => {
                return match self.queue.complete(id, &result).await {
                    Ok(done) => Ok(ProcessOutcome::Completed(done)),
                    Err(e) => Err(self.release(id, e).await),
                };
            }
            Ok(Err(e)) => format!("Handler error: {e:#}"),
            Err(panic) => format!("Handler panicked: {}", panic_message(panic.as_ref())),
        };
        warn!(task_id = %id, error = %message, "Handler failed");
        let failed = self.queue.fail(id, &message).await?;
        Ok(ProcessOutcome::Failed(failed))
    }

    /// Store failure after a successful claim: mark the task failed so it
    /// does not stay held forever, then hand the original error back.
    async fn release(&self, id: Uuid, err: TaskError) -> TaskError {
        error!(task_id = %id, error = %err, "Store failure while holding task");
        if let Err(fail_err) = self.queue.fail(id, &format!("Store error: {err}")).await {
            error!(task_id = %id, error = %fail_err, "Could not release task");
        }
        err
    }

    /// Process the single most urgent claimable task, if any.
    pub async fn poll_once(&self) -> Result<Option<ProcessOutcome>, TaskError> {
        let mut pending = self.queue.pending(true).await?;
        if pending.is_empty() {
            return Ok(None);
        }
        // Stable, so creation order still breaks ties
        pending.sort_by_key(|t| t.priority);
        let outcome = self.process_task(&pending[0]).await?;
        Ok(Some(outcome))
    }

    /// [`poll_with`](Self::poll_with) without an observer.
    pub async fn poll(
        &self,
        interval: Duration,
        max_iterations: Option<u64>,
    ) -> Vec<ProcessOutcome> {
        self.poll_with(interval, max_iterations, |_| {}).await
    }

    /// Poll until `max_iterations` cycles have run or shutdown is triggered.
    ///
    /// A failed cycle is logged and the loop carries on. Outcomes are
    /// collected only when the loop is bounded.
    pub async fn poll_with<F>(
        &self,
        interval: Duration,
        max_iterations: Option<u64>,
        mut on_result: F,
    ) -> Vec<ProcessOutcome>
    where
        F: FnMut(&ProcessOutcome) + Send,
    {
        info!(interval_secs = interval.as_secs_f64(), "Starting task poll");
        let mut outcomes = Vec::new();
        let mut iteration: u64 = 0;

        loop {
            if self.shutdown.is_triggered() {
                info!(iteration, "Task poll shutting down");
                break;
            }
            if max_iterations.is_some_and(|max| iteration >= max) {
                break;
            }
            iteration += 1;

            match self.poll_once().await {
                Ok(Some(outcome)) => {
                    info!(
                        task_id = %outcome.task_id(),
                        outcome = outcome.label(),
                        "Processed task"
                    );
                    on_result(&outcome);
                    if max_iterations.is_some() {
                        outcomes.push(outcome);
                    }
                }
                Ok(None) => debug!(iteration, "No pending tasks"),
                Err(e) => error!(iteration, error = %e, "Poll cycle failed"),
            }

            if max_iterations.is_some_and(|max| iteration >= max) {
                break;
            }
            if !self.shutdown.sleep(interval).await {
                info!(iteration, "Task poll interrupted");
                break;
            }
        }
        outcomes
    }

    /// Run the loop on a background task.
    ///
    /// Returns the handle and the stop signal. Trigger it to stop polling.
    pub fn spawn(
        self,
        interval: Duration,
        max_iterations: Option<u64>,
    ) -> (JoinHandle<Vec<ProcessOutcome>>, Arc<Shutdown>) {
        let shutdown = self.shutdown();
        let handle = tokio::spawn(async move { self.poll(interval, max_iterations).await });
        (handle, shutdown)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
