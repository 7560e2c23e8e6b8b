//! Handler registry mapping task types to handlers.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::tasks::Task;

/// Task type used when a task has no dedicated handler.
pub const DEFAULT_HANDLER: &str = "default";

/// Performs the work for one task type.
///
/// The returned string becomes the task's `result`; an error becomes its
/// `error`.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> anyhow::Result<String>;
}

/// Adapter turning an async closure into a [`TaskHandler`].
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F, Fut>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    async fn handle(&self, task: &Task) -> anyhow::Result<String> {
        (self.f)(task.clone()).await
    }
}

/// Replies `Echo: <description>`.
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, task: &Task) -> anyhow::Result<String> {
        Ok(format!("Echo: {}", task.description))
    }
}

/// Registry of task handlers, owned by whoever runs the poller.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for `task_type`.
    pub async fn register(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        if self
            .handlers
            .write()
            .await
            .insert(task_type.clone(), handler)
            .is_some()
        {
            tracing::debug!(task_type = %task_type, "Replaced task handler");
        } else {
            tracing::debug!(task_type = %task_type, "Registered task handler");
        }
    }

    /// Register an async closure.
    pub async fn register_fn<F, Fut>(&self, task_type: impl Into<String>, f: F)
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        self.register(task_type, Arc::new(FnHandler::new(f))).await;
    }

    pub async fn unregister(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.write().await.remove(task_type)
    }

    /// Handler for `task_type`, falling back to [`DEFAULT_HANDLER`].
    pub async fn resolve(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        let handlers = self.handlers.read().await;
        handlers
            .get(task_type)
            .or_else(|| handlers.get(DEFAULT_HANDLER))
            .cloned()
    }

    pub async fn has(&self, task_type: &str) -> bool {
        self.handlers.read().await.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
