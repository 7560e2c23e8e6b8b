//! Task queue: post, claim, start, complete/fail, soft-delete.
//!
//! Every status change is a guarded update: the store only applies it when
//! the row is still in an allowed source status, so two workers racing for
//! the same task cannot both win. An empty update result means the guard
//! failed; the task is then re-read to report why.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TaskError;
use crate::session::Identity;
use crate::store::{Filter, Query, StoreClient};
use crate::tasks::model::{NewTask, Task, TaskInsert, TaskStats, TaskStatus};

/// Number of recent tasks `stats` aggregates over.
pub const STATS_WINDOW: usize = 1000;

/// Shared task queue as seen by one worker.
#[derive(Clone)]
pub struct TaskQueue {
    client: StoreClient,
    identity: Arc<Identity>,
}

impl TaskQueue {
    pub fn new(client: StoreClient, identity: Arc<Identity>) -> Self {
        Self { client, identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Live tasks in the active scope.
    fn scoped(&self) -> Query {
        Query::new()
            .is_null("deleted_at")
            .eq_opt("project", self.identity.scope())
    }

    /// Post a new `pending` task. Never merges with existing tasks.
    pub async fn post(&self, new: NewTask) -> Result<Task, TaskError> {
        let project = self.identity.check_scope(new.force_scope)?;
        let row = TaskInsert {
            from_author: self.identity.name(),
            to_target: new.to_target.as_deref(),
            task_type: new.task_type.as_deref(),
            description: &new.description,
            priority: new.priority,
            status: TaskStatus::Pending,
            project: project.as_deref(),
        };
        let task: Task = self.client.create(&row).await?;
        info!(
            task_id = %task.id,
            priority = task.priority,
            target = task.to_target.as_deref().unwrap_or("anyone"),
            "Posted task"
        );
        Ok(task)
    }

    /// Pending tasks, most urgent first, oldest first within a priority.
    ///
    /// With `scope_to_self`, only tasks addressed to this worker or to
    /// anyone are returned.
    pub async fn pending(&self, scope_to_self: bool) -> Result<Vec<Task>, TaskError> {
        let mut query = self.scoped().eq("status", TaskStatus::Pending.as_str());
        if scope_to_self {
            query = query.or(vec![
                Filter::eq("to_target", self.identity.name()),
                Filter::is_null("to_target"),
            ]);
        }
        let query = query.order_asc("priority").order_asc("created_at");
        Ok(self.client.query(&query).await?)
    }

    /// Claim a pending task for this worker.
    ///
    /// Compare-and-swap: succeeds only if the task is still `pending` and
    /// unclaimed at the moment of the write.
    pub async fn claim(&self, id: Uuid) -> Result<Task, TaskError> {
        let me = self.identity.name();
        let task = self
            .transition(
                id,
                TaskStatus::Claimed,
                Query::new().is_null("claimed_by"),
                json!({
                    "status": TaskStatus::Claimed,
                    "claimed_by": me,
                    "claimed_at": Utc::now(),
                }),
            )
            .await?;
        info!(task_id = %id, worker = %me, "Claimed task");
        Ok(task)
    }

    /// Mark a task this worker holds as `in_progress`.
    pub async fn start(&self, id: Uuid) -> Result<Task, TaskError> {
        self.transition(
            id,
            TaskStatus::InProgress,
            Query::new().eq("claimed_by", self.identity.name()),
            json!({ "status": TaskStatus::InProgress }),
        )
        .await
    }

    /// Finish a claimed or in-progress task with a result.
    pub async fn complete(&self, id: Uuid, result: &str) -> Result<Task, TaskError> {
        let task = self
            .transition(
                id,
                TaskStatus::Done,
                Query::new(),
                json!({
                    "status": TaskStatus::Done,
                    "result": result,
                    "completed_at": Utc::now(),
                }),
            )
            .await?;
        info!(task_id = %id, "Completed task");
        Ok(task)
    }

    /// Mark a non-terminal task as failed.
    pub async fn fail(&self, id: Uuid, error: &str) -> Result<Task, TaskError> {
        let task = self
            .transition(
                id,
                TaskStatus::Failed,
                Query::new(),
                json!({
                    "status": TaskStatus::Failed,
                    "error": error,
                    "completed_at": Utc::now(),
                }),
            )
            .await?;
        info!(task_id = %id, error = %error, "Failed task");
        Ok(task)
    }

    /// Soft-delete a task in any status.
    pub async fn delete(&self, id: Uuid) -> Result<Task, TaskError> {
        let query = Query::new().eq("id", id.to_string()).is_null("deleted_at");
        let mut rows: Vec<Task> = self
            .client
            .patch(&query, &json!({ "deleted_at": Utc::now() }))
            .await?;
        let task = rows.pop().ok_or(TaskError::NotFound { id })?;
        info!(task_id = %id, "Deleted task");
        Ok(task)
    }

    /// Fetch a live task by id.
    pub async fn get(&self, id: Uuid) -> Result<Task, TaskError> {
        let query = Query::new().eq("id", id.to_string()).is_null("deleted_at");
        self.client
            .find(query)
            .await?
            .ok_or(TaskError::NotFound { id })
    }

    /// Tasks in the active scope, newest first.
    pub async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, TaskError> {
        let query = self
            .scoped()
            .eq_opt("status", status.map(|s| s.as_str()))
            .order_desc("created_at");
        Ok(self.client.query(&query).await?)
    }

    /// Tasks currently claimed but not yet started.
    pub async fn claimed(&self) -> Result<Vec<Task>, TaskError> {
        self.list(Some(TaskStatus::Claimed)).await
    }

    /// Tasks posted by other workers, newest first.
    pub async fn from_other(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, TaskError> {
        let query = self
            .scoped()
            .neq("from_author", self.identity.name())
            .eq_opt("status", status.map(|s| s.as_str()))
            .order_desc("created_at");
        Ok(self.client.query(&query).await?)
    }

    /// Tasks this worker posted, newest first.
    pub async fn my_posts(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, TaskError> {
        let query = self
            .scoped()
            .eq("from_author", self.identity.name())
            .eq_opt("status", status.map(|s| s.as_str()))
            .order_desc("created_at");
        Ok(self.client.query(&query).await?)
    }

    /// Counts over the most recent [`STATS_WINDOW`] tasks.
    pub async fn stats(&self) -> Result<TaskStats, TaskError> {
        let query = self.scoped().order_desc("created_at").limit(STATS_WINDOW);
        let tasks: Vec<Task> = self.client.query(&query).await?;
        Ok(TaskStats::from_tasks(&tasks))
    }

    /// Workers currently holding a claimed or in-progress task.
    pub async fn active_workers(&self) -> Result<Vec<String>, TaskError> {
        let query = self
            .scoped()
            .in_list(
                "status",
                [TaskStatus::Claimed.as_str(), TaskStatus::InProgress.as_str()],
            )
            .not_null("claimed_by");
        let tasks: Vec<Task> = self.client.query(&query).await?;
        let workers: BTreeSet<String> = tasks.into_iter().filter_map(|t| t.claimed_by).collect();
        Ok(workers.into_iter().collect())
    }

    /// Guarded status change: applies `fields` only if the task is live and
    /// in a status that may move to `target`, plus any `extra` conditions.
    async fn transition(
        &self,
        id: Uuid,
        target: TaskStatus,
        extra: Query,
        fields: Value,
    ) -> Result<Task, TaskError> {
        let sources: Vec<&str> = TaskStatus::sources_of(target)
            .iter()
            .map(|s| s.as_str())
            .collect();
        let mut query = Query::new()
            .eq("id", id.to_string())
            .is_null("deleted_at")
            .in_list("status", sources);
        query.conditions.extend(extra.conditions);

        let mut rows: Vec<Task> = self.client.patch(&query, &fields).await?;
        if let Some(task) = rows.pop() {
            debug!(task_id = %id, status = %task.status, "Task transitioned");
            return Ok(task);
        }

        // Guard failed: explain why from the current row
        let current = self.get(id).await?;
        warn!(
            task_id = %id,
            status = %current.status,
            target = %target,
            claimed_by = current.claimed_by.as_deref().unwrap_or("-"),
            "Task transition rejected"
        );
        if target == TaskStatus::Claimed
            || (current.status.can_transition_to(target)
                && current.claimed_by.as_deref() != Some(self.identity.name()))
        {
            return Err(TaskError::ClaimConflict {
                id,
                status: current.status.to_string(),
                claimed_by: current.claimed_by,
            });
        }
        Err(TaskError::InvalidTransition {
            id,
            from: current.status.to_string(),
            to: target.to_string(),
        })
    }
}
