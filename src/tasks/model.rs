//! Task data model and lifecycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{Record, collections};

/// Mid-range priority used when none is given (1 = urgent, 10 = low).
pub const DEFAULT_PRIORITY: i32 = 5;

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// Lifecycle status.
///
/// `pending → claimed → in_progress → {done | failed}`; `start` may be
/// skipped (`claimed → done`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Claimed) | (Pending, Failed) |
            (Claimed, InProgress) | (Claimed, Done) | (Claimed, Failed) |
            (InProgress, Done) | (InProgress, Failed)
        )
    }

    /// `done` and `failed` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Every status that may move to `target`.
    pub fn sources_of(target: TaskStatus) -> Vec<TaskStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }

    pub const ALL: [TaskStatus; 5] = [
        Self::Pending,
        Self::Claimed,
        Self::InProgress,
        Self::Done,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work in the shared queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Worker that posted the task.
    pub from_author: String,
    /// Intended claimant; `None` means anyone.
    #[serde(default)]
    pub to_target: Option<String>,
    /// Handler key; `None` routes to the `default` handler.
    #[serde(default)]
    pub task_type: Option<String>,
    pub description: String,
    /// Lower = more urgent.
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub status: TaskStatus,
    #[serde(default)]
    pub claimed_by: Option<String>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Project slug the task belongs to.
    #[serde(default)]
    pub project: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Record for Task {
    const COLLECTION: &'static str = collections::TASKS;
}

impl Task {
    /// Task type used for handler lookup.
    pub fn kind(&self) -> &str {
        self.task_type.as_deref().unwrap_or("default")
    }

    /// First eight characters of the id, for log lines.
    pub fn short_id(&self) -> String {
        self.id.to_string().chars().take(8).collect()
    }
}

/// Parameters for posting a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub description: String,
    pub to_target: Option<String>,
    pub task_type: Option<String>,
    pub priority: i32,
    /// Post even if the active scope differs from the assigned one.
    pub force_scope: bool,
}

impl NewTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            to_target: None,
            task_type: None,
            priority: DEFAULT_PRIORITY,
            force_scope: false,
        }
    }

    /// Builder: address a specific worker.
    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.to_target = Some(target.into());
        self
    }

    /// Builder: set the handler type.
    pub fn of_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    /// Builder: set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: bypass the assigned-scope check.
    pub fn force(mut self) -> Self {
        self.force_scope = true;
        self
    }
}

/// Row written by `post`.
#[derive(Debug, Serialize)]
pub(crate) struct TaskInsert<'a> {
    pub from_author: &'a str,
    pub to_target: Option<&'a str>,
    pub task_type: Option<&'a str>,
    pub description: &'a str,
    pub priority: i32,
    pub status: TaskStatus,
    pub project: Option<&'a str>,
}

/// Aggregate counts over a bounded window of recent tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub per_author: BTreeMap<String, usize>,
    pub per_status: BTreeMap<String, usize>,
}

impl TaskStats {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut stats = Self {
            total: tasks.len(),
            ..Self::default()
        };
        for task in tasks {
            *stats.per_author.entry(task.from_author.clone()).or_default() += 1;
            *stats
                .per_status
                .entry(task.status.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }
}
