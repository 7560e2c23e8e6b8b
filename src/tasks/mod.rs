//! Task queue: lifecycle state machine over the shared `tasks` collection.

pub mod model;
pub mod queue;

pub use model::{DEFAULT_PRIORITY, NewTask, Task, TaskStats, TaskStatus};
pub use queue::TaskQueue;
