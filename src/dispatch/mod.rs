//! Handler dispatch: task-type registry and the poll loop.

pub mod poller;
pub mod registry;

pub use poller::{Poller, ProcessOutcome, Shutdown};
pub use registry::{DEFAULT_HANDLER, EchoHandler, FnHandler, HandlerRegistry, TaskHandler};
