//! Agent Colab: task coordination and knowledge exchange between
//! independent workers over a shared remote store.

pub mod chat;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod knowledge;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod tasks;
