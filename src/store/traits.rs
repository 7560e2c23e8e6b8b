//! Backend trait: the single async seam between the coordination core and
//! whatever actually stores the collections.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RemoteError;
use crate::store::filter::Query;

/// Collection names shared by every backend.
pub mod collections {
    pub const TASKS: &str = "tasks";
    pub const KNOWLEDGE: &str = "knowledge";
    pub const CHAT_MESSAGES: &str = "chat_messages";
    pub const DIRECT_MESSAGES: &str = "direct_messages";
    pub const PROJECTS: &str = "projects";
}

/// Names of server-side procedures.
pub mod procedures {
    pub const VALIDATE_API_KEY: &str = "validate_api_key";
    pub const GET_MY_INSTANCE: &str = "get_my_instance";
    pub const GET_TEAM_PROJECTS: &str = "get_team_projects";
    pub const LOG_WORK: &str = "log_claude_work";
}

/// Untyped collection storage.
///
/// Every method is one round-trip with no retry. `update` must be a single
/// conditional write: only rows matching every condition of `query` are
/// modified, and exactly those rows are returned. Task claiming relies on
/// this for compare-and-swap.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Append a row and return it as stored (server defaults filled in).
    async fn insert(&self, collection: &str, row: Value) -> Result<Value, RemoteError>;

    /// Read rows matching `query`.
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, RemoteError>;

    /// Merge `fields` into every row matching `query`; return the updated rows.
    async fn update(
        &self,
        collection: &str,
        query: &Query,
        fields: Value,
    ) -> Result<Vec<Value>, RemoteError>;

    /// Count rows matching `query` without transferring them.
    async fn count(&self, collection: &str, query: &Query) -> Result<u64, RemoteError>;

    /// Invoke a named server-side procedure.
    async fn rpc(&self, procedure: &str, args: Value) -> Result<Value, RemoteError>;
}

/// A typed row of a collection.
pub trait Record: DeserializeOwned + Serialize + Send {
    const COLLECTION: &'static str;
}
