//! Team chat and direct messages.
//!
//! Both are plain append-only projections of the store. Channel messages
//! are scoped to a project; direct messages are addressed by worker name
//! and carry a read marker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::ChatError;
use crate::session::Identity;
use crate::store::{Filter, Query, Record, StoreClient, collections};

/// Default page size for `recent`.
pub const DEFAULT_CHAT_LIMIT: usize = 20;

/// Default page size for `dms`.
pub const DEFAULT_DM_LIMIT: usize = 50;

/// A message in a project channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub author: String,
    pub message: String,
    #[serde(default)]
    pub project: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for ChatMessage {
    const COLLECTION: &'static str = collections::CHAT_MESSAGES;
}

/// A message from one worker to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub id: Uuid,
    pub from_author: String,
    pub to_author: String,
    pub message: String,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Record for DirectMessage {
    const COLLECTION: &'static str = collections::DIRECT_MESSAGES;
}

impl DirectMessage {
    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }
}

#[derive(Serialize)]
struct ChatInsert<'a> {
    author: &'a str,
    message: &'a str,
    project: Option<&'a str>,
}

#[derive(Serialize)]
struct DmInsert<'a> {
    from_author: &'a str,
    to_author: &'a str,
    message: &'a str,
}

/// Chat access for one worker.
#[derive(Clone)]
pub struct Chat {
    client: StoreClient,
    identity: Arc<Identity>,
}

impl Chat {
    pub fn new(client: StoreClient, identity: Arc<Identity>) -> Self {
        Self { client, identity }
    }

    /// Post to the active project's channel.
    ///
    /// Blocked locally when the worker is assigned to a different project,
    /// unless `force` is set.
    pub async fn send(&self, message: &str, force: bool) -> Result<ChatMessage, ChatError> {
        let project = self.identity.check_scope(force)?;
        let row = ChatInsert {
            author: self.identity.name(),
            message,
            project: project.as_deref(),
        };
        let sent: ChatMessage = self.client.create(&row).await?;
        info!(project = project.as_deref().unwrap_or("-"), "Sent chat message");
        Ok(sent)
    }

    /// The newest `limit` messages of the active channel, oldest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, ChatError> {
        let query = Query::new()
            .eq_opt("project", self.identity.scope())
            .order_desc("created_at")
            .limit(limit);
        let mut messages: Vec<ChatMessage> = self.client.query(&query).await?;
        messages.reverse();
        Ok(messages)
    }

    pub async fn send_dm(&self, to: &str, message: &str) -> Result<DirectMessage, ChatError> {
        let row = DmInsert {
            from_author: self.identity.name(),
            to_author: to,
            message,
        };
        let sent: DirectMessage = self.client.create(&row).await?;
        info!(to = %to, "Sent direct message");
        Ok(sent)
    }

    /// Direct messages to or from this worker, newest first.
    pub async fn dms(&self, limit: usize) -> Result<Vec<DirectMessage>, ChatError> {
        let me = self.identity.name();
        let query = Query::new()
            .or(vec![
                Filter::eq("from_author", me),
                Filter::eq("to_author", me),
            ])
            .order_desc("created_at")
            .limit(limit);
        Ok(self.client.query(&query).await?)
    }

    /// Unread messages addressed to this worker, newest first.
    pub async fn unread_dms(&self) -> Result<Vec<DirectMessage>, ChatError> {
        let query = Query::new()
            .eq("to_author", self.identity.name())
            .is_null("read_at")
            .order_desc("created_at");
        Ok(self.client.query(&query).await?)
    }

    /// Mark one of this worker's incoming messages read. Returns `false` if
    /// it was not found or already read.
    pub async fn mark_read(&self, id: Uuid) -> Result<bool, ChatError> {
        let query = Query::new()
            .eq("id", id.to_string())
            .eq("to_author", self.identity.name())
            .is_null("read_at");
        let rows: Vec<DirectMessage> = self
            .client
            .patch(&query, &json!({ "read_at": Utc::now() }))
            .await?;
        Ok(!rows.is_empty())
    }
}
