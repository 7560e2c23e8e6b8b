//! Worker session: credential validation, identity, project scope and the
//! entry points to the task queue, knowledge log and chat.

pub mod identity;

pub use identity::Identity;

use std::path::PathBuf;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::chat::Chat;
use crate::config::{ColabConfig, resolve_api_key};
use crate::error::{ConnectionError, RemoteError};
use crate::knowledge::{KnowledgeCache, KnowledgeLog};
use crate::store::{Query, Record, StoreClient, collections, procedures};
use crate::tasks::{TaskQueue, TaskStatus};

/// A project (channel) of the team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
}

impl Record for Project {
    const COLLECTION: &'static str = collections::PROJECTS;
}

/// Row returned by `validate_api_key`.
#[derive(Debug, Deserialize)]
struct KeyInfo {
    #[serde(default)]
    team_id: Option<String>,
    claude_name: String,
}

/// Row returned by `get_my_instance`.
#[derive(Debug, Deserialize)]
struct InstanceInfo {
    #[serde(default)]
    current_project_id: Option<String>,
}

/// Snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub connected: bool,
    pub name: Option<String>,
    pub team_id: Option<String>,
    pub scope: Option<String>,
    pub assigned_scope: Option<String>,
    pub knowledge_count: u64,
    pub pending_tasks: usize,
    pub total_tasks: usize,
}

/// One worker's connection to the shared store.
pub struct Session {
    client: StoreClient,
    default_project: String,
    cache_path: PathBuf,
    config_path: PathBuf,
    api_key: Option<SecretString>,
    identity: Option<Arc<Identity>>,
}

impl Session {
    pub fn new(client: StoreClient, config: &ColabConfig) -> Self {
        Self {
            client,
            default_project: config.project.clone(),
            cache_path: config.cache_path.clone(),
            config_path: config.config_path.clone(),
            api_key: None,
            identity: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.identity.is_some()
    }

    /// Connect with a credential. Failures are logged and reported as
    /// `false`.
    pub async fn connect(&mut self, token: Option<&str>) -> bool {
        self.connect_named(token, None).await
    }

    /// Like [`connect`](Self::connect), also checking the
    /// `COLAB_API_KEY_<NAME>` variable for `name`.
    pub async fn connect_named(&mut self, token: Option<&str>, name: Option<&str>) -> bool {
        match self.try_connect(token, name).await {
            Ok(identity) => {
                info!(
                    worker = %identity.name(),
                    project = identity.scope().as_deref().unwrap_or("-"),
                    assigned = identity.assigned_scope().is_some(),
                    "Connected"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "Connect failed");
                false
            }
        }
    }

    /// Resolve and validate a credential, adopt the identity it belongs to
    /// and switch to the assigned project if there is one.
    pub async fn try_connect(
        &mut self,
        token: Option<&str>,
        name: Option<&str>,
    ) -> Result<Arc<Identity>, ConnectionError> {
        let key = resolve_api_key(token, name, &self.config_path)
            .ok_or(ConnectionError::MissingCredential)?;

        let rows: Vec<KeyInfo> = self
            .client
            .rpc(
                procedures::VALIDATE_API_KEY,
                json!({ "p_key": key.expose_secret() }),
            )
            .await?;
        let info = rows
            .into_iter()
            .next()
            .ok_or(ConnectionError::InvalidCredential)?;

        let assigned = match self.assigned_project(&key).await {
            Ok(assigned) => assigned,
            Err(e) => {
                // Human keys have no instance record
                warn!(error = %e, "Could not load project assignment");
                None
            }
        };

        let mut identity = Identity::new(info.claude_name)
            .with_scope(assigned.clone().unwrap_or_else(|| self.default_project.clone()));
        if let Some(team_id) = info.team_id {
            identity = identity.with_team(team_id);
        }
        identity.set_assigned_scope(assigned);
        let identity = Arc::new(identity);

        self.api_key = Some(key);
        self.identity = Some(Arc::clone(&identity));

        let details = json!({ "project": identity.scope() });
        if let Err(e) = self.log_work("connected", details).await {
            warn!(error = %e, "Could not log connection");
        }
        Ok(identity)
    }

    /// Adopt `author` without credential validation.
    pub fn connect_as(&mut self, author: impl Into<String>) -> Arc<Identity> {
        let identity = Arc::new(Identity::new(author).with_scope(self.default_project.clone()));
        info!(worker = %identity.name(), "Connected without key validation");
        self.api_key = None;
        self.identity = Some(Arc::clone(&identity));
        identity
    }

    async fn assigned_project(&self, key: &SecretString) -> Result<Option<String>, RemoteError> {
        let rows: Vec<InstanceInfo> = self
            .client
            .rpc(
                procedures::GET_MY_INSTANCE,
                json!({ "p_api_key": key.expose_secret() }),
            )
            .await?;
        let Some(project_id) = rows.into_iter().find_map(|r| r.current_project_id) else {
            return Ok(None);
        };
        let project: Option<Project> = self.client.find(Query::new().eq("id", project_id)).await?;
        Ok(project.map(|p| p.slug))
    }

    pub fn identity(&self) -> Result<Arc<Identity>, ConnectionError> {
        self.identity.clone().ok_or(ConnectionError::NotConnected)
    }

    /// Switch the active project.
    pub fn set_scope(&mut self, slug: impl Into<String>) {
        let slug = slug.into();
        info!(project = %slug, "Active project");
        match &self.identity {
            Some(identity) => identity.set_scope(slug),
            None => self.default_project = slug,
        }
    }

    pub fn scope(&self) -> String {
        self.identity
            .as_ref()
            .and_then(|i| i.scope())
            .unwrap_or_else(|| self.default_project.clone())
    }

    pub fn assigned_scope(&self) -> Option<String> {
        self.identity.as_ref().and_then(|i| i.assigned_scope())
    }

    pub fn tasks(&self) -> Result<TaskQueue, ConnectionError> {
        Ok(TaskQueue::new(self.client.clone(), self.identity()?))
    }

    pub fn knowledge(&self) -> Result<KnowledgeLog, ConnectionError> {
        Ok(KnowledgeLog::new(
            self.client.clone(),
            self.identity()?,
            KnowledgeCache::new(self.cache_path.clone()),
        ))
    }

    pub fn chat(&self) -> Result<Chat, ConnectionError> {
        Ok(Chat::new(self.client.clone(), self.identity()?))
    }

    /// Projects (channels) of the team.
    pub async fn projects(&self) -> Result<Vec<Project>, ConnectionError> {
        let identity = self.identity()?;
        match &self.api_key {
            Some(key) => Ok(self
                .client
                .rpc(
                    procedures::GET_TEAM_PROJECTS,
                    json!({ "p_api_key": key.expose_secret() }),
                )
                .await?),
            None => {
                let query = Query::new()
                    .eq_opt("team_id", identity.team_id())
                    .order_asc("slug");
                Ok(self.client.query(&query).await?)
            }
        }
    }

    /// Append to this worker's work log. Returns the backend's verdict.
    pub async fn log_work(&self, action: &str, details: Value) -> Result<bool, ConnectionError> {
        self.identity()?;
        let key = self.api_key.as_ref().ok_or(ConnectionError::MissingCredential)?;
        let logged: bool = self
            .client
            .rpc(
                procedures::LOG_WORK,
                json!({
                    "p_api_key": key.expose_secret(),
                    "p_action": action,
                    "p_project_slug": self.scope(),
                    "p_details": details,
                }),
            )
            .await?;
        if logged {
            info!(action = %action, "Logged work");
        } else {
            warn!(action = %action, "Work log rejected");
        }
        Ok(logged)
    }

    /// Connection state plus queue and knowledge counts.
    pub async fn status(&self) -> crate::error::Result<SessionStatus> {
        let Some(identity) = &self.identity else {
            return Ok(SessionStatus {
                connected: false,
                name: None,
                team_id: None,
                scope: None,
                assigned_scope: None,
                knowledge_count: 0,
                pending_tasks: 0,
                total_tasks: 0,
            });
        };
        let tasks = self.tasks()?.list(None).await?;
        let knowledge_count = self.knowledge()?.count(None, None).await?;
        Ok(SessionStatus {
            connected: true,
            name: Some(identity.name().to_string()),
            team_id: identity.team_id().map(String::from),
            scope: identity.scope(),
            assigned_scope: identity.assigned_scope(),
            knowledge_count,
            pending_tasks: tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .count(),
            total_tasks: tasks.len(),
        })
    }
}
