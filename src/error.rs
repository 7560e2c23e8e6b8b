//! Error types for agent-colab.

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("{0}")]
    Scope(#[from] ScopeViolation),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Any failure talking to the backend.
///
/// Transport failures, timeouts, non-2xx responses and undecodable payloads
/// all collapse into this one type. `status` is only set when the server
/// actually answered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}{message}", status_prefix(.status))]
pub struct RemoteError {
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    /// Non-2xx answer from the backend.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Network, TLS or timeout failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Payload did not match the expected record shape.
    pub fn decode(collection: &str, err: impl std::fmt::Display) -> Self {
        Self {
            status: None,
            message: format!("could not decode {collection} record: {err}"),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::http(status.as_u16(), err.to_string()),
            None if err.is_timeout() => Self::transport(format!("request timed out: {err}")),
            None => Self::transport(err.to_string()),
        }
    }
}

fn status_prefix(status: &Option<u16>) -> String {
    status.map(|code| format!("HTTP {code}: ")).unwrap_or_default()
}

/// Credential / session errors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("No API key found (argument, environment or config file)")]
    MissingCredential,

    #[error("API key was rejected by the backend")]
    InvalidCredential,

    #[error("Not connected")]
    NotConnected,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Attempt to write into a project other than the assigned one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Blocked: assigned to '{assigned}' but tried to post to '{attempted}'")]
pub struct ScopeViolation {
    pub assigned: String,
    pub attempted: String,
}

/// Task queue errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Task {id} could not be claimed: status is {status}{}", holder_suffix(.claimed_by))]
    ClaimConflict {
        id: Uuid,
        status: String,
        claimed_by: Option<String>,
    },

    #[error("Task {id} is {from}, cannot transition to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Scope(#[from] ScopeViolation),
}

fn holder_suffix(claimed_by: &Option<String>) -> String {
    claimed_by
        .as_ref()
        .map(|w| format!(", held by {w}"))
        .unwrap_or_default()
}

/// Knowledge log errors.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Scope(#[from] ScopeViolation),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Chat and direct-message errors.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Scope(#[from] ScopeViolation),
}

/// Local knowledge snapshot errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("No cache file at {path} - sync first")]
    Missing { path: String },

    #[error("Cache file {path} is unreadable: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_display_includes_status() {
        let err = RemoteError::http(409, "conflict");
        assert_eq!(err.to_string(), "HTTP 409: conflict");

        let err = RemoteError::transport("connection refused");
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn claim_conflict_mentions_holder() {
        let err = TaskError::ClaimConflict {
            id: Uuid::nil(),
            status: "claimed".into(),
            claimed_by: Some("G".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("status is claimed"));
        assert!(msg.contains("held by G"));
    }

    #[test]
    fn scope_violation_message() {
        let err = ScopeViolation {
            assigned: "medieval-game".into(),
            attempted: "claude-colab".into(),
        };
        assert!(err.to_string().contains("assigned to 'medieval-game'"));
    }
}
