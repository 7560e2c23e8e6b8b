//! Worker identity and project scope.

use std::sync::RwLock;

use crate::error::ScopeViolation;

/// Who this worker is and which project it writes into.
///
/// Shared by the task queue, knowledge log and chat of one session so a
/// scope switch is seen by all of them.
#[derive(Debug)]
pub struct Identity {
    name: String,
    team_id: Option<String>,
    scope: RwLock<Option<String>>,
    assigned: RwLock<Option<String>>,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team_id: None,
            scope: RwLock::new(None),
            assigned: RwLock::new(None),
        }
    }

    /// Builder: set the active project slug.
    pub fn with_scope(self, slug: impl Into<String>) -> Self {
        self.set_scope(slug);
        self
    }

    /// Builder: set the team the key belongs to.
    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn team_id(&self) -> Option<&str> {
        self.team_id.as_deref()
    }

    /// Active project slug, if any.
    pub fn scope(&self) -> Option<String> {
        read(&self.scope)
    }

    pub fn set_scope(&self, slug: impl Into<String>) {
        write(&self.scope, Some(slug.into()));
    }

    /// Project this worker is assigned to server-side, if any.
    pub fn assigned_scope(&self) -> Option<String> {
        read(&self.assigned)
    }

    pub fn set_assigned_scope(&self, slug: Option<String>) {
        write(&self.assigned, slug);
    }

    /// Scope to stamp on a new record.
    ///
    /// Fails when an assignment exists and the active scope differs from it,
    /// unless `force` is set.
    pub fn check_scope(&self, force: bool) -> Result<Option<String>, ScopeViolation> {
        let active = self.scope();
        if force {
            return Ok(active);
        }
        match self.assigned_scope() {
            Some(assigned) if active.as_deref() != Some(assigned.as_str()) => {
                let attempted = active.unwrap_or_else(|| "(none)".to_string());
                tracing::warn!(
                    worker = %self.name,
                    assigned = %assigned,
                    attempted = %attempted,
                    "Blocked write outside assigned project"
                );
                Err(ScopeViolation {
                    assigned,
                    attempted,
                })
            }
            _ => Ok(active),
        }
    }
}

fn read(lock: &RwLock<Option<String>>) -> Option<String> {
    lock.read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn write(lock: &RwLock<Option<String>>, value: Option<String>) {
    *lock.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
}
