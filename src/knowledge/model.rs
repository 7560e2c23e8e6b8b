//! Knowledge entry data model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{Record, collections};

/// Kind of knowledge shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    Snippet,
    Lesson,
    Discovery,
    BugFix,
    Pattern,
}

impl KnowledgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snippet => "snippet",
            Self::Lesson => "lesson",
            Self::Discovery => "discovery",
            Self::BugFix => "bug_fix",
            Self::Pattern => "pattern",
        }
    }
}

impl std::fmt::Display for KnowledgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, soft-deletable knowledge entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: Uuid,
    pub author: String,
    #[serde(rename = "type")]
    pub kind: KnowledgeType,
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Record for KnowledgeEntry {
    const COLLECTION: &'static str = collections::KNOWLEDGE;
}

impl KnowledgeEntry {
    /// Case-insensitive substring match over content and description.
    pub fn mentions(&self, needle_lower: &str) -> bool {
        self.content.to_lowercase().contains(needle_lower)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(needle_lower))
    }

    /// Like [`mentions`](Self::mentions), also checking tags.
    pub fn mentions_or_tagged(&self, needle_lower: &str) -> bool {
        self.mentions(needle_lower)
            || self
                .tags
                .iter()
                .any(|t| t.to_lowercase().contains(needle_lower))
    }
}

/// Parameters for saving an entry.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub content: String,
    pub kind: KnowledgeType,
    pub language: Option<String>,
    pub tags: Vec<String>,
    pub description: Option<String>,
    /// Save even if the active scope differs from the assigned one.
    pub force_scope: bool,
}

impl NewEntry {
    pub fn new(content: impl Into<String>, kind: KnowledgeType) -> Self {
        Self {
            content: content.into(),
            kind,
            language: None,
            tags: Vec::new(),
            description: None,
            force_scope: false,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn force(mut self) -> Self {
        self.force_scope = true;
        self
    }
}

/// Row written by `save`.
#[derive(Debug, Serialize)]
pub(crate) struct EntryInsert<'a> {
    pub author: &'a str,
    #[serde(rename = "type")]
    pub kind: KnowledgeType,
    pub content: &'a str,
    pub language: Option<&'a str>,
    pub tags: &'a [String],
    pub description: Option<&'a str>,
    pub project: Option<&'a str>,
}

/// Counts over a bounded window of recent entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KnowledgeStats {
    pub total: usize,
    pub per_author: BTreeMap<String, usize>,
    pub per_type: BTreeMap<String, usize>,
}

impl KnowledgeStats {
    pub fn from_entries(entries: &[KnowledgeEntry]) -> Self {
        let mut stats = Self {
            total: entries.len(),
            ..Self::default()
        };
        for entry in entries {
            *stats.per_author.entry(entry.author.clone()).or_default() += 1;
            *stats.per_type.entry(entry.kind.to_string()).or_default() += 1;
        }
        stats
    }
}

/// First `n` characters of `text`.
pub(crate) fn preview(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_field_is_renamed() {
        let entry: KnowledgeEntry = serde_json::from_value(json!({
            "id": "6f1d7c2e-8a4b-4c3d-9e2f-1a2b3c4d5e6f",
            "author": "G",
            "type": "bug_fix",
            "content": "Off-by-one in pager",
            "created_at": "2026-03-01T08:00:00Z"
        }))
        .unwrap();
        assert_eq!(entry.kind, KnowledgeType::BugFix);
        assert!(entry.tags.is_empty());
        assert!(entry.description.is_none());
    }

    #[test]
    fn mentions_is_case_insensitive() {
        let entry: KnowledgeEntry = serde_json::from_value(json!({
            "id": "6f1d7c2e-8a4b-4c3d-9e2f-1a2b3c4d5e6f",
            "author": "G",
            "type": "lesson",
            "content": "Always GLOB first",
            "description": "Backup Numbering",
            "tags": ["Files"],
            "created_at": "2026-03-01T08:00:00Z"
        }))
        .unwrap();
        assert!(entry.mentions("glob"));
        assert!(entry.mentions("numbering"));
        assert!(!entry.mentions("files"));
        assert!(entry.mentions_or_tagged("files"));
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("héllo", 2), "hé");
        assert_eq!(preview("hi", 10), "hi");
    }
}
