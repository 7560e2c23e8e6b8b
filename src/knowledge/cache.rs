//! Local snapshot of the knowledge log for offline reads.
//!
//! A snapshot is one JSON document: `{synced_at, count, entries}`. Reads
//! never touch the network and fail with [`CacheError::Missing`] when no
//! snapshot has been written yet. Concurrent writers are not coordinated;
//! the last write wins.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::CacheError;
use crate::knowledge::model::KnowledgeEntry;

/// On-disk snapshot document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub synced_at: DateTime<Utc>,
    pub count: usize,
    pub entries: Vec<KnowledgeEntry>,
}

/// Result of a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub count: usize,
    pub path: PathBuf,
}

/// File-backed snapshot store.
#[derive(Debug, Clone)]
pub struct KnowledgeCache {
    path: PathBuf,
}

impl KnowledgeCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the snapshot with `entries`.
    pub async fn write(&self, entries: Vec<KnowledgeEntry>) -> Result<SyncReport, CacheError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let snapshot = Snapshot {
            synced_at: Utc::now(),
            count: entries.len(),
            entries,
        };
        let json = serde_json::to_string_pretty(&snapshot).map_err(|e| CacheError::Corrupt {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        fs::write(&self.path, json).await?;

        tracing::info!(
            count = snapshot.count,
            path = %self.path.display(),
            "Synced knowledge cache"
        );
        Ok(SyncReport {
            count: snapshot.count,
            path: self.path.clone(),
        })
    }

    /// Load the last snapshot.
    pub async fn read(&self) -> Result<Snapshot, CacheError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::Missing {
                    path: self.path.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_str(&raw).map_err(|e| CacheError::Corrupt {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!(
            count = snapshot.count,
            synced_at = %snapshot.synced_at,
            "Loaded knowledge cache"
        );
        Ok(snapshot)
    }

    /// Entries from the last snapshot.
    pub async fn load(&self) -> Result<Vec<KnowledgeEntry>, CacheError> {
        Ok(self.read().await?.entries)
    }

    /// Case-insensitive search over content, description and tags.
    pub async fn search(&self, query: &str) -> Result<Vec<KnowledgeEntry>, CacheError> {
        let needle = query.to_lowercase();
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter(|e| e.mentions_or_tagged(&needle))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::model::KnowledgeType;
    use uuid::Uuid;

    fn entry(content: &str, tags: &[&str]) -> KnowledgeEntry {
        KnowledgeEntry {
            id: Uuid::new_v4(),
            author: "R".into(),
            kind: KnowledgeType::Lesson,
            content: content.into(),
            language: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            description: None,
            project: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn missing_snapshot_is_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KnowledgeCache::new(dir.path().join("cache.json"));
        assert!(matches!(cache.load().await.unwrap_err(), CacheError::Missing { .. }));
    }

    #[tokio::test]
    async fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KnowledgeCache::new(dir.path().join("sub").join("cache.json"));
        let entries = vec![entry("Use rsync", &["ops"]), entry("Pin versions", &["deps"])];

        let report = cache.write(entries.clone()).await.unwrap();
        assert_eq!(report.count, 2);
        assert_eq!(report.path, cache.path());

        let snapshot = cache.read().await.unwrap();
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.entries, entries);
    }

    #[tokio::test]
    async fn search_matches_tags() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KnowledgeCache::new(dir.path().join("cache.json"));
        cache
            .write(vec![entry("Use rsync", &["Ops"]), entry("Pin versions", &["deps"])])
            .await
            .unwrap();

        let hits = cache.search("ops").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Use rsync");
        assert_eq!(cache.search("VERSIONS").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{not json").unwrap();
        let cache = KnowledgeCache::new(path);
        assert!(matches!(cache.read().await.unwrap_err(), CacheError::Corrupt { .. }));
    }
}
