//! Knowledge log: append-only entries with tag/text search and an offline
//! snapshot.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::KnowledgeError;
use crate::knowledge::cache::{KnowledgeCache, SyncReport};
use crate::knowledge::model::{
    EntryInsert, KnowledgeEntry, KnowledgeStats, KnowledgeType, NewEntry, preview,
};
use crate::session::Identity;
use crate::store::{Query, StoreClient};

/// Default page size for `recent`, `mine` and `from_other`.
pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// Default page size for `get` and `search`.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Number of recent entries `stats` aggregates over.
pub const STATS_WINDOW: usize = 1000;

/// Maximum entries pulled into a snapshot.
pub const SYNC_LIMIT: usize = 10_000;

/// Lookback used by `new_from_other` when no timestamp is given.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 1;

/// Characters of content used as a default description.
const DESCRIPTION_PREVIEW: usize = 100;

/// Filters for [`KnowledgeLog::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub tag: Option<String>,
    pub language: Option<String>,
    /// Case-insensitive substring over content and description.
    pub text: Option<String>,
    pub limit: Option<usize>,
}

impl SearchParams {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Shared knowledge log as seen by one worker.
#[derive(Clone)]
pub struct KnowledgeLog {
    client: StoreClient,
    identity: Arc<Identity>,
    cache: KnowledgeCache,
}

impl KnowledgeLog {
    pub fn new(client: StoreClient, identity: Arc<Identity>, cache: KnowledgeCache) -> Self {
        Self {
            client,
            identity,
            cache,
        }
    }

    pub fn cache(&self) -> &KnowledgeCache {
        &self.cache
    }

    /// Live entries of the active project.
    fn live(&self) -> Query {
        Query::new()
            .is_null("deleted_at")
            .eq_opt("project", self.identity.scope())
    }

    /// Append an entry. Identical content is never merged.
    pub async fn save(&self, new: NewEntry) -> Result<KnowledgeEntry, KnowledgeError> {
        let project = self.identity.check_scope(new.force_scope)?;
        let row = EntryInsert {
            author: self.identity.name(),
            kind: new.kind,
            content: &new.content,
            language: new.language.as_deref(),
            tags: &new.tags,
            description: new.description.as_deref(),
            project: project.as_deref(),
        };
        let entry: KnowledgeEntry = self.client.create(&row).await?;
        info!(
            entry_id = %entry.id,
            kind = %entry.kind,
            tags = entry.tags.len(),
            "Saved knowledge entry"
        );
        Ok(entry)
    }

    /// Record a lesson learned.
    pub async fn learn<I, S>(&self, lesson: &str, tags: I) -> Result<KnowledgeEntry, KnowledgeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = NewEntry::new(lesson, KnowledgeType::Lesson)
            .with_tags(tags)
            .with_description(preview(lesson, DESCRIPTION_PREVIEW));
        self.save(entry).await
    }

    /// Record a discovery.
    pub async fn discover<I, S>(
        &self,
        discovery: &str,
        tags: I,
    ) -> Result<KnowledgeEntry, KnowledgeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = NewEntry::new(discovery, KnowledgeType::Discovery)
            .with_tags(tags)
            .with_description(preview(discovery, DESCRIPTION_PREVIEW));
        self.save(entry).await
    }

    /// Share a code snippet.
    pub async fn snippet<I, S>(
        &self,
        code: &str,
        language: &str,
        description: Option<&str>,
        tags: I,
    ) -> Result<KnowledgeEntry, KnowledgeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entry = NewEntry::new(code, KnowledgeType::Snippet)
            .with_language(language)
            .with_tags(tags);
        if let Some(description) = description {
            entry = entry.with_description(description);
        }
        self.save(entry).await
    }

    /// Newest entries first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        let query = self.live().order_desc("created_at").limit(limit);
        Ok(self.client.query(&query).await?)
    }

    /// Entries filtered by type and/or author, newest first.
    pub async fn get(
        &self,
        kind: Option<KnowledgeType>,
        author: Option<&str>,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        let query = self
            .live()
            .eq_opt("type", kind.map(|k| k.as_str()))
            .eq_opt("author", author)
            .order_desc("created_at")
            .limit(limit);
        Ok(self.client.query(&query).await?)
    }

    /// Tag and language filter server-side, then free text client-side.
    ///
    /// The text filter runs after the limit, so a page may come back with
    /// fewer than `limit` hits even when more exist.
    pub async fn search(
        &self,
        params: SearchParams,
    ) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        let mut query = self.live();
        if let Some(tag) = params.tag {
            query = query.contains("tags", [tag]);
        }
        let query = query
            .eq_opt("language", params.language)
            .order_desc("created_at")
            .limit(params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT));

        let mut entries: Vec<KnowledgeEntry> = self.client.query(&query).await?;
        if let Some(text) = params.text {
            let needle = text.to_lowercase();
            entries.retain(|e| e.mentions(&needle));
        }
        debug!(hits = entries.len(), "Knowledge search");
        Ok(entries)
    }

    /// Entries created strictly after `since`, newest first.
    pub async fn since(&self, since: DateTime<Utc>) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        let query = self
            .live()
            .gt("created_at", since.to_rfc3339())
            .order_desc("created_at");
        Ok(self.client.query(&query).await?)
    }

    /// Entries by other workers since `since` (default: the last hour).
    pub async fn new_from_other(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        let since = since.unwrap_or_else(|| Utc::now() - Duration::hours(DEFAULT_LOOKBACK_HOURS));
        let query = self
            .live()
            .neq("author", self.identity.name())
            .gt("created_at", since.to_rfc3339())
            .order_desc("created_at");
        Ok(self.client.query(&query).await?)
    }

    /// Recent entries by other workers.
    pub async fn from_other(&self, limit: usize) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        let query = self
            .live()
            .neq("author", self.identity.name())
            .order_desc("created_at")
            .limit(limit);
        Ok(self.client.query(&query).await?)
    }

    /// Recent entries by this worker.
    pub async fn mine(&self, limit: usize) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        self.get(None, Some(self.identity.name()), limit).await
    }

    /// Server-side count; no rows are transferred.
    pub async fn count(
        &self,
        author: Option<&str>,
        kind: Option<KnowledgeType>,
    ) -> Result<u64, KnowledgeError> {
        let query = self
            .live()
            .eq_opt("author", author)
            .eq_opt("type", kind.map(|k| k.as_str()));
        Ok(self.client.count::<KnowledgeEntry>(&query).await?)
    }

    /// Soft-delete one of the log's entries. Returns `false` if it was
    /// already gone.
    pub async fn delete(&self, id: Uuid) -> Result<bool, KnowledgeError> {
        let query = self.live().eq("id", id.to_string());
        let rows: Vec<KnowledgeEntry> = self
            .client
            .patch(&query, &json!({ "deleted_at": Utc::now() }))
            .await?;
        if !rows.is_empty() {
            info!(entry_id = %id, "Deleted knowledge entry");
        }
        Ok(!rows.is_empty())
    }

    /// Counts over the most recent [`STATS_WINDOW`] entries.
    pub async fn stats(&self) -> Result<KnowledgeStats, KnowledgeError> {
        let entries = self.recent(STATS_WINDOW).await?;
        Ok(KnowledgeStats::from_entries(&entries))
    }

    /// Pull up to [`SYNC_LIMIT`] entries and replace the local snapshot.
    pub async fn sync_to_cache(&self) -> Result<SyncReport, KnowledgeError> {
        let entries = self.recent(SYNC_LIMIT).await?;
        Ok(self.cache.write(entries).await?)
    }

    /// Entries from the last snapshot. Never touches the network.
    pub async fn load_from_cache(&self) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        Ok(self.cache.load().await?)
    }

    /// Offline search over content, description and tags.
    pub async fn search_cache(&self, query: &str) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        Ok(self.cache.search(query).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CacheError, RemoteError};
    use crate::store::{Backend, MemoryStore, collections};
    use async_trait::async_trait;
    use serde_json::Value;

    fn log_for(store: Arc<dyn Backend>, name: &str, dir: &tempfile::TempDir) -> KnowledgeLog {
        KnowledgeLog::new(
            StoreClient::new(store),
            Arc::new(Identity::new(name)),
            KnowledgeCache::new(dir.path().join("knowledge_cache.json")),
        )
    }

    #[tokio::test]
    async fn save_then_recent_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_for(Arc::new(MemoryStore::new()), "R", &dir);
        log.save(NewEntry::new("X", KnowledgeType::Lesson).with_tags(["a", "b"]))
            .await
            .unwrap();

        let latest = log.recent(1).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].content, "X");
        assert_eq!(latest[0].tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(latest[0].author, "R");
    }

    #[tokio::test]
    async fn save_never_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_for(Arc::new(MemoryStore::new()), "R", &dir);
        log.learn("same", ["x"]).await.unwrap();
        log.learn("same", ["x"]).await.unwrap();
        assert_eq!(log.recent(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn learn_defaults_description() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_for(Arc::new(MemoryStore::new()), "R", &dir);
        let long = "a".repeat(150);
        let entry = log.learn(&long, Vec::<String>::new()).await.unwrap();
        assert_eq!(entry.kind, KnowledgeType::Lesson);
        assert_eq!(entry.description.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn search_filters_tag_then_text() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_for(Arc::new(MemoryStore::new()), "R", &dir);
        log.snippet("fn parse()", "rust", Some("Parser entry point"), ["parsing"])
            .await
            .unwrap();
        log.snippet("def parse():", "python", None, ["parsing"])
            .await
            .unwrap();
        log.learn("Always check the PARSER output", ["review"])
            .await
            .unwrap();

        let tagged = log.search(SearchParams::tag("parsing")).await.unwrap();
        assert_eq!(tagged.len(), 2);
        // Newest first
        assert_eq!(tagged[0].content, "def parse():");

        let rust = log
            .search(SearchParams::tag("parsing").with_language("rust"))
            .await
            .unwrap();
        assert_eq!(rust.len(), 1);

        let text = log.search(SearchParams::text("parser")).await.unwrap();
        assert_eq!(text.len(), 2);
        assert!(text.iter().all(|e| e.content != "def parse():"));
    }

    #[tokio::test]
    async fn incremental_pulls() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let r = log_for(store.clone(), "R", &dir);
        let g = log_for(store.clone(), "G", &dir);

        let old = Utc::now() - Duration::hours(3);
        store.seed(
            collections::KNOWLEDGE,
            json!({
                "id": Uuid::new_v4().to_string(),
                "author": "G",
                "type": "lesson",
                "content": "old news",
                "tags": [],
                "created_at": old.to_rfc3339(),
            }),
        );
        let cutoff = Utc::now();
        g.discover("fresh", ["x"]).await.unwrap();
        r.learn("mine", ["x"]).await.unwrap();

        let since = r.since(cutoff).await.unwrap();
        assert_eq!(since.len(), 2);

        let theirs = r.new_from_other(None).await.unwrap();
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].content, "fresh");

        let with_old = r.new_from_other(Some(old - Duration::minutes(1))).await.unwrap();
        assert_eq!(with_old.len(), 2);

        assert_eq!(r.from_other(10).await.unwrap().len(), 2);
        assert_eq!(r.mine(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn count_delete_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let r = log_for(store.clone(), "R", &dir);
        let g = log_for(store.clone(), "G", &dir);
        let first = r.learn("one", ["a"]).await.unwrap();
        r.discover("two", ["a"]).await.unwrap();
        g.learn("three", ["b"]).await.unwrap();

        assert_eq!(r.count(None, None).await.unwrap(), 3);
        assert_eq!(r.count(Some("R"), None).await.unwrap(), 2);
        assert_eq!(r.count(None, Some(KnowledgeType::Lesson)).await.unwrap(), 2);

        assert!(r.delete(first.id).await.unwrap());
        assert!(!r.delete(first.id).await.unwrap());
        assert_eq!(r.count(None, None).await.unwrap(), 2);

        let stats = r.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.per_author["R"], 1);
        assert_eq!(stats.per_type["lesson"], 1);
        assert_eq!(stats.per_type["discovery"], 1);
    }

    #[tokio::test]
    async fn assigned_scope_blocks_save() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_for(Arc::new(MemoryStore::new()), "BLACK", &dir);
        log.identity.set_scope("claude-colab");
        log.identity.set_assigned_scope(Some("medieval-game".into()));

        let err = log.learn("nope", ["x"]).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Scope(_)));

        let entry = log
            .save(NewEntry::new("forced", KnowledgeType::Lesson).force())
            .await
            .unwrap();
        assert_eq!(entry.project.as_deref(), Some("claude-colab"));
    }

    #[tokio::test]
    async fn reads_stay_inside_the_active_project() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let alpha = log_for(store.clone(), "R", &dir);
        alpha.identity.set_scope("alpha");
        let beta = log_for(store.clone(), "G", &dir);
        beta.identity.set_scope("beta");

        alpha.learn("alpha secret", ["x"]).await.unwrap();
        beta.learn("beta note", ["x"]).await.unwrap();

        let seen: Vec<String> = beta
            .recent(10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.content)
            .collect();
        assert_eq!(seen, vec!["beta note"]);
        assert!(beta.from_other(10).await.unwrap().is_empty());
        assert!(beta.search(SearchParams::text("secret")).await.unwrap().is_empty());
        assert_eq!(beta.count(None, None).await.unwrap(), 1);
        assert_eq!(alpha.recent(10).await.unwrap()[0].content, "alpha secret");
    }

    /// Backend that refuses every call, standing in for a dead network.
    struct Offline;

    #[async_trait]
    impl Backend for Offline {
        async fn insert(&self, _: &str, _: Value) -> Result<Value, RemoteError> {
            Err(RemoteError::transport("offline"))
        }
        async fn select(&self, _: &str, _: &Query) -> Result<Vec<Value>, RemoteError> {
            Err(RemoteError::transport("offline"))
        }
        async fn update(&self, _: &str, _: &Query, _: Value) -> Result<Vec<Value>, RemoteError> {
            Err(RemoteError::transport("offline"))
        }
        async fn count(&self, _: &str, _: &Query) -> Result<u64, RemoteError> {
            Err(RemoteError::transport("offline"))
        }
        async fn rpc(&self, _: &str, _: Value) -> Result<Value, RemoteError> {
            Err(RemoteError::transport("offline"))
        }
    }

    #[tokio::test]
    async fn cache_serves_reads_offline() {
        let dir = tempfile::tempdir().unwrap();
        let online = log_for(Arc::new(MemoryStore::new()), "R", &dir);
        online.learn("Use rsync for backups", ["ops"]).await.unwrap();
        online.discover("Port 8080 is taken", ["net"]).await.unwrap();

        let offline = log_for(Arc::new(Offline), "R", &dir);
        assert!(matches!(
            offline.load_from_cache().await.unwrap_err(),
            KnowledgeError::Cache(CacheError::Missing { .. })
        ));

        let report = online.sync_to_cache().await.unwrap();
        assert_eq!(report.count, 2);

        let synced = online.recent(10).await.unwrap();
        let cached = offline.load_from_cache().await.unwrap();
        assert_eq!(cached, synced);

        let hits = offline.search_cache("OPS").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(matches!(
            offline.recent(1).await.unwrap_err(),
            KnowledgeError::Remote(_)
        ));
    }
}
