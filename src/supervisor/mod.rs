//! Coordination facade for a supervising worker: session start/end, team
//! status, task assignment, push coordination and advisory area locks.
//!
//! Locks live only in this process. They are announced through the
//! knowledge log but nothing on the server enforces them.

pub mod heartbeat;

pub use heartbeat::{HeartbeatReport, HeartbeatTimer, active_workers, ping_all};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::chat::ChatMessage;
use crate::error::Result;
use crate::knowledge::{KnowledgeEntry, KnowledgeType, NewEntry, model::preview};
use crate::session::{Session, SessionStatus};
use crate::tasks::{NewTask, Task, TaskStatus};

/// Priority used for rollcall tasks.
pub const ROLLCALL_PRIORITY: i32 = 10;

/// Files listed by name in a push announcement.
const ANNOUNCE_FILES: usize = 5;

/// A requested file that falls inside another worker's locked area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    pub file: String,
    pub area: String,
    pub locked_by: String,
}

/// Aggregated view for the supervisor.
#[derive(Debug, Clone)]
pub struct TeamStatus {
    pub session: SessionStatus,
    pub pending: Vec<Task>,
    pub claimed: Vec<Task>,
    pub recent_chat: Vec<ChatMessage>,
}

impl TeamStatus {
    pub fn render(&self) -> String {
        let mut lines = vec![
            "[TEAM STATUS]".to_string(),
            format!(
                "  Connected as: {}",
                self.session.name.as_deref().unwrap_or("-")
            ),
            format!("  Knowledge entries: {}", self.session.knowledge_count),
            format!("  Pending tasks: {}", self.session.pending_tasks),
            format!("  Total tasks: {}", self.session.total_tasks),
        ];
        if !self.pending.is_empty() {
            lines.push(format!("[PENDING TASKS] ({})", self.pending.len()));
            for t in self.pending.iter().take(10) {
                lines.push(format!(
                    "    [P{}] -> {}: {}",
                    t.priority,
                    t.to_target.as_deref().unwrap_or("anyone"),
                    preview(&t.description, 60)
                ));
            }
        }
        if !self.claimed.is_empty() {
            lines.push(format!("[IN PROGRESS] ({})", self.claimed.len()));
            for t in self.claimed.iter().take(10) {
                lines.push(format!(
                    "    [{}] {}",
                    t.claimed_by.as_deref().unwrap_or("unknown"),
                    preview(&t.description, 60)
                ));
            }
        }
        if !self.recent_chat.is_empty() {
            lines.push("[RECENT CHAT]".to_string());
            for m in &self.recent_chat {
                lines.push(format!("    [{}] {}", m.author, preview(&m.message, 50)));
            }
        }
        lines.join("\n")
    }
}

/// Supervising worker built on a [`Session`].
pub struct Supervisor {
    session: Session,
    started_at: Option<DateTime<Utc>>,
    locks: BTreeMap<String, String>,
    timer: HeartbeatTimer,
}

impl Supervisor {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            started_at: None,
            locks: BTreeMap::new(),
            timer: HeartbeatTimer::default(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Area → worker for every active lock.
    pub fn locks(&self) -> &BTreeMap<String, String> {
        &self.locks
    }

    /// Connect if needed, refresh the knowledge snapshot, report team
    /// status and announce presence.
    pub async fn start_session(&mut self, token: Option<&str>) -> bool {
        if !self.session.is_connected() && !self.session.connect(token).await {
            warn!("Supervisor could not connect");
            return false;
        }
        let started = Utc::now();
        self.started_at = Some(started);

        match self.session.knowledge() {
            Ok(log) => {
                if let Err(e) = log.sync_to_cache().await {
                    warn!(error = %e, "Could not refresh knowledge snapshot");
                }
            }
            Err(e) => warn!(error = %e, "Knowledge log unavailable"),
        }

        match self.team_status().await {
            Ok(status) => info!("{}", status.render()),
            Err(e) => warn!(error = %e, "Could not load team status"),
        }

        self.announce("Supervisor online - checking in").await;
        self.log("session_start", json!({ "time": started })).await;
        true
    }

    /// Announce departure and log the session length. Returns the duration.
    pub async fn end_session(&mut self, summary: &str) -> Option<chrono::Duration> {
        let duration = self.started_at.take().map(|start| Utc::now() - start);
        let rendered = duration
            .map(format_duration)
            .unwrap_or_else(|| "unknown".to_string());

        self.announce(&format!("Supervisor offline - {summary}")).await;
        self.log(
            "session_end",
            json!({ "summary": summary, "duration": rendered }),
        )
        .await;
        info!(duration = %rendered, "Supervisor session ended");
        duration
    }

    /// Pending and claimed tasks plus the last few chat messages.
    pub async fn team_status(&self) -> Result<TeamStatus> {
        let tasks = self.session.tasks()?;
        Ok(TeamStatus {
            session: self.session.status().await?,
            pending: tasks.pending(false).await?,
            claimed: tasks.list(Some(TaskStatus::Claimed)).await?,
            recent_chat: self.session.chat()?.recent(5).await?,
        })
    }

    /// Post a task and mention the target in chat.
    pub async fn assign_task(
        &self,
        description: &str,
        to: Option<&str>,
        priority: i32,
    ) -> Result<Task> {
        let mut new = NewTask::new(description).with_priority(priority);
        if let Some(to) = to {
            new = new.to(to);
        }
        let task = self.session.tasks()?.post(new).await?;
        let target = to.unwrap_or("anyone");
        self.announce(&format!("@{target} assigned: {}", preview(description, 50)))
            .await;
        info!(task_id = %task.id, target = %target, priority, "Assigned task");
        Ok(task)
    }

    /// Tell everyone to pull after `worker` pushed `files`.
    pub async fn announce_push(&self, worker: &str, files: &[String]) -> Result<KnowledgeEntry> {
        let mut listed = files
            .iter()
            .take(ANNOUNCE_FILES)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if files.len() > ANNOUNCE_FILES {
            listed.push_str(&format!(" (+{} more)", files.len() - ANNOUNCE_FILES));
        }
        self.announce(&format!("@all PULL NOW - {worker} just pushed. Files: {listed}"))
            .await;

        let tags = vec!["sync".to_string(), "push".to_string(), self.session.scope()];
        self.share(
            &format!("PUSH: {worker} pushed {} files - {listed}", files.len()),
            tags,
        )
        .await
    }

    /// Reserve `area` for `worker`. The lock only takes effect once it has
    /// been announced in the knowledge log.
    pub async fn lock_area(&mut self, area: &str, worker: &str) -> Result<()> {
        self.share(
            &format!("LOCKED: {area} -> {worker}"),
            vec!["lock".into(), "active".into()],
        )
        .await?;
        self.locks.insert(area.to_string(), worker.to_string());
        info!(area = %area, worker = %worker, "Locked area");
        Ok(())
    }

    /// Release `area`. Returns the previous holder, if it was locked.
    pub async fn unlock_area(&mut self, area: &str) -> Result<Option<String>> {
        let Some(worker) = self.locks.get(area).cloned() else {
            return Ok(None);
        };
        self.share(
            &format!("UNLOCKED: {area} (was {worker})"),
            vec!["unlock".into(), "released".into()],
        )
        .await?;
        self.locks.remove(area);
        info!(area = %area, worker = %worker, "Unlocked area");
        Ok(Some(worker))
    }

    /// Files that overlap an area locked by someone other than `worker`.
    ///
    /// A file overlaps an area when either is a prefix of the other.
    pub fn check_overlaps(&self, files: &[String], worker: &str) -> Vec<Overlap> {
        let mut overlaps = Vec::new();
        for file in files {
            for (area, locked_by) in &self.locks {
                let related = file.starts_with(area.as_str()) || area.starts_with(file.as_str());
                if related && locked_by != worker {
                    overlaps.push(Overlap {
                        file: file.clone(),
                        area: area.clone(),
                        locked_by: locked_by.clone(),
                    });
                }
            }
        }
        if !overlaps.is_empty() {
            warn!(worker = %worker, count = overlaps.len(), "Push overlaps locked areas");
        }
        overlaps
    }

    /// Approve or hold a push. Returns `true` when approved.
    pub async fn coordinate_push(&self, worker: &str, files: &[String]) -> bool {
        if self.check_overlaps(files, worker).is_empty() {
            self.announce(&format!("@{worker} approved to push. @all standby for pull"))
                .await;
            info!(worker = %worker, "Push approved");
            true
        } else {
            self.announce(&format!("@{worker} HOLD - files overlap with other workers"))
                .await;
            false
        }
    }

    /// Share a lesson tagged with the project and `supervisor`.
    pub async fn share_knowledge(&self, content: &str, tags: &[String]) -> Result<KnowledgeEntry> {
        let mut all = vec![self.session.scope(), "supervisor".to_string()];
        all.extend(tags.iter().cloned());
        self.share(content, all).await
    }

    /// Ask every worker on `roster` to check in.
    pub async fn rollcall(&self, roster: &[String]) -> Result<Vec<Task>> {
        self.announce("ROLLCALL - All workers sound off!").await;
        let me = self.session.identity()?.name().to_string();
        let tasks = self.session.tasks()?;
        let mut posted = Vec::new();
        for worker in roster.iter().filter(|w| **w != me) {
            let task = tasks
                .post(
                    NewTask::new(format!("ROLLCALL: {worker} check in when you see this"))
                        .to(worker.as_str())
                        .with_priority(ROLLCALL_PRIORITY),
                )
                .await?;
            posted.push(task);
        }
        Ok(posted)
    }

    /// Run a heartbeat if one is due.
    pub async fn heartbeat_if_due(&mut self) -> Result<Option<HeartbeatReport>> {
        if !self.timer.is_due() {
            return Ok(None);
        }
        let report = heartbeat::heartbeat(&self.session).await?;
        self.timer.mark();
        Ok(Some(report))
    }

    pub fn timer_mut(&mut self) -> &mut HeartbeatTimer {
        &mut self.timer
    }

    async fn share(&self, content: &str, tags: Vec<String>) -> Result<KnowledgeEntry> {
        let entry = NewEntry::new(content, KnowledgeType::Lesson).with_tags(tags);
        Ok(self.session.knowledge()?.save(entry).await?)
    }

    /// Best-effort chat post; failures are logged.
    async fn announce(&self, message: &str) {
        let sent = match self.session.chat() {
            Ok(chat) => chat.send(message, false).await.map(|_| ()).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = sent {
            warn!(error = %e, "Could not post to chat");
        }
    }

    /// Best-effort work log entry.
    async fn log(&self, action: &str, details: serde_json::Value) {
        if let Err(e) = self.session.log_work(action, details).await {
            warn!(action = %action, error = %e, "Could not log work");
        }
    }
}

fn format_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColabConfig;
    use crate::store::{MemoryStore, StoreClient, collections};
    use std::sync::Arc;

    fn supervisor(store: &Arc<MemoryStore>, dir: &tempfile::TempDir) -> Supervisor {
        let config = ColabConfig {
            cache_path: dir.path().join("cache.json"),
            config_path: dir.path().join("config.json"),
            project: "medieval-game".into(),
            ..ColabConfig::default()
        };
        let mut session = Session::new(StoreClient::new(store.clone()), &config);
        session.connect_as("Unity");
        Supervisor::new(session)
    }

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn chat_lines(store: &MemoryStore) -> Vec<String> {
        store
            .rows(collections::CHAT_MESSAGES)
            .into_iter()
            .filter_map(|r| r["message"].as_str().map(String::from))
            .collect()
    }

    #[tokio::test]
    async fn overlaps_match_prefixes_both_ways() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut sup = supervisor(&store, &dir);
        sup.lock_area("src/services/", "BLACK").await.unwrap();
        sup.lock_area("assets/map.json", "R").await.unwrap();

        let hits = sup.check_overlaps(&files(&["src/services/npc.js", "assets", "README.md"]), "G");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].locked_by, "BLACK");
        assert_eq!(hits[1].locked_by, "R");
        assert_eq!(hits[1].area, "assets/map.json");

        // A worker never conflicts with its own lock
        assert!(sup.check_overlaps(&files(&["src/services/npc.js"]), "BLACK").is_empty());
    }

    #[tokio::test]
    async fn coordinate_push_holds_then_approves() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut sup = supervisor(&store, &dir);
        sup.lock_area("src/ui", "BLACK").await.unwrap();

        assert!(!sup.coordinate_push("G", &files(&["src/ui/menu.js"])).await);
        assert_eq!(sup.unlock_area("src/ui").await.unwrap().as_deref(), Some("BLACK"));
        assert_eq!(sup.unlock_area("src/ui").await.unwrap(), None);
        assert!(sup.coordinate_push("G", &files(&["src/ui/menu.js"])).await);

        let chat = chat_lines(&store);
        assert!(chat[0].contains("HOLD"));
        assert!(chat[1].contains("approved"));

        let lessons = store.rows(collections::KNOWLEDGE);
        assert_eq!(lessons.len(), 2);
        assert_eq!(lessons[0]["content"], "LOCKED: src/ui -> BLACK");
    }

    #[tokio::test]
    async fn lock_changes_only_after_announcement() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut sup = supervisor(&store, &dir);
        sup.lock_area("src/net", "R").await.unwrap();

        // Assigned elsewhere, so every knowledge write is refused
        let identity = sup.session().identity().unwrap();
        identity.set_assigned_scope(Some("claude-colab".into()));

        assert!(sup.lock_area("src/ui", "BLACK").await.is_err());
        assert!(!sup.locks().contains_key("src/ui"));
        assert!(sup.unlock_area("src/net").await.is_err());
        assert_eq!(sup.locks().get("src/net").map(String::as_str), Some("R"));
        assert_eq!(store.rows(collections::KNOWLEDGE).len(), 1);
    }

    #[tokio::test]
    async fn assign_and_announce() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sup = supervisor(&store, &dir);

        let task = sup.assign_task("TASK-001: fix pathing", Some("BLACK"), 3).await.unwrap();
        assert_eq!(task.to_target.as_deref(), Some("BLACK"));
        assert_eq!(task.project.as_deref(), Some("medieval-game"));

        let pushed = files(&["a", "b", "c", "d", "e", "f", "g"]);
        let entry = sup.announce_push("BLACK", &pushed).await.unwrap();
        assert!(entry.content.contains("pushed 7 files"));
        assert!(entry.content.contains("(+2 more)"));
        assert!(entry.tags.contains(&"medieval-game".to_string()));

        let chat = chat_lines(&store);
        assert_eq!(chat[0], "@BLACK assigned: TASK-001: fix pathing");
        assert!(chat[1].starts_with("@all PULL NOW"));

        let shared = sup.share_knowledge("Use A* for NPCs", &files(&["ai"])).await.unwrap();
        assert_eq!(shared.tags, vec!["medieval-game", "supervisor", "ai"]);
    }

    #[tokio::test]
    async fn rollcall_skips_self_and_status_sees_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sup = supervisor(&store, &dir);

        let posted = sup
            .rollcall(&files(&["BLACK", "R", "Unity"]))
            .await
            .unwrap();
        assert_eq!(posted.len(), 2);
        assert!(posted.iter().all(|t| t.priority == ROLLCALL_PRIORITY));

        let status = sup.team_status().await.unwrap();
        assert_eq!(status.pending.len(), 2);
        assert_eq!(status.recent_chat.len(), 1);
        assert!(status.render().contains("[PENDING TASKS] (2)"));
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut sup = supervisor(&store, &dir);

        assert!(sup.start_session(None).await);
        assert!(dir.path().join("cache.json").exists());
        assert!(sup.end_session("all done").await.is_some());
        assert!(sup.end_session("again").await.is_none());

        let chat = chat_lines(&store);
        assert_eq!(chat.first().map(String::as_str), Some("Supervisor online - checking in"));
        assert!(chat.iter().any(|m| m == "Supervisor offline - all done"));
    }

    #[tokio::test]
    async fn heartbeat_respects_timer() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut sup = supervisor(&store, &dir);
        assert!(sup.heartbeat_if_due().await.unwrap().is_some());
        assert!(sup.heartbeat_if_due().await.unwrap().is_none());
    }

    #[test]
    fn duration_format() {
        assert_eq!(format_duration(chrono::Duration::seconds(3725)), "1:02:05");
    }
}
