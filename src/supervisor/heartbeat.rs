//! Channel heartbeat: probe tasks, knowledge, chat, direct messages and the
//! work log, and summarise what needs a response.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ConnectionError;
use crate::session::Session;
use crate::tasks::TaskStatus;

/// Default time between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(90);

const RULE: &str = "============================================================";

/// Health of one probed channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub name: &'static str,
    pub ok: bool,
}

/// Result of one heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeartbeatReport {
    pub timestamp: DateTime<Utc>,
    pub channels: Vec<ChannelStatus>,
    pub pending_tasks: usize,
    pub claimed_tasks: usize,
    pub tasks_for_me: usize,
    pub recent_knowledge: usize,
    pub chat_messages: usize,
    pub total_dms: usize,
    pub responses: usize,
    /// Workers who sent this worker a direct message.
    pub responders: Vec<String>,
    pub needs_attention: Vec<String>,
}

impl HeartbeatReport {
    pub fn channel_ok(&self, name: &str) -> Option<bool> {
        self.channels.iter().find(|c| c.name == name).map(|c| c.ok)
    }

    fn record(&mut self, name: &'static str, ok: bool) {
        self.channels.push(ChannelStatus { name, ok });
    }

    fn channel_error(&mut self, name: &'static str, err: impl std::fmt::Display) {
        warn!(channel = name, error = %err, "Heartbeat channel failed");
        self.record(name, false);
        self.needs_attention.push(format!("{name} channel error: {err}"));
    }

    /// Plain-text report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "HEARTBEAT - {}", self.timestamp.format("%Y-%m-%dT%H:%M:%S"));
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out);
        let _ = writeln!(out, "CHANNEL STATUS:");
        for channel in &self.channels {
            let icon = if channel.ok { "[OK]" } else { "[FAIL]" };
            let _ = writeln!(out, "  {icon} {}", channel.name);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "COUNTS:");
        for (key, value) in [
            ("pending_tasks", self.pending_tasks),
            ("claimed_tasks", self.claimed_tasks),
            ("tasks_for_me", self.tasks_for_me),
            ("recent_knowledge", self.recent_knowledge),
            ("chat_messages", self.chat_messages),
            ("total_dms", self.total_dms),
            ("responses", self.responses),
        ] {
            let _ = writeln!(out, "  {key}: {value}");
        }
        if !self.responders.is_empty() {
            let _ = writeln!(out, "  responders: {}", self.responders.join(", "));
        }
        if !self.needs_attention.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "!! NEEDS ATTENTION:");
            for item in &self.needs_attention {
                let _ = writeln!(out, "  - {item}");
            }
        }
        let _ = writeln!(out);
        out.push_str(RULE);
        out
    }
}

/// Probe every channel once. A failing channel is recorded, not returned
/// as an error.
pub async fn heartbeat(session: &Session) -> Result<HeartbeatReport, ConnectionError> {
    let identity = session.identity()?;
    let me = identity.name().to_string();
    let mut report = HeartbeatReport {
        timestamp: Utc::now(),
        ..HeartbeatReport::default()
    };

    let tasks = session.tasks()?;
    match (
        tasks.list(Some(TaskStatus::Pending)).await,
        tasks.claimed().await,
    ) {
        (Ok(pending), Ok(claimed)) => {
            let for_me = pending
                .iter()
                .filter(|t| t.to_target.as_deref() == Some(me.as_str()))
                .count();
            report.record("tasks", true);
            report.pending_tasks = pending.len();
            report.claimed_tasks = claimed.len();
            report.tasks_for_me = for_me;
            if for_me > 0 {
                report
                    .needs_attention
                    .push(format!("{for_me} tasks assigned to {me}"));
            }
        }
        (Err(e), _) | (_, Err(e)) => report.channel_error("tasks", e),
    }

    match session.knowledge()?.recent(10).await {
        Ok(recent) => {
            report.record("knowledge", true);
            report.recent_knowledge = recent.len();
        }
        Err(e) => report.channel_error("knowledge", e),
    }

    let chat = session.chat()?;
    match chat.recent(20).await {
        Ok(messages) => {
            report.record("chat", true);
            report.chat_messages = messages.len();
        }
        Err(e) => report.channel_error("chat", e),
    }

    match chat.dms(20).await {
        Ok(dms) => {
            let responders: BTreeSet<String> = dms
                .iter()
                .filter(|dm| dm.to_author == me && dm.from_author != me)
                .map(|dm| dm.from_author.clone())
                .collect();
            report.record("dms", true);
            report.total_dms = dms.len();
            report.responses = dms
                .iter()
                .filter(|dm| dm.to_author == me && dm.from_author != me)
                .count();
            if !responders.is_empty() {
                let names: Vec<String> = responders.into_iter().collect();
                report
                    .needs_attention
                    .push(format!("DM responses from: {}", names.join(", ")));
                report.responders = names;
            }
        }
        Err(e) => report.channel_error("dms", e),
    }

    let details = json!({ "timestamp": report.timestamp });
    match session.log_work("heartbeat", details).await {
        Ok(logged) => report.record("work_log", logged),
        Err(e) => report.channel_error("work_log", e),
    }

    debug!(
        attention = report.needs_attention.len(),
        "Heartbeat complete"
    );
    Ok(report)
}

/// Decides when the next heartbeat is due.
#[derive(Debug, Clone)]
pub struct HeartbeatTimer {
    interval: Duration,
    last: Option<Instant>,
}

impl Default for HeartbeatTimer {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

impl HeartbeatTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// True before the first beat and once the interval has elapsed.
    pub fn is_due(&self) -> bool {
        self.last
            .is_none_or(|last| last.elapsed() >= self.interval)
    }

    pub fn mark(&mut self) {
        self.last = Some(Instant::now());
    }
}

/// Workers currently holding a task.
pub async fn active_workers(session: &Session) -> crate::error::Result<Vec<String>> {
    Ok(session.tasks()?.active_workers().await?)
}

/// Send `message` to every worker in `roster` except this one.
pub async fn ping_all(
    session: &Session,
    roster: &[String],
    message: &str,
) -> Result<BTreeMap<String, bool>, ConnectionError> {
    let chat = session.chat()?;
    let me = session.identity()?.name().to_string();
    let mut results = BTreeMap::new();
    for worker in roster.iter().filter(|w| **w != me) {
        let sent = match chat.send_dm(worker, message).await {
            Ok(_) => true,
            Err(e) => {
                warn!(worker = %worker, error = %e, "Ping failed");
                false
            }
        };
        results.insert(worker.clone(), sent);
    }
    Ok(results)
}
