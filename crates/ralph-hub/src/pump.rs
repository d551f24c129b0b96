use crate::broadcast::Broadcaster;
use crate::config::{HubConfig, WatchedFiles};
use crate::git::{self, GitError};
use crate::runner::RunnerControl;
use crate::watcher::ChangeKind;
use chrono::{DateTime, SecondsFormat, Utc};
use ralph_core::{
    status, tasks, ChangedFileRecord, LogTailer, ParseError, PushEvent, RunStats, StatusRecord,
    StatusSnapshot,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

/// Turns file-change kinds into broadcast events.
///
/// Owns the log tailer; every path that reads or truncates the log goes
/// through the same lock so a clear can never interleave with a delta.
pub struct UpdatePump {
    files: WatchedFiles,
    root: PathBuf,
    broadcaster: Arc<Broadcaster>,
    runner: Arc<RunnerControl>,
    tailer: Mutex<LogTailer>,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl UpdatePump {
    pub fn new(config: &HubConfig, broadcaster: Arc<Broadcaster>, runner: Arc<RunnerControl>) -> Self {
        Self {
            files: config.files.clone(),
            root: config.project_root.clone(),
            broadcaster,
            runner,
            tailer: Mutex::new(LogTailer::attach(&config.files.log)),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Fills the broadcaster snapshot before any subscriber can join.
    pub async fn prime(&self) {
        self.refresh_status().await;
        self.refresh_tasks();
        self.refresh_files().await;
    }

    pub async fn handle(&self, kind: ChangeKind) {
        debug!(event = "change", kind = kind.as_str());
        match kind {
            ChangeKind::Status => {
                self.refresh_status().await;
            }
            ChangeKind::Tasks => self.refresh_tasks(),
            ChangeKind::Logs => self.drain_logs().await,
        }
    }

    /// Current status with `is_zombie` derived from runner liveness.
    pub async fn current_status(&self) -> Result<StatusRecord, ParseError> {
        let mut record = status::load(&self.files.status)?;
        if record.active {
            record.is_zombie = self.runner.liveness().await == Some(false);
        }
        Ok(record)
    }

    pub async fn refresh_status(&self) -> Option<StatusRecord> {
        match self.current_status().await {
            Ok(record) => {
                self.broadcaster.publish(PushEvent::Status(record.clone()));
                Some(record)
            }
            Err(err) => {
                warn!(event = "status_parse_failed", kind = err.kind(), error = %err);
                None
            }
        }
    }

    pub fn refresh_tasks(&self) {
        let list = tasks::load(&self.files.tasks);
        self.broadcaster.publish(PushEvent::Tasks(list));
    }

    pub async fn drain_logs(&self) {
        let mut tailer = self.tailer.lock().await;
        match tailer.read_new_text() {
            Ok(chunk) => {
                if chunk.reset {
                    info!(event = "log_reset", path = %self.files.log.display());
                    self.broadcaster.publish(PushEvent::LogClear);
                }
                if !chunk.text.is_empty() {
                    self.broadcaster.publish(PushEvent::Logs(chunk.text));
                }
            }
            Err(err) => warn!(event = "log_read_failed", error = %err),
        }
    }

    /// Publishes the changed-file list when it differs from the last one sent.
    pub async fn refresh_files(&self) {
        let files = self.changed_files().await;
        if self.broadcaster.snapshot().files != files {
            self.broadcaster.publish(PushEvent::Files(files));
        }
    }

    pub async fn changed_files(&self) -> Vec<ChangedFileRecord> {
        match git::changed_files(&self.root).await {
            Ok(files) => files,
            Err(GitError::Missing) | Err(GitError::NotRepo) => Vec::new(),
            Err(err) => {
                warn!(event = "git_status_failed", error = %err);
                Vec::new()
            }
        }
    }

    /// Re-derives status on a timer so a runner that died without touching
    /// the status file still shows up as a zombie.
    pub async fn refresh_liveness(&self) {
        let Ok(record) = self.current_status().await else {
            return;
        };
        if self.broadcaster.snapshot().status.as_ref() != Some(&record) {
            self.broadcaster.publish(PushEvent::Status(record));
        }
    }

    /// Replaces the log with `banner` (or nothing), tells clients to drop
    /// their log view, and streams the banner as the first new delta.
    pub async fn clear_logs(&self, banner: Option<&str>) -> io::Result<()> {
        let mut tailer = self.tailer.lock().await;
        std::fs::write(&self.files.log, banner.unwrap_or(""))?;
        tailer.reset();
        self.broadcaster.publish(PushEvent::LogClear);
        let chunk = tailer.read_new_text()?;
        if !chunk.text.is_empty() {
            self.broadcaster.publish(PushEvent::Logs(chunk.text));
        }
        info!(event = "log_cleared", banner = banner.is_some());
        Ok(())
    }

    /// Full log text; an absent log reads as empty.
    pub fn log_text(&self) -> io::Result<String> {
        match std::fs::read(&self.files.log) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(err),
        }
    }

    pub async fn status_snapshot(&self) -> Result<StatusSnapshot, ParseError> {
        let status = self.current_status().await?;
        let list = tasks::load(&self.files.tasks);
        let log_bytes = std::fs::metadata(&self.files.log)
            .map(|meta| meta.len())
            .unwrap_or(0);
        Ok(StatusSnapshot {
            status,
            stats: RunStats {
                tasks_total: list.len(),
                tasks_completed: list.iter().filter(|task| task.completed).count(),
                log_bytes,
                subscribers: self.broadcaster.subscriber_count(),
                uptime_secs: self.started.elapsed().as_secs(),
                hub_started_at: self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        })
    }

    /// Drives the pump until `shutdown` flips or the kind stream ends.
    pub async fn run(
        self: Arc<Self>,
        mut kinds: mpsc::Receiver<ChangeKind>,
        mut shutdown: watch::Receiver<bool>,
        files_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(files_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                kind = kinds.recv() => match kind {
                    Some(kind) => self.handle(kind).await,
                    None => break,
                },
                _ = ticker.tick() => {
                    self.refresh_files().await;
                    self.refresh_liveness().await;
                }
            }
        }
        info!(event = "pump_stopped");
    }
}
