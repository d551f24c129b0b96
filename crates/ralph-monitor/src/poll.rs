use crate::store::SharedState;
use crate::ClientError;
use async_trait::async_trait;
use ralph_core::{ChangedFileRecord, StatusRecord, TaskRecord};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

/// Full-state pulls from a hub.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_status(&self) -> Result<StatusRecord, ClientError>;
    async fn fetch_tasks(&self) -> Result<Vec<TaskRecord>, ClientError>;
    async fn fetch_files(&self) -> Result<Vec<ChangedFileRecord>, ClientError>;
    /// The whole runner log as the hub currently holds it.
    async fn fetch_logs(&self) -> Result<String, ClientError>;
}

#[derive(Clone)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base: Url,
}

impl HttpSnapshotSource {
    pub fn new(base: Url) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, base })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        Ok(serde_json::from_str(&self.get_text(path).await?)?)
    }

    async fn get_text(&self, path: &str) -> Result<String, ClientError> {
        let url = self.base.join(path)?;
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|value| value.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            return Err(ClientError::Status(status.as_u16(), message));
        }
        Ok(body)
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch_status(&self) -> Result<StatusRecord, ClientError> {
        self.get("/api/ralph/status").await
    }

    async fn fetch_tasks(&self) -> Result<Vec<TaskRecord>, ClientError> {
        self.get("/api/ralph/tasks").await
    }

    async fn fetch_files(&self) -> Result<Vec<ChangedFileRecord>, ClientError> {
        self.get("/api/ralph/files").await
    }

    async fn fetch_logs(&self) -> Result<String, ClientError> {
        self.get_text("/api/ralph/logs").await
    }
}

/// Periodically overwrites the local state with full snapshots, so a
/// missed push event is corrected within one interval.
pub struct PollingReconciler<S> {
    source: S,
    store: SharedState,
    interval: Duration,
}

impl<S: SnapshotSource> PollingReconciler<S> {
    pub fn new(source: S, store: SharedState, interval: Duration) -> Self {
        Self {
            source,
            store,
            interval,
        }
    }

    /// One pull of every kind, the full log included. A failed kind keeps
    /// its last good value; returns how many kinds were refreshed.
    pub async fn pull_once(&self) -> usize {
        let (status, tasks, files, logs) = tokio::join!(
            self.source.fetch_status(),
            self.source.fetch_tasks(),
            self.source.fetch_files(),
            self.source.fetch_logs()
        );
        let mut refreshed = 0;
        let mut state = self.store.write().await;
        match status {
            Ok(status) => {
                state.status = Some(status);
                refreshed += 1;
            }
            Err(err) => warn!(event = "pull_failed", kind = "status", error = %err),
        }
        match tasks {
            Ok(tasks) => {
                state.tasks = tasks;
                refreshed += 1;
            }
            Err(err) => warn!(event = "pull_failed", kind = "tasks", error = %err),
        }
        match files {
            Ok(files) => {
                state.changed_files = files;
                refreshed += 1;
            }
            Err(err) => warn!(event = "pull_failed", kind = "files", error = %err),
        }
        match logs {
            Ok(text) => {
                state.replace_logs(text);
                refreshed += 1;
            }
            Err(err) => warn!(event = "pull_failed", kind = "logs", error = %err),
        }
        debug!(event = "pull_done", refreshed = refreshed);
        refreshed
    }

    /// Pulls immediately, then every interval, until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    self.pull_once().await;
                }
            }
        }
    }
}
