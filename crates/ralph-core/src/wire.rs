//! Push-channel envelope: `{"type": <kind>, "data": <payload>}`.

use crate::{ChangedFileRecord, StatusRecord, TaskRecord};
use serde::{Deserialize, Serialize};

/// Server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum PushEvent {
    Status(StatusRecord),
    Logs(String),
    Tasks(Vec<TaskRecord>),
    Files(Vec<ChangedFileRecord>),
    LogClear,
    Pong,
}

impl PushEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PushEvent::Status(_) => "status",
            PushEvent::Logs(_) => "logs",
            PushEvent::Tasks(_) => "tasks",
            PushEvent::Files(_) => "files",
            PushEvent::LogClear => "log-clear",
            PushEvent::Pong => "pong",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Body of `GET /api/ralph/status`: the status record with run counters
/// alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(flatten)]
    pub status: StatusRecord,
    pub stats: RunStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub tasks_total: usize,
    pub tasks_completed: usize,
    pub log_bytes: u64,
    pub subscribers: usize,
    pub uptime_secs: u64,
    #[serde(default)]
    pub hub_started_at: String,
}

/// Client to server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    InitialState,
    Ping,
}
