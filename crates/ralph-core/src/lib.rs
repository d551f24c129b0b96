use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub mod changes;
pub mod logging;
pub mod status;
pub mod tail;
pub mod tasks;
pub mod wire;

pub use changes::parse_porcelain;
pub use logging::log_filter_directive;
pub use tail::{LogTailer, TailChunk};
pub use wire::{ClientMessage, PushEvent, RunStats, StatusSnapshot};

pub const DEFAULT_PHASE: &str = "IDLE";
pub const UNCATEGORIZED_PHASE: &str = "Uncategorized";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("status document is missing its front-matter delimiters")]
    MalformedDocument,
    #[error("invalid status metadata: {0}")]
    InvalidMetadata(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ParseError {
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::MalformedDocument => "malformed_document",
            ParseError::InvalidMetadata(_) => "invalid_metadata",
            ParseError::Io(_) => "io_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    #[default]
    Gemini,
    Claude,
}

impl Agent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Agent::Gemini => "gemini",
            Agent::Claude => "claude",
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Agent {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "gemini" => Ok(Agent::Gemini),
            "claude" => Ok(Agent::Claude),
            other => Err(format!("Unknown agent: {other}")),
        }
    }
}

/// Run state of the external agent loop, as written to the status document.
///
/// Always rebuilt from disk; `is_zombie` is filled in by whoever knows
/// whether the runner process is still alive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusRecord {
    pub active: bool,
    pub iteration: u64,
    pub max_iterations: u64,
    pub completion_promise: String,
    pub started_at: String,
    pub prompt: String,
    #[serde(default)]
    pub agent: Agent,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub queries: u64,
    #[serde(default = "default_phase")]
    pub phase: String,
    #[serde(default)]
    pub is_zombie: bool,
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self {
            active: false,
            iteration: 0,
            max_iterations: 0,
            completion_promise: String::new(),
            started_at: String::new(),
            prompt: String::new(),
            agent: Agent::default(),
            model: String::new(),
            queries: 0,
            phase: default_phase(),
            is_zombie: false,
        }
    }
}

fn default_phase() -> String {
    DEFAULT_PHASE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRecord {
    pub description: String,
    pub completed: bool,
    #[serde(default)]
    pub phase: String,
}

impl TaskRecord {
    pub fn phase_label(&self) -> &str {
        if self.phase.is_empty() {
            UNCATEGORIZED_PHASE
        } else {
            &self.phase
        }
    }
}

/// Groups tasks by phase label, keeping phases in first-seen order.
pub fn group_by_phase(tasks: &[TaskRecord]) -> Vec<(&str, Vec<&TaskRecord>)> {
    let mut groups: Vec<(&str, Vec<&TaskRecord>)> = Vec::new();
    for task in tasks {
        let label = task.phase_label();
        match groups.iter_mut().find(|(name, _)| *name == label) {
            Some((_, entries)) => entries.push(task),
            None => groups.push((label, vec![task])),
        }
    }
    groups
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangedFileRecord {
    pub status: String,
    pub path: String,
}

/// Replaces `path` by writing a sibling temp file and renaming it over.
pub fn write_atomic(path: &Path, payload: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };

    std::fs::write(&temp_path, payload)?;
    std::fs::rename(&temp_path, path)
}
