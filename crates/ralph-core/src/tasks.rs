//! Checklist plan parsing and in-place mark toggling.
//!
//! Line grammar, checked in this order:
//!
//! - phase header: `**Phase <N>: <Title>**` anywhere on the line, or a
//!   markdown heading `### Phase <N>: <Title>`; sets the current phase.
//! - checklist item: `- [ ] text` / `- [x] text` (mark is case-insensitive).
//!
//! Everything else is ignored.

use crate::{write_atomic, TaskError, TaskRecord};
use regex::Regex;
use std::io;
use std::path::Path;
use std::sync::OnceLock;
use tracing::warn;

fn bold_phase_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\*\*Phase\s+\d+\s*:\s*(.*?)\*\*").expect("valid regex")
    })
}

fn heading_phase_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*#{1,6}\s*Phase\s+\d+\s*:\s*(.*?)\s*$").expect("valid regex")
    })
}

fn item_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*-\s*\[([xX ])\]\s*(.*)$").expect("valid regex"))
}

pub fn parse(raw: &str) -> Vec<TaskRecord> {
    let mut tasks = Vec::new();
    let mut current_phase = String::new();

    for line in raw.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(title) = phase_title(line) {
            current_phase = title;
            continue;
        }
        let Some(captures) = item_pattern().captures(line) else {
            continue;
        };
        let description = captures.get(2).map(|m| m.as_str().trim()).unwrap_or("");
        if description.is_empty() {
            continue;
        }
        let completed = captures
            .get(1)
            .map(|m| m.as_str().eq_ignore_ascii_case("x"))
            .unwrap_or(false);
        tasks.push(TaskRecord {
            description: description.to_string(),
            completed,
            phase: current_phase.clone(),
        });
    }

    tasks
}

fn phase_title(line: &str) -> Option<String> {
    bold_phase_pattern()
        .captures(line)
        .or_else(|| heading_phase_pattern().captures(line))
        .and_then(|captures| captures.get(1))
        .map(|title| title.as_str().trim().to_string())
}

/// Task listing is advisory: a missing plan is an empty plan, and read
/// failures are logged rather than returned.
pub fn load(path: &Path) -> Vec<TaskRecord> {
    match std::fs::read_to_string(path) {
        Ok(raw) => parse(&raw),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(err) => {
            warn!(event = "tasks_read_failed", path = %path.display(), error = %err);
            Vec::new()
        }
    }
}

/// Sets the mark of the first task line whose text is exactly
/// `description`. Returns `None` when no line matches; otherwise the
/// document with only that mark character rewritten.
pub fn toggle_in(raw: &str, description: &str, completed: bool) -> Option<String> {
    let description = description.trim();
    if description.is_empty() {
        return None;
    }
    let pattern = format!(
        r"(?m)^([ \t]*-[ \t]*\[)[xX ]\][ \t]*{}[ \t]*\r?$",
        regex::escape(description)
    );
    let matcher = match Regex::new(&pattern) {
        Ok(value) => value,
        Err(err) => {
            warn!(event = "toggle_pattern_invalid", error = %err);
            return None;
        }
    };
    // Checked phase headers match the item shape but are not tasks.
    let captures = matcher
        .captures_iter(raw)
        .find(|captures| captures.get(0).is_some_and(|line| phase_title(line.as_str()).is_none()))?;
    let mark_at = captures.get(1)?.end();
    let mark = if completed { "x" } else { " " };

    let mut updated = String::with_capacity(raw.len());
    updated.push_str(&raw[..mark_at]);
    updated.push_str(mark);
    updated.push_str(&raw[mark_at + 1..]);
    Some(updated)
}

/// Persists a mark change for `description`. `Ok(false)` means the
/// description was not found (or the plan does not exist) and nothing was
/// written; a match already in the requested state reports `Ok(true)`
/// without rewriting the file.
pub fn toggle(path: &Path, description: &str, completed: bool) -> Result<bool, TaskError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(TaskError::Io(err)),
    };
    let Some(updated) = toggle_in(&raw, description, completed) else {
        return Ok(false);
    };
    if updated != raw {
        write_atomic(path, &updated)?;
    }
    Ok(true)
}
