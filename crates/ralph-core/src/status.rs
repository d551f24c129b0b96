//! Status document: a YAML front-matter block followed by the loop prompt.
//!
//! ```text
//! <preamble>
//! ---
//! active: true
//! iteration: 3
//! ---
//! <prompt body, may itself contain --->
//! ```

use crate::{write_atomic, Agent, ParseError, StatusRecord, DEFAULT_PHASE};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::io;
use std::path::Path;
use std::sync::OnceLock;

const DELIMITER: &str = "---";

pub fn parse(raw: &str) -> Result<StatusRecord, ParseError> {
    let parts: Vec<&str> = raw.split(DELIMITER).collect();
    if parts.len() < 3 {
        return Err(ParseError::MalformedDocument);
    }

    let metadata = decode_metadata(parts[1])?;
    let prompt = parts[2..].join(DELIMITER).trim().to_string();

    Ok(StatusRecord {
        active: bool_field(&metadata, "active").unwrap_or(false),
        iteration: count_field(&metadata, "iteration"),
        max_iterations: count_field(&metadata, "max_iterations"),
        completion_promise: string_field(&metadata, "completion_promise").unwrap_or_default(),
        started_at: string_field(&metadata, "started_at").unwrap_or_default(),
        prompt,
        agent: string_field(&metadata, "agent")
            .and_then(|value| value.parse::<Agent>().ok())
            .unwrap_or_default(),
        model: string_field(&metadata, "model").unwrap_or_default(),
        queries: count_field(&metadata, "queries"),
        phase: string_field(&metadata, "phase")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PHASE.to_string()),
        is_zombie: false,
    })
}

/// Reads and parses the status document. A missing file means the loop
/// never started and yields the inactive defaults.
pub fn load(path: &Path) -> Result<StatusRecord, ParseError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => parse(&raw),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(StatusRecord::default()),
        Err(err) => Err(ParseError::Io(err)),
    }
}

/// Flips `active: true` to `active: false` inside the metadata block and
/// leaves every other byte alone. Returns whether the file changed.
pub fn mark_inactive(path: &Path) -> Result<bool, ParseError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(ParseError::Io(err)),
    };
    match deactivate(&raw) {
        Some(updated) => {
            write_atomic(path, &updated)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn deactivate(raw: &str) -> Option<String> {
    let start = raw.find(DELIMITER)? + DELIMITER.len();
    let end = start + raw[start..].find(DELIMITER)?;
    let block = &raw[start..end];
    let found = active_line_pattern().captures(block)?;
    let value = found.get(2)?;
    let mut updated = String::with_capacity(raw.len() + 1);
    updated.push_str(&raw[..start + value.start()]);
    updated.push_str("false");
    updated.push_str(&raw[start + value.end()..]);
    Some(updated)
}

fn active_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^([ \t]*active[ \t]*:[ \t]*)((?i:true|yes|on))[ \t]*\r?$")
            .expect("valid regex")
    })
}

fn decode_metadata(block: &str) -> Result<Mapping, ParseError> {
    let blank = block
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with('#'));
    if blank {
        return Ok(Mapping::new());
    }
    let value: Value = serde_yaml::from_str(block)
        .map_err(|err| ParseError::InvalidMetadata(err.to_string()))?;
    match value {
        Value::Mapping(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        other => Err(ParseError::InvalidMetadata(format!(
            "expected a key-value block, found {}",
            value_kind(&other)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn bool_field(map: &Mapping, key: &str) -> Option<bool> {
    match map.get(key)? {
        Value::Bool(value) => Some(*value),
        Value::String(value) => match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" => Some(true),
            "false" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn count_field(map: &Mapping, key: &str) -> u64 {
    match map.get(key) {
        Some(Value::Number(value)) => value.as_u64().unwrap_or(0),
        Some(Value::String(value)) => value.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

fn string_field(map: &Mapping, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}
