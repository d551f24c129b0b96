use crate::ChangedFileRecord;

/// Parses `git status --porcelain=v1` output into changed-file records.
/// Renames report the destination path.
pub fn parse_porcelain(output: &str) -> Vec<ChangedFileRecord> {
    output.lines().filter_map(parse_porcelain_line).collect()
}

fn parse_porcelain_line(line: &str) -> Option<ChangedFileRecord> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.len() < 4 || !line.is_char_boundary(2) || !line.is_char_boundary(3) {
        return None;
    }
    let status = line[..2].trim();
    if status.is_empty() {
        return None;
    }
    let mut path = line[3..].trim();
    if let Some((_, renamed)) = path.split_once(" -> ") {
        path = renamed.trim();
    }
    let path = path
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .unwrap_or(path);
    if path.is_empty() {
        return None;
    }
    Some(ChangedFileRecord {
        status: status.to_string(),
        path: path.to_string(),
    })
}
