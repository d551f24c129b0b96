use crate::watcher::ChangeKind;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";
pub const STATUS_FILE: &str = ".gemini/ralph-loop.local.md";
pub const TASKS_FILE: &str = "@fix_plan.md";
pub const LOG_FILE: &str = "ralph-runner.log";
pub const DEFAULT_RUNNER_SCRIPT: &str = "scripts/run-loop.sh";

#[derive(Parser, Debug, Clone)]
#[command(name = "ralph-hub", about = "Live dashboard hub for a ralph agent loop")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub addr: String,
    #[arg(long, default_value = "")]
    pub project_root: String,
    #[arg(long, default_value = "")]
    pub status_file: String,
    #[arg(long, default_value = "")]
    pub tasks_file: String,
    #[arg(long, default_value = "")]
    pub log_file: String,
    #[arg(long, default_value = DEFAULT_RUNNER_SCRIPT)]
    pub runner_script: String,
    /// `pkill -f` pattern used by stop; repeatable
    #[arg(long = "stop-pattern")]
    pub stop_patterns: Vec<String>,
    #[arg(long, default_value_t = 100)]
    pub debounce_ms: u64,
    #[arg(long, default_value_t = 5)]
    pub files_interval: u64,
    #[arg(long, default_value_t = 256)]
    pub queue_capacity: usize,
    #[arg(long, default_value_t = 10)]
    pub ping_interval: u64,
    #[arg(long, default_value_t = 2)]
    pub write_timeout: u64,
    #[arg(long, default_value_t = false)]
    pub allow_remote: bool,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    #[arg(long, default_value = "")]
    pub log_dir: String,
}

/// The three files the hub follows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchedFiles {
    pub status: PathBuf,
    pub tasks: PathBuf,
    pub log: PathBuf,
}

impl WatchedFiles {
    pub fn in_root(root: &Path) -> Self {
        Self {
            status: root.join(STATUS_FILE),
            tasks: root.join(TASKS_FILE),
            log: root.join(LOG_FILE),
        }
    }

    /// Maps a notification path to the file kind it names, by file name.
    pub fn kind_of(&self, path: &Path) -> Option<ChangeKind> {
        let name = path.file_name()?;
        if self.status.file_name() == Some(name) {
            Some(ChangeKind::Status)
        } else if self.tasks.file_name() == Some(name) {
            Some(ChangeKind::Tasks)
        } else if self.log.file_name() == Some(name) {
            Some(ChangeKind::Logs)
        } else {
            None
        }
    }

    /// Distinct parent directories, in status/tasks/log order.
    pub fn directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for path in [&self.status, &self.tasks, &self.log] {
            if let Some(parent) = path.parent() {
                let parent = parent.to_path_buf();
                if !dirs.contains(&parent) {
                    dirs.push(parent);
                }
            }
        }
        dirs
    }
}

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub addr: String,
    pub project_root: PathBuf,
    pub files: WatchedFiles,
    pub runner_script: String,
    pub stop_patterns: Vec<String>,
    pub debounce: Duration,
    pub files_interval: Duration,
    pub queue_capacity: usize,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub allow_remote: bool,
    pub debug: bool,
    pub log_dir: String,
}

impl HubConfig {
    /// Defaults for a project rooted at `root`.
    pub fn for_root(root: &Path) -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            project_root: root.to_path_buf(),
            files: WatchedFiles::in_root(root),
            runner_script: DEFAULT_RUNNER_SCRIPT.to_string(),
            stop_patterns: vec![DEFAULT_RUNNER_SCRIPT.to_string()],
            debounce: Duration::from_millis(100),
            files_interval: Duration::from_secs(5),
            queue_capacity: 256,
            ping_interval: Duration::from_secs(10),
            write_timeout: Duration::from_secs(2),
            allow_remote: false,
            debug: false,
            log_dir: String::new(),
        }
    }
}

pub fn load_config(args: Args) -> HubConfig {
    let project_root = resolve_project_root(&args.project_root);
    let defaults = WatchedFiles::in_root(&project_root);
    let files = WatchedFiles {
        status: resolve_file(&project_root, &args.status_file, defaults.status),
        tasks: resolve_file(&project_root, &args.tasks_file, defaults.tasks),
        log: resolve_file(&project_root, &args.log_file, defaults.log),
    };
    let stop_patterns = if args.stop_patterns.is_empty() {
        vec![args.runner_script.clone()]
    } else {
        args.stop_patterns
    };
    HubConfig {
        addr: resolve_addr(&args.addr),
        project_root,
        files,
        runner_script: args.runner_script,
        stop_patterns,
        debounce: Duration::from_millis(args.debounce_ms),
        files_interval: Duration::from_secs(args.files_interval.max(1)),
        queue_capacity: args.queue_capacity.max(1),
        ping_interval: Duration::from_secs(args.ping_interval),
        write_timeout: Duration::from_secs(args.write_timeout.max(1)),
        allow_remote: args.allow_remote,
        debug: args.debug || env_true("RALPH_HUB_DEBUG"),
        log_dir: resolve_log_dir(&args.log_dir),
    }
}

pub fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn resolve_addr(addr_flag: &str) -> String {
    if !addr_flag.trim().is_empty() {
        return addr_flag.to_string();
    }
    if let Ok(value) = std::env::var("RALPH_HUB_ADDR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    DEFAULT_ADDR.to_string()
}

fn resolve_project_root(root_flag: &str) -> PathBuf {
    let raw = if !root_flag.trim().is_empty() {
        PathBuf::from(root_flag)
    } else if let Some(value) = std::env::var("RALPH_PROJECT_ROOT")
        .ok()
        .filter(|value| !value.trim().is_empty())
    {
        PathBuf::from(value)
    } else {
        PathBuf::from(".")
    };
    if raw.is_absolute() {
        return raw;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(raw),
        Err(_) => raw,
    }
}

fn resolve_file(root: &Path, flag: &str, default: PathBuf) -> PathBuf {
    if flag.trim().is_empty() {
        return default;
    }
    let path = PathBuf::from(flag);
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

/// Empty means no log file; only stdout is written.
fn resolve_log_dir(log_dir_flag: &str) -> String {
    pick_log_dir(log_dir_flag, std::env::var("RALPH_LOG_DIR").ok())
}

fn pick_log_dir(flag: &str, env_value: Option<String>) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    env_value
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["ralph-hub", "--project-root", "/srv/loop"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn defaults_follow_project_layout() {
        let config = load_config(args(&["--addr", "127.0.0.1:4100"]));
        assert_eq!(config.addr, "127.0.0.1:4100");
        assert_eq!(
            config.files.status,
            PathBuf::from("/srv/loop/.gemini/ralph-loop.local.md")
        );
        assert_eq!(config.files.tasks, PathBuf::from("/srv/loop/@fix_plan.md"));
        assert_eq!(config.files.log, PathBuf::from("/srv/loop/ralph-runner.log"));
        assert_eq!(config.stop_patterns, vec!["scripts/run-loop.sh".to_string()]);
    }

    #[test]
    fn relative_overrides_resolve_against_root() {
        let config = load_config(args(&[
            "--log-file",
            "logs/run.log",
            "--tasks-file",
            "/abs/plan.md",
            "--stop-pattern",
            "gemini",
            "--stop-pattern",
            "claude",
            "--files-interval",
            "0",
        ]));
        assert_eq!(config.files.log, PathBuf::from("/srv/loop/logs/run.log"));
        assert_eq!(config.files.tasks, PathBuf::from("/abs/plan.md"));
        assert_eq!(config.stop_patterns, vec!["gemini", "claude"]);
        assert_eq!(config.files_interval, Duration::from_secs(1));
    }

    #[test]
    fn log_file_is_opt_in() {
        assert_eq!(pick_log_dir("", None), "");
        assert_eq!(pick_log_dir("  ", Some(" ".into())), "");
        assert_eq!(pick_log_dir("", Some("/var/log/ralph".into())), "/var/log/ralph");
        assert_eq!(pick_log_dir("logs", Some("/var/log/ralph".into())), "logs");
    }

    #[test]
    fn kind_of_matches_file_names() {
        let files = WatchedFiles::in_root(Path::new("/srv/loop"));
        assert_eq!(
            files.kind_of(Path::new("/srv/loop/.gemini/ralph-loop.local.md")),
            Some(ChangeKind::Status)
        );
        assert_eq!(
            files.kind_of(Path::new("/srv/loop/@fix_plan.md")),
            Some(ChangeKind::Tasks)
        );
        assert_eq!(
            files.kind_of(Path::new("/srv/loop/ralph-runner.log")),
            Some(ChangeKind::Logs)
        );
        assert_eq!(files.kind_of(Path::new("/srv/loop/README.md")), None);
        assert_eq!(
            files.directories(),
            vec![PathBuf::from("/srv/loop/.gemini"), PathBuf::from("/srv/loop")]
        );
    }
}
