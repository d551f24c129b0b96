//! Plain-text rendering of the dashboard state for terminals and pipes.

use crate::store::DashboardState;
use ralph_core::group_by_phase;

/// Remembers what has already been printed so each render only emits
/// what changed.
#[derive(Debug, Default)]
pub struct ConsoleView {
    printed_log: usize,
    log_generation: u64,
    last_summary: String,
    last_tasks: String,
}

impl ConsoleView {
    pub fn render(&mut self, state: &DashboardState) -> Vec<String> {
        let mut out = Vec::new();

        let summary = summary_line(state);
        if summary != self.last_summary {
            out.push(summary.clone());
            self.last_summary = summary;
        }

        let tasks = task_outline(state);
        if tasks != self.last_tasks {
            if !tasks.is_empty() {
                out.push(tasks.clone());
            }
            self.last_tasks = tasks;
        }

        if state.log_generation != self.log_generation {
            out.push("--- log cleared ---".to_string());
            self.log_generation = state.log_generation;
            self.printed_log = 0;
        }
        let fresh = state.logs.get(self.printed_log..).unwrap_or(state.logs.as_str());
        if !fresh.is_empty() {
            out.push(fresh.trim_end_matches('\n').to_string());
            self.printed_log = state.logs.len();
        }
        out
    }
}

pub fn summary_line(state: &DashboardState) -> String {
    let link = if state.connected { "live" } else { "polling" };
    let Some(status) = &state.status else {
        return format!("[{link}] waiting for hub");
    };
    let run = if status.is_zombie {
        "ZOMBIE"
    } else if status.active {
        "RUNNING"
    } else {
        "STOPPED"
    };
    format!(
        "[{link}] {run} {agent} iter {iteration}/{max} phase {phase} tasks {done}/{total} files {files}",
        agent = status.agent,
        iteration = status.iteration,
        max = status.max_iterations,
        phase = status.phase,
        done = state.completed_tasks(),
        total = state.tasks.len(),
        files = state.changed_files.len(),
    )
}

fn task_outline(state: &DashboardState) -> String {
    let mut lines = Vec::new();
    for (phase, tasks) in group_by_phase(&state.tasks) {
        lines.push(format!("## {phase}"));
        for task in tasks {
            let mark = if task.completed { "x" } else { " " };
            lines.push(format!("  [{mark}] {}", task.description));
        }
    }
    lines.join("\n")
}
