use ralph_core::{ChangedFileRecord, PushEvent, StatusRecord, TaskRecord};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedState = Arc<RwLock<DashboardState>>;

/// Client-side view of one hub.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardState {
    pub status: Option<StatusRecord>,
    pub logs: String,
    pub tasks: Vec<TaskRecord>,
    pub changed_files: Vec<ChangedFileRecord>,
    pub connected: bool,
    /// Bumped whenever `logs` is discarded rather than extended.
    pub log_generation: u64,
}

impl DashboardState {
    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Merges one push event: snapshots replace, log deltas append.
    pub fn apply(&mut self, event: PushEvent) {
        match event {
            PushEvent::Status(status) => self.status = Some(status),
            PushEvent::Logs(delta) => self.logs.push_str(&delta),
            PushEvent::Tasks(tasks) => self.tasks = tasks,
            PushEvent::Files(files) => self.changed_files = files,
            PushEvent::LogClear => {
                self.logs.clear();
                self.log_generation += 1;
            }
            PushEvent::Pong => {}
        }
    }

    /// Adopts the hub's full log text. Text that only extends what is
    /// already held keeps the current generation.
    pub fn replace_logs(&mut self, text: String) {
        if !text.starts_with(self.logs.as_str()) {
            self.log_generation += 1;
        }
        self.logs = text;
    }

    pub fn completed_tasks(&self) -> usize {
        self.tasks.iter().filter(|task| task.completed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_semantics() {
        let mut state = DashboardState::default();
        state.apply(PushEvent::Logs("a\n".into()));
        state.apply(PushEvent::Logs("b\n".into()));
        assert_eq!(state.logs, "a\nb\n");

        state.apply(PushEvent::LogClear);
        assert!(state.logs.is_empty());
        assert_eq!(state.log_generation, 1);
        state.apply(PushEvent::Logs("c\n".into()));
        assert_eq!(state.logs, "c\n");

        state.apply(PushEvent::Tasks(vec![TaskRecord {
            description: "Compile".into(),
            completed: true,
            phase: String::new(),
        }]));
        state.apply(PushEvent::Tasks(Vec::new()));
        assert!(state.tasks.is_empty());

        state.apply(PushEvent::Status(StatusRecord {
            iteration: 2,
            ..StatusRecord::default()
        }));
        state.apply(PushEvent::Pong);
        assert_eq!(state.status.as_ref().map(|s| s.iteration), Some(2));
        assert_eq!(state.completed_tasks(), 0);
    }

    #[test]
    fn replace_logs_bumps_generation_only_on_divergence() {
        let mut state = DashboardState::default();
        state.replace_logs("boot\n".into());
        assert_eq!(state.log_generation, 0);
        state.apply(PushEvent::Logs("step\n".into()));
        state.replace_logs("boot\nstep\nmore\n".into());
        assert_eq!(state.log_generation, 0);
        assert_eq!(state.logs, "boot\nstep\nmore\n");

        state.replace_logs("new run\n".into());
        assert_eq!(state.log_generation, 1);
        assert_eq!(state.logs, "new run\n");
    }
}
