//! Launching and stopping the external agent loop script.

use crate::config::HubConfig;
use ralph_core::Agent;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    pub prompt: String,
    pub max_iterations: u64,
    pub completion_promise: String,
    pub agent: String,
    pub model: String,
}

impl StartRequest {
    /// Checks the request and resolves the agent; an empty agent means gemini.
    pub fn validate(&self) -> Result<Agent, RunnerError> {
        if self.prompt.trim().is_empty() {
            return Err(RunnerError::EmptyPrompt);
        }
        if self.agent.trim().is_empty() {
            return Ok(Agent::default());
        }
        self.agent
            .parse::<Agent>()
            .map_err(|_| RunnerError::InvalidAgent(self.agent.clone()))
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Prompt is required")]
    EmptyPrompt,
    #[error("Invalid agent: {0}")]
    InvalidAgent(String),
    #[error("Failed to spawn: {0}")]
    Spawn(io::Error),
}

pub fn launch_banner(agent: Agent) -> String {
    format!("🚀 Launching {agent} loop...\n")
}

pub struct RunnerControl {
    project_root: PathBuf,
    script: String,
    stop_patterns: Vec<String>,
    log_path: PathBuf,
    child: Mutex<Option<Child>>,
}

impl RunnerControl {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            project_root: config.project_root.clone(),
            script: config.runner_script.clone(),
            stop_patterns: config.stop_patterns.clone(),
            log_path: config.files.log.clone(),
            child: Mutex::new(None),
        }
    }

    /// Starts `bash <script> agent prompt max_iterations completion_promise
    /// model` in its own process group, appending its output to the log.
    pub async fn spawn(&self, request: &StartRequest, agent: Agent) -> Result<u32, RunnerError> {
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(RunnerError::Spawn)?;
        let stderr = stdout.try_clone().map_err(RunnerError::Spawn)?;

        let mut command = Command::new("bash");
        command
            .arg(&self.script)
            .arg(agent.as_str())
            .arg(&request.prompt)
            .arg(request.max_iterations.to_string())
            .arg(&request.completion_promise)
            .arg(&request.model)
            .current_dir(&self.project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(RunnerError::Spawn)?;
        let pid = child.id().unwrap_or_default();
        let mut slot = self.child.lock().await;
        if let Some(previous) = slot.as_mut() {
            if matches!(previous.try_wait(), Ok(None)) {
                warn!(event = "runner_replaced", pid = previous.id().unwrap_or_default());
            }
        }
        *slot = Some(child);
        info!(event = "runner_spawned", pid = pid, agent = %agent, script = %self.script);
        Ok(pid)
    }

    /// Terminates the spawned process group, then every process matching a
    /// stop pattern. Returns how many signals were delivered.
    pub async fn stop(&self) -> usize {
        let mut signalled = 0;
        if let Some(mut child) = self.child.lock().await.take() {
            if let Some(pid) = child.id() {
                if signal(&format!("-{pid}")).await {
                    signalled += 1;
                }
            }
            let _ = child.start_kill();
        }

        let own = std::process::id();
        for pattern in &self.stop_patterns {
            match matching_pids(pattern).await {
                Ok(pids) => {
                    for pid in pids.into_iter().filter(|pid| *pid != own) {
                        if signal(&pid.to_string()).await {
                            signalled += 1;
                        }
                    }
                }
                Err(err) => warn!(event = "stop_pattern_failed", pattern = %pattern, error = %err),
            }
        }
        info!(event = "runner_stopped", signalled = signalled);
        signalled
    }

    /// `Some(true)` while the runner is alive, `Some(false)` once it is
    /// gone, `None` when that cannot be determined.
    pub async fn liveness(&self) -> Option<bool> {
        {
            let mut slot = self.child.lock().await;
            if let Some(child) = slot.as_mut() {
                match child.try_wait() {
                    Ok(None) => return Some(true),
                    Ok(Some(status)) => {
                        info!(event = "runner_exited", status = %status);
                        *slot = None;
                    }
                    Err(err) => {
                        warn!(event = "runner_wait_failed", error = %err);
                        return None;
                    }
                }
            }
        }
        let own = std::process::id();
        match matching_pids(&self.script).await {
            Ok(pids) => Some(pids.into_iter().any(|pid| pid != own)),
            Err(_) => None,
        }
    }
}

async fn matching_pids(pattern: &str) -> io::Result<Vec<u32>> {
    let output = Command::new("pgrep")
        .args(["-f", pattern])
        .stdin(Stdio::null())
        .output()
        .await?;
    // pgrep exits 1 when nothing matches
    match output.status.code() {
        Some(0) | Some(1) => Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .collect()),
        _ => Err(io::Error::new(
            io::ErrorKind::Other,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        )),
    }
}

async fn signal(target: &str) -> bool {
    match Command::new("kill")
        .args(["-TERM", "--", target])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(err) => {
            warn!(event = "signal_failed", target = %target, error = %err);
            false
        }
    }
}
