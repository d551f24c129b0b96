use ralph_core::{parse_porcelain, ChangedFileRecord};
use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

/// Upper bound on entries reported for one refresh.
pub const MAX_CHANGED_FILES: usize = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GitError {
    #[error("git is not installed")]
    Missing,
    #[error("not a git repository")]
    NotRepo,
    #[error("git failed: {0}")]
    Failed(String),
}

pub async fn run_git(cwd: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                GitError::Missing
            } else {
                GitError::Failed(err.to_string())
            }
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("not a git repository") {
            return Err(GitError::NotRepo);
        }
        return Err(GitError::Failed(stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Working-tree changes under `root`, including untracked files.
pub async fn changed_files(root: &Path) -> Result<Vec<ChangedFileRecord>, GitError> {
    let output = run_git(root, &["status", "--porcelain=v1", "-u"]).await?;
    let mut files = parse_porcelain(&output);
    files.truncate(MAX_CHANGED_FILES);
    Ok(files)
}
