//! Post-turn hooks.
//!
//! After each turn the agent home can be committed and pushed so that
//! memory edits made by tools are never lost. A failing hook does not fail
//! the turn; the worker flags it with a warning reaction instead.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;

use crate::error::SyncError;
use crate::event::Event;

/// What a post-turn hook did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped(String),
    /// Nothing to commit.
    Clean,
    /// Committed locally; no remote configured.
    Committed,
    Pushed,
}

/// Runs once after every turn that did not fail.
#[async_trait]
pub trait PostTurnHook: Send + Sync {
    fn name(&self) -> &str;

    async fn after_turn(&self, event: &Event) -> Result<SyncOutcome, SyncError>;
}

/// Hook used when post-turn sync is disabled.
#[derive(Debug, Default)]
pub struct NoopSync;

#[async_trait]
impl PostTurnHook for NoopSync {
    fn name(&self) -> &str {
        "noop"
    }

    async fn after_turn(&self, _event: &Event) -> Result<SyncOutcome, SyncError> {
        Ok(SyncOutcome::Skipped("disabled".to_string()))
    }
}

/// Commits and pushes the agent home with the `git` binary.
#[derive(Debug, Clone)]
pub struct GitSync {
    repo_dir: PathBuf,
}

struct GitOutput {
    stdout: String,
}

impl GitSync {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<GitOutput, SyncError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(SyncError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(GitOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

#[async_trait]
impl PostTurnHook for GitSync {
    fn name(&self) -> &str {
        "git"
    }

    async fn after_turn(&self, event: &Event) -> Result<SyncOutcome, SyncError> {
        if !self.repo_dir.join(".git").exists() {
            return Ok(SyncOutcome::Skipped("not a git repo".to_string()));
        }
        match self.git(&["add", "-A"]).await {
            Ok(_) => {}
            Err(SyncError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SyncOutcome::Skipped("git not installed".to_string()));
            }
            Err(e) => return Err(e),
        }

        let status = self.git(&["status", "--porcelain"]).await?;
        if status.stdout.trim().is_empty() {
            return Ok(SyncOutcome::Clean);
        }

        let message = format!("roost auto-commit {} ({})", Utc::now().to_rfc3339(), event.kind);
        self.git(&["commit", "-m", &message]).await?;

        let remotes = self.git(&["remote"]).await?;
        if remotes.stdout.trim().is_empty() {
            return Ok(SyncOutcome::Committed);
        }
        self.git(&["push"]).await?;
        Ok(SyncOutcome::Pushed)
    }
}
