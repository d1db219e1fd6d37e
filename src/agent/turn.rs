//! Per-turn state and the context handed to tools.

use std::path::{Path, PathBuf};

use crate::agent::breaker::{BreakerConfig, SendLoopBreaker, SendVerdict};
use crate::agent::history::MessageHistory;
use crate::agent::outbox::{
    Delivery, ERROR_REACTION, Outbox, SentMessage, WARNING_REACTION, latest_agent_message,
};
use crate::channels::Attachment;
use crate::event::Event;
use crate::memory::MemoryStore;
use crate::scheduler::SchedulerEngine;
use crate::tools::ToolError;

/// State that lives for exactly one turn.
#[derive(Debug)]
pub struct TurnState {
    pub breaker: SendLoopBreaker,
    /// Messages the agent delivered this turn, oldest first.
    pub sent: Vec<SentMessage>,
    /// The send-loop breaker stopped the turn.
    pub halted: bool,
}

impl TurnState {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breaker: SendLoopBreaker::new(config),
            sent: Vec::new(),
            halted: false,
        }
    }

    pub fn reset(&mut self) {
        self.breaker.reset();
        self.sent.clear();
        self.halted = false;
    }
}

/// Everything a tool can reach while a turn is running.
pub struct TurnContext<'a> {
    pub event: &'a Event,
    /// Agent home directory.
    pub home: &'a Path,
    pub outbox: &'a Outbox,
    pub memory: &'a dyn MemoryStore,
    pub scheduler: &'a SchedulerEngine,
    pub history: &'a mut MessageHistory,
    pub state: &'a mut TurnState,
}

impl TurnContext<'_> {
    /// The turn's own channel, used when a tool omits `channel_id`.
    pub fn current_channel(&self) -> Option<&str> {
        self.event.channel_id.as_deref()
    }

    /// An explicit channel, else the turn's channel.
    pub fn resolve_channel(&self, explicit: Option<String>) -> Option<String> {
        explicit.or_else(|| self.current_channel().map(str::to_string))
    }

    /// Resolve attachment paths to files under the agent home.
    ///
    /// Relative paths are taken from the home. Absolute paths outside the
    /// home are re-rooted under it. Blank entries and repeats are dropped.
    pub async fn resolve_attachments(&self, raw_paths: &[String]) -> Result<Vec<Attachment>, ToolError> {
        if raw_paths.iter().all(|p| p.trim().is_empty()) {
            return Ok(Vec::new());
        }
        let home = tokio::fs::canonicalize(self.home)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("agent home is not accessible: {e}")))?;

        let mut attachments: Vec<Attachment> = Vec::new();
        for raw in raw_paths.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            let raw_path = Path::new(raw);
            let candidate = if raw_path.is_absolute() {
                match tokio::fs::canonicalize(raw_path).await {
                    Ok(absolute) if absolute.starts_with(&home) => absolute,
                    _ => home.join(raw.trim_start_matches(['/', '\\'])),
                }
            } else {
                home.join(raw_path)
            };
            let resolved = tokio::fs::canonicalize(&candidate).await.map_err(|_| {
                ToolError::InvalidParameters(format!(
                    "send_message failed: attachment file does not exist: {}",
                    candidate.display()
                ))
            })?;
            let inside = resolved.starts_with(&home) && resolved != home;
            if !inside {
                return Err(ToolError::InvalidParameters(
                    "send_message failed: attachment path must be inside the agent home directory."
                        .to_string(),
                ));
            }
            let is_file = tokio::fs::metadata(&resolved)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !is_file {
                return Err(ToolError::InvalidParameters(format!(
                    "send_message failed: attachment path is not a file: {}",
                    resolved.display()
                )));
            }
            if attachments.iter().any(|a| a.path == resolved) {
                continue;
            }
            let name = home_relative_name(&home, &resolved);
            attachments.push(Attachment {
                path: resolved,
                name,
            });
        }
        Ok(attachments)
    }

    /// Send a message through the send-loop breaker.
    ///
    /// Attachment names count toward similarity, so the same text with
    /// different files is not a repeat.
    pub async fn send_message(
        &mut self,
        channel_id: &str,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<Delivery, ToolError> {
        match self.state.breaker.check(&similarity_basis(text, attachments)) {
            SendVerdict::Halt {
                streak,
                similarity,
                warn,
            } => {
                if warn {
                    self.react_to_last_agent_message(channel_id, WARNING_REACTION).await;
                }
                let reacted = self.react_to_last_agent_message(channel_id, ERROR_REACTION).await;
                self.state.halted = true;
                tracing::warn!(
                    channel = %channel_id,
                    streak,
                    similarity,
                    reacted,
                    "Send loop hard stop, message suppressed"
                );
                Err(ToolError::LoopHalted { streak })
            }
            SendVerdict::Deliver {
                streak,
                similarity,
                warn,
            } => {
                if warn {
                    let reacted = self
                        .react_to_last_agent_message(channel_id, WARNING_REACTION)
                        .await;
                    tracing::warn!(
                        channel = %channel_id,
                        streak,
                        similarity,
                        reacted,
                        "Send loop detected"
                    );
                }
                let delivery = self
                    .outbox
                    .deliver(self.history, &mut self.state.sent, channel_id, text, attachments)
                    .await?;
                Ok(delivery)
            }
        }
    }

    /// React to the newest message the agent sent, in this turn if possible.
    pub async fn react_to_last_agent_message(&self, channel_id: &str, emoji: &str) -> bool {
        match latest_agent_message(&self.state.sent, &*self.history, Some(channel_id)) {
            Some((channel, message_id)) => self.outbox.react(&channel, &message_id, emoji).await,
            None => false,
        }
    }
}

/// Text compared by the breaker: the message plus its sorted attachment names.
fn similarity_basis(text: &str, attachments: &[Attachment]) -> String {
    if attachments.is_empty() {
        return text.to_string();
    }
    let mut names: Vec<&str> = attachments.iter().map(|a| a.name.as_str()).collect();
    names.sort_unstable();
    format!("{text}\nattachments:{}", names.join("|"))
}

/// `/`-separated path of `path` below `home`, with a leading `/`.
fn home_relative_name(home: &Path, path: &Path) -> String {
    let relative: PathBuf = path.strip_prefix(home).unwrap_or(path).to_path_buf();
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::testing::{FakeTransport, TurnHarness};

    fn harness_with_files() -> TurnHarness {
        let harness = TurnHarness::new(FakeTransport::ready(), Event::chat("c1", "m1", "ana", "hi"));
        let state = harness.dir.path().join("state");
        std::fs::create_dir_all(&state).unwrap();
        std::fs::write(state.join("report.md"), "# report").unwrap();
        std::fs::write(harness.dir.path().join("chart.png"), [0u8; 4]).unwrap();
        harness
    }

    fn names(attachments: &[Attachment]) -> Vec<&str> {
        attachments.iter().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn test_similarity_basis() {
        let files = [
            Attachment {
                path: PathBuf::from("/h/z.png"),
                name: "/z.png".to_string(),
            },
            Attachment {
                path: PathBuf::from("/h/a.md"),
                name: "/a.md".to_string(),
            },
        ];
        assert_eq!(similarity_basis("hi", &[]), "hi");
        assert_eq!(similarity_basis("hi", &files), "hi\nattachments:/a.md|/z.png");
    }

    #[tokio::test]
    async fn test_resolve_attachments() {
        let mut harness = harness_with_files();
        let home = harness.dir.path().canonicalize().unwrap();
        let absolute = home.join("chart.png").to_string_lossy().into_owned();
        let ctx = harness.ctx();

        let resolved = ctx
            .resolve_attachments(&[
                "state/report.md".to_string(),
                "  ".to_string(),
                "/chart.png".to_string(),
                absolute,
                "./state/report.md".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(names(&resolved), vec!["/state/report.md", "/chart.png"]);
        assert_eq!(resolved[1].path, home.join("chart.png"));
    }

    #[tokio::test]
    async fn test_resolve_attachments_rejects_bad_paths() {
        let mut harness = harness_with_files();
        // Created next to the home directory, so `../<name>` reaches it.
        let outside = tempfile::NamedTempFile::new().unwrap();
        let sibling = format!("../{}", outside.path().file_name().unwrap().to_string_lossy());
        let ctx = harness.ctx();

        for bad in ["missing.txt", "state", sibling.as_str()] {
            let result = ctx.resolve_attachments(&[bad.to_string()]).await;
            assert!(
                matches!(result, Err(ToolError::InvalidParameters(_))),
                "{bad} should be rejected"
            );
        }

        // Absolute paths outside the home are looked up under it instead.
        let absolute = outside.path().to_string_lossy().into_owned();
        assert!(ctx.resolve_attachments(&[absolute]).await.is_err());
    }

    #[tokio::test]
    async fn test_attachment_names_break_the_streak() {
        let mut harness = harness_with_files();
        let mut ctx = harness.ctx();
        let report = ctx
            .resolve_attachments(&["state/report.md".to_string()])
            .await
            .unwrap();
        let chart = ctx.resolve_attachments(&["chart.png".to_string()]).await.unwrap();

        ctx.send_message("c1", "here you go", &report).await.unwrap();
        ctx.send_message("c1", "here you go", &report).await.unwrap();
        assert_eq!(ctx.state.breaker.streak(), 2);
        ctx.send_message("c1", "here you go", &chart).await.unwrap();
        assert_eq!(ctx.state.breaker.streak(), 1);
    }
}
