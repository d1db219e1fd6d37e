//! Subprocess reasoning engine speaking newline-delimited JSON.
//!
//! One process is spawned per turn. The conversation on its stdio is:
//!
//! ```text
//! -> {"type":"turn","model":"...","prompt":"...","tools":[...]}
//! <- {"type":"tool_call","id":"1","name":"send_message","args":{...}}
//! -> {"type":"tool_result","id":"1","ok":true,"output":"..."}
//! <- {"type":"assistant","text":"..."}
//! <- {"type":"done"}
//! ```
//!
//! Anything the process writes to stderr passes through to ours.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout, Command};

use crate::engine::{ReasoningEngine, Transcript, TranscriptEntry};
use crate::error::EngineError;
use crate::tools::ToolSession;

/// Configuration for [`ProcessEngine`].
#[derive(Debug, Clone)]
pub struct ProcessEngineConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Upper bound on one turn, tool calls included.
    pub timeout: Duration,
    pub model: String,
    pub working_dir: Option<PathBuf>,
}

impl ProcessEngineConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(600),
            model: "default".to_string(),
            working_dir: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EngineMessage {
    Assistant {
        #[serde(default)]
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    Error {
        message: String,
    },
    Done,
}

/// Runs an external program as the reasoning engine.
pub struct ProcessEngine {
    config: ProcessEngineConfig,
}

impl ProcessEngine {
    pub fn new(config: ProcessEngineConfig) -> Self {
        Self { config }
    }

    async fn converse(
        &self,
        prompt: &str,
        tools: &mut ToolSession<'_>,
        stdin: &mut ChildStdin,
        lines: &mut Lines<BufReader<ChildStdout>>,
    ) -> Result<Transcript, EngineError> {
        let schemas = tools.schemas();
        write_line(
            stdin,
            &serde_json::json!({
                "type": "turn",
                "model": self.config.model,
                "prompt": prompt,
                "tools": schemas,
            }),
        )
        .await?;

        let mut transcript = Transcript::new();
        loop {
            let Some(line) = lines.next_line().await? else {
                return Err(EngineError::Exited(
                    "output closed before the turn was done".to_string(),
                ));
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let message: EngineMessage = serde_json::from_str(line)
                .map_err(|e| EngineError::Protocol(format!("unreadable line ({}): {}", e, line)))?;

            match message {
                EngineMessage::Assistant { text } => {
                    transcript.push(TranscriptEntry::Assistant { text });
                }
                EngineMessage::ToolCall { id, name, args } => {
                    transcript.push(TranscriptEntry::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        args: args.clone(),
                    });
                    let (ok, output) = match tools.dispatch(&name, args).await {
                        Ok(output) => (true, output.as_text()),
                        Err(e) => (false, e.to_string()),
                    };
                    transcript.push(TranscriptEntry::ToolResult {
                        id: id.clone(),
                        ok,
                        output: output.clone(),
                    });
                    if tools.is_halted() {
                        return Err(EngineError::Halted);
                    }
                    write_line(
                        stdin,
                        &serde_json::json!({
                            "type": "tool_result",
                            "id": id,
                            "ok": ok,
                            "output": output,
                        }),
                    )
                    .await?;
                }
                EngineMessage::Error { message } => return Err(EngineError::Protocol(message)),
                EngineMessage::Done => return Ok(transcript),
            }
        }
    }
}

async fn write_line(stdin: &mut ChildStdin, value: &serde_json::Value) -> Result<(), EngineError> {
    let mut line = value.to_string();
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

#[async_trait]
impl ReasoningEngine for ProcessEngine {
    fn name(&self) -> &str {
        &self.config.command
    }

    async fn invoke(
        &self,
        prompt: &str,
        tools: &mut ToolSession<'_>,
    ) -> Result<Transcript, EngineError> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{}: {}", self.config.command, e)))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Spawn("stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Spawn("stdout unavailable".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let result = tokio::time::timeout(
            self.config.timeout,
            self.converse(prompt, tools, &mut stdin, &mut lines),
        )
        .await
        .unwrap_or(Err(EngineError::Timeout(self.config.timeout)));

        drop(stdin);
        if result.is_ok() {
            // Give a well-behaved engine a moment to exit on its own.
            let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, TurnHarness};
    use crate::event::Event;
    use crate::tools::ToolRegistry;
    use crate::tools::builtin;

    fn sh(script: &str) -> ProcessEngine {
        ProcessEngine::new(
            ProcessEngineConfig::new("/bin/sh")
                .with_args(vec!["-c".to_string(), script.to_string()])
                .with_timeout(Duration::from_secs(10)),
        )
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let transport = FakeTransport::ready();
        let mut harness = TurnHarness::new(transport.clone(), Event::chat("c1", "m1", "ana", "hi"));
        let mut registry = ToolRegistry::new();
        builtin::register_all(&mut registry);
        let mut session = ToolSession::new(&registry, harness.ctx());

        let engine = sh(r#"
read turn
echo '{"type":"tool_call","id":"1","name":"send_message","args":{"text":"hello there"}}'
read result
echo '{"type":"assistant","text":"all done"}'
echo '{"type":"done"}'
"#);
        let transcript = engine.invoke("prompt", &mut session).await.unwrap();

        assert!(transcript.called("send_message"));
        assert_eq!(transcript.final_text(), Some("all done"));
        assert!(matches!(
            transcript.entries[1],
            TranscriptEntry::ToolResult { ok: true, .. }
        ));
        assert_eq!(transport.sent(), vec![("c1".to_string(), "hello there".to_string())]);
    }

    #[tokio::test]
    async fn test_exit_without_done_is_an_error() {
        let mut harness = TurnHarness::new(FakeTransport::ready(), Event::console("hi"));
        let registry = ToolRegistry::new();
        let mut session = ToolSession::new(&registry, harness.ctx());

        let result = sh("read turn; echo '{\"type\":\"assistant\",\"text\":\"bye\"}'")
            .invoke("prompt", &mut session)
            .await;
        assert!(matches!(result, Err(EngineError::Exited(_))));
    }

    #[tokio::test]
    async fn test_garbage_output_is_a_protocol_error() {
        let mut harness = TurnHarness::new(FakeTransport::ready(), Event::console("hi"));
        let registry = ToolRegistry::new();
        let mut session = ToolSession::new(&registry, harness.ctx());

        let result = sh("read turn; echo 'not json'").invoke("prompt", &mut session).await;
        assert!(matches!(result, Err(EngineError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut harness = TurnHarness::new(FakeTransport::ready(), Event::console("hi"));
        let registry = ToolRegistry::new();
        let mut session = ToolSession::new(&registry, harness.ctx());

        let engine = ProcessEngine::new(
            ProcessEngineConfig::new("/bin/sh")
                .with_args(vec!["-c".to_string(), "sleep 30".to_string()])
                .with_timeout(Duration::from_millis(200)),
        );
        let result = engine.invoke("prompt", &mut session).await;
        assert!(matches!(result, Err(EngineError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let mut harness = TurnHarness::new(FakeTransport::ready(), Event::console("hi"));
        let registry = ToolRegistry::new();
        let mut session = ToolSession::new(&registry, harness.ctx());

        let engine = ProcessEngine::new(ProcessEngineConfig::new("/nonexistent/engine"));
        let result = engine.invoke("prompt", &mut session).await;
        assert!(matches!(result, Err(EngineError::Spawn(_))));
    }
}
