//! Reasoning engine interface.
//!
//! The engine receives the rendered turn prompt and a [`ToolSession`] it can
//! call back into. It returns the turn transcript, which the worker only
//! inspects for logging and for the forced-reply check.

mod process;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::tools::ToolSession;

pub use process::{ProcessEngine, ProcessEngineConfig};

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Assistant {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    ToolResult {
        id: String,
        ok: bool,
        output: String,
    },
}

/// Ordered record of what the engine did during a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    /// Tool calls as `(name, args)`, in order.
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.entries.iter().filter_map(|entry| match entry {
            TranscriptEntry::ToolCall { name, args, .. } => Some((name.as_str(), args)),
            _ => None,
        })
    }

    /// The last non-empty assistant text.
    pub fn final_text(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|entry| match entry {
            TranscriptEntry::Assistant { text } if !text.trim().is_empty() => Some(text.as_str()),
            _ => None,
        })
    }

    /// Whether the engine called a tool by this name.
    pub fn called(&self, tool: &str) -> bool {
        self.tool_calls().any(|(name, _)| name == tool)
    }
}

/// The external reasoning/tool-calling engine.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Run one turn. This is the only long suspension point of a turn.
    async fn invoke(
        &self,
        prompt: &str,
        tools: &mut ToolSession<'_>,
    ) -> Result<Transcript, EngineError>;
}

/// Engine used when `engine.command` is not set. Every turn fails with
/// [`EngineError::NotConfigured`].
#[derive(Debug, Default)]
pub struct UnconfiguredEngine;

#[async_trait]
impl ReasoningEngine for UnconfiguredEngine {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn invoke(
        &self,
        _prompt: &str,
        _tools: &mut ToolSession<'_>,
    ) -> Result<Transcript, EngineError> {
        Err(EngineError::NotConfigured)
    }
}
