//! Journal tool.

use std::time::Instant;

use async_trait::async_trait;

use crate::agent::TurnContext;
use crate::memory::JournalEntry;
use crate::tools::tool::{Tool, ToolError, ToolOutput, optional_str, require_str};

/// Appends one journal entry and returns the checkpoint guidance.
#[derive(Debug, Default)]
pub struct JournalTool;

#[async_trait]
impl Tool for JournalTool {
    fn name(&self) -> &str {
        "journal"
    }

    fn description(&self) -> &str {
        "Write a journal entry for this turn: what the user wanted, what you did, \
         and what you predict happens next."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "user_wanted": {"type": "string"},
                "agent_did": {"type": "string"},
                "predictions": {
                    "type": "string",
                    "description": "One prediction per line"
                },
                "channel_id": {"type": "string"}
            },
            "required": ["user_wanted", "agent_did"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut TurnContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let user_wanted = require_str(&params, "user_wanted")?;
        let agent_did = require_str(&params, "agent_did")?;
        let predictions = optional_str(&params, "predictions").unwrap_or_default();

        let entry = JournalEntry::new(user_wanted.trim(), agent_did.trim())
            .with_channel(ctx.resolve_channel(optional_str(&params, "channel_id")))
            .with_predictions_text(&predictions);
        ctx.memory.append_journal(&entry).await?;
        tracing::info!(tool = "journal", predictions = entry.predictions.len(), "Journal entry written");

        let checkpoint = ctx.memory.checkpoint().await?;
        let text = if checkpoint.trim().is_empty() {
            "Journal entry written.".to_string()
        } else {
            checkpoint.trim().to_string()
        };
        Ok(ToolOutput::text(text, start.elapsed()))
    }
}
