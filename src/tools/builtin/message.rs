//! Messaging tools: send_message, list_messages, react.

use std::sync::LazyLock;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::Regex;

use crate::agent::TurnContext;
use crate::channels::HistoryQuery;
use crate::tools::tool::{optional_str, require_str};
use crate::tools::{Tool, ToolError, ToolOutput};

/// Sends a chat message, chunked to the transport limit.
#[derive(Debug, Default)]
pub struct SendMessageTool;

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send a chat message to a channel, with optional file attachments from the agent home. \
         Defaults to the current event channel."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "Message text"},
                "channel_id": {"type": "string", "description": "Target channel (optional)"},
                "attachment_paths": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Files under the agent home to attach (optional)"
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut TurnContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let text = require_str(&params, "text")?;
        let raw_paths = attachment_paths(&params)?;
        let attachments = ctx.resolve_attachments(&raw_paths).await?;
        if text.trim().is_empty() && attachments.is_empty() {
            return Err(ToolError::InvalidParameters(
                "send_message failed: message text was empty and no attachments were provided"
                    .to_string(),
            ));
        }
        let Some(channel_id) = ctx.resolve_channel(optional_str(&params, "channel_id")) else {
            return Ok(ToolOutput::text(
                "No channel_id provided and no current event channel is available.",
                start.elapsed(),
            ));
        };

        let delivery = ctx.send_message(&channel_id, &text, &attachments).await?;
        let names: Vec<&str> = attachments.iter().map(|a| a.name.as_str()).collect();
        tracing::info!(
            tool = "send_message",
            channel = %channel_id,
            sent = delivery.sent,
            chunks = delivery.chunks,
            attachments = ?names,
            "Message delivered"
        );
        Ok(ToolOutput::text(
            format!(
                "send_message complete (sent={}, chunks={}, attachments={})",
                delivery.sent,
                delivery.chunks,
                attachments.len()
            ),
            start.elapsed(),
        ))
    }
}

/// `attachment_paths` as a list. A single string is one path.
fn attachment_paths(params: &serde_json::Value) -> Result<Vec<String>, ToolError> {
    match params.get("attachment_paths") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::String(path)) => Ok(vec![path.clone()]),
        Some(serde_json::Value::Array(items)) => Ok(items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(path) => path.clone(),
                other => other.to_string(),
            })
            .collect()),
        Some(_) => Err(ToolError::InvalidParameters(
            "attachment_paths must be a list of paths".to_string(),
        )),
    }
}

static WINDOW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d+)\s*(s|sec|secs|second|seconds|m|min|mins|minute|minutes|h|hr|hrs|hour|hours|d|day|days|w|week|weeks)$",
    )
    .expect("window regex is valid")
});

/// Parse a look-back window such as `30m`, `1h`, `2 days`.
pub fn parse_window(value: &str) -> Result<ChronoDuration, ToolError> {
    let raw = value.trim().to_lowercase();
    let invalid = || ToolError::InvalidParameters("window must look like '1h', '30m', '1d', or '1w'".to_string());
    let caps = WINDOW.captures(&raw).ok_or_else(invalid)?;
    let amount: i64 = caps[1].parse().map_err(|_| invalid())?;
    let duration = match &caps[2] {
        "s" | "sec" | "secs" | "second" | "seconds" => ChronoDuration::try_seconds(amount),
        "m" | "min" | "mins" | "minute" | "minutes" => ChronoDuration::try_minutes(amount),
        "h" | "hr" | "hrs" | "hour" | "hours" => ChronoDuration::try_hours(amount),
        "d" | "day" | "days" => ChronoDuration::try_days(amount),
        _ => ChronoDuration::try_weeks(amount),
    };
    duration.ok_or_else(invalid)
}

struct Listed {
    timestamp: DateTime<Utc>,
    channel_id: String,
    message_id: Option<String>,
    author: String,
    content: String,
}

/// Lists recent messages from the transport, falling back to memory.
#[derive(Debug, Default)]
pub struct ListMessagesTool;

#[async_trait]
impl Tool for ListMessagesTool {
    fn name(&self) -> &str {
        "list_messages"
    }

    fn description(&self) -> &str {
        "List recent messages by count and optional time window (`1h`, `1d`, etc.)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "channel_id": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 200, "default": 10},
                "window": {"type": "string", "description": "Look-back window, e.g. 30m, 1h, 1d"}
            }
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut TurnContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let limit = params
            .get("limit")
            .and_then(|v| v.as_i64())
            .unwrap_or(10)
            .clamp(1, 200) as usize;
        let cutoff = match optional_str(&params, "window") {
            Some(window) => Some(Utc::now() - parse_window(&window)?),
            None => None,
        };
        let within = |ts: &DateTime<Utc>| cutoff.is_none_or(|cutoff| *ts >= cutoff);
        let channel_id = ctx.resolve_channel(optional_str(&params, "channel_id"));

        let mut listed: Vec<Listed> = Vec::new();
        let mut source = "memory";
        if let Some(channel_id) = &channel_id {
            if ctx.outbox.is_ready() {
                let fetched = ctx
                    .outbox
                    .transport()
                    .fetch_history(channel_id, HistoryQuery::latest(limit))
                    .await?;
                listed = fetched
                    .into_iter()
                    .filter(|m| within(&m.timestamp))
                    .map(|m| Listed {
                        timestamp: m.timestamp,
                        channel_id: m.channel_id,
                        message_id: Some(m.message_id),
                        author: m.author,
                        content: m.content,
                    })
                    .collect();
                source = "transport";
            }
        }

        if listed.is_empty() {
            let items = match &channel_id {
                Some(channel_id) => ctx.history.recent_in_channel(channel_id, usize::MAX),
                None => ctx.history.recent(usize::MAX),
            };
            let matching: Vec<_> = items.into_iter().filter(|i| within(&i.timestamp)).collect();
            let skip = matching.len().saturating_sub(limit);
            listed = matching
                .into_iter()
                .skip(skip)
                .map(|i| Listed {
                    timestamp: i.timestamp,
                    channel_id: i.channel_id.clone(),
                    message_id: i.message_id.clone(),
                    author: i.author.clone(),
                    content: i.content.clone(),
                })
                .collect();
            source = "memory";
        }

        tracing::debug!(tool = "list_messages", source, count = listed.len(), "Listed messages");
        if listed.is_empty() {
            return Ok(ToolOutput::text("No messages found.", start.elapsed()));
        }
        let rendered: Vec<String> = listed
            .iter()
            .map(|m| {
                format!(
                    "[{}] channel={} message_id={} author={} content={}",
                    m.timestamp.to_rfc3339(),
                    m.channel_id,
                    m.message_id.as_deref().unwrap_or("unknown"),
                    m.author,
                    m.content
                )
            })
            .collect();
        Ok(ToolOutput::text(rendered.join("\n"), start.elapsed()))
    }
}

/// Adds a reaction, by default to the newest known message of the channel.
#[derive(Debug, Default)]
pub struct ReactTool;

#[async_trait]
impl Tool for ReactTool {
    fn name(&self) -> &str {
        "react"
    }

    fn description(&self) -> &str {
        "React to a chat message. Defaults to the latest known message."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "emoji": {"type": "string"},
                "message_id": {"type": "string"},
                "channel_id": {"type": "string"}
            },
            "required": ["emoji"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut TurnContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let emoji = require_str(&params, "emoji")?;
        if emoji.trim().is_empty() {
            return Err(ToolError::InvalidParameters("emoji is required".to_string()));
        }
        if !ctx.outbox.is_ready() {
            return Ok(ToolOutput::text("Chat transport is not connected.", start.elapsed()));
        }
        let Some(channel_id) = ctx.resolve_channel(optional_str(&params, "channel_id")) else {
            return Ok(ToolOutput::text(
                "No channel_id provided and no channel could be inferred.",
                start.elapsed(),
            ));
        };
        let message_id = optional_str(&params, "message_id")
            .or_else(|| ctx.history.latest_message_id(&channel_id, true));
        let Some(message_id) = message_id else {
            return Ok(ToolOutput::text("No message found to react to.", start.elapsed()));
        };

        ctx.outbox
            .transport()
            .add_reaction(&channel_id, &message_id, emoji.trim())
            .await?;
        tracing::info!(tool = "react", channel = %channel_id, message_id = %message_id, "Reaction added");
        Ok(ToolOutput::text(
            format!("Reacted to message {} in channel {}.", message_id, channel_id),
            start.elapsed(),
        ))
    }
}
