//! Turn prompt rendering.

use chrono::{DateTime, Utc};

use crate::agent::history::HistoryItem;
use crate::event::Event;
use crate::memory::{JournalEntry, MemoryBlock};

const NONE: &str = "(none)";
const NO_TEXT: &str = "(no text)";

const UNITS: [(&str, i64); 7] = [
    ("year", 365 * 24 * 60 * 60),
    ("month", 30 * 24 * 60 * 60),
    ("week", 7 * 24 * 60 * 60),
    ("day", 24 * 60 * 60),
    ("hour", 60 * 60),
    ("minute", 60),
    ("second", 1),
];

/// Humanize a signed age in seconds: `just now`, `3 hours ago`, `in 2 days`.
pub fn format_relative(seconds: i64) -> String {
    let abs = seconds.abs();
    if abs < 5 {
        return "just now".to_string();
    }
    for (name, width) in UNITS {
        if abs >= width {
            let count = abs / width;
            let plural = if count == 1 { "" } else { "s" };
            return if seconds >= 0 {
                format!("{count} {name}{plural} ago")
            } else {
                format!("in {count} {name}{plural}")
            };
        }
    }
    "just now".to_string()
}

/// `YYYY-MM-DD HH:MM:SS (relative)` in UTC.
pub fn format_timestamp(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    format!(
        "{} ({})",
        at.format("%Y-%m-%d %H:%M:%S"),
        format_relative((now - at).num_seconds())
    )
}

fn render_journal(entries: &[JournalEntry], now: DateTime<Utc>) -> String {
    if entries.is_empty() {
        return NONE.to_string();
    }
    entries
        .iter()
        .map(|entry| {
            let mut lines = vec![format!("timestamp: {}", format_timestamp(entry.timestamp, now))];
            if let Some(channel_id) = entry.channel_id.as_deref().filter(|c| !c.is_empty()) {
                lines.push(format!("channel_id: {channel_id}"));
            }
            lines.push(format!("user_wanted: {}", entry.user_wanted));
            lines.push(format!("agent_did: {}", entry.agent_did));
            if !entry.predictions.is_empty() {
                lines.push("predictions:".to_string());
                lines.extend(entry.predictions.iter().map(|p| format!("- {p}")));
            }
            lines.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_blocks(blocks: &[MemoryBlock]) -> String {
    if blocks.is_empty() {
        return NONE.to_string();
    }
    blocks
        .iter()
        .map(|block| {
            let name = [block.name.trim(), block.id.trim()]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or("unnamed");
            format!("memory block: {}\n{}", name, block.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn push_attachments(lines: &mut Vec<String>, attachments: &[String]) {
    if !attachments.is_empty() {
        lines.push("attachments:".to_string());
        lines.extend(attachments.iter().map(|a| format!("  - {a}")));
    }
}

fn render_messages(messages: &[&HistoryItem], now: DateTime<Utc>) -> String {
    if messages.is_empty() {
        return NONE.to_string();
    }
    messages
        .iter()
        .map(|message| {
            let content = message.content.trim();
            let mut lines = vec![
                format!(
                    "{} | {} | message_id={}",
                    format_timestamp(message.timestamp, now),
                    message.author,
                    message.message_id.as_deref().unwrap_or("unknown")
                ),
                if content.is_empty() { NO_TEXT } else { content }.to_string(),
            ];
            push_attachments(&mut lines, &message.attachments);
            lines.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_event(event: &Event, now: DateTime<Utc>) -> String {
    let content = event.prompt.trim();
    let mut lines = vec![
        format!("channel_id: {}", event.channel_id.as_deref().unwrap_or("unknown")),
        format!("event_type: {}", event.kind),
        format!(
            "{} | {} | message_id={}",
            format_timestamp(now, now),
            event.author.as_deref().unwrap_or("system"),
            event.source_id.as_deref().unwrap_or("unknown")
        ),
        if content.is_empty() { NO_TEXT } else { content }.to_string(),
    ];
    push_attachments(&mut lines, &event.attachments);
    if let Some(name) = &event.scheduler_name {
        lines.push(format!("scheduler_name: {name}"));
    }
    lines.join("\n")
}

/// Render the prompt for one turn from journal, memory blocks, recent
/// messages and the current event.
pub fn render_turn_prompt(
    event: &Event,
    journal: &[JournalEntry],
    blocks: &[MemoryBlock],
    messages: &[&HistoryItem],
    now: DateTime<Utc>,
) -> String {
    format!(
        "Context for this turn:\n\n\
         1) Last journal entries:\n{}\n\n\
         2) Memory blocks:\n{}\n\n\
         3) Last chat messages:\n{}\n\n\
         4) Current message + reply channel:\n{}\n\n\
         If you need to message the user, call send_message.\n",
        render_journal(journal, now),
        render_blocks(blocks),
        render_messages(messages, now),
        render_event(event, now),
    )
}
