//! Journal entries and memory blocks rendered into each turn.
//!
//! Storage is simple CRUD over the agent home:
//! - `logs/journal.jsonl` holds one journal entry per line
//! - `blocks/*.yaml` holds memory blocks (`name`, `sort_order`, `text`)
//! - `checkpoint.md` is returned by the journal tool after each entry

mod store;

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

pub use store::FileMemoryStore;

/// One journal entry written by the agent at the end of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub user_wanted: String,
    #[serde(default)]
    pub agent_did: String,
    #[serde(default)]
    pub predictions: Vec<String>,
}

impl JournalEntry {
    pub fn new(user_wanted: impl Into<String>, agent_did: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            channel_id: None,
            user_wanted: user_wanted.into(),
            agent_did: agent_did.into(),
            predictions: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel_id: Option<String>) -> Self {
        self.channel_id = channel_id;
        self
    }

    /// Set predictions from free text: one per line, `- ` bullets stripped
    /// when every line is a bullet.
    pub fn with_predictions_text(mut self, text: &str) -> Self {
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let all_bullets = !lines.is_empty() && lines.iter().all(|l| l.starts_with('-'));
        self.predictions = lines
            .into_iter()
            .map(|l| if all_bullets { l[1..].trim() } else { l })
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        self
    }
}

/// A named piece of long-lived memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub id: String,
    pub name: String,
    pub sort_order: i64,
    pub text: String,
}

static NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("slug regex is valid"));

/// Lowercase `value` and join its ASCII alphanumeric runs with `-`.
/// Falls back to `block` when nothing is left.
pub fn slugify(value: &str) -> String {
    let lowered = value.to_lowercase();
    let slug = NON_SLUG.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "block".to_string()
    } else {
        slug.to_string()
    }
}

/// Read/write access to journal and memory blocks.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The newest `count` journal entries, oldest first.
    async fn journal_tail(&self, count: usize) -> Result<Vec<JournalEntry>, MemoryError>;

    /// Append a journal entry.
    async fn append_journal(&self, entry: &JournalEntry) -> Result<(), MemoryError>;

    /// All memory blocks ordered by `sort_order`, then name.
    async fn memory_blocks(&self) -> Result<Vec<MemoryBlock>, MemoryError>;

    /// The memory block stored under `id`, if any.
    async fn find_block(&self, id: &str) -> Result<Option<MemoryBlock>, MemoryError>;

    /// Write a block, replacing the block with the same id.
    async fn save_block(&self, block: &MemoryBlock) -> Result<(), MemoryError>;

    /// Delete a block. Returns whether it existed.
    async fn delete_block(&self, id: &str) -> Result<bool, MemoryError>;

    /// Checkpoint guidance shown after a journal entry.
    async fn checkpoint(&self) -> Result<String, MemoryError>;
}
