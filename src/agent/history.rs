//! Bounded message history used for prompt context and tool fallbacks.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channels::ChatMessage;

/// Default number of items kept across all channels.
pub const GLOBAL_HISTORY_CAP: usize = 500;
/// Default number of items kept per channel.
pub const CHANNEL_HISTORY_CAP: usize = 250;

/// Where a history item was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySource {
    Chat,
    Console,
}

/// One remembered inbound or outbound message.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryItem {
    pub timestamp: DateTime<Utc>,
    pub channel_id: String,
    pub message_id: Option<String>,
    pub author: String,
    pub is_bot: bool,
    pub source: HistorySource,
    pub content: String,
    pub attachments: Vec<String>,
}

impl HistoryItem {
    pub fn from_chat(message: &ChatMessage) -> Self {
        Self {
            timestamp: message.timestamp,
            channel_id: message.channel_id.clone(),
            message_id: Some(message.message_id.clone()),
            author: message.author.clone(),
            is_bot: message.is_bot,
            source: HistorySource::Chat,
            content: message.content.clone(),
            attachments: message.attachments.clone(),
        }
    }
}

/// Two ring buffers: one across all channels and one per channel.
///
/// Owned by the worker and only touched from inside a turn.
#[derive(Debug)]
pub struct MessageHistory {
    global_cap: usize,
    channel_cap: usize,
    all: VecDeque<HistoryItem>,
    by_channel: HashMap<String, VecDeque<HistoryItem>>,
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(GLOBAL_HISTORY_CAP, CHANNEL_HISTORY_CAP)
    }
}

impl MessageHistory {
    pub fn new(global_cap: usize, channel_cap: usize) -> Self {
        Self {
            global_cap: global_cap.max(1),
            channel_cap: channel_cap.max(1),
            all: VecDeque::new(),
            by_channel: HashMap::new(),
        }
    }

    /// Append an item. Returns `false` if a message with the same id is
    /// already remembered for that channel.
    pub fn remember(&mut self, item: HistoryItem) -> bool {
        let channel = self.by_channel.entry(item.channel_id.clone()).or_default();
        if let Some(id) = item.message_id.as_deref() {
            if channel
                .iter()
                .any(|existing| existing.message_id.as_deref() == Some(id))
            {
                return false;
            }
        }

        if channel.len() == self.channel_cap {
            channel.pop_front();
        }
        channel.push_back(item.clone());

        if self.all.len() == self.global_cap {
            self.all.pop_front();
        }
        self.all.push_back(item);
        true
    }

    pub fn remember_chat(&mut self, message: &ChatMessage) -> bool {
        self.remember(HistoryItem::from_chat(message))
    }

    /// The last `limit` items across all channels, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<&HistoryItem> {
        let skip = self.all.len().saturating_sub(limit);
        self.all.iter().skip(skip).collect()
    }

    /// The last `limit` chat-sourced items across all channels, oldest first.
    pub fn recent_chat(&self, limit: usize) -> Vec<&HistoryItem> {
        let chat: Vec<&HistoryItem> = self
            .all
            .iter()
            .filter(|item| item.source == HistorySource::Chat)
            .collect();
        let skip = chat.len().saturating_sub(limit);
        chat.into_iter().skip(skip).collect()
    }

    /// The last `limit` items of one channel, oldest first.
    pub fn recent_in_channel(&self, channel_id: &str, limit: usize) -> Vec<&HistoryItem> {
        match self.by_channel.get(channel_id) {
            Some(items) => {
                let skip = items.len().saturating_sub(limit);
                items.iter().skip(skip).collect()
            }
            None => Vec::new(),
        }
    }

    /// Id of the newest message with an id in a channel.
    pub fn latest_message_id(&self, channel_id: &str, include_bot: bool) -> Option<String> {
        self.by_channel
            .get(channel_id)?
            .iter()
            .rev()
            .filter(|item| include_bot || !item.is_bot)
            .find_map(|item| item.message_id.clone())
    }

    /// Newest agent-authored message as `(channel_id, message_id)`.
    ///
    /// Searches `channel_id` when given, otherwise every channel.
    pub fn latest_agent_message(&self, channel_id: Option<&str>) -> Option<(String, String)> {
        let mut items: Box<dyn Iterator<Item = &HistoryItem> + '_> = match channel_id {
            Some(channel_id) => Box::new(self.by_channel.get(channel_id)?.iter().rev()),
            None => Box::new(self.all.iter().rev()),
        };
        items.find_map(|item| {
            if !item.is_bot {
                return None;
            }
            item.message_id
                .clone()
                .map(|id| (item.channel_id.clone(), id))
        })
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}
