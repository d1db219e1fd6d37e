//! Outbound delivery: chunking, console fallback, reactions.

use std::sync::Arc;

use chrono::Utc;

use crate::agent::history::{HistoryItem, HistorySource, MessageHistory};
use crate::channels::{Attachment, Transport, chunk_message};
use crate::error::TransportError;

pub const ERROR_REACTION: &str = "❌";
pub const WARNING_REACTION: &str = "⚠️";

/// A message the agent sent during the current turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel_id: String,
    pub message_id: String,
}

/// Result of one outbound send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Delivered through the transport (as opposed to console echo).
    pub sent: bool,
    /// Id of the last chunk sent.
    pub message_id: Option<String>,
    pub chunks: usize,
}

/// Delivers agent output to the transport.
pub struct Outbox {
    transport: Arc<dyn Transport>,
    chunk_limit: usize,
    agent_name: String,
}

impl Outbox {
    pub fn new(transport: Arc<dyn Transport>, chunk_limit: usize, agent_name: impl Into<String>) -> Self {
        Self {
            transport,
            chunk_limit,
            agent_name: agent_name.into(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_ready(&self) -> bool {
        self.transport.is_ready()
    }

    /// Send `text` in transport-sized chunks, with `attachments` on the
    /// first chunk.
    ///
    /// Each delivered chunk is remembered in `history` and recorded in
    /// `sent`. When the transport is not ready the chunks are echoed to the
    /// console instead.
    pub async fn deliver(
        &self,
        history: &mut MessageHistory,
        sent: &mut Vec<SentMessage>,
        channel_id: &str,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<Delivery, TransportError> {
        let mut chunks: Vec<String> = chunk_message(text, self.chunk_limit)
            .into_iter()
            .filter(|chunk| !chunk.trim().is_empty())
            .collect();
        if chunks.is_empty() && !attachments.is_empty() {
            chunks.push(String::new());
        }
        let names: Vec<String> = attachments.iter().map(|a| a.name.clone()).collect();

        if !self.transport.is_ready() {
            for chunk in &chunks {
                println!("[{} send_message channel={}] {}", self.agent_name, channel_id, chunk);
            }
            if !names.is_empty() {
                println!(
                    "[{} send_message channel={}] attachments: {}",
                    self.agent_name,
                    channel_id,
                    names.join(", ")
                );
            }
            return Ok(Delivery {
                sent: false,
                message_id: None,
                chunks: chunks.len(),
            });
        }

        let mut last_id = None;
        for (index, chunk) in chunks.iter().enumerate() {
            let first_with_files = index == 0 && !attachments.is_empty();
            let message_id = if first_with_files {
                self.transport
                    .send_with_attachments(channel_id, chunk, attachments)
                    .await?
            } else {
                self.transport.send(channel_id, chunk).await?
            };
            history.remember(HistoryItem {
                timestamp: Utc::now(),
                channel_id: channel_id.to_string(),
                message_id: Some(message_id.clone()),
                author: self.agent_name.clone(),
                is_bot: true,
                source: HistorySource::Chat,
                content: chunk.clone(),
                attachments: if first_with_files { names.clone() } else { Vec::new() },
            });
            sent.push(SentMessage {
                channel_id: channel_id.to_string(),
                message_id: message_id.clone(),
            });
            last_id = Some(message_id);
        }

        Ok(Delivery {
            sent: last_id.is_some(),
            message_id: last_id,
            chunks: chunks.len(),
        })
    }

    /// Add a reaction, logging instead of failing. Returns whether it landed.
    pub async fn react(&self, channel_id: &str, message_id: &str, emoji: &str) -> bool {
        if !self.transport.is_ready() {
            return false;
        }
        match self.transport.add_reaction(channel_id, message_id, emoji).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    channel = %channel_id,
                    message_id = %message_id,
                    error = %e,
                    "Failed to add reaction"
                );
                false
            }
        }
    }
}

/// Newest agent message: this turn's sends first, then history.
pub fn latest_agent_message(
    sent: &[SentMessage],
    history: &MessageHistory,
    channel_id: Option<&str>,
) -> Option<(String, String)> {
    if let Some(last) = sent.last() {
        return Some((last.channel_id.clone(), last.message_id.clone()));
    }
    history.latest_agent_message(channel_id)
}
