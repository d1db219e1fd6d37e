//! Chat transport trait and message types.

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// A message as seen in channel history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub channel_id: String,
    pub author: String,
    pub author_id: String,
    pub is_bot: bool,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message authored by a person.
    pub fn new(
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let author = author.into();
        Self {
            message_id: message_id.into(),
            channel_id: channel_id.into(),
            author_id: author.clone(),
            author,
            is_bot: false,
            content: content.into(),
            attachments: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Set the author id.
    pub fn with_author_id(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = author_id.into();
        self
    }

    /// Mark the message as bot-authored.
    pub fn from_bot(mut self) -> Self {
        self.is_bot = true;
        self
    }

    /// Set attachment references.
    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Set the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A local file sent with an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    /// Home-relative name, e.g. `/state/report.md`.
    pub name: String,
}

/// A message delivered to the agent by the transport listener.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message: ChatMessage,
    /// Display name of the channel, if it has one.
    pub channel_name: Option<String>,
    /// The message is authored by the agent itself.
    pub from_self: bool,
}

impl InboundMessage {
    pub fn new(message: ChatMessage) -> Self {
        Self {
            message,
            channel_name: None,
            from_self: false,
        }
    }

    pub fn with_channel_name(mut self, name: impl Into<String>) -> Self {
        self.channel_name = Some(name.into());
        self
    }
}

/// Stream of inbound messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Parameters for a history fetch.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    /// Only messages older than this message id.
    pub before: Option<String>,
    pub limit: usize,
    pub oldest_first: bool,
}

impl HistoryQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            before: None,
            limit,
            oldest_first: true,
        }
    }

    pub fn before(mut self, message_id: impl Into<String>) -> Self {
        self.before = Some(message_id.into());
        self
    }
}

/// The chat gateway.
///
/// Implementations own protocol framing, reconnection and rate limits. The
/// agent only uses these primitives.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the transport name (e.g., "discord", "offline").
    fn name(&self) -> &str;

    /// Whether the transport is connected and can deliver messages.
    ///
    /// When this is false outbound sends fall back to console echo.
    fn is_ready(&self) -> bool;

    /// Start listening for inbound messages.
    async fn start(&self) -> Result<MessageStream, TransportError>;

    /// Send a message and return the id the transport assigned to it.
    async fn send(&self, channel_id: &str, text: &str) -> Result<String, TransportError>;

    /// Send a message with files attached. `text` may be empty.
    ///
    /// Default implementation only handles the no-file case (for transports
    /// without uploads).
    async fn send_with_attachments(
        &self,
        channel_id: &str,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<String, TransportError> {
        if attachments.is_empty() {
            return self.send(channel_id, text).await;
        }
        Err(TransportError::SendFailed {
            channel_id: channel_id.to_string(),
            reason: format!("{} does not support attachments", self.name()),
        })
    }

    /// Fetch message history for a channel.
    async fn fetch_history(
        &self,
        channel_id: &str,
        query: HistoryQuery,
    ) -> Result<Vec<ChatMessage>, TransportError>;

    /// Add a reaction to a message.
    async fn add_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), TransportError>;

    /// Signal that the agent is working in a channel.
    ///
    /// Default implementation does nothing (for transports without presence).
    async fn trigger_typing(&self, _channel_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    /// Gracefully shut down the transport.
    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Transport used when no chat gateway is configured.
///
/// Never ready, so every outbound send is echoed to the console instead.
#[derive(Debug, Default)]
pub struct OfflineTransport;

#[async_trait]
impl Transport for OfflineTransport {
    fn name(&self) -> &str {
        "offline"
    }

    fn is_ready(&self) -> bool {
        false
    }

    async fn start(&self) -> Result<MessageStream, TransportError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn send(&self, _channel_id: &str, _text: &str) -> Result<String, TransportError> {
        Err(TransportError::NotReady)
    }

    async fn fetch_history(
        &self,
        _channel_id: &str,
        _query: HistoryQuery,
    ) -> Result<Vec<ChatMessage>, TransportError> {
        Err(TransportError::NotReady)
    }

    async fn add_reaction(
        &self,
        _channel_id: &str,
        _message_id: &str,
        _emoji: &str,
    ) -> Result<(), TransportError> {
        Err(TransportError::NotReady)
    }
}
