//! Shared fakes for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::agent::{
    BreakerConfig, EventReceiver, MessageHistory, Outbox, TurnContext, TurnState, event_queue,
};
use crate::channels::{Attachment, ChatMessage, HistoryQuery, MessageStream, Transport};
use crate::error::TransportError;
use crate::event::Event;
use crate::memory::FileMemoryStore;
use crate::scheduler::{SchedulerEngine, TriggerRegistry};

/// In-memory transport that records everything sent to it.
#[derive(Default)]
pub struct FakeTransport {
    ready: AtomicBool,
    next_id: AtomicU64,
    sent: Mutex<Vec<(String, String)>>,
    uploads: Mutex<Vec<(String, Vec<String>)>>,
    reactions: Mutex<Vec<(String, String, String)>>,
    history: Mutex<HashMap<String, Vec<ChatMessage>>>,
    missing_channels: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn ready() -> Arc<Self> {
        let transport = Self::default();
        transport.ready.store(true, Ordering::SeqCst);
        transport.next_id.store(1000, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Attachment names per message id, in send order.
    pub fn uploads(&self) -> Vec<(String, Vec<String>)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn reactions(&self) -> Vec<(String, String, String)> {
        self.reactions.lock().unwrap().clone()
    }

    pub fn seed_history(&self, channel_id: &str, messages: Vec<ChatMessage>) {
        self.history
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), messages);
    }

    pub fn mark_missing(&self, channel_id: &str) {
        self.missing_channels
            .lock()
            .unwrap()
            .push(channel_id.to_string());
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &str {
        "fake"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn start(&self) -> Result<MessageStream, TransportError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<String, TransportError> {
        if self.missing_channels.lock().unwrap().iter().any(|c| c == channel_id) {
            return Err(TransportError::ChannelNotFound {
                channel_id: channel_id.to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst).to_string())
    }

    async fn send_with_attachments(
        &self,
        channel_id: &str,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<String, TransportError> {
        let message_id = self.send(channel_id, text).await?;
        self.uploads.lock().unwrap().push((
            message_id.clone(),
            attachments.iter().map(|a| a.name.clone()).collect(),
        ));
        Ok(message_id)
    }

    async fn fetch_history(
        &self,
        channel_id: &str,
        query: HistoryQuery,
    ) -> Result<Vec<ChatMessage>, TransportError> {
        if self.missing_channels.lock().unwrap().iter().any(|c| c == channel_id) {
            return Err(TransportError::ChannelNotFound {
                channel_id: channel_id.to_string(),
            });
        }
        let history = self.history.lock().unwrap();
        let messages = history.get(channel_id).cloned().unwrap_or_default();
        let mut messages: Vec<ChatMessage> = match &query.before {
            Some(before) => messages
                .into_iter()
                .take_while(|m| &m.message_id != before)
                .collect(),
            None => messages,
        };
        let skip = messages.len().saturating_sub(query.limit);
        messages.drain(..skip);
        if !query.oldest_first {
            messages.reverse();
        }
        Ok(messages)
    }

    async fn add_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), TransportError> {
        self.reactions.lock().unwrap().push((
            channel_id.to_string(),
            message_id.to_string(),
            emoji.to_string(),
        ));
        Ok(())
    }
}

/// Owns everything a [`TurnContext`] borrows.
pub struct TurnHarness {
    pub event: Event,
    pub outbox: Outbox,
    pub memory: FileMemoryStore,
    pub scheduler: SchedulerEngine,
    pub history: MessageHistory,
    pub state: TurnState,
    _events: EventReceiver,
    pub dir: TempDir,
}

impl TurnHarness {
    pub fn new(transport: Arc<FakeTransport>, event: Event) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (queue, events) = event_queue();
        let scheduler = SchedulerEngine::new(
            dir.path().join("scheduler.yaml"),
            Arc::new(TriggerRegistry::new()),
            queue,
        );
        let memory = FileMemoryStore::new(
            dir.path().join("logs/journal.jsonl"),
            dir.path().join("blocks"),
            dir.path().join("checkpoint.md"),
        );
        Self {
            event,
            outbox: Outbox::new(transport, 2000, "roost"),
            memory,
            scheduler,
            history: MessageHistory::default(),
            state: TurnState::new(BreakerConfig::default()),
            _events: events,
            dir,
        }
    }

    pub fn ctx(&mut self) -> TurnContext<'_> {
        TurnContext {
            event: &self.event,
            home: self.dir.path(),
            outbox: &self.outbox,
            memory: &self.memory,
            scheduler: &self.scheduler,
            history: &mut self.history,
            state: &mut self.state,
        }
    }
}
