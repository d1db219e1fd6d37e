//! Events: one reason to run a turn.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "chat_message")]
    ChatMessage,
    #[serde(rename = "scheduler")]
    Scheduler,
    #[serde(rename = "api_event")]
    Api,
    #[serde(rename = "console_message")]
    Console,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ChatMessage => "chat_message",
            EventKind::Scheduler => "scheduler",
            EventKind::Api => "api_event",
            EventKind::Console => "console_message",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel id used for local console input.
pub const CONSOLE_CHANNEL: &str = "console";

/// An immutable record describing one reason to run a turn.
///
/// Built by a source adapter, moved into the queue, and read exactly once
/// by the worker.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: EventKind,
    /// Text handed to the reasoning engine.
    pub prompt: String,
    /// Channel that replies go to by default.
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
    pub author: Option<String>,
    pub author_id: Option<String>,
    pub attachments: Vec<String>,
    /// Job name for scheduler-sourced events.
    pub scheduler_name: Option<String>,
    /// In-flight dedupe key, see [`crate::agent::EventQueue`].
    pub dedupe_key: Option<String>,
    /// Transport message id of the triggering message, if any.
    pub source_id: Option<String>,
    /// The author is allow-listed and expects a reply.
    pub force_reply: bool,
    pub created_at: DateTime<Utc>,
}

impl Event {
    fn new(kind: EventKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            channel_id: None,
            channel_name: None,
            author: None,
            author_id: None,
            attachments: Vec::new(),
            scheduler_name: None,
            dedupe_key: None,
            source_id: None,
            force_reply: false,
            created_at: Utc::now(),
        }
    }

    /// A chat message from the transport.
    pub fn chat(
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(EventKind::ChatMessage, content);
        event.channel_id = Some(channel_id.into());
        event.source_id = Some(message_id.into());
        event.author = Some(author.into());
        event
    }

    /// A scheduler fire. Carries the `job:<name>` dedupe key.
    pub fn scheduled(job_name: impl Into<String>, prompt: impl Into<String>) -> Self {
        let job_name = job_name.into();
        let mut event = Self::new(EventKind::Scheduler, prompt);
        event.dedupe_key = Some(crate::scheduler::job_key(&job_name));
        event.scheduler_name = Some(job_name);
        event
    }

    /// A loopback API call. The source label becomes `api:<source>`.
    pub fn api(source: impl Into<String>, prompt: impl Into<String>) -> Self {
        let mut event = Self::new(EventKind::Api, prompt);
        event.source_id = Some(format!("api:{}", source.into()));
        event
    }

    /// A line typed on the local console.
    pub fn console(line: impl Into<String>) -> Self {
        let mut event = Self::new(EventKind::Console, line);
        event.channel_id = Some(CONSOLE_CHANNEL.to_string());
        event.author = Some("local_user".to_string());
        event.author_id = Some("local_user".to_string());
        event
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn with_channel_name(mut self, name: impl Into<String>) -> Self {
        self.channel_name = Some(name.into());
        self
    }

    pub fn with_author_id(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn with_force_reply(mut self, force: bool) -> Self {
        self.force_reply = force;
        self
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match (&self.channel_id, &self.scheduler_name, &self.source_id) {
            (Some(channel), _, _) => format!("{} channel={}", self.kind, channel),
            (None, Some(name), _) => format!("{} name={}", self.kind, name),
            (None, None, Some(source)) => format!("{} source={}", self.kind, source),
            (None, None, None) => self.kind.to_string(),
        }
    }
}
