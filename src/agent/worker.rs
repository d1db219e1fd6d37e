//! The single worker and the turn lifecycle.
//!
//! The worker pops one event at a time and runs it to completion:
//!
//! 1. reset per-turn state
//! 2. refresh and record history for the triggering message
//! 3. render the turn prompt
//! 4. invoke the engine with the presence scope held
//! 5. log the tool trace, apply the forced-reply policy
//! 6. run the post-turn hook
//!
//! Every failure, panics included, is contained at the worker boundary. The
//! loop only ends when every queue handle is gone or the task is aborted.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::agent::breaker::BreakerConfig;
use crate::agent::history::{HistoryItem, HistorySource, MessageHistory};
use crate::agent::outbox::{ERROR_REACTION, Outbox, WARNING_REACTION};
use crate::agent::prompt::render_turn_prompt;
use crate::agent::queue::EventReceiver;
use crate::agent::sync::{PostTurnHook, SyncOutcome};
use crate::agent::turn::{TurnContext, TurnState};
use crate::channels::{ChatMessage, DEFAULT_CHUNK_LIMIT, HistoryQuery, PresenceScope, Transport};
use crate::config::ForcedReplyPolicy;
use crate::engine::ReasoningEngine;
use crate::error::{EngineError, TurnError};
use crate::event::{Event, EventKind};
use crate::memory::MemoryStore;
use crate::scheduler::SchedulerEngine;
use crate::tools::{ToolRegistry, ToolSession};

/// Minimum number of messages fetched when refreshing a channel.
const HISTORY_REFRESH_FLOOR: usize = 50;

const FORCED_REPLY_FALLBACK: &str = "Acknowledged.";

/// Collaborators injected into the worker.
pub struct WorkerDeps {
    pub transport: Arc<dyn Transport>,
    pub engine: Arc<dyn ReasoningEngine>,
    pub memory: Arc<dyn MemoryStore>,
    pub scheduler: Arc<SchedulerEngine>,
    pub post_turn: Arc<dyn PostTurnHook>,
    pub tools: Arc<ToolRegistry>,
}

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub messages_in_prompt: usize,
    pub journal_entries_in_prompt: usize,
    pub forced_reply: ForcedReplyPolicy,
    pub breaker: BreakerConfig,
    pub chunk_limit: usize,
    /// Author name recorded for the agent's own messages.
    pub agent_name: String,
    /// Agent home; outbound attachments must live under it.
    pub home: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            messages_in_prompt: 10,
            journal_entries_in_prompt: 90,
            forced_reply: ForcedReplyPolicy::Silent,
            breaker: BreakerConfig::default(),
            chunk_limit: DEFAULT_CHUNK_LIMIT,
            agent_name: "roost".to_string(),
            home: PathBuf::from("."),
        }
    }
}

/// Summary of a completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub tool_calls: usize,
    /// Messages delivered through the transport.
    pub sent: usize,
    pub forced_reply: bool,
    /// `None` when the post-turn hook failed.
    pub sync: Option<SyncOutcome>,
}

/// Owns all per-process turn state. Exactly one exists per process.
pub struct Worker {
    deps: WorkerDeps,
    config: WorkerConfig,
    outbox: Outbox,
    history: MessageHistory,
    state: TurnState,
}

impl Worker {
    pub fn new(deps: WorkerDeps, config: WorkerConfig) -> Self {
        let outbox = Outbox::new(
            deps.transport.clone(),
            config.chunk_limit,
            config.agent_name.clone(),
        );
        let state = TurnState::new(config.breaker.clone());
        Self {
            deps,
            config,
            outbox,
            history: MessageHistory::default(),
            state,
        }
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    /// Spawn the worker loop.
    pub fn spawn(self, events: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    /// Process events until every queue handle is dropped.
    pub async fn run(mut self, mut events: EventReceiver) {
        tracing::info!("Worker started (engine {})", self.deps.engine.name());
        while let Some((event, release)) = events.recv().await {
            self.handle_event(&event).await;
            // Dropping the guard frees the dedupe key on every path above.
            drop(release);
        }
        tracing::info!("Event queue closed, worker stopping");
    }

    /// Run one turn and contain whatever it does.
    pub async fn handle_event(&mut self, event: &Event) -> Option<TurnOutcome> {
        let span = tracing::info_span!(
            "turn",
            kind = %event.kind,
            channel = event.channel_id.as_deref().unwrap_or("-"),
        );
        self.contain_turn(event).instrument(span).await
    }

    async fn contain_turn(&mut self, event: &Event) -> Option<TurnOutcome> {
        let result = AssertUnwindSafe(self.process_event(event))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TurnError::Panicked(panic_message(panic.as_ref()))));

        match result {
            Ok(outcome) => {
                tracing::info!(
                    tool_calls = outcome.tool_calls,
                    sent = outcome.sent,
                    forced_reply = outcome.forced_reply,
                    "Turn complete"
                );
                Some(outcome)
            }
            Err(e) if e.is_loop_halt() => {
                tracing::warn!(error = %e, "Turn stopped by the send-loop breaker");
                None
            }
            Err(e) => {
                let reacted = self.react_to_latest_user_message(event).await;
                tracing::error!(
                    error = %e,
                    event = %event.describe(),
                    reacted,
                    "Turn failed"
                );
                None
            }
        }
    }

    async fn process_event(&mut self, event: &Event) -> Result<TurnOutcome, TurnError> {
        self.state.reset();
        self.observe_inbound(event).await;
        let prompt = self.render_prompt(event).await;

        tracing::info!("Invoking engine for {}", event.describe());
        let (result, tool_calls) = {
            let _presence = PresenceScope::acquire(self.deps.transport.clone(), event);
            let ctx = TurnContext {
                event,
                home: &self.config.home,
                outbox: &self.outbox,
                memory: self.deps.memory.as_ref(),
                scheduler: self.deps.scheduler.as_ref(),
                history: &mut self.history,
                state: &mut self.state,
            };
            let mut session = ToolSession::new(self.deps.tools.as_ref(), ctx);
            let result = self.deps.engine.invoke(&prompt, &mut session).await;
            (result, session.calls())
        };

        if self.state.halted || matches!(result, Err(EngineError::Halted)) {
            return Err(TurnError::LoopHalted {
                streak: self.state.breaker.streak(),
            });
        }
        let transcript = result?;

        for (name, args) in transcript.tool_calls() {
            tracing::info!(tool = %name, args = %args, "Tool call");
        }
        if let Some(text) = transcript.final_text() {
            tracing::debug!(final_text = %text, "Final engine text not delivered");
        }

        let forced_reply = self.apply_forced_reply(event, transcript.final_text()).await?;
        let sync = self.run_post_turn(event).await;

        Ok(TurnOutcome {
            tool_calls,
            sent: self.state.sent.len(),
            forced_reply,
            sync,
        })
    }

    /// Record the triggering message, refreshing the channel first.
    async fn observe_inbound(&mut self, event: &Event) {
        match event.kind {
            EventKind::ChatMessage => {
                let (Some(channel_id), Some(message_id)) = (&event.channel_id, &event.source_id)
                else {
                    return;
                };
                if self.deps.transport.is_ready() {
                    self.refresh_channel(channel_id, message_id).await;
                }
                let mut message = ChatMessage::new(
                    channel_id,
                    message_id,
                    event.author.as_deref().unwrap_or("unknown"),
                    &event.prompt,
                )
                .with_attachments(event.attachments.clone())
                .at(event.created_at);
                if let Some(author_id) = &event.author_id {
                    message = message.with_author_id(author_id);
                }
                if event.force_reply {
                    message = message.from_bot();
                }
                self.history.remember_chat(&message);
            }
            EventKind::Console => {
                self.history.remember(HistoryItem {
                    timestamp: event.created_at,
                    channel_id: event
                        .channel_id
                        .clone()
                        .unwrap_or_else(|| crate::event::CONSOLE_CHANNEL.to_string()),
                    message_id: None,
                    author: event.author.clone().unwrap_or_else(|| "local_user".to_string()),
                    is_bot: false,
                    source: HistorySource::Console,
                    content: event.prompt.clone(),
                    attachments: Vec::new(),
                });
            }
            EventKind::Scheduler | EventKind::Api => {}
        }
    }

    async fn refresh_channel(&mut self, channel_id: &str, before: &str) {
        let limit = HISTORY_REFRESH_FLOOR.max(self.config.messages_in_prompt * 3);
        let query = HistoryQuery::latest(limit).before(before);
        match self.deps.transport.fetch_history(channel_id, query).await {
            Ok(messages) => {
                let added = messages
                    .iter()
                    .filter(|message| self.history.remember_chat(message))
                    .count();
                tracing::debug!("Refreshed channel {}: {} new messages", channel_id, added);
            }
            Err(e) => {
                tracing::warn!(channel = %channel_id, error = %e, "History refresh failed");
            }
        }
    }

    async fn render_prompt(&self, event: &Event) -> String {
        let journal = self
            .deps
            .memory
            .journal_tail(self.config.journal_entries_in_prompt)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Journal unavailable for prompt");
                Vec::new()
            });
        let blocks = self.deps.memory.memory_blocks().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Memory blocks unavailable for prompt");
            Vec::new()
        });
        let messages = self.history.recent_chat(self.config.messages_in_prompt);
        render_turn_prompt(event, &journal, &blocks, &messages, Utc::now())
    }

    /// Returns whether a fallback reply was sent.
    async fn apply_forced_reply(
        &mut self,
        event: &Event,
        final_text: Option<&str>,
    ) -> Result<bool, TurnError> {
        if !event.force_reply || !self.state.sent.is_empty() {
            return Ok(false);
        }
        if self.config.forced_reply == ForcedReplyPolicy::Silent {
            tracing::info!("Forced-reply turn ended without a message");
            return Ok(false);
        }
        let Some(channel_id) = event.channel_id.as_deref() else {
            return Ok(false);
        };

        let text = final_text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(FORCED_REPLY_FALLBACK);
        let delivery = self
            .outbox
            .deliver(&mut self.history, &mut self.state.sent, channel_id, text, &[])
            .await?;
        tracing::info!(
            channel = %channel_id,
            sent = delivery.sent,
            chunks = delivery.chunks,
            used_final_text = final_text.is_some(),
            "Forced reply delivered"
        );
        Ok(true)
    }

    async fn run_post_turn(&self, event: &Event) -> Option<SyncOutcome> {
        let hook = &self.deps.post_turn;
        match hook.after_turn(event).await {
            Ok(outcome) => {
                tracing::debug!(hook = hook.name(), outcome = ?outcome, "Post-turn hook done");
                Some(outcome)
            }
            Err(e) => {
                let reacted = match self.state.sent.last() {
                    Some(last) => {
                        self.outbox
                            .react(&last.channel_id, &last.message_id, WARNING_REACTION)
                            .await
                    }
                    None => false,
                };
                tracing::warn!(hook = hook.name(), error = %e, reacted, "Post-turn hook failed");
                None
            }
        }
    }

    async fn react_to_latest_user_message(&self, event: &Event) -> bool {
        let Some(channel_id) = event.channel_id.as_deref() else {
            return false;
        };
        match self.history.latest_message_id(channel_id, false) {
            Some(message_id) => self.outbox.react(channel_id, &message_id, ERROR_REACTION).await,
            None => false,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::agent::event_queue;
    use crate::agent::sync::NoopSync;
    use crate::engine::{Transcript, TranscriptEntry};
    use crate::error::SyncError;
    use crate::memory::FileMemoryStore;
    use crate::scheduler::TriggerRegistry;
    use crate::testing::FakeTransport;
    use crate::tools::builtin;

    #[derive(Default)]
    struct ScriptedEngine {
        calls: Vec<(String, serde_json::Value)>,
        final_text: Option<String>,
        fail: bool,
        panic: bool,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedEngine {
        fn sending(texts: &[&str]) -> Self {
            Self {
                calls: texts
                    .iter()
                    .map(|t| ("send_message".to_string(), serde_json::json!({ "text": t })))
                    .collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ReasoningEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(
            &self,
            prompt: &str,
            tools: &mut ToolSession<'_>,
        ) -> Result<Transcript, EngineError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.panic {
                panic!("engine exploded");
            }
            if self.fail {
                return Err(EngineError::Exited("engine crashed".to_string()));
            }
            let mut transcript = Transcript::new();
            for (i, (name, args)) in self.calls.iter().enumerate() {
                let id = i.to_string();
                transcript.push(TranscriptEntry::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    args: args.clone(),
                });
                let result = tools.dispatch(name, args.clone()).await;
                if tools.is_halted() {
                    return Err(EngineError::Halted);
                }
                transcript.push(TranscriptEntry::ToolResult {
                    id,
                    ok: result.is_ok(),
                    output: result.map(|o| o.as_text()).unwrap_or_else(|e| e.to_string()),
                });
            }
            if let Some(text) = &self.final_text {
                transcript.push(TranscriptEntry::Assistant { text: text.clone() });
            }
            Ok(transcript)
        }
    }

    struct FailingSync;

    #[async_trait]
    impl PostTurnHook for FailingSync {
        fn name(&self) -> &str {
            "failing"
        }

        async fn after_turn(&self, _event: &Event) -> Result<SyncOutcome, SyncError> {
            Err(SyncError::CommandFailed {
                command: "git push".to_string(),
                stderr: "rejected".to_string(),
            })
        }
    }

    fn worker(
        transport: Arc<FakeTransport>,
        engine: Arc<dyn ReasoningEngine>,
        post_turn: Arc<dyn PostTurnHook>,
        config: WorkerConfig,
    ) -> (Worker, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        // The scheduler gets its own queue so dropping the test queue ends the loop.
        let (scheduler_queue, _) = event_queue();
        let scheduler = SchedulerEngine::new(
            dir.path().join("scheduler.yaml"),
            Arc::new(TriggerRegistry::new()),
            scheduler_queue,
        );
        let memory = FileMemoryStore::new(
            dir.path().join("logs/journal.jsonl"),
            dir.path().join("blocks"),
            dir.path().join("checkpoint.md"),
        );
        let mut tools = ToolRegistry::new();
        builtin::register_all(&mut tools);
        let deps = WorkerDeps {
            transport,
            engine,
            memory: Arc::new(memory),
            scheduler: Arc::new(scheduler),
            post_turn,
            tools: Arc::new(tools),
        };
        (Worker::new(deps, config), dir)
    }

    fn user_message(id: &str, text: &str) -> Event {
        Event::chat("c1", id, "ana", text)
    }

    #[tokio::test]
    async fn test_turn_delivers_messages() {
        let transport = FakeTransport::ready();
        let engine = Arc::new(ScriptedEngine::sending(&["hello", "how can I help?"]));
        let (mut worker, _dir) = worker(
            transport.clone(),
            engine,
            Arc::new(NoopSync),
            WorkerConfig::default(),
        );

        let outcome = worker.handle_event(&user_message("m1", "hi")).await.unwrap();

        assert_eq!(outcome.tool_calls, 2);
        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.sync, Some(SyncOutcome::Skipped("disabled".to_string())));
        assert_eq!(
            transport.sent(),
            vec![
                ("c1".to_string(), "hello".to_string()),
                ("c1".to_string(), "how can I help?".to_string()),
            ]
        );
        // Inbound plus two outbound.
        assert_eq!(worker.history().len(), 3);
    }

    #[tokio::test]
    async fn test_prompt_includes_refreshed_history() {
        let transport = FakeTransport::ready();
        transport.seed_history(
            "c1",
            vec![
                ChatMessage::new("c1", "m0", "bob", "earlier context"),
                ChatMessage::new("c1", "m1", "ana", "the question"),
            ],
        );
        let engine = Arc::new(ScriptedEngine::default());
        let (mut worker, _dir) = worker(
            transport,
            engine.clone(),
            Arc::new(NoopSync),
            WorkerConfig::default(),
        );

        worker.handle_event(&user_message("m1", "the question")).await;

        let prompts = engine.prompts.lock().unwrap();
        assert!(prompts[0].contains("| bob | message_id=m0\nearlier context"));
        assert!(prompts[0].contains("| ana | message_id=m1\nthe question"));
        assert_eq!(worker.history().len(), 2);
    }

    #[tokio::test]
    async fn test_engine_failure_reacts_on_user_message() {
        let transport = FakeTransport::ready();
        let engine = Arc::new(ScriptedEngine {
            fail: true,
            ..ScriptedEngine::default()
        });
        let (mut worker, _dir) = worker(
            transport.clone(),
            engine,
            Arc::new(NoopSync),
            WorkerConfig::default(),
        );

        assert!(worker.handle_event(&user_message("m1", "hi")).await.is_none());
        assert_eq!(
            transport.reactions(),
            vec![("c1".to_string(), "m1".to_string(), ERROR_REACTION.to_string())]
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let transport = FakeTransport::ready();
        let engine = Arc::new(ScriptedEngine {
            panic: true,
            ..ScriptedEngine::default()
        });
        let (mut worker, _dir) = worker(
            transport.clone(),
            engine,
            Arc::new(NoopSync),
            WorkerConfig::default(),
        );

        assert!(worker.handle_event(&user_message("m1", "hi")).await.is_none());
        assert!(worker.handle_event(&user_message("m2", "again")).await.is_none());
        assert_eq!(transport.reactions().len(), 2);
    }

    #[tokio::test]
    async fn test_send_loop_halts_turn() {
        let transport = FakeTransport::ready();
        let engine = Arc::new(ScriptedEngine::sending(&["same thing"; 12]));
        let (mut worker, _dir) = worker(
            transport.clone(),
            engine,
            Arc::new(NoopSync),
            WorkerConfig::default(),
        );

        assert!(worker.handle_event(&user_message("m1", "hi")).await.is_none());

        assert_eq!(transport.sent().len(), 9);
        // Warning on the message before the third send, error on the ninth.
        // The halt is not a turn failure, so the user message gets nothing.
        assert_eq!(
            transport.reactions(),
            vec![
                ("c1".to_string(), "1001".to_string(), WARNING_REACTION.to_string()),
                ("c1".to_string(), "1008".to_string(), ERROR_REACTION.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_breaker_resets_between_turns() {
        let transport = FakeTransport::ready();
        let engine = Arc::new(ScriptedEngine::sending(&["same thing"; 5]));
        let (mut worker, _dir) = worker(
            transport.clone(),
            engine,
            Arc::new(NoopSync),
            WorkerConfig::default(),
        );

        worker.handle_event(&user_message("m1", "hi")).await.unwrap();
        worker.handle_event(&user_message("m2", "hi")).await.unwrap();
        assert_eq!(transport.sent().len(), 10);
    }

    #[tokio::test]
    async fn test_forced_reply_policies() {
        let event = user_message("m1", "ping").with_author_id("bot-7").with_force_reply(true);

        let transport = FakeTransport::ready();
        let engine = Arc::new(ScriptedEngine {
            final_text: Some("pong".to_string()),
            ..ScriptedEngine::default()
        });
        let (mut silent, _dir) = worker(
            transport.clone(),
            engine.clone(),
            Arc::new(NoopSync),
            WorkerConfig::default(),
        );
        let outcome = silent.handle_event(&event).await.unwrap();
        assert!(!outcome.forced_reply);
        assert!(transport.sent().is_empty());

        let config = WorkerConfig {
            forced_reply: ForcedReplyPolicy::Fallback,
            ..WorkerConfig::default()
        };
        let (mut fallback, _dir) = worker(transport.clone(), engine, Arc::new(NoopSync), config.clone());
        let outcome = fallback.handle_event(&event).await.unwrap();
        assert!(outcome.forced_reply);
        assert_eq!(transport.sent(), vec![("c1".to_string(), "pong".to_string())]);

        let quiet = Arc::new(ScriptedEngine::default());
        let (mut fallback, _dir) = worker(transport.clone(), quiet, Arc::new(NoopSync), config);
        fallback.handle_event(&event).await.unwrap();
        assert_eq!(transport.sent()[1], ("c1".to_string(), "Acknowledged.".to_string()));
    }

    #[tokio::test]
    async fn test_post_turn_failure_warns_on_last_sent() {
        let transport = FakeTransport::ready();
        let engine = Arc::new(ScriptedEngine::sending(&["first", "second"]));
        let (mut worker, _dir) = worker(
            transport.clone(),
            engine,
            Arc::new(FailingSync),
            WorkerConfig::default(),
        );

        let outcome = worker.handle_event(&user_message("m1", "hi")).await.unwrap();
        assert_eq!(outcome.sync, None);
        assert_eq!(
            transport.reactions(),
            vec![("c1".to_string(), "1001".to_string(), WARNING_REACTION.to_string())]
        );
    }

    #[tokio::test]
    async fn test_run_releases_dedupe_keys() {
        let transport = FakeTransport::ready();
        let engine = Arc::new(ScriptedEngine {
            fail: true,
            ..ScriptedEngine::default()
        });
        let (worker, _dir) = worker(
            transport,
            engine.clone(),
            Arc::new(NoopSync),
            WorkerConfig::default(),
        );
        let (queue, events) = event_queue();
        let handle = worker.spawn(events);

        queue.enqueue(Event::scheduled("daily-report", "report").with_channel("c1"));
        queue.enqueue(Event::api("test", "second"));
        let observer = queue.clone();
        drop(queue);
        // Only `observer` is left; wait for the worker to drain, then close.
        while observer.depth() > 0 || observer.is_in_flight("job:daily-report") {
            tokio::task::yield_now().await;
        }
        drop(observer);
        handle.await.unwrap();

        assert_eq!(engine.prompts.lock().unwrap().len(), 2);
    }
}
