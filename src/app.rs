//! Process wiring: sources, queue, worker, startup and shutdown.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::agent::{
    EnqueueOutcome, EventQueue, GitSync, NoopSync, PostTurnHook, Worker, WorkerConfig,
    WorkerDeps, event_queue,
};
use crate::channels::{
    ApiServer, DEFAULT_CHUNK_LIMIT, InboundMessage, MessageStream, OfflineTransport, Transport,
    spawn_console,
};
use crate::config::{AppConfig, RepoLayout};
use crate::engine::{ProcessEngine, ProcessEngineConfig, ReasoningEngine, UnconfiguredEngine};
use crate::error::Error;
use crate::event::Event;
use crate::memory::FileMemoryStore;
use crate::scheduler::{SchedulerEngine, TriggerRegistry};
use crate::tools::{ToolRegistry, builtin};

/// Agent name used for the agent's own messages in history.
const AGENT_NAME: &str = "roost";

/// Turn an inbound chat message into an event.
///
/// The agent's own messages are dropped. Other bots are dropped unless
/// allow-listed, in which case the event is marked `force_reply`.
pub fn inbound_event(inbound: InboundMessage, config: &AppConfig) -> Option<Event> {
    if inbound.from_self {
        return None;
    }
    let message = inbound.message;
    let force_reply = if message.is_bot {
        if !config.should_respond_to_bot(Some(&message.author_id)) {
            tracing::debug!(author_id = %message.author_id, "Ignoring bot message");
            return None;
        }
        true
    } else {
        false
    };

    let mut event = Event::chat(
        message.channel_id,
        message.message_id,
        message.author,
        message.content,
    )
    .with_author_id(message.author_id)
    .with_attachments(message.attachments)
    .with_force_reply(force_reply);
    if let Some(name) = inbound.channel_name {
        event = event.with_channel_name(name);
    }
    event.created_at = message.timestamp;
    Some(event)
}

pub fn worker_config(layout: &RepoLayout, config: &AppConfig) -> WorkerConfig {
    WorkerConfig {
        messages_in_prompt: config.messages_in_prompt,
        journal_entries_in_prompt: config.journal_entries_in_prompt,
        forced_reply: config.forced_reply,
        breaker: config.send_loop.clone(),
        chunk_limit: DEFAULT_CHUNK_LIMIT,
        agent_name: AGENT_NAME.to_string(),
        home: layout.home.clone(),
    }
}

/// Pick the reasoning engine from config.
pub fn build_engine(layout: &RepoLayout, config: &AppConfig) -> Arc<dyn ReasoningEngine> {
    match config.engine.command.as_deref().map(str::trim) {
        Some(command) if !command.is_empty() => {
            let engine_config = ProcessEngineConfig::new(command)
                .with_args(config.engine.args.clone())
                .with_timeout(config.engine.timeout())
                .with_model(&config.model)
                .with_working_dir(&layout.home);
            Arc::new(ProcessEngine::new(engine_config))
        }
        _ => {
            tracing::warn!("No engine.command configured; turns will fail until one is set");
            Arc::new(UnconfiguredEngine)
        }
    }
}

fn build_post_turn(layout: &RepoLayout, config: &AppConfig) -> Arc<dyn PostTurnHook> {
    if config.git_sync_after_turn {
        Arc::new(GitSync::new(&layout.home))
    } else {
        Arc::new(NoopSync)
    }
}

fn spawn_listener(
    mut stream: MessageStream,
    queue: EventQueue,
    config: Arc<AppConfig>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(inbound) = stream.next().await {
            let Some(event) = inbound_event(inbound, &config) else {
                continue;
            };
            if matches!(queue.enqueue(event), EnqueueOutcome::Closed) {
                break;
            }
        }
        tracing::info!("Transport listener stopped");
    })
}

/// The running process.
pub struct App {
    layout: RepoLayout,
    config: Arc<AppConfig>,
    transport: Arc<dyn Transport>,
}

impl App {
    /// An app with no chat gateway; input comes from the console and API.
    pub fn new(layout: RepoLayout, config: AppConfig) -> Self {
        Self {
            layout,
            config: Arc::new(config),
            transport: Arc::new(OfflineTransport),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Run until Ctrl-C or until the worker stops.
    pub async fn run(self) -> Result<(), Error> {
        let Self {
            layout,
            config,
            transport,
        } = self;

        let (queue, receiver) = event_queue();
        let registry = Arc::new(TriggerRegistry::new());
        let scheduler = Arc::new(SchedulerEngine::new(
            layout.scheduler_file(),
            registry.clone(),
            queue.clone(),
        ));

        let mut tools = ToolRegistry::new();
        builtin::register_all(&mut tools);
        tracing::info!("Registered tools: {}", tools.names().join(", "));

        let deps = WorkerDeps {
            transport: transport.clone(),
            engine: build_engine(&layout, &config),
            memory: Arc::new(FileMemoryStore::new(
                layout.journal_log(),
                layout.blocks_dir(),
                layout.checkpoint_file(),
            )),
            scheduler: scheduler.clone(),
            post_turn: build_post_turn(&layout, &config),
            tools: Arc::new(tools),
        };
        let mut worker = Worker::new(deps, worker_config(&layout, &config)).spawn(receiver);

        if let Err(e) = scheduler.reload().await {
            tracing::warn!("Initial scheduler load failed: {}", e);
        }

        let stream = transport.start().await?;
        let listener = spawn_listener(stream, queue.clone(), config.clone());

        let mut api = if config.api_port == 0 {
            None
        } else {
            Some(ApiServer::start(config.api_port, queue.clone()).await?)
        };

        let console = if transport.is_ready() {
            None
        } else {
            Some(spawn_console(queue.clone()))
        };

        tracing::info!(
            "roost ready in {} (transport {})",
            layout.home.display(),
            transport.name()
        );

        let worker_finished = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down...");
                false
            }
            result = &mut worker => {
                if let Err(e) = result {
                    tracing::error!("Worker task failed: {}", e);
                } else {
                    tracing::info!("Worker stopped, shutting down...");
                }
                true
            }
        };

        scheduler.shutdown();
        registry.shutdown();
        listener.abort();
        if let Some(console) = console {
            console.abort();
        }
        if let Err(e) = transport.shutdown().await {
            tracing::warn!("Transport shutdown failed: {}", e);
        }
        if let Some(api) = api.as_mut() {
            api.shutdown().await;
        }
        if !worker_finished {
            worker.abort();
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    tracing::error!("Worker task failed: {}", e);
                }
            }
        }
        tracing::info!("Shutdown complete");
        Ok(())
    }
}
