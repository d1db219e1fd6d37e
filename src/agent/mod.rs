//! Turn processing.
//!
//! Sources hand [`Event`](crate::event::Event)s to the [`EventQueue`]. A
//! single [`Worker`] pops them in order and runs one turn per event: render
//! context, invoke the reasoning engine, deliver what it sends through the
//! [`Outbox`] behind the [`SendLoopBreaker`], then run the post-turn hook.

mod breaker;
mod history;
mod outbox;
mod prompt;
mod queue;
mod sync;
mod turn;
mod worker;

pub use breaker::{
    BreakerConfig, BreakerState, SendLoopBreaker, SendVerdict, normalize, similarity_ratio,
};
pub use history::{
    CHANNEL_HISTORY_CAP, GLOBAL_HISTORY_CAP, HistoryItem, HistorySource, MessageHistory,
};
pub use outbox::{Delivery, ERROR_REACTION, Outbox, SentMessage, WARNING_REACTION};
pub use prompt::{format_relative, format_timestamp, render_turn_prompt};
pub use queue::{DedupeRelease, EnqueueOutcome, EventQueue, EventReceiver, event_queue};
pub use sync::{GitSync, NoopSync, PostTurnHook, SyncOutcome};
pub use turn::{TurnContext, TurnState};
pub use worker::{TurnOutcome, Worker, WorkerConfig, WorkerDeps};
