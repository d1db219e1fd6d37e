//! Event queue with in-flight dedupe.
//!
//! Any number of sources hold an [`EventQueue`] handle; exactly one worker
//! owns the [`EventReceiver`]. Events carrying a dedupe key are dropped
//! while an earlier event with the same key is queued or being processed.
//! The key is released by the [`DedupeRelease`] guard handed out with the
//! event, so it is freed on every exit path of the turn, including panics
//! and cancellation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::event::Event;

/// Result of handing an event to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended; `depth` is the queue length after the append.
    Queued { depth: usize },
    /// Dropped because its dedupe key is already in flight.
    Deduped { key: String },
    /// The worker is gone.
    Closed,
}

#[derive(Debug, Default)]
struct DedupeState {
    active_keys: Mutex<HashSet<String>>,
    depth: AtomicUsize,
    deduped: AtomicU64,
}

impl DedupeState {
    fn keys(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active_keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, key: &str) {
        if self.keys().remove(key) {
            tracing::debug!("Released dedupe key {}", key);
        }
    }
}

/// Create a connected queue handle and receiver.
pub fn event_queue() -> (EventQueue, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(DedupeState::default());
    (
        EventQueue {
            tx,
            state: state.clone(),
        },
        EventReceiver { rx, state },
    )
}

/// Producer side of the queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<Event>,
    state: Arc<DedupeState>,
}

impl EventQueue {
    /// Append an event unless its dedupe key is already in flight.
    ///
    /// Never blocks, so it is safe to call from timer callbacks.
    pub fn enqueue(&self, event: Event) -> EnqueueOutcome {
        let key = event.dedupe_key.clone();
        if let Some(key) = &key {
            if !self.state.keys().insert(key.clone()) {
                let total = self.state.deduped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::info!(
                    dedupe_key = %key,
                    deduped_total = total,
                    "Dropped duplicate event, key already in flight"
                );
                return EnqueueOutcome::Deduped { key: key.clone() };
            }
        }

        let kind = event.kind;
        let depth = self.state.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx.send(event).is_err() {
            self.state.depth.fetch_sub(1, Ordering::SeqCst);
            if let Some(key) = &key {
                self.state.release(key);
            }
            tracing::warn!("Event queue closed, dropping {} event", kind);
            return EnqueueOutcome::Closed;
        }

        tracing::debug!("Queued {} event (depth {})", kind, depth);
        EnqueueOutcome::Queued { depth }
    }

    /// Number of events waiting for the worker.
    pub fn depth(&self) -> usize {
        self.state.depth.load(Ordering::SeqCst)
    }

    /// Number of events dropped by dedupe since startup.
    pub fn deduped_count(&self) -> u64 {
        self.state.deduped.load(Ordering::Relaxed)
    }

    /// Whether a dedupe key is currently queued or being processed.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.state.keys().contains(key)
    }
}

/// Consumer side of the queue, owned by the worker.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
    state: Arc<DedupeState>,
}

impl EventReceiver {
    /// Wait for the next event. Returns `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<(Event, DedupeRelease)> {
        let event = self.rx.recv().await?;
        self.state.depth.fetch_sub(1, Ordering::SeqCst);
        let release = DedupeRelease {
            key: event.dedupe_key.clone(),
            state: self.state.clone(),
        };
        Some((event, release))
    }
}

/// Frees an event's dedupe key when dropped.
#[derive(Debug)]
pub struct DedupeRelease {
    key: Option<String>,
    state: Arc<DedupeState>,
}

impl DedupeRelease {
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

impl Drop for DedupeRelease {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.state.release(&key);
        }
    }
}
