//! Typing/presence scope.
//!
//! While a [`PresenceScope`] is alive the transport shows the agent as
//! working in the event's channel. Dropping the scope stops the signal, so
//! it is released on normal return, on error, and when the turn future is
//! cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::channels::Transport;
use crate::event::Event;

/// How often the typing signal is refreshed. Transports expire it after
/// roughly ten seconds.
pub const TYPING_REFRESH: Duration = Duration::from_secs(8);

/// Scoped "agent is working" signal.
#[derive(Debug)]
pub struct PresenceScope {
    channel_id: Option<String>,
    keepalive: Option<JoinHandle<()>>,
}

impl PresenceScope {
    /// Start signalling presence for `event`.
    ///
    /// A no-op scope is returned when the event has no channel or the
    /// transport is not ready.
    pub fn acquire(transport: Arc<dyn Transport>, event: &Event) -> Self {
        let Some(channel_id) = event.channel_id.clone() else {
            return Self::inactive();
        };
        if !transport.is_ready() {
            return Self::inactive();
        }

        tracing::debug!("Presence started in channel {}", channel_id);
        let task_channel = channel_id.clone();
        let keepalive = tokio::spawn(async move {
            loop {
                if let Err(e) = transport.trigger_typing(&task_channel).await {
                    tracing::debug!(channel = %task_channel, error = %e, "Typing signal failed");
                }
                tokio::time::sleep(TYPING_REFRESH).await;
            }
        });

        Self {
            channel_id: Some(channel_id),
            keepalive: Some(keepalive),
        }
    }

    fn inactive() -> Self {
        Self {
            channel_id: None,
            keepalive: None,
        }
    }

    /// Whether this scope is signalling anything.
    pub fn is_active(&self) -> bool {
        self.keepalive.is_some()
    }
}

impl Drop for PresenceScope {
    fn drop(&mut self) {
        if let Some(handle) = self.keepalive.take() {
            handle.abort();
            if let Some(channel_id) = &self.channel_id {
                tracing::debug!("Presence stopped in channel {}", channel_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::channels::{ChatMessage, HistoryQuery, MessageStream};
    use crate::error::TransportError;

    #[derive(Default)]
    struct CountingTransport {
        ready: bool,
        typing: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        fn name(&self) -> &str {
            "counting"
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        async fn start(&self) -> Result<MessageStream, TransportError> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn send(&self, _channel_id: &str, _text: &str) -> Result<String, TransportError> {
            Ok("1".to_string())
        }

        async fn fetch_history(
            &self,
            _channel_id: &str,
            _query: HistoryQuery,
        ) -> Result<Vec<ChatMessage>, TransportError> {
            Ok(Vec::new())
        }

        async fn add_reaction(
            &self,
            _channel_id: &str,
            _message_id: &str,
            _emoji: &str,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn trigger_typing(&self, _channel_id: &str) -> Result<(), TransportError> {
            self.typing.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_noop_without_channel() {
        let transport = Arc::new(CountingTransport {
            ready: true,
            ..Default::default()
        });
        let scope = PresenceScope::acquire(transport, &Event::scheduled("job", "p"));
        assert!(!scope.is_active());
    }

    #[tokio::test]
    async fn test_noop_when_transport_not_ready() {
        let transport = Arc::new(CountingTransport::default());
        let scope = PresenceScope::acquire(transport, &Event::chat("1", "2", "ana", "hi"));
        assert!(!scope.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_stops_on_drop() {
        let transport = Arc::new(CountingTransport {
            ready: true,
            ..Default::default()
        });
        let scope = PresenceScope::acquire(transport.clone(), &Event::chat("1", "2", "ana", "hi"));
        assert!(scope.is_active());

        tokio::time::sleep(TYPING_REFRESH * 2 + Duration::from_millis(10)).await;
        let while_held = transport.typing.load(Ordering::SeqCst);
        assert_eq!(while_held, 3);

        drop(scope);
        tokio::time::sleep(TYPING_REFRESH * 3).await;
        assert_eq!(transport.typing.load(Ordering::SeqCst), while_held);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_stops_when_holder_is_cancelled() {
        let transport = Arc::new(CountingTransport {
            ready: true,
            ..Default::default()
        });
        let held = transport.clone();
        let turn = tokio::spawn(async move {
            let _scope = PresenceScope::acquire(held, &Event::chat("1", "2", "ana", "hi"));
            std::future::pending::<()>().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        turn.abort();
        let _ = turn.await;
        let after_cancel = transport.typing.load(Ordering::SeqCst);
        tokio::time::sleep(TYPING_REFRESH * 3).await;
        assert_eq!(transport.typing.load(Ordering::SeqCst), after_cancel);
    }
}
