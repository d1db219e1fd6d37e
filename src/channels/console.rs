//! Local console source.
//!
//! Used when no chat transport is connected: every non-blank stdin line
//! becomes a console event. End of input ends the source.

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::LinesStream;

use crate::agent::{EnqueueOutcome, EventQueue};
use crate::event::Event;

/// Enqueue one console event per non-blank line until EOF or until the
/// queue closes. Returns the number of events queued.
pub async fn pump_lines<R>(reader: R, queue: &EventQueue) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut lines = LinesStream::new(BufReader::new(reader).lines());
    let mut queued = 0;
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Console read failed: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match queue.enqueue(Event::console(line)) {
            EnqueueOutcome::Queued { .. } => queued += 1,
            EnqueueOutcome::Deduped { .. } => {}
            EnqueueOutcome::Closed => break,
        }
    }
    queued
}

/// Read stdin in the background.
pub fn spawn_console(queue: EventQueue) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Console input enabled; type a message and press enter");
        let queued = pump_lines(tokio::io::stdin(), &queue).await;
        tracing::info!("Console input closed after {} messages", queued);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::event_queue;
    use crate::event::{CONSOLE_CHANNEL, EventKind};

    #[tokio::test]
    async fn test_pump_skips_blank_lines() {
        let (queue, mut rx) = event_queue();
        let input: &[u8] = b"hello\n\n   \n  second line  \n";

        assert_eq!(pump_lines(input, &queue).await, 2);

        let (first, _r1) = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::Console);
        assert_eq!(first.prompt, "hello");
        assert_eq!(first.channel_id.as_deref(), Some(CONSOLE_CHANNEL));
        let (second, _r2) = rx.recv().await.unwrap();
        assert_eq!(second.prompt, "second line");
    }

    #[tokio::test]
    async fn test_pump_stops_when_queue_closes() {
        let (queue, rx) = event_queue();
        drop(rx);
        let input: &[u8] = b"one\ntwo\n";
        assert_eq!(pump_lines(input, &queue).await, 0);
    }
}
