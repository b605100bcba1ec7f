//! Cancellable streaming of generated text.
//!
//! A producer task feeds a bounded channel through a [`StreamSink`]; the
//! consumer reads a [`GenerationStream`]. The stream ends with exactly one
//! terminal event ([`StreamEvent::Error`] or [`StreamEvent::Complete`]).
//! Dropping or cancelling the consumer closes the channel, which the
//! producer observes even while it is waiting on the backend.

use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 32;

/// One item of a streamed generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum StreamEvent {
    Content(String),
    Error(String),
    Complete,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Content(_))
    }
}

/// Producer half. Only content can be sent until [`StreamSink::finish`]
/// consumes the sink, so a second terminal event cannot be produced.
pub struct StreamSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl StreamSink {
    /// Sends a chunk. Returns `false` once the consumer is gone.
    pub async fn send_content(&self, text: String) -> bool {
        self.tx.send(StreamEvent::Content(text)).await.is_ok()
    }

    /// Resolves when the consumer has dropped or cancelled the stream.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Sends the terminal event and closes the producer side.
    pub async fn finish(self, terminal: StreamEvent) {
        debug_assert!(terminal.is_terminal());
        let _ = self.tx.send(terminal).await;
    }
}

/// Consumer half: a `futures::Stream` of [`StreamEvent`]s.
pub struct GenerationStream {
    rx: mpsc::Receiver<StreamEvent>,
    finished: bool,
}

impl GenerationStream {
    /// Creates a connected sink/stream pair.
    pub fn channel() -> (StreamSink, GenerationStream) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            StreamSink { tx },
            GenerationStream {
                rx,
                finished: false,
            },
        )
    }

    /// A stream that only carries one error event.
    pub fn failed(message: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 and a fresh channel: this send cannot fail.
        let _ = tx.try_send(StreamEvent::Error(message.into()));
        GenerationStream {
            rx,
            finished: false,
        }
    }

    /// Stops the stream early. The producer is told to stop and no further
    /// events are yielded.
    pub fn cancel(&mut self) {
        self.rx.close();
        self.finished = true;
    }

    /// Drains the stream, returning the concatenated text or the error.
    pub async fn collect_text(mut self) -> Result<String, String> {
        use futures::StreamExt;

        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Content(chunk) => text.push_str(&chunk),
                StreamEvent::Error(message) => return Err(message),
                StreamEvent::Complete => break,
            }
        }
        Ok(text)
    }
}

impl Stream for GenerationStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                    self.rx.close();
                }
                Poll::Ready(Some(event))
            }
            // The producer went away without a terminal event (it panicked
            // or was aborted). Never end silently.
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(StreamEvent::Error(
                    "stream ended without completion".to_string(),
                )))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_events_arrive_in_order_and_end_after_terminal() {
        let (sink, stream) = GenerationStream::channel();
        tokio::spawn(async move {
            assert!(sink.send_content("a".into()).await);
            assert!(sink.send_content("b".into()).await);
            sink.finish(StreamEvent::Complete).await;
        });

        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Content("a".into()),
                StreamEvent::Content("b".into()),
                StreamEvent::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_producer_yields_single_error() {
        let (sink, stream) = GenerationStream::channel();
        tokio::spawn(async move {
            sink.send_content("partial".into()).await;
            drop(sink);
        });

        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], StreamEvent::Error("stream ended without completion".into()));
    }

    #[tokio::test]
    async fn test_cancel_is_observed_by_producer() {
        let (sink, mut stream) = GenerationStream::channel();
        stream.cancel();

        sink.closed().await;
        assert!(sink.is_closed());
        assert!(!sink.send_content("late".into()).await);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_is_observed_by_producer() {
        let (sink, stream) = GenerationStream::channel();
        drop(stream);
        sink.closed().await;
        assert!(!sink.send_content("late".into()).await);
    }

    #[tokio::test]
    async fn test_failed_stream_has_one_error_event() {
        let events: Vec<StreamEvent> = GenerationStream::failed("no model").collect().await;
        assert_eq!(events, vec![StreamEvent::Error("no model".into())]);
    }

    #[tokio::test]
    async fn test_collect_text_concatenates_until_complete() {
        let (sink, stream) = GenerationStream::channel();
        tokio::spawn(async move {
            sink.send_content("fn main".into()).await;
            sink.send_content("() {}".into()).await;
            sink.finish(StreamEvent::Complete).await;
        });
        assert_eq!(stream.collect_text().await, Ok("fn main() {}".to_string()));

        let failed = GenerationStream::failed("boom");
        assert_eq!(failed.collect_text().await, Err("boom".to_string()));
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let json = serde_json::to_value(StreamEvent::Content("x".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "content", "content": "x"}));
        let json = serde_json::to_value(StreamEvent::Complete).unwrap();
        assert_eq!(json, serde_json::json!({"type": "complete"}));
    }
}
