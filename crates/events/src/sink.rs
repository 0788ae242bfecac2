//! Delivery endpoints for alert observers.
//!
//! Every observer connection is an [`AlertSink`]. Two disciplines exist:
//!
//! - [`PushSink`]: the event is handed straight to the connection writer.
//!   The hand-off may wait briefly for room, bounded by a timeout; a closed
//!   or stuck connection is reported so the registry can drop it.
//! - [`QueueSink`]: the event goes into a bounded buffer (capacity
//!   [`QUEUE_SINK_CAPACITY`]) that the observer drains at its own pace.
//!   Enqueueing never waits; when the buffer is full the new event is
//!   dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

use crate::event::AlertEvent;

/// Buffer size for queue-based observers.
pub const QUEUE_SINK_CAPACITY: usize = 100;

/// How long a push delivery may wait for the connection writer.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Events are shared between all sinks of a broadcast.
pub type SharedEvent = Arc<AlertEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Push,
    Queue,
}

/// Why a single delivery did not happen.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The observer went away.
    #[error("Sink disconnected")]
    Disconnected,

    /// A push connection did not accept the event in time.
    #[error("Sink did not accept the event within {0:?}")]
    Timeout(Duration),

    /// A queue observer is not keeping up; the event was dropped.
    #[error("Sink queue full (capacity {0}), event dropped")]
    Overflow(usize),
}

impl SinkError {
    /// Whether the sink should be removed from the registry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::Disconnected | SinkError::Timeout(_))
    }
}

/// A delivery endpoint for one observer.
#[async_trait]
pub trait AlertSink: fmt::Debug + Send + Sync {
    fn kind(&self) -> SinkKind;

    /// Hand `event` to the observer.
    async fn deliver(&self, event: SharedEvent) -> Result<(), SinkError>;
}

// ---------------------------------------------------------------------------
// PushSink
// ---------------------------------------------------------------------------

/// Frames written by a push connection's writer task.
#[derive(Debug, Clone)]
pub enum PushFrame {
    Event(SharedEvent),
    /// Idle keepalive; carries no alert.
    Keepalive,
    Close,
}

/// Push delivery over a connection writer channel.
#[derive(Debug, Clone)]
pub struct PushSink {
    tx: mpsc::Sender<PushFrame>,
    timeout: Duration,
}

impl PushSink {
    pub fn new(tx: mpsc::Sender<PushFrame>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }

    /// Create a sink together with the receiver its writer task drains.
    pub fn channel(buffer: usize, timeout: Duration) -> (Self, mpsc::Receiver<PushFrame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx, timeout), rx)
    }

    /// The underlying writer channel, for keepalive and close frames.
    pub fn sender(&self) -> mpsc::Sender<PushFrame> {
        self.tx.clone()
    }
}

#[async_trait]
impl AlertSink for PushSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Push
    }

    async fn deliver(&self, event: SharedEvent) -> Result<(), SinkError> {
        match self.tx.send_timeout(PushFrame::Event(event), self.timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SinkError::Timeout(self.timeout)),
            Err(SendTimeoutError::Closed(_)) => Err(SinkError::Disconnected),
        }
    }
}

// ---------------------------------------------------------------------------
// QueueSink
// ---------------------------------------------------------------------------

/// Bounded, non-blocking queue delivery.
#[derive(Debug, Clone)]
pub struct QueueSink {
    tx: mpsc::Sender<SharedEvent>,
    capacity: usize,
}

impl QueueSink {
    /// A queue of [`QUEUE_SINK_CAPACITY`] events and its draining end.
    pub fn channel() -> (Self, mpsc::Receiver<SharedEvent>) {
        Self::with_capacity(QUEUE_SINK_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<SharedEvent>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, capacity }, rx)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl AlertSink for QueueSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Queue
    }

    async fn deliver(&self, event: SharedEvent) -> Result<(), SinkError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SinkError::Overflow(self.capacity)),
            Err(TrySendError::Closed(_)) => Err(SinkError::Disconnected),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::event::tests::sample_alert;

    fn event() -> SharedEvent {
        Arc::new(AlertEvent::raised(&sample_alert()))
    }

    #[tokio::test]
    async fn queue_sink_holds_at_most_capacity() {
        let (sink, mut rx) = QueueSink::channel();

        for _ in 0..QUEUE_SINK_CAPACITY {
            sink.deliver(event()).await.expect("room in queue");
        }
        assert_eq!(
            sink.deliver(event()).await,
            Err(SinkError::Overflow(QUEUE_SINK_CAPACITY))
        );

        let mut drained = 0;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, QUEUE_SINK_CAPACITY);
    }

    #[tokio::test]
    async fn queue_sink_reports_disconnect() {
        let (sink, rx) = QueueSink::channel();
        drop(rx);
        let err = sink.deliver(event()).await.unwrap_err();
        assert_eq!(err, SinkError::Disconnected);
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn push_sink_forwards_event_frames() {
        let (sink, mut rx) = PushSink::channel(4, DEFAULT_PUSH_TIMEOUT);
        assert_eq!(sink.kind(), SinkKind::Push);

        sink.deliver(event()).await.unwrap();
        assert_matches!(rx.recv().await, Some(PushFrame::Event(e)) if e.name() == "alert");
    }

    #[tokio::test(start_paused = true)]
    async fn push_sink_times_out_on_stuck_writer() {
        let (sink, _rx) = PushSink::channel(1, Duration::from_millis(50));
        sink.deliver(event()).await.unwrap();

        let err = sink.deliver(event()).await.unwrap_err();
        assert_eq!(err, SinkError::Timeout(Duration::from_millis(50)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn push_sink_reports_disconnect() {
        let (sink, rx) = PushSink::channel(1, DEFAULT_PUSH_TIMEOUT);
        drop(rx);
        assert_eq!(sink.deliver(event()).await, Err(SinkError::Disconnected));
    }

    #[test]
    fn overflow_is_not_fatal() {
        assert!(!SinkError::Overflow(100).is_fatal());
    }
}
