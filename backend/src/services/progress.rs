//! Progress fan-out.
//!
//! Subscribers own bounded queues; the host broadcasts with a non-blocking
//! push and drops events for subscribers that cannot keep up. The SSE wire
//! framing lives here so non-HTTP consumers can reuse it.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::api::ProgressEvent;

/// Per-subscriber queue capacity; slow clients skip events beyond this.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 100;

/// Comment frame sent periodically to keep SSE connections alive.
pub const KEEPALIVE_FRAME: &str = ": keepalive\n\n";

/// Render one event as an SSE data frame.
pub fn sse_frame(event: &ProgressEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("data: {json}\n\n")
}

/// Broadcast bus for solver progress events.
#[derive(Default)]
pub struct ProgressBus {
    subscribers: Mutex<Vec<mpsc::Sender<ProgressEvent>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. The returned receiver starts with a
    /// `connected` event already queued.
    pub fn subscribe(&self) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let _ = tx.try_send(ProgressEvent::Connected {});
        self.subscribers.lock().push(tx);
        rx
    }

    /// Push an event to every subscriber without blocking; full queues skip
    /// the event, closed subscribers are dropped.
    pub fn broadcast(&self, event: &ProgressEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
