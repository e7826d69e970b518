//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! One [`EventBus`] is built at startup and handed by `Arc` to the
//! schedulers and the command surface. Every subscriber sees every event in
//! emission order.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppJob;

/// Signals exchanged between the command surface and the schedulers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppEvent {
    /// Run a job: the given on-demand job, or the head of the queue when `None`
    AppStart(Option<AppJob>),
    /// A job stopped being processed (id may be empty)
    AppStop(String),
    /// The listing crawl should halt
    ListStop,
}

impl AppEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AppEvent::AppStart(_) => EventKind::AppStart,
            AppEvent::AppStop(_) => EventKind::AppStop,
            AppEvent::ListStop => EventKind::ListStop,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AppStart,
    AppStop,
    ListStop,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::AppStart => write!(f, "APP_START"),
            EventKind::AppStop => write!(f, "APP_STOP"),
            EventKind::ListStop => write!(f, "LIST_STOP"),
        }
    }
}

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// Create a bus with a specific buffer capacity. Subscribers that fall
    /// further behind lose the oldest events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Never blocks.
    pub fn emit(&self, event: AppEvent) {
        tracing::debug!(event = %event.kind(), "Emitting event");
        // A send error only means nobody is subscribed
        let _ = self.sender.send(event);
    }

    /// Receive every event.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.sender.subscribe(),
            kind: None,
        }
    }

    /// Receive only events of `kind`.
    pub fn on(&self, kind: EventKind) -> Subscription {
        Subscription {
            rx: self.sender.subscribe(),
            kind: Some(kind),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<AppEvent>,
    kind: Option<EventKind>,
}

impl Subscription {
    /// Next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<AppEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.kind.is_none_or(|k| k == event.kind()) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<AppEvent> {
        use broadcast::error::TryRecvError;
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.kind.is_none_or(|k| k == event.kind()) {
                        return Some(event);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
