//! EventSink trait and the two sinks the crate ships
//!
//! The session pushes every event through a sink as it happens. Emission never fails
//! the operation that caused it: a closed channel only logs.

use super::events::LineageEvent;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Receiver side of session events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LineageEvent);
}

/// Forwards events into an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LineageEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LineageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: LineageEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<LineageEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain collected events
    pub fn take(&self) -> Vec<LineageEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Copy of collected events, leaving them in place
    pub fn events(&self) -> Vec<LineageEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: LineageEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
