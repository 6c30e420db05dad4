//! Per-session event routing
//!
//! Jobs publish events by session id without knowing whether a push
//! channel is attached yet. Events published before a channel attaches, or
//! while it is reconnecting, are buffered and flushed in arrival order on
//! the next attach.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::events::StreamEvent;

enum Slot {
    Pending {
        events: Vec<StreamEvent>,
        since: Instant,
    },
    Attached(mpsc::UnboundedSender<StreamEvent>),
}

/// Session-keyed event router.
#[derive(Default)]
pub struct Outbox {
    slots: Mutex<HashMap<String, Slot>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to the channel attached to `session_id`, or buffer it.
    pub fn publish(&self, session_id: &str, event: StreamEvent) {
        let mut slots = self.slots.lock();
        let slot = slots.entry(session_id.to_string()).or_insert_with(|| Slot::Pending {
            events: Vec::new(),
            since: Instant::now(),
        });

        match slot {
            Slot::Attached(sender) => {
                trace!(session_id, kind = %event.kind, "Routing event to attached channel");
                if let Err(mpsc::error::SendError(event)) = sender.send(event) {
                    // channel went away without detaching; keep the event
                    debug!(session_id, "Attached channel closed, buffering event");
                    *slot = Slot::Pending {
                        events: vec![event],
                        since: Instant::now(),
                    };
                }
            }
            Slot::Pending { events, .. } => events.push(event),
        }
    }

    /// Attach a channel to `session_id`, flushing buffered events into it
    /// first. A previous attachment is replaced.
    pub fn attach(&self, session_id: &str) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut slots = self.slots.lock();

        if let Some(Slot::Pending { events, .. }) = slots.remove(session_id) {
            debug!(session_id, buffered = events.len(), "Flushing buffered events");
            for event in events {
                // receiver is held locally, send cannot fail
                let _ = sender.send(event);
            }
        }
        slots.insert(session_id.to_string(), Slot::Attached(sender));
        receiver
    }

    /// Detach the channel of `session_id`; later events are buffered again.
    pub fn detach(&self, session_id: &str) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(session_id) {
            if matches!(slot, Slot::Attached(_)) {
                *slot = Slot::Pending {
                    events: Vec::new(),
                    since: Instant::now(),
                };
            }
        }
    }

    /// Forget `session_id` entirely.
    pub fn remove(&self, session_id: &str) {
        self.slots.lock().remove(session_id);
    }

    /// Drop buffers that have waited longer than `older_than` for a channel.
    pub fn purge_pending(&self, older_than: Duration) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Pending { since, .. } => now.saturating_duration_since(*since) <= older_than,
            Slot::Attached(_) => true,
        });
        before - slots.len()
    }

    /// Number of buffered events for `session_id`
    pub fn pending_len(&self, session_id: &str) -> usize {
        match self.slots.lock().get(session_id) {
            Some(Slot::Pending { events, .. }) => events.len(),
            _ => 0,
        }
    }

    pub fn is_attached(&self, session_id: &str) -> bool {
        matches!(self.slots.lock().get(session_id), Some(Slot::Attached(_)))
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffered_events_flushed_in_order() {
        let outbox = Outbox::new();
        outbox.publish("s-1", StreamEvent::thinking("start"));
        outbox.publish("s-1", StreamEvent::progress(1, 3));
        assert_eq!(outbox.pending_len("s-1"), 2);

        let mut rx = outbox.attach("s-1");
        outbox.publish("s-1", StreamEvent::complete("done", "m"));

        assert_eq!(rx.recv().await.unwrap(), StreamEvent::thinking("start"));
        assert_eq!(rx.recv().await.unwrap(), StreamEvent::progress(1, 3));
        assert_eq!(rx.recv().await.unwrap(), StreamEvent::complete("done", "m"));
    }

    #[tokio::test]
    async fn test_detach_closes_channel_and_rebuffers() {
        let outbox = Outbox::new();
        let mut rx = outbox.attach("s-1");
        outbox.detach("s-1");
        assert!(rx.recv().await.is_none());

        outbox.publish("s-1", StreamEvent::progress(2, 3));
        assert_eq!(outbox.pending_len("s-1"), 1);
        assert!(!outbox.is_attached("s-1"));
    }

    #[tokio::test]
    async fn test_dropped_receiver_buffers_event() {
        let outbox = Outbox::new();
        drop(outbox.attach("s-1"));
        outbox.publish("s-1", StreamEvent::error("late"));
        assert_eq!(outbox.pending_len("s-1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_pending_keeps_attached() {
        let outbox = Outbox::new();
        outbox.publish("orphan", StreamEvent::thinking("x"));
        let _rx = outbox.attach("live");

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(outbox.purge_pending(Duration::from_secs(60)), 1);
        assert!(outbox.is_attached("live"));
        assert_eq!(outbox.len(), 1);
    }
}
