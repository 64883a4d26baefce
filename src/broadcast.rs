//! BroadcastChannel — named, multi-writer/multi-reader bus keyed by model
//! name (spec §3, §4.4).
//!
//! Grounded on `DanDo385-rust-edu/labs/33-message-bus`'s `MessageBus`
//! (`Mutex<HashMap<String, Vec<Sender<Message>>>>`, a fresh channel pair per
//! `subscribe()` call, dead-subscriber cleanup on send failure), ported from
//! `tokio::sync::{mpsc, RwLock}` to `std::sync::{mpsc, Mutex}` to match this
//! crate's synchronous concurrency model. One channel exists per distinct
//! remote pool a pool talks to, plus one for its own incoming stream (§3).

use crate::job::PortEvent;
use log::trace;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

/// A single named bus. Every live subscriber (a `Receiver` handed out by
/// [`BroadcastChannel::subscribe`]) observes every message posted after it
/// subscribed; delivery is per-channel FIFO (§5).
#[derive(Default)]
struct Topic {
    subscribers: Vec<Sender<PortEvent>>,
}

/// A directory of named broadcast topics. Cheap to clone: state lives
/// behind an `Arc`.
#[derive(Clone, Default)]
pub struct BroadcastChannel {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
}

impl BroadcastChannel {
    pub fn new() -> Self {
        BroadcastChannel::default()
    }

    /// Subscribe to `topic`, creating it if it does not exist yet. Returns a
    /// fresh `Receiver`; messages posted before this call are not replayed.
    pub fn subscribe(&self, topic: impl Into<String>) -> Receiver<PortEvent> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut topics = self.topics.lock().expect("broadcast lock poisoned");
        topics.entry(topic.into()).or_default().subscribers.push(tx);
        rx
    }

    /// Post `event` to every live subscriber of `topic`. Subscribers whose
    /// receiver has been dropped are pruned from the topic's list; a topic
    /// with no subscribers yet simply drops the event (nothing to deliver
    /// to, matching a broker `notify` on an unknown event).
    pub fn publish(&self, topic: &str, event: PortEvent) {
        let mut topics = self.topics.lock().expect("broadcast lock poisoned");
        let Some(entry) = topics.get_mut(topic) else {
            trace!("broadcast: no subscribers for topic {topic} yet");
            return;
        };
        entry.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers on `topic`, used by tests.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .expect("broadcast lock poisoned")
            .get(topic)
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn a_subscriber_observes_messages_posted_after_it_subscribed() {
        let bus = BroadcastChannel::new();
        let rx = bus.subscribe("ORDER");

        bus.publish("ORDER", PortEvent::new("ORDER", "orderCreated", json!({"id": 1})));

        let received = rx.recv_timeout(std::time::Duration::from_millis(100)).unwrap();
        assert_eq!(received.event_name.as_deref(), Some("orderCreated"));
    }

    #[test]
    fn publish_to_unknown_topic_is_a_no_op() {
        let bus = BroadcastChannel::new();
        bus.publish("NOBODY", PortEvent::new("NOBODY", "evt", json!(null)));
        assert_eq!(bus.subscriber_count("NOBODY"), 0);
    }

    #[test]
    fn every_live_subscriber_receives_the_same_message() {
        let bus = BroadcastChannel::new();
        let rx1 = bus.subscribe("TOPIC");
        let rx2 = bus.subscribe("TOPIC");

        bus.publish("TOPIC", PortEvent::new("TOPIC", "evt", json!(1)));

        assert!(rx1.recv_timeout(std::time::Duration::from_millis(100)).is_ok());
        assert!(rx2.recv_timeout(std::time::Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn a_dropped_subscriber_is_pruned_on_next_publish() {
        let bus = BroadcastChannel::new();
        {
            let _rx = bus.subscribe("TOPIC");
            assert_eq!(bus.subscriber_count("TOPIC"), 1);
        }
        bus.publish("TOPIC", PortEvent::new("TOPIC", "evt", json!(null)));
        assert_eq!(bus.subscriber_count("TOPIC"), 0);
    }
}
