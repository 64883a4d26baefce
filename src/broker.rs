//! Broker (C6) — process-local pub/sub keyed by event name.
//!
//! Grounded on `DanDo385-rust-edu/labs/33-message-bus`'s `MessageBus`
//! (topic -> subscriber list under a lock), collapsed from per-subscriber
//! channels to direct callback invocation because the Broker's subscribers
//! here (the Router, pool-status observers, test code) all live on the same
//! supervisor context and want synchronous delivery, not another channel
//! hop. `notify` runs handlers sequentially in registration order and
//! isolates a panicking handler from the rest of the fan-out, per §4.6.

use log::warn;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// A process-local event bus. Cheap to clone: the subscriber map is shared
/// via `Arc`.
#[derive(Clone, Default)]
pub struct Broker {
    handlers: Arc<Mutex<HashMap<String, Vec<Handler>>>>,
}

impl Broker {
    pub fn new() -> Self {
        Broker::default()
    }

    /// Append `handler` to `event`'s subscriber list.
    pub fn on(&self, event: impl Into<String>, handler: Handler) {
        let mut handlers = self.handlers.lock().expect("broker lock poisoned");
        handlers.entry(event.into()).or_default().push(handler);
    }

    /// Invoke every handler registered for `event`, in registration order.
    /// A handler that panics is caught and logged; it does not stop the
    /// remaining handlers from running (§4.6: "catching per-handler
    /// failures without aborting the fan-out").
    pub fn notify(&self, event: &str, data: &Value) {
        let snapshot = {
            let handlers = self.handlers.lock().expect("broker lock poisoned");
            handlers.get(event).cloned().unwrap_or_default()
        };
        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(data))).is_err() {
                warn!("broker handler for event {event} panicked");
            }
        }
    }

    /// Number of handlers registered for `event` (used by tests and by the
    /// router to detect unhandled local ports).
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.handlers
            .lock()
            .expect("broker lock poisoned")
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
