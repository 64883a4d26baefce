//! Job / Result data model (spec §3).
//!
//! A [`Job`] is consumed exactly once by a Worker and destroyed when its
//! completion is resolved. Job and Result payloads are represented as
//! [`serde_json::Value`] so they double as the opaque-cloneable type §3
//! requires and the wire format the Worker ABI and the deep-copy boundary
//! (§4.4.1) both need.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::mpsc;

/// The outcome of a processed [`Job`]: either a success value or
/// `{hasError: true, message}`, per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub has_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Domain port events a Worker produced while processing this job.
    ///
    /// A Worker has no channel back to the supervisor other than the job
    /// reply (§5: workers share no mutable memory and communicate only by
    /// message passing), so events it emits "through its Broker" (§2) ride
    /// back attached to the outcome of the job that produced them; the pool
    /// then republishes them on its own Broker for the Router to pick up.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<PortEvent>,
}

impl JobOutcome {
    /// Build a successful outcome carrying `value`.
    pub fn ok(value: Value) -> Self {
        JobOutcome {
            value: Some(value),
            has_error: false,
            message: None,
            events: Vec::new(),
        }
    }

    /// Build a `{hasError: true, message}` outcome, per §4.1's failure
    /// contract: an unhandled internal error is wrapped, never allowed to
    /// kill the Worker.
    pub fn error(message: impl Into<String>) -> Self {
        JobOutcome {
            value: None,
            has_error: true,
            message: Some(message.into()),
            events: Vec::new(),
        }
    }

    /// Attach domain events produced while computing this outcome.
    pub fn with_events(mut self, events: Vec<PortEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn is_error(&self) -> bool {
        self.has_error
    }
}

/// A single `(name, data) -> Result` request handed to a Worker.
///
/// Created by [`crate::pool::ThreadPool::submit`]; consumed exactly once;
/// destroyed when [`Job::resolve`] sends its outcome back to the submitter.
pub struct Job {
    pub name: String,
    pub data: Value,
    completion: mpsc::Sender<JobOutcome>,
}

/// The submitter's half of a [`Job`]'s completion sink. Blocking `recv` on
/// this is the job-level suspension point §5 describes: not cancellable,
/// resolved exactly once.
pub type JobHandle = mpsc::Receiver<JobOutcome>;

impl Job {
    /// Create a new Job and the [`JobHandle`] its submitter will block on.
    pub fn new(name: impl Into<String>, data: Value) -> (Job, JobHandle) {
        let (completion, handle) = mpsc::channel();
        (
            Job {
                name: name.into(),
                data,
                completion,
            },
            handle,
        )
    }

    /// Resolve this Job with `outcome`, consuming it. A closed receiver
    /// (the submitter gave up, which the spec forbids but which can still
    /// happen if the submitter's thread panicked) is not an error here: the
    /// Job is still considered consumed.
    pub fn resolve(self, outcome: JobOutcome) {
        let _ = self.completion.send(outcome);
    }

    /// Split this Job into its pieces for dispatch to a specific Thread.
    pub(crate) fn into_parts(self) -> (String, Value, mpsc::Sender<JobOutcome>) {
        (self.name, self.data, self.completion)
    }
}

/// A port event crossing a [`crate::broadcast::BroadcastChannel`] or the
/// [`crate::mesh::MeshUplink`]. Wire format per spec §6: "JSON object with
/// at least `eventName: string`; absence routes to `missingEventName`".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortEvent {
    pub model: String,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl PortEvent {
    pub fn new(model: impl Into<String>, event_name: impl Into<String>, data: Value) -> Self {
        PortEvent {
            model: model.into(),
            event_name: Some(event_name.into()),
            data,
        }
    }

    /// Deep-copy this event across a pool/process boundary via an explicit
    /// serialize-then-parse round trip (§4.4.1). Non-serializable fields
    /// cannot exist in a `serde_json::Value` in the first place, so the
    /// round trip's only real job is guaranteeing no shared references
    /// survive the hop.
    pub fn deep_copy(&self) -> serde_json::Result<PortEvent> {
        let encoded = serde_json::to_vec(self)?;
        serde_json::from_slice(&encoded)
    }
}
