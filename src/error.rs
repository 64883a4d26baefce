//! Typed error kinds surfaced at the public API boundary.
//!
//! Job-level failures never reach here (they resolve as a normal
//! [`crate::job::JobOutcome`], see §7 of the design notes); these variants
//! are the *admission* and *lifecycle* errors a caller is expected to match
//! on by kind rather than by formatted message.

use thiserror::Error;

/// Errors returned by [`crate::pool::ThreadPool`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// `submit` was rejected because the pool is closed and configured with
    /// [`crate::pool::ClosedPolicy::RejectWhenClosed`].
    #[error("pool is closed")]
    PoolClosed,
    /// `submit` raced a [`crate::registry::PoolRegistry::destroy`] call.
    #[error("pool was destroyed")]
    PoolDestroyed,
    /// The pool is closed and already has no capacity to accept more queued
    /// work (reserved for implementations that bound `waitingJobs`; this
    /// crate's queue is unbounded, so callers should not expect to observe
    /// this variant, but it is kept so the full §7 taxonomy has a home).
    #[error("queue is full while pool is closed")]
    QueueFullWhileClosed,
    /// `startThreads` gave up waiting for a worker's `ready` handshake.
    #[error("timed out waiting for a worker thread to start")]
    StartTimeout,
    /// `drain` was called while the pool is still `open`.
    #[error("drain called while pool is still open")]
    DrainNotClosed,
    /// `drain` did not observe `noJobsRunning` within its bound.
    #[error("drain timed out waiting for in-flight jobs to finish")]
    DrainTimeout,
    /// The Thread executing a job disappeared (channel closed) before
    /// replying; the in-flight job is resolved with this error.
    #[error("worker exited before completing its job")]
    WorkerExited,
    /// `startThreads` was called while Threads already exist.
    #[error("threads are already running")]
    ThreadsAlreadyRunning,
    /// `open` was called on a pool with no Threads to serve requests.
    #[error("pool has no running threads; call startThreads first")]
    NoThreads,
    /// `stopThreads` was called before a successful `drain`.
    #[error("stopThreads called before the pool was drained")]
    NotDrained,
}

/// Errors detected while wiring the [`crate::router::PortEventRouter`].
///
/// Per §7's propagation policy these are logged at the call site, not
/// returned to a caller's request path; the type exists so wiring code has
/// something concrete to log and tests have something concrete to assert on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// A port declared `consumesEvent`/`producesEvent` that never matches
    /// any other port in the deployment; the port is skipped.
    #[error("port on model {model} ({service}) refers to unknown event {event}")]
    UnknownEvent {
        model: String,
        service: String,
        event: String,
    },
}
