//! Worker (C1) — an isolated execution context for one model.
//!
//! Mirrors the teacher's `Worker::new`/`Worker::worker_entry` shape in
//! `src/pool.rs`: one OS thread, one job at a time, a `func` callback doing
//! the actual work. Generalized for the spec's ABI (§4.1, §6): a `ready`
//! handshake before the first job, and `shutdown` as a message rather than
//! dropping the channel.

use crate::job::JobOutcome;
use log::{debug, error, trace, warn};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Runs one job inside a Worker. Implementations back the "sandboxed
/// compute unit" the spec treats as an external collaborator (§1, §6); this
/// crate only needs something `Send + Sync` it can call by name.
pub trait JobRunner: Send + Sync {
    fn run(&self, job_name: &str, data: Value) -> JobOutcome;
}

pub type SharedJobRunner = Arc<dyn JobRunner>;

impl<F> JobRunner for F
where
    F: Fn(&str, Value) -> JobOutcome + Send + Sync,
{
    fn run(&self, job_name: &str, data: Value) -> JobOutcome {
        self(job_name, data)
    }
}

/// `supervisor -> worker` message (§6). `Shutdown` is the special
/// `name = "shutdown"` record.
pub(crate) enum WorkerMessage {
    Job { name: String, data: Value },
    Shutdown,
}

/// `worker -> supervisor` reply carried on the pool's shared reply channel,
/// tagged with the Thread id it came from. The `ready` handshake is not a
/// variant here: it travels over its own one-shot channel so `startThreads`
/// can wait on it per-thread without racing job replies.
pub(crate) enum WorkerReply {
    Result(JobOutcome),
    ShutdownAck,
}

/// Supervisor-side handle over one Worker OS thread.
pub(crate) struct WorkerHandle {
    pub id: usize,
    pub created_at: Instant,
    to_worker: Sender<WorkerMessage>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a new Worker thread. Returns the handle plus the one-shot
    /// receiver that fires once the Worker has sent its `ready` message
    /// (§4.1: "the pool treats the Thread as usable only after `ready`").
    pub fn spawn(
        id: usize,
        runner: SharedJobRunner,
        reply_tx: Sender<(usize, WorkerReply)>,
    ) -> (WorkerHandle, Receiver<()>) {
        let (to_worker, from_supervisor) = mpsc::channel::<WorkerMessage>();
        let (ready_tx, ready_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name(format!("modelpool-worker-{id}"))
            .spawn(move || worker_entry(id, from_supervisor, reply_tx, ready_tx, runner))
            .expect("failed to spawn worker thread");

        (
            WorkerHandle {
                id,
                created_at: Instant::now(),
                to_worker,
                thread: Some(thread),
            },
            ready_rx,
        )
    }

    /// Send a job to this Worker. Errors (channel closed) mean the Worker
    /// already exited; the pool treats that as `worker-exited` (§7).
    pub fn post_job(&self, name: String, data: Value) -> Result<(), ()> {
        self.to_worker
            .send(WorkerMessage::Job { name, data })
            .map_err(|_| ())
    }

    /// Send the `shutdown` message. Does not wait for the ack; callers join
    /// the underlying thread separately (see `ThreadPool::stop_threads`).
    pub fn post_shutdown(&self) {
        let _ = self.to_worker.send(WorkerMessage::Shutdown);
    }

    /// Join the worker's OS thread, waiting at most `timeout`. Returns
    /// `true` if the thread exited in time. On timeout the `JoinHandle` is
    /// handed to a detached watcher thread that keeps waiting in the
    /// background and logs when the worker finally exits; the caller moves
    /// on and counts the Thread as a leak, per §5's cancellation policy.
    pub fn join_with_timeout(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.thread.take() else {
            return true;
        };
        let id = self.id;
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let joiner = thread::Builder::new()
            .name(format!("modelpool-worker-{id}-joiner"))
            .spawn(move || {
                match handle.join() {
                    Ok(_) => trace!("worker {id} shut down"),
                    Err(_) => warn!("worker {id} panicked during shutdown"),
                }
                let _ = done_tx.send(());
            })
            .expect("failed to spawn joiner thread");

        if done_rx.recv_timeout(timeout).is_ok() {
            true
        } else {
            warn!(
                "worker {id} did not shut down within {:?}; treating as a leak",
                timeout
            );
            // The joiner thread keeps running in the background and will
            // finish reaping the worker thread whenever it does exit.
            drop(joiner);
            false
        }
    }
}

fn worker_entry(
    id: usize,
    from_supervisor: Receiver<WorkerMessage>,
    reply_tx: Sender<(usize, WorkerReply)>,
    ready_tx: Sender<()>,
    runner: SharedJobRunner,
) {
    if ready_tx.send(()).is_err() {
        // Supervisor gave up before we even started; nothing to do.
        return;
    }
    debug!("worker {id} ready");

    loop {
        match from_supervisor.recv() {
            Err(_) => {
                trace!("worker {id} shutting down: supervisor channel closed");
                break;
            }
            Ok(WorkerMessage::Shutdown) => {
                let _ = reply_tx.send((id, WorkerReply::ShutdownAck));
                trace!("worker {id} acknowledged shutdown");
                break;
            }
            Ok(WorkerMessage::Job { name, data }) => {
                trace!("worker {id} received job {name}");
                let outcome = catch_unwind(AssertUnwindSafe(|| runner.run(&name, data)))
                    .unwrap_or_else(|panic| {
                        let message = panic_message(&panic);
                        error!("worker {id} job {name} panicked: {message}");
                        JobOutcome::error(format!("job panicked: {message}"))
                    });
                if reply_tx.send((id, WorkerReply::Result(outcome))).is_err() {
                    warn!("worker {id} failed to publish result; pool is gone");
                    break;
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
