//! ThreadPool (C2) — the scheduler, spec §4.2.
//!
//! Generalizes the teacher's fixed-size `ThreadPool<Job, Result>`
//! (`Vec<Worker>` + a shared `mpsc` job channel + a background relay
//! thread, see the grounding notes in `DESIGN.md`) into a bounded elastic
//! pool with admission control and a full open/closed/drained/stopped
//! lifecycle.
//!
//! Every pool-mutating operation (`submit`, `close`, `open`, `drain`,
//! `stop_threads`, `start_threads`, `reload`) takes the same
//! [`std::sync::Mutex`] for its full duration, including any bounded wait
//! it performs. This mirrors spec §5's "main-side code is logically
//! single-threaded (serialized on a single scheduler context)": calls may
//! arrive from many OS threads, but the pool only ever does one thing at a
//! time.

use crate::broker::{Broker, Handler};
use crate::error::PoolError;
use crate::job::{Job, JobHandle, JobOutcome};
use crate::worker::{SharedJobRunner, WorkerHandle, WorkerReply};
use log::{debug, error, info, trace, warn};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// `drain()`'s bound when the caller does not pick one explicitly (§4.2.1).
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(4);
/// `start_threads`' per-worker `ready` handshake bound (§5).
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);
/// Grace period before a Thread that ignored `shutdown` is treated as a leak (§5).
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Background dequeue sweep period (§4.2.3).
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(1500);
/// Delay between removing Threads from the free stack and terminating them (§4.2.1, Design Notes).
pub const STOP_REMOVAL_DELAY: Duration = Duration::from_millis(50);

/// What `submit` does when the pool is not `open` (§4.2.2 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedPolicy {
    /// Place the Job on `waitingJobs`; it drains once the pool reopens.
    QueueWhileClosed,
    /// Fail fast with [`PoolError::PoolClosed`].
    RejectWhenClosed,
}

impl Default for ClosedPolicy {
    fn default() -> Self {
        ClosedPolicy::QueueWhileClosed
    }
}

/// Per-pool configuration (§6: defaults `min=1, max=2, queueTolerance=25`).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
    pub queue_tolerance: u32,
    pub closed_policy: ClosedPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            min: 1,
            max: 2,
            queue_tolerance: 25,
            closed_policy: ClosedPolicy::QueueWhileClosed,
        }
    }
}

/// Pool lifecycle state (§4.2.4): `open -> closed -> drained -> stopped -> open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Open,
    Closed,
    Drained,
    Stopped,
}

/// A consistent, non-blocking, eventually-consistent snapshot of pool metrics (§4.2.1 `status`).
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub name: String,
    pub state: LifecycleState,
    pub total_threads: usize,
    pub free_threads: usize,
    pub waiting_jobs: usize,
    pub jobs_requested: u64,
    pub jobs_queued: u64,
    pub reloads: u64,
    pub queue_rate: u32,
}

fn queue_rate(jobs_queued: u64, jobs_requested: u64) -> u32 {
    if jobs_requested == 0 {
        0
    } else {
        ((jobs_queued as f64) * 100.0 / (jobs_requested as f64)).round() as u32
    }
}

struct PoolInner {
    threads: HashMap<usize, WorkerHandle>,
    free_ids: Vec<usize>,
    in_flight: HashMap<usize, Sender<JobOutcome>>,
    waiting_jobs: VecDeque<Job>,
    drain_waiters: Vec<Sender<()>>,
    state: LifecycleState,
    destroyed: bool,
    next_thread_id: usize,
    jobs_requested: u64,
    jobs_queued: u64,
    reloads: u64,
}

impl PoolInner {
    fn new() -> Self {
        PoolInner {
            threads: HashMap::new(),
            free_ids: Vec::new(),
            in_flight: HashMap::new(),
            waiting_jobs: VecDeque::new(),
            drain_waiters: Vec::new(),
            state: LifecycleState::Open,
            destroyed: false,
            next_thread_id: 0,
            jobs_requested: 0,
            jobs_queued: 0,
            reloads: 0,
        }
    }

    fn no_jobs_running(&self) -> bool {
        self.threads.len() == self.free_ids.len()
    }
}

struct Shared {
    name: String,
    config: PoolConfig,
    runner: SharedJobRunner,
    inner: Mutex<PoolInner>,
    reply_tx: Sender<(usize, WorkerReply)>,
    broker: Broker,
    sweep_stop: AtomicBool,
}

/// Bounded elastic set of Workers for one model (C2). Cheap to clone: all
/// state lives behind an `Arc`.
#[derive(Clone)]
pub struct ThreadPool {
    shared: Arc<Shared>,
    sweep: Arc<Mutex<Option<thread::JoinHandle<()>>>>,
}

impl ThreadPool {
    pub fn new(name: impl Into<String>, config: PoolConfig, runner: SharedJobRunner) -> ThreadPool {
        let name = name.into();
        let (reply_tx, reply_rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            name,
            config,
            runner,
            inner: Mutex::new(PoolInner::new()),
            reply_tx,
            broker: Broker::new(),
            sweep_stop: AtomicBool::new(false),
        });

        spawn_collector(Arc::clone(&shared), reply_rx);
        let sweep = spawn_sweep(Arc::clone(&shared));

        ThreadPool {
            shared,
            sweep: Arc::new(Mutex::new(Some(sweep))),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Subscribe to one of the pool's observable events (`pool-open`,
    /// `pool-close`, `pool-drain`, `noJobsRunning`, and any domain event a
    /// Worker emits, §6).
    pub fn on(&self, event: impl Into<String>, handler: Handler) {
        self.shared.broker.on(event, handler);
    }

    /// The pool's Broker, used by [`crate::router::PortEventRouter`] to wire
    /// this pool's ports (§4.4).
    pub fn broker(&self) -> &Broker {
        &self.shared.broker
    }

    pub fn thread_created_ats(&self) -> Vec<Instant> {
        let inner = self.shared.inner.lock().expect("pool lock poisoned");
        inner.threads.values().map(|t| t.created_at).collect()
    }

    pub fn status(&self) -> PoolStatus {
        let inner = self.shared.inner.lock().expect("pool lock poisoned");
        PoolStatus {
            name: self.shared.name.clone(),
            state: inner.state,
            total_threads: inner.threads.len(),
            free_threads: inner.free_ids.len(),
            waiting_jobs: inner.waiting_jobs.len(),
            jobs_requested: inner.jobs_requested,
            jobs_queued: inner.jobs_queued,
            reloads: inner.reloads,
            queue_rate: queue_rate(inner.jobs_queued, inner.jobs_requested),
        }
    }

    /// Dispatch algorithm, spec §4.2.2.
    pub fn submit(&self, job_name: impl Into<String>, data: Value) -> Result<JobHandle, PoolError> {
        let job_name = job_name.into();
        let mut inner = self.shared.inner.lock().expect("pool lock poisoned");

        if inner.destroyed {
            return Err(PoolError::PoolDestroyed);
        }

        inner.jobs_requested += 1;
        let (job, handle) = Job::new(job_name, data);

        if inner.state != LifecycleState::Open {
            return match self.shared.config.closed_policy {
                ClosedPolicy::QueueWhileClosed => {
                    inner.jobs_queued += 1;
                    inner.waiting_jobs.push_back(job);
                    Ok(handle)
                }
                ClosedPolicy::RejectWhenClosed => Err(PoolError::PoolClosed),
            };
        }

        if let Some(thread_id) = inner.free_ids.pop() {
            dispatch_to_thread(&self.shared, &mut inner, thread_id, job);
            return Ok(handle);
        }

        let total = inner.threads.len();
        let rate = queue_rate(inner.jobs_queued, inner.jobs_requested);
        let should_grow =
            total < self.shared.config.max && (total == 0 || rate > self.shared.config.queue_tolerance);

        if should_grow {
            let id = inner.next_thread_id;
            inner.next_thread_id += 1;
            let (worker, ready_rx) =
                WorkerHandle::spawn(id, Arc::clone(&self.shared.runner), self.shared.reply_tx.clone());
            // Held across the wait: §5 "submit suspends ... until a new
            // Thread is ready", and the supervisor context is single-threaded.
            if ready_rx.recv_timeout(DEFAULT_START_TIMEOUT).is_err() {
                error!("worker {id} failed to start within {:?}", DEFAULT_START_TIMEOUT);
                return Err(PoolError::StartTimeout);
            }
            inner.threads.insert(id, worker);
            dispatch_to_thread(&self.shared, &mut inner, id, job);
            Ok(handle)
        } else {
            inner.jobs_queued += 1;
            inner.waiting_jobs.push_back(job);
            Ok(handle)
        }
    }

    /// Toggle `closed`; idempotent (invariant 6).
    pub fn close(&self) {
        let mut inner = self.shared.inner.lock().expect("pool lock poisoned");
        if inner.state == LifecycleState::Open {
            inner.state = LifecycleState::Closed;
            drop(inner);
            debug!("pool {} closed", self.shared.name);
            self.shared.broker.notify("pool-close", &Value::String(self.shared.name.clone()));
        }
    }

    /// Toggle `open`; idempotent. Requires Threads to exist (§4.2.4).
    pub fn open(&self) -> Result<(), PoolError> {
        let mut inner = self.shared.inner.lock().expect("pool lock poisoned");
        if inner.threads.is_empty() {
            return Err(PoolError::NoThreads);
        }
        if inner.state != LifecycleState::Open {
            inner.state = LifecycleState::Open;
            drop(inner);
            debug!("pool {} open", self.shared.name);
            self.shared.broker.notify("pool-open", &Value::String(self.shared.name.clone()));
            sweep_once(&self.shared);
        }
        Ok(())
    }

    /// Resolves once `noJobsRunning`; fails with `draining-not-closed` if
    /// still open, `drain-timeout` after `timeout` (§4.2.1).
    pub fn drain_timeout(&self, timeout: Duration) -> Result<(), PoolError> {
        let rx = {
            let mut inner = self.shared.inner.lock().expect("pool lock poisoned");
            if inner.state == LifecycleState::Open {
                return Err(PoolError::DrainNotClosed);
            }
            if inner.no_jobs_running() {
                inner.state = LifecycleState::Drained;
                drop(inner);
                self.shared.broker.notify("pool-drain", &Value::String(self.shared.name.clone()));
                return Ok(());
            }
            let (tx, rx) = mpsc::channel();
            inner.drain_waiters.push(tx);
            rx
        };

        match rx.recv_timeout(timeout) {
            Ok(()) => {
                let mut inner = self.shared.inner.lock().expect("pool lock poisoned");
                inner.state = LifecycleState::Drained;
                drop(inner);
                self.shared.broker.notify("pool-drain", &Value::String(self.shared.name.clone()));
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                let mut inner = self.shared.inner.lock().expect("pool lock poisoned");
                inner.state = LifecycleState::Drained;
                warn!(
                    "pool {} drain timed out after {:?}; advancing to drained, survivors are leaks",
                    self.shared.name, timeout
                );
                Err(PoolError::DrainTimeout)
            }
            Err(RecvTimeoutError::Disconnected) => {
                unreachable!("drain waiter channel disconnected without a signal")
            }
        }
    }

    pub fn drain(&self) -> Result<(), PoolError> {
        self.drain_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    /// Terminates every Thread. Must be called after a successful `drain`.
    /// Removes Threads from the free stack, waits `STOP_REMOVAL_DELAY`, then
    /// sends `shutdown` and joins (§4.2.1).
    pub fn stop_threads(&self) -> Result<(), PoolError> {
        let mut inner = self.shared.inner.lock().expect("pool lock poisoned");
        if inner.state != LifecycleState::Drained {
            return Err(PoolError::NotDrained);
        }
        let ids: Vec<usize> = inner.threads.keys().copied().collect();
        inner.free_ids.retain(|id| !ids.contains(id));
        drop(inner);

        thread::sleep(STOP_REMOVAL_DELAY);

        let mut inner = self.shared.inner.lock().expect("pool lock poisoned");
        for id in &ids {
            if let Some(handle) = inner.threads.get(id) {
                handle.post_shutdown();
            }
        }
        let handles: Vec<WorkerHandle> = ids.iter().filter_map(|id| inner.threads.remove(id)).collect();
        inner.state = LifecycleState::Stopped;
        drop(inner);

        for mut handle in handles {
            handle.join_with_timeout(DEFAULT_SHUTDOWN_GRACE);
        }
        info!("pool {} stopped {} thread(s)", self.shared.name, ids.len());
        Ok(())
    }

    /// Brings the pool up to `min` Threads. Rejects if any existing Threads
    /// remain (§4.2.1).
    pub fn start_threads(&self) -> Result<(), PoolError> {
        let mut inner = self.shared.inner.lock().expect("pool lock poisoned");
        if !inner.threads.is_empty() {
            return Err(PoolError::ThreadsAlreadyRunning);
        }
        for _ in 0..self.shared.config.min {
            let id = inner.next_thread_id;
            inner.next_thread_id += 1;
            let (worker, ready_rx) =
                WorkerHandle::spawn(id, Arc::clone(&self.shared.runner), self.shared.reply_tx.clone());
            if ready_rx.recv_timeout(DEFAULT_START_TIMEOUT).is_err() {
                error!("worker {id} failed to start within {:?}", DEFAULT_START_TIMEOUT);
                return Err(PoolError::StartTimeout);
            }
            inner.free_ids.push(id);
            inner.threads.insert(id, worker);
        }
        if inner.state == LifecycleState::Stopped {
            inner.state = LifecycleState::Drained;
        }
        info!("pool {} started {} thread(s)", self.shared.name, self.shared.config.min);
        Ok(())
    }

    /// `close; drain; stop_threads; start_threads; open; reloads += 1`,
    /// executed atomically w.r.t. new submissions (§4.2.4).
    pub fn reload(&self) -> Result<(), PoolError> {
        self.close();
        self.drain()?;
        self.stop_threads()?;
        self.start_threads()?;
        self.open()?;
        let mut inner = self.shared.inner.lock().expect("pool lock poisoned");
        inner.reloads += 1;
        trace!("pool {} reload #{} complete", self.shared.name, inner.reloads);
        Ok(())
    }

    /// `close; drain; stop_threads; mark destroyed`, used by the registry to
    /// tear a pool down (§9: submit racing destroy resolves to
    /// `pool-destroyed`).
    pub(crate) fn destroy(&self) {
        self.close();
        if let Err(err) = self.drain() {
            warn!("pool {} drain during destroy: {err}", self.shared.name);
        }
        if let Err(err) = self.stop_threads() {
            warn!("pool {} stop_threads during destroy: {err}", self.shared.name);
        }
        self.shared.sweep_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sweep.lock().expect("sweep lock poisoned").take() {
            let _ = handle.join();
        }
        let mut inner = self.shared.inner.lock().expect("pool lock poisoned");
        inner.destroyed = true;
    }
}

/// Dispatch a Job to a specific (already-popped) Thread. If the Thread
/// turns out to be gone (channel closed between being freed and now), the
/// Job is resolved with `worker-exited` (§7) instead of being silently lost.
fn dispatch_to_thread(shared: &Arc<Shared>, inner: &mut PoolInner, thread_id: usize, job: Job) {
    let (name, data, completion) = job.into_parts();
    let posted = inner
        .threads
        .get(&thread_id)
        .map(|handle| handle.post_job(name, data))
        .unwrap_or(Err(()));

    match posted {
        Ok(()) => {
            inner.in_flight.insert(thread_id, completion);
        }
        Err(()) => {
            warn!("worker {thread_id} exited before it could accept a job");
            inner.threads.remove(&thread_id);
            let _ = completion.send(JobOutcome::error("worker-exited"));
        }
    }
}

fn spawn_collector(shared: Arc<Shared>, reply_rx: Receiver<(usize, WorkerReply)>) {
    thread::Builder::new()
        .name(format!("modelpool-collector-{}", shared.name))
        .spawn(move || {
            for (thread_id, reply) in reply_rx.iter() {
                handle_reply(&shared, thread_id, reply);
            }
            trace!("reply collector for pool {} shutting down", shared.name);
        })
        .expect("failed to spawn reply collector thread");
}

fn handle_reply(shared: &Arc<Shared>, thread_id: usize, reply: WorkerReply) {
    match reply {
        WorkerReply::ShutdownAck => {
            trace!("thread {thread_id} acknowledged shutdown");
        }
        WorkerReply::Result(outcome) => {
            let events = outcome.events.clone();

            let quiet = {
                let mut inner = shared.inner.lock().expect("pool lock poisoned");
                if let Some(sender) = inner.in_flight.remove(&thread_id) {
                    let _ = sender.send(outcome);
                } else {
                    warn!("result for thread {thread_id} with no in-flight job recorded");
                }

                if let Some(next) = inner.waiting_jobs.pop_front() {
                    dispatch_to_thread(shared, &mut inner, thread_id, next);
                } else if inner.threads.contains_key(&thread_id) {
                    inner.free_ids.push(thread_id);
                }

                let quiet = inner.no_jobs_running();
                if quiet {
                    for waiter in inner.drain_waiters.drain(..) {
                        let _ = waiter.send(());
                    }
                }
                quiet
            };

            for event in &events {
                shared
                    .broker
                    .notify(event.event_name.as_deref().unwrap_or("missingEventName"), &event.data);
            }
            if quiet {
                shared.broker.notify("noJobsRunning", &Value::Null);
            }
        }
    }
}

fn spawn_sweep(shared: Arc<Shared>) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name(format!("modelpool-sweep-{}", shared.name))
        .spawn(move || {
            while !shared.sweep_stop.load(Ordering::SeqCst) {
                thread::sleep(SWEEP_INTERVAL);
                if shared.sweep_stop.load(Ordering::SeqCst) {
                    break;
                }
                sweep_once(&shared);
            }
        })
        .expect("failed to spawn sweep thread")
}

/// Recover from a lost hand-off notification: pair up at most
/// `min(|freeThreads|, |waitingJobs|)` free Threads with waiting Jobs
/// (§4.2.3). Idempotent: a pool with no pairs to make does nothing.
fn sweep_once(shared: &Arc<Shared>) {
    let mut inner = shared.inner.lock().expect("pool lock poisoned");
    let pairs = inner.free_ids.len().min(inner.waiting_jobs.len());
    for _ in 0..pairs {
        let thread_id = inner.free_ids.pop().expect("checked above");
        let job = inner.waiting_jobs.pop_front().expect("checked above");
        dispatch_to_thread(shared, &mut inner, thread_id, job);
    }
}
