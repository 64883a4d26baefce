//! PoolRegistry (C3) — process-wide directory of ThreadPools (spec §4.3).
//!
//! Grounded on the teacher's top-level orchestration style (settings struct
//! in, `ThreadPool::new` out, seen in `src/stages/build/cmd/cmd.rs`),
//! generalized from a single ad hoc pool stood up by a CLI command into a
//! name-keyed directory of many pools, each independently lazy, reloadable,
//! and destroyable. The lazy-façade variant is the "Design Notes" pattern
//! from spec §9.

use crate::broker::Handler;
use crate::error::PoolError;
use crate::job::JobHandle;
use crate::pool::{PoolConfig, ThreadPool};
use crate::worker::SharedJobRunner;
use log::{info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

/// One registry entry: either a not-yet-materialized pool (holds just
/// enough to build one on first use) or a live one.
enum Entry {
    Lazy {
        config: PoolConfig,
        runner: SharedJobRunner,
    },
    Live(ThreadPool),
}

/// A thin handle a caller gets back from [`PoolRegistry::get_thread_pool`]
/// when `preload = false`: it exposes only `submit` and `status`, and
/// creates the real pool on first `submit`, per §4.3 / §9's lazy façade.
pub struct PoolHandle {
    name: String,
    registry: PoolRegistry,
}

impl PoolHandle {
    pub fn submit(&self, job_name: impl Into<String>, data: Value) -> Result<JobHandle, PoolError> {
        let pool = self
            .registry
            .materialize(&self.name)
            .ok_or(PoolError::PoolDestroyed)?;
        pool.submit(job_name, data)
    }

    /// `None` if the pool has never been materialized yet (no Threads have
    /// ever run, so there is nothing meaningful to report).
    pub fn status(&self) -> Option<crate::pool::PoolStatus> {
        self.registry.peek_status(&self.name)
    }
}

/// Process-wide directory mapping `upper(modelName) -> ThreadPool`,
/// insertion-order irrelevant (§3).
#[derive(Clone, Default)]
pub struct PoolRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        PoolRegistry::default()
    }

    /// Register a model's pool configuration under its upper-cased name,
    /// without starting any Threads yet. `get_thread_pool(preload=true)`
    /// or the first `submit` on a [`PoolHandle`] brings it up.
    pub fn register(&self, name: impl Into<String>, config: PoolConfig, runner: SharedJobRunner) {
        let key = name.into().to_ascii_uppercase();
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        entries.insert(key, Entry::Lazy { config, runner });
    }

    /// `getThreadPool(name, {preload})` (§4.3): returns the live pool
    /// directly when `preload = true` (starting `min` Threads eagerly), or
    /// a lazy façade otherwise — prevents startup-time fan-out when most
    /// models are cold.
    pub fn get_thread_pool(&self, name: &str, preload: bool) -> Option<PoolHandle> {
        let key = name.to_ascii_uppercase();
        {
            let entries = self.entries.lock().expect("registry lock poisoned");
            entries.get(&key)?;
        }
        if preload {
            self.materialize(&key);
        }
        Some(PoolHandle {
            name: key,
            registry: self.clone(),
        })
    }

    /// The live [`ThreadPool`] behind `name`, for callers that need direct
    /// access beyond the `submit`/`status` façade — most notably
    /// [`crate::router::PortEventRouter`], which wires itself to a pool's
    /// [`crate::broker::Broker`] directly. Returns `None` for a pool that is
    /// still lazy or not registered; wiring a router only makes sense once a
    /// pool has Threads to emit events from.
    pub fn live_pool(&self, name: &str) -> Option<ThreadPool> {
        let key = name.to_ascii_uppercase();
        let entries = self.entries.lock().expect("registry lock poisoned");
        match entries.get(&key)? {
            Entry::Live(pool) => Some(pool.clone()),
            Entry::Lazy { .. } => None,
        }
    }

    /// Resolve a lazy entry into a live, started pool on first use. Cheap to
    /// call repeatedly: a pool already live is returned as-is. Returns `None`
    /// if `key` was removed from the registry (by [`PoolRegistry::destroy`])
    /// between [`PoolRegistry::get_thread_pool`] handing out a [`PoolHandle`]
    /// and this call — the §9 "`submit` races `destroy`" open question.
    fn materialize(&self, key: &str) -> Option<ThreadPool> {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        let entry = entries.remove(key)?;
        let pool = match entry {
            Entry::Live(pool) => pool,
            Entry::Lazy { config, runner } => {
                let pool = ThreadPool::new(key.to_string(), config, runner);
                if let Err(err) = pool.start_threads() {
                    warn!("pool {key} failed to start on first use: {err}");
                }
                pool
            }
        };
        entries.insert(key.to_string(), Entry::Live(pool.clone()));
        Some(pool)
    }

    fn peek_status(&self, key: &str) -> Option<crate::pool::PoolStatus> {
        let entries = self.entries.lock().expect("registry lock poisoned");
        match entries.get(key)? {
            Entry::Live(pool) => Some(pool.status()),
            Entry::Lazy { .. } => None,
        }
    }

    /// Reload every live pool in parallel; lazy (never-materialized) pools
    /// are skipped since they have no Threads to drain. After all reloads
    /// complete, call [`PoolRegistry::remove_undeployed_pools`] (§4.3).
    pub fn reload_all(&self) {
        let live: Vec<ThreadPool> = {
            let entries = self.entries.lock().expect("registry lock poisoned");
            entries
                .values()
                .filter_map(|e| match e {
                    Entry::Live(pool) => Some(pool.clone()),
                    Entry::Lazy { .. } => None,
                })
                .collect()
        };

        let handles: Vec<_> = live
            .into_iter()
            .map(|pool| {
                thread::spawn(move || {
                    if let Err(err) = pool.reload() {
                        warn!("pool {} failed to reload: {err}", pool.name());
                    }
                })
            })
            .collect();

        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Destroy every registered pool whose model name is not in
    /// `known_models` (§4.3: called after `reloadAll`).
    pub fn remove_undeployed_pools(&self, known_models: &[String]) {
        let known: Vec<String> = known_models.iter().map(|m| m.to_ascii_uppercase()).collect();
        let stale: Vec<String> = {
            let entries = self.entries.lock().expect("registry lock poisoned");
            entries.keys().filter(|k| !known.contains(k)).cloned().collect()
        };
        for name in stale {
            self.destroy(&name);
        }
    }

    /// `destroy(name)` = `close; drain; stopThreads; delete entry` (§4.3).
    pub fn destroy(&self, name: &str) {
        let key = name.to_ascii_uppercase();
        let entry = {
            let mut entries = self.entries.lock().expect("registry lock poisoned");
            entries.remove(&key)
        };
        match entry {
            Some(Entry::Live(pool)) => {
                pool.destroy();
                info!("pool {key} destroyed");
            }
            Some(Entry::Lazy { .. }) => {
                info!("pool {key} removed before it was ever started");
            }
            None => {}
        }
    }

    /// `listen(pattern, eventName, cb)` (§4.3): attach `cb` to one pool
    /// (case-insensitive match) or all pools when `pattern == "*"`. Applies
    /// only to pools already live; a lazy pool that later materializes will
    /// not retroactively receive handlers attached before it existed — that
    /// ordering dependency belongs to the caller.
    pub fn listen(&self, pattern: &str, event_name: impl Into<String>, handler: Handler) {
        let event_name = event_name.into();
        let entries = self.entries.lock().expect("registry lock poisoned");
        if pattern == "*" {
            for entry in entries.values() {
                if let Entry::Live(pool) = entry {
                    pool.on(event_name.clone(), Arc::clone(&handler));
                }
            }
            return;
        }
        let key = pattern.to_ascii_uppercase();
        if let Some(Entry::Live(pool)) = entries.get(&key) {
            pool.on(event_name, handler);
        }
    }
}
