//! Per-model worker pool and inter-pool event router for a hot-reloadable
//! model runtime.
//!
//! A request resolves to a model name and is handed to
//! [`registry::PoolRegistry::get_thread_pool`], which either dispatches to a
//! free Worker ([`worker`]) or enqueues the Job on a bounded elastic
//! [`pool::ThreadPool`]. A Worker emits domain events through its pool's
//! [`broker::Broker`]; [`router::PortEventRouter`] delivers them locally,
//! posts them to a sibling pool's [`broadcast::BroadcastChannel`], or
//! forwards them to the [`mesh::MeshUplink`] when no local subscriber
//! exists.

pub mod abi;
pub mod broadcast;
pub mod broker;
pub mod config;
pub mod error;
pub mod job;
pub mod mesh;
pub mod pool;
pub mod registry;
pub mod router;
pub mod worker;

#[cfg(test)]
mod tests {
    use crate::job::JobOutcome;
    use crate::pool::{PoolConfig, ThreadPool};
    use crate::worker::SharedJobRunner;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn end_to_end_submit_through_the_public_api() {
        let runner: SharedJobRunner = Arc::new(|_name: &str, data: Value| JobOutcome::ok(data));
        let pool = ThreadPool::new("SMOKE", PoolConfig::default(), runner);
        pool.start_threads().unwrap();

        let handle = pool.submit("ping", json!({"value": 42})).unwrap();
        let outcome = handle.recv_timeout(Duration::from_secs(1)).unwrap();

        assert!(!outcome.is_error());
        assert_eq!(outcome.value, Some(json!({"value": 42})));
    }
}
