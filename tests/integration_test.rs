//! End-to-end scenarios against the public crate API: a scheduler dispatching
//! through a registry, a router wiring two pools together through a
//! broadcast channel, and a mesh uplink caching its address. Plain
//! `#[test]` functions throughout, following this crate's synchronous
//! concurrency model rather than an async test harness.

use modelpool_rt::broadcast::BroadcastChannel;
use modelpool_rt::broker::Broker;
use modelpool_rt::error::PoolError;
use modelpool_rt::job::JobOutcome;
use modelpool_rt::mesh::MeshUplink;
use modelpool_rt::pool::{ClosedPolicy, LifecycleState, PoolConfig, ThreadPool};
use modelpool_rt::registry::PoolRegistry;
use modelpool_rt::router::{Port, PortDirection, PortEventRouter};
use modelpool_rt::worker::SharedJobRunner;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn echo_runner() -> SharedJobRunner {
    Arc::new(|_name: &str, data: Value| JobOutcome::ok(data))
}

// ============================================================================
// S1: simple dispatch
// ============================================================================

#[test]
fn s1_simple_dispatch_through_a_lazy_registry_pool() {
    let registry = PoolRegistry::new();
    registry.register(
        "ORDER",
        PoolConfig { min: 1, max: 2, ..Default::default() },
        echo_runner(),
    );

    let handle = registry.get_thread_pool("order", false).expect("ORDER was registered");
    assert!(handle.status().is_none(), "a lazy pool reports no status before first use");

    let job = handle.submit("addItem", json!({"id": 1})).expect("submit should succeed");
    let outcome = job.recv_timeout(Duration::from_secs(1)).expect("job should resolve");

    assert!(!outcome.is_error());
    assert_eq!(outcome.value, Some(json!({"id": 1})));
    assert_eq!(handle.status().unwrap().jobs_requested, 1);
}

// ============================================================================
// S2: elastic growth under load
// ============================================================================

#[test]
fn s2_elastic_growth_levels_off_at_max_and_then_shrinks_back() {
    let counter = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&counter);
    let runner: SharedJobRunner = Arc::new(move |_name: &str, _data: Value| {
        c.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        JobOutcome::ok(Value::Null)
    });

    let pool = ThreadPool::new(
        "BATCH",
        PoolConfig { min: 1, max: 3, queue_tolerance: 25, ..Default::default() },
        runner,
    );
    pool.start_threads().unwrap();

    let handles: Vec<_> = (0..6).map(|_| pool.submit("work", Value::Null).unwrap()).collect();
    for handle in handles {
        handle.recv_timeout(Duration::from_secs(3)).unwrap();
    }

    let status = pool.status();
    assert!(status.total_threads >= 2, "load should have grown the pool past min");
    assert!(status.total_threads <= 3, "growth never exceeds max");
    assert_eq!(counter.load(Ordering::SeqCst), 6);
}

// ============================================================================
// S3: drain ordering (close before drain, in-flight jobs still resolve)
// ============================================================================

#[test]
fn s3_drain_waits_for_in_flight_jobs_before_reporting_drained() {
    let pool = ThreadPool::new(
        "DRAINING",
        PoolConfig { min: 1, max: 1, ..Default::default() },
        Arc::new(|_name: &str, data: Value| {
            thread::sleep(Duration::from_millis(100));
            JobOutcome::ok(data)
        }),
    );
    pool.start_threads().unwrap();

    assert_eq!(pool.drain(), Err(PoolError::DrainNotClosed), "drain requires closed first");

    let handle = pool.submit("slow", json!(1)).unwrap();
    pool.close();

    pool.drain().expect("drain should succeed once the in-flight job finishes");
    assert_eq!(pool.status().state, LifecycleState::Drained);

    let outcome = handle.recv_timeout(Duration::from_millis(10)).expect("job resolved before drain returned");
    assert!(!outcome.is_error());
}

#[test]
fn s3_submit_while_closed_queues_and_drains_once_reopened() {
    let pool = ThreadPool::new(
        "QUEUEING",
        PoolConfig { closed_policy: ClosedPolicy::QueueWhileClosed, ..Default::default() },
        echo_runner(),
    );
    pool.start_threads().unwrap();
    pool.close();

    let handle = pool.submit("job", json!("queued")).unwrap();
    assert_eq!(pool.status().waiting_jobs, 1);

    pool.open().unwrap();
    let outcome = handle.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(outcome.value, Some(json!("queued")));
}

// ============================================================================
// S4: reload
// ============================================================================

#[test]
fn s4_reload_refreshes_thread_identities_and_keeps_the_pool_usable() {
    let pool = ThreadPool::new("RELOADABLE", PoolConfig::default(), echo_runner());
    pool.start_threads().unwrap();
    let before = pool.thread_created_ats();

    thread::sleep(Duration::from_millis(5));
    pool.reload().expect("reload should complete cleanly");

    assert_eq!(pool.status().reloads, 1);
    assert_eq!(pool.status().state, LifecycleState::Open);
    let after = pool.thread_created_ats();
    assert!(after.iter().all(|a| before.iter().all(|b| a > b)));

    let outcome = pool
        .submit("addItem", json!(42))
        .unwrap()
        .recv_timeout(Duration::from_secs(1))
        .unwrap();
    assert_eq!(outcome.value, Some(json!(42)));
}

#[test]
fn s4_reload_all_reloads_every_live_pool_and_skips_lazy_ones() {
    let registry = PoolRegistry::new();
    registry.register("ORDER", PoolConfig::default(), echo_runner());
    registry.register("PAYMENT", PoolConfig::default(), echo_runner());

    registry.get_thread_pool("order", true);
    // PAYMENT is left lazy and should be skipped by reload_all without panicking.

    registry.reload_all();

    let order = registry.live_pool("ORDER").expect("ORDER should still be live");
    assert_eq!(order.status().reloads, 1);
    assert!(registry.live_pool("PAYMENT").is_none());
}

// ============================================================================
// S5: router local match, deep-copy independence
// ============================================================================

#[test]
fn s5_router_delivers_a_deep_copy_so_mutating_the_source_does_not_affect_the_subscriber() {
    let channels = BroadcastChannel::new();
    let broker_a = Broker::new();
    let broker_b = Broker::new();

    let deployment = vec![
        Port::new("ORDER", "orders", PortDirection::Outbound).producing("orderCreated"),
        Port::new("SHIPPING", "shipments", PortDirection::Inbound).consuming("orderCreated"),
    ];

    let router_a = PortEventRouter::new("ORDER", broker_a.clone(), channels.clone());
    router_a.wire(&deployment);
    let router_b = PortEventRouter::new("SHIPPING", broker_b.clone(), channels.clone());
    router_b.wire(&deployment);

    let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&received);
    broker_b.on("orderCreated", Arc::new(move |data| r.lock().unwrap().push(data.clone())));

    let mut source = json!({"id": 1, "items": ["widget"]});
    broker_a.notify("orderCreated", &source);
    thread::sleep(Duration::from_millis(150));

    // Mutate the caller's copy after publishing; the delivered copy must be unaffected.
    source["items"].as_array_mut().unwrap().push(json!("gadget"));

    let got = received.lock().unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0], json!({"id": 1, "items": ["widget"]}));
}

#[test]
fn s5_an_unmatched_local_producer_routes_to_main_with_its_event_name_preserved() {
    let broker = Broker::new();
    let deployment = vec![Port::new("ORDER", "orders", PortDirection::Outbound).producing("orphanEvent")];

    let router = PortEventRouter::new("ORDER", broker.clone(), BroadcastChannel::new());
    router.wire(&deployment);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    broker.on("to_main", Arc::new(move |data| s.lock().unwrap().push(data.clone())));

    broker.notify("orphanEvent", &json!({"orphan": true}));
    thread::sleep(Duration::from_millis(100));

    let got = seen.lock().unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0]["event_name"], json!("orphanEvent"));
    assert_eq!(got[0]["data"], json!({"orphan": true}));
}

// ============================================================================
// S6: mesh fallback — uplink caches its address and hands publishes off
// without blocking the caller, even while disconnected.
// ============================================================================

#[test]
fn s6_publish_event_does_not_block_the_caller_while_the_mesh_is_unreachable() {
    use modelpool_rt::job::PortEvent;

    // Nothing is listening on this port, so every connection attempt fails
    // and the uplink's IO thread spins on its retry loop in the background.
    let uplink = MeshUplink::new("127.0.0.1:1", Broker::new());

    let started = std::time::Instant::now();
    uplink.publish_event(PortEvent::new("ORDER", "orderCreated", json!({"id": 1})));
    uplink.publish_event(PortEvent::new("ORDER", "orderCreated", json!({"id": 2})));
    assert!(started.elapsed() < Duration::from_millis(100), "publish_event must hand off, not block");

    uplink.shutdown();
}

#[test]
fn s6_reset_address_redirects_future_connection_attempts() {
    let uplink = MeshUplink::new("first.invalid:1", Broker::new());
    uplink.reset_address("second.invalid:1");
    // No direct accessor on the public API beyond publish/shutdown; this
    // exercises that reset + shutdown complete without panicking or hanging,
    // which is as much as a black-box integration test can assert without a
    // live listener on the far end.
    uplink.publish_event(modelpool_rt::job::PortEvent::new("ORDER", "evt", Value::Null));
    uplink.shutdown();
}

#[test]
fn s6_an_unhandled_local_port_reaches_the_mesh_uplink_via_to_main() {
    use std::net::TcpListener;

    // A bare TCP listener stands in for the external mesh: it cannot speak
    // the WebSocket handshake, so the uplink's publish attempt will fail
    // after the TCP connect succeeds and it will retry — what this test
    // verifies is that the router's `to_main` sentinel really does reach
    // the uplink and drive a connection attempt, not the full wire protocol.
    let listener = TcpListener::bind("127.0.0.1:0").expect("binding a loopback listener");
    let addr = listener.local_addr().unwrap();

    let broker = Broker::new();
    let uplink = MeshUplink::new(addr.to_string(), broker.clone());

    let deployment = vec![Port::new("ORDER", "orders", PortDirection::Outbound).producing("orphanEvent")];
    let router = PortEventRouter::new("ORDER", broker.clone(), BroadcastChannel::new());
    router.wire(&deployment);

    let (accepted_tx, accepted_rx) = std::sync::mpsc::channel();
    thread::spawn(move || {
        let _ = accepted_tx.send(listener.accept());
    });

    broker.notify("orphanEvent", &json!({"orphan": true}));

    accepted_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("uplink should have attempted a connection within the timeout")
        .expect("accepted connection should be valid");

    uplink.shutdown();
}

// ============================================================================
// Invariants: destroy, pool-closed rejection, registry cleanup
// ============================================================================

#[test]
fn invariant_destroy_rejects_further_submits_and_removes_the_registry_entry() {
    let registry = PoolRegistry::new();
    registry.register("ORDER", PoolConfig::default(), echo_runner());
    let handle = registry.get_thread_pool("order", true).unwrap();

    registry.destroy("ORDER");

    assert!(registry.get_thread_pool("order", false).is_none());
    assert!(handle.submit("addItem", Value::Null).is_err());
}

#[test]
fn invariant_remove_undeployed_pools_only_touches_pools_missing_from_the_known_list() {
    let registry = PoolRegistry::new();
    registry.register("ORDER", PoolConfig::default(), echo_runner());
    registry.register("PAYMENT", PoolConfig::default(), echo_runner());
    registry.get_thread_pool("order", true);
    registry.get_thread_pool("payment", true);

    registry.remove_undeployed_pools(&["Order".to_string()]);

    assert!(registry.live_pool("ORDER").is_some());
    assert!(registry.live_pool("PAYMENT").is_none());
}

#[test]
fn invariant_reject_closed_policy_fails_fast_instead_of_queueing() {
    let pool = ThreadPool::new(
        "STRICT",
        PoolConfig { closed_policy: ClosedPolicy::RejectWhenClosed, ..Default::default() },
        echo_runner(),
    );
    pool.start_threads().unwrap();
    pool.close();

    assert_eq!(pool.submit("job", Value::Null).unwrap_err(), PoolError::PoolClosed);
    assert_eq!(pool.status().waiting_jobs, 0);
}
