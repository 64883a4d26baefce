//! Minimal process entry point wiring a couple of pools together end to end.
//!
//! Mirrors the shape of the teacher's `src/main.rs` (gather settings, build
//! the runtime, run, report errors with `anyhow`) without reproducing its
//! CLI surface: the HTTP/CLI front end is out of scope (§1), so this exists
//! only to exercise [`modelpool_rt`] the way a real process would.

use anyhow::{Context, Result};
use modelpool_rt::broadcast::BroadcastChannel;
use modelpool_rt::config::RuntimeConfig;
use modelpool_rt::job::JobOutcome;
use modelpool_rt::pool::PoolConfig;
use modelpool_rt::registry::PoolRegistry;
use modelpool_rt::router::{Port, PortDirection, PortEventRouter};
use modelpool_rt::worker::SharedJobRunner;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn order_runner() -> SharedJobRunner {
    Arc::new(|job_name: &str, data| match job_name {
        "addItem" => JobOutcome::ok(data),
        other => JobOutcome::error(format!("unknown job: {other}")),
    })
}

fn main() -> Result<()> {
    env_logger::init();

    let config = RuntimeConfig::from_env();
    log::info!(
        "starting modelpool-rt demo (mesh {})",
        if config.webswitch_enabled { "enabled" } else { "disabled" }
    );

    let registry = PoolRegistry::new();
    registry.register(
        "ORDER",
        PoolConfig {
            min: config.pool_defaults.min,
            max: config.pool_defaults.max,
            queue_tolerance: config.pool_defaults.queue_tolerance,
            ..Default::default()
        },
        order_runner(),
    );

    let order = registry
        .get_thread_pool("ORDER", true)
        .context("ORDER pool was not registered")?;
    let order_pool = registry
        .live_pool("ORDER")
        .context("ORDER pool should be live after preload")?;

    let channels = BroadcastChannel::new();
    let deployment = vec![Port::new("ORDER", "orders", PortDirection::Outbound).producing("orderCreated")];
    let router = PortEventRouter::new("ORDER", order_pool.broker().clone(), channels);
    router.wire(&deployment);

    let outcome = order
        .submit("addItem", json!({"id": 1}))
        .context("failed to submit addItem job")?
        .recv_timeout(Duration::from_secs(2))
        .context("ORDER pool did not reply in time")?;

    log::info!("addItem result: {outcome:?}");
    registry.destroy("ORDER");
    Ok(())
}
