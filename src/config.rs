//! RuntimeConfig — the environment-variable table from spec §6, gathered
//! into one struct at process start.
//!
//! Grounded on the teacher's `src/main.rs` `Arguments`/`Command` clap
//! structs: both exist to gather external settings into one place before
//! anything else runs. File-based configuration loading is an explicit
//! Non-goal (§1), so this reads `std::env::var` directly rather than
//! parsing a config file or wiring a flag parser.

use std::env;

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Process-wide settings read once at startup (§6's configuration table).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Inter-process event-bus topic; default `broadcastChannel`.
    pub topic_broadcast: String,
    /// Enables the distributed-cache subscriber.
    pub distributed_cache_enabled: bool,
    /// Selects mesh uplink over the local event bus.
    pub webswitch_enabled: bool,
    /// Mesh uplink hostname; default `server.webswitch.dev`.
    pub webswitch_server: String,
    /// Defaults applied to a pool when its deployment spec omits a field.
    pub pool_defaults: PoolDefaults,
}

/// Per-pool defaults (§6: `min=1, max=2, queueTolerance=25, preload=false`).
#[derive(Debug, Clone, Copy)]
pub struct PoolDefaults {
    pub min: usize,
    pub max: usize,
    pub queue_tolerance: u32,
    pub preload: bool,
}

impl Default for PoolDefaults {
    fn default() -> Self {
        PoolDefaults {
            min: 1,
            max: 2,
            queue_tolerance: 25,
            preload: false,
        }
    }
}

impl RuntimeConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        RuntimeConfig {
            topic_broadcast: env::var("TOPIC_BROADCAST").unwrap_or_else(|_| "broadcastChannel".to_string()),
            distributed_cache_enabled: env_flag("DISTRIBUTED_CACHE_ENABLED"),
            webswitch_enabled: env_flag("WEBSWITCH_ENABLED"),
            webswitch_server: env::var("WEBSWITCH_SERVER")
                .unwrap_or_else(|_| "server.webswitch.dev".to_string()),
            pool_defaults: PoolDefaults::default(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            topic_broadcast: "broadcastChannel".to_string(),
            distributed_cache_enabled: false,
            webswitch_enabled: false,
            webswitch_server: "server.webswitch.dev".to_string(),
            pool_defaults: PoolDefaults::default(),
        }
    }
}
