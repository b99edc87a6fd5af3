//! Allocator configuration. One knob: how long cached schema counts stay trusted.

use serde::{Deserialize, Serialize};

/// Env var read by [`AllocatorConfig::from_env`]. Milliseconds.
pub const TTL_ENV: &str = "SHARDPOOL_TTL_MS";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Cached counts older than this are re-queried on the next acquire.
    /// `<= 0` disables age-based expiry; only explicit invalidation applies.
    pub ttl_millis: i64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig { ttl_millis: 0 }
    }
}

impl AllocatorConfig {
    /// Load from env `SHARDPOOL_TTL_MS`, default no age-based expiry. Values that
    /// fail to parse are skipped with a warning.
    pub fn from_env() -> Self {
        let ttl_millis = match std::env::var(TTL_ENV) {
            Ok(raw) => match raw.trim().parse() {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!("{}: not an integer: {}, using default", TTL_ENV, raw);
                    0
                }
            },
            Err(_) => 0,
        };
        AllocatorConfig { ttl_millis }
    }
}
