//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the gateway is running.
    pub status: String,
    /// Shard identity this gateway publishes.
    pub shard: String,
    /// Seconds since the gateway started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, shard: &str, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        shard: shard.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}
