//! Gateway configuration.

use serde::{Deserialize, Serialize};

/// Configuration for one gateway process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Shard identity published to the presence directory. `None` generates
    /// a fresh id at startup; restarts must not inherit a stale identity.
    pub shard_id: Option<String>,
    /// HMAC secret for connection token verification.
    pub auth_secret: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Liveness sweep interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Shard queue poll interval in milliseconds when the queue is idle.
    pub dispatch_poll_ms: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            shard_id: None,
            auth_secret: String::new(),
            max_connections: 10_000,
            heartbeat_interval_secs: 30,
            dispatch_poll_ms: 50,
            max_message_size: 1024 * 1024, // 1 MB
        }
    }
}
