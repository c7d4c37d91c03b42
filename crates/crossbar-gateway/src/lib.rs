//! # crossbar-gateway
//!
//! One shard of the connection fleet: terminates client WebSockets, keeps
//! the presence directory in step with its registry, and drains its own
//! shard queue back onto local sockets.
//!
//! - HTTP endpoints: health check, message submission
//! - WebSocket gateway: token-authenticated upgrade, per-connection write
//!   task, ping/pong liveness sweep with eviction
//! - Queue dispatcher: envelope decode and local fan-out
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod health;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod sweep;

pub use config::GatewayConfig;
pub use connection::{GatewayConnection, TransportFrame};
pub use dispatch::run_dispatcher;
pub use registry::{ConnectionRegistry, RegisterError};
pub use server::{AppState, GatewayServer};
pub use shutdown::ShutdownCoordinator;
pub use sweep::run_sweeper;
