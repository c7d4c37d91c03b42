//! # crossbard
//!
//! Gateway daemon — wires the registry, router, sweeper, and dispatcher
//! together and starts the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbar_core::ShardId;
use crossbar_gateway::config::GatewayConfig;
use crossbar_gateway::registry::ConnectionRegistry;
use crossbar_gateway::server::GatewayServer;
use crossbar_gateway::{run_dispatcher, run_sweeper};
use crossbar_router::{MemoryDirectory, MemoryQueue, PresenceDirectory, Router, ShardQueue};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Crossbar gateway daemon.
#[derive(Parser, Debug)]
#[command(name = "crossbard", about = "Crossbar connection gateway")]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, default_value = "9700")]
    port: u16,

    /// Shard identity to publish (generated fresh when omitted).
    #[arg(long)]
    shard_id: Option<String>,

    /// HMAC secret for connection token verification.
    #[arg(long)]
    auth_secret: String,

    /// Liveness sweep interval in seconds.
    #[arg(long, default_value = "30")]
    heartbeat_interval_secs: u64,

    /// Maximum concurrent WebSocket connections.
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_json);

    let config = GatewayConfig {
        host: args.host,
        port: args.port,
        shard_id: args.shard_id,
        auth_secret: args.auth_secret,
        max_connections: args.max_connections,
        heartbeat_interval_secs: args.heartbeat_interval_secs,
        ..GatewayConfig::default()
    };

    // A restart must publish under a fresh identity, never a recycled one.
    let shard = config
        .shard_id
        .clone()
        .map_or_else(ShardId::generate, ShardId::from);

    // Single-process deployment: directory and queues live in memory. A
    // fleet swaps these for clients of the shared services.
    let directory = PresenceDirectory::new(Arc::new(MemoryDirectory::new()));
    let queue = ShardQueue::new(Arc::new(MemoryQueue::new()));

    let registry = Arc::new(ConnectionRegistry::new(
        shard.clone(),
        directory.clone(),
        config.max_connections,
    ));
    let router = Router::new(directory, queue.clone());

    let sweep_interval = Duration::from_secs(config.heartbeat_interval_secs);
    let dispatch_poll = Duration::from_millis(config.dispatch_poll_ms);
    let bind_addr = format!("{}:{}", config.host, config.port);

    let server = GatewayServer::new(config, registry.clone(), router);
    let shutdown = server.shutdown().clone();

    let sweeper = tokio::spawn(run_sweeper(
        registry.clone(),
        sweep_interval,
        shutdown.token(),
    ));
    let dispatcher = tokio::spawn(run_dispatcher(
        registry,
        queue,
        dispatch_poll,
        shutdown.token(),
    ));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    let addr = listener.local_addr().context("failed to read bound address")?;
    info!(%addr, shard = %shard, "gateway listening");

    let serve_token = shutdown.token();
    let serve = axum::serve(listener, server.router())
        .with_graceful_shutdown(async move { serve_token.cancelled().await });

    tokio::select! {
        result = serve => result.context("server error")?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    shutdown.graceful_shutdown(vec![sweeper, dispatcher], None).await;
    info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Cli {
        let mut argv = vec!["crossbard", "--auth-secret", "s3cret"];
        argv.extend_from_slice(extra);
        Cli::parse_from(argv)
    }

    #[test]
    fn cli_defaults() {
        let cli = parse(&[]);
        assert_eq!(cli.host, "0.0.0.0");
        assert_eq!(cli.port, 9700);
        assert_eq!(cli.shard_id, None);
        assert_eq!(cli.heartbeat_interval_secs, 30);
        assert_eq!(cli.max_connections, 10_000);
        assert!(!cli.log_json);
    }

    #[test]
    fn cli_requires_auth_secret() {
        assert!(Cli::try_parse_from(["crossbard"]).is_err());
    }

    #[test]
    fn cli_custom_shard_id() {
        let cli = parse(&["--shard-id", "gw-east-3"]);
        assert_eq!(cli.shard_id.as_deref(), Some("gw-east-3"));
    }

    #[test]
    fn cli_custom_port_and_interval() {
        let cli = parse(&["--port", "8080", "--heartbeat-interval-secs", "5"]);
        assert_eq!(cli.port, 8080);
        assert_eq!(cli.heartbeat_interval_secs, 5);
    }

    #[test]
    fn missing_shard_id_generates_fresh_identity() {
        let a = ShardId::generate();
        let b = ShardId::generate();
        assert_ne!(a, b);
    }
}
