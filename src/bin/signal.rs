//! parley signaling server
//!
//! Accepts WebSocket connections from parley clients, binds each to the
//! user id it registers, and relays connection requests and approvals.
//! Chat traffic never passes through it.
//!
//! Usage:
//!   parley-signal [--listen 0.0.0.0:8025] [--identity ~/.parley/server.key]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use parley::config::load_or_create_identity;
use parley::{Identity, ServerConfig, SignalingServer};
use tokio::net::TcpListener;
use tracing::info;

/// parley signaling server
#[derive(Parser)]
#[command(name = "parley-signal")]
#[command(about = "Rendezvous server for parley peer connections")]
struct Args {
    /// Address to listen on
    #[arg(short, long)]
    listen: Option<String>,

    /// Server identity file; created if missing. Without it a fresh key is used per run.
    #[arg(short, long)]
    identity: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("parley=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load()?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(identity) = args.identity {
        config.identity_path = Some(identity);
    }
    config.validate()?;

    let identity = match &config.identity_path {
        Some(path) => load_or_create_identity(path)?.0,
        None => Identity::generate(),
    };

    let listener = TcpListener::bind(config.listen_addr.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("parley signaling server listening on ws://{}", config.listen_addr);
    info!("server key (pin with PARLEY_SERVER_KEY): {}", identity.public_key());

    let server = Arc::new(SignalingServer::new(identity));

    tokio::select! {
        _ = parley::signaling::serve(listener, server) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}
