//! parley terminal client
//!
//! Registers with a signaling server, then takes commands on stdin:
//!
//! ```text
//!   /connect <user>        ask the server to introduce you to <user>
//!   /approve <user>        accept a pending request from <user>
//!   /reject <user>         decline a pending request from <user>
//!   /msg <user> <text>     send a message over the direct link
//!   /history <user>        show the conversation with <user>
//!   /close <user>          close the link to <user>
//!   /peers                 list links and pending requests
//!   /quit                  exit
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use parley::config::{default_identity_path, load_or_create_identity};
use parley::{ClientConfig, PeerEvent, PeerManager, SignalingClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// parley: direct encrypted chat, introduced by a signaling server
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// User id to register under
    #[arg(short, long)]
    user: Option<String>,

    /// Signaling server URL (ws://host:port)
    #[arg(short, long)]
    server: Option<String>,

    /// Address for the peer listener
    #[arg(short, long)]
    listen: Option<String>,

    /// Host to advertise to approved peers
    #[arg(long)]
    advertise: Option<String>,

    /// Expected server key; frames not signed by it are dropped
    #[arg(long)]
    server_key: Option<String>,

    /// Path to identity file (default: ~/.parley/identity.key)
    #[arg(short, long)]
    identity: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("parley=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(cli)?;

    let identity_path = config
        .identity_path
        .clone()
        .unwrap_or_else(|| default_identity_path("identity.key"));
    let (identity, created) = load_or_create_identity(&identity_path)?;
    if created {
        println!("Created a new identity at {}", identity_path.display());
    }
    println!("Your key fingerprint: {}", identity.public_key().fingerprint());

    let (signaling_tx, signaling_rx) = mpsc::unbounded_channel();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let manager = PeerManager::bind(&config, identity, signaling_tx, events_tx).await?;

    let signaling = SignalingClient::connect(
        &config.server_url,
        signaling_rx,
        manager.clone(),
        config.server_key()?,
    )
    .await
    .with_context(|| format!("failed to reach {}", config.server_url))?;
    manager.register()?;

    println!("Listening for peers on {}", manager.connection_details());
    println!("Type /help for commands.");

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            print_event(&event);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let closed = signaling.closed();
    tokio::pin!(closed);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !run_command(&manager, line.trim()).await {
                    break;
                }
            }
            _ = &mut closed => {
                println!("Signaling server connection closed.");
                break;
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn build_config(cli: Cli) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::load()?;
    if let Some(user) = cli.user {
        config.user_id = user;
    }
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if let Some(listen) = cli.listen {
        config.peer_listen_addr = listen;
    }
    if let Some(host) = cli.advertise {
        config.advertised_host = Some(host);
    }
    if let Some(key) = cli.server_key {
        config.server_public_key = Some(key);
    }
    if let Some(identity) = cli.identity {
        config.identity_path = Some(identity);
    }
    config.validate()?;
    Ok(config)
}

/// Returns false when the user asked to quit
async fn run_command(manager: &PeerManager, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }

    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let result = match command {
        "/connect" if !rest.is_empty() => manager.request_connection(rest),
        "/approve" if !rest.is_empty() => manager.approve_connection(rest),
        "/reject" if !rest.is_empty() => manager.reject_connection(rest),
        "/msg" => match rest.split_once(' ') {
            Some((user, text)) => manager.send_message(user, text.trim()).await,
            None => {
                println!("Usage: /msg <user> <text>");
                Ok(())
            }
        },
        "/history" if !rest.is_empty() => {
            match manager.history(rest) {
                Some(lines) if lines.is_empty() => println!("(no messages with {rest})"),
                Some(lines) => lines.iter().for_each(|line| println!("{line}")),
                None => println!("No active connection with {rest}"),
            }
            Ok(())
        }
        "/close" if !rest.is_empty() => {
            manager.close_link(rest).await;
            Ok(())
        }
        "/peers" => {
            println!("Connected: {}", manager.connected_peers().join(", "));
            println!("Awaiting your answer: {}", manager.pending_incoming().join(", "));
            Ok(())
        }
        "/quit" => {
            println!("Goodbye!");
            return false;
        }
        _ => {
            println!("Commands: /connect, /approve, /reject, /msg, /history, /close, /peers, /quit");
            Ok(())
        }
    };

    if let Err(e) = result {
        println!("Error: {e}");
    }
    true
}

fn print_event(event: &PeerEvent) {
    match event {
        PeerEvent::ConnectionRequested { user_id } => {
            println!("{user_id} wants to connect. /approve {user_id} or /reject {user_id}")
        }
        PeerEvent::Connected { user_id } => println!("Connected to {user_id}"),
        PeerEvent::MessageReceived { user_id, text } => println!("{user_id}: {text}"),
        PeerEvent::Disconnected { user_id } => println!("{user_id} disconnected"),
        PeerEvent::Rejected { user_id } => println!("{user_id} declined your request"),
        PeerEvent::ServerConfirmation { message, user } => println!("[server] {message} ({user})"),
        PeerEvent::ServerError { message } => println!("[server] error: {message}"),
    }
}
