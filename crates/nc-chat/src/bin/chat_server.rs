//! Chat server
//!
//! Accepts chat clients and relays their lines. Console commands typed on
//! stdin: `kick <name>`, `say <text>`, `list` and `quit`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nc_channel::config::load_config;
use nc_channel::Listener;
use nc_chat::{ChatRoom, ConsoleCommand, ServerConfig};

#[derive(Parser)]
#[command(name = "chat-server")]
#[command(about = "NetChannel chat server")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Tick rate handed to clients (overrides config)
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// Connections allowed per IP address (overrides config)
    #[arg(long)]
    max_per_ip: Option<usize>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => load_config::<ServerConfig>(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Some(tick_rate) = args.tick_rate {
        config.listener.tick_rate = tick_rate;
    }
    if let Some(max) = args.max_per_ip {
        config.max_connections_per_ip = max;
    }

    let room = ChatRoom::new(config.max_connections_per_ip);
    let callback_room = Arc::clone(&room);
    let listener = Listener::bind(config.listener.clone())
        .await
        .with_context(|| format!("Failed to bind {}", config.listener.bind_address))?
        .with_callback(move |channel, event| callback_room.handle_connection(channel, event));

    tracing::info!(
        "Chat server listening on {} (tick rate {})",
        listener.local_addr(),
        config.listener.tick_rate
    );

    let cancel = listener.cancel_token();
    let handle = listener.spawn();

    let (line_tx, mut lines) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = stdin.next_line().await {
            if line_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = cancel.cancelled() => break,
            line = lines.recv(), if stdin_open => {
                let Some(line) = line else {
                    // Detached from a terminal; keep serving
                    stdin_open = false;
                    continue;
                };
                match ConsoleCommand::parse(&line) {
                    Some(ConsoleCommand::Kick(pattern)) => match room.kick(&pattern) {
                        Some(username) => println!("Kicked {}", username),
                        None => println!("No user matches '{}'", pattern),
                    },
                    Some(ConsoleCommand::Say(text)) => room.say(&text),
                    Some(ConsoleCommand::List) => {
                        let members = room.members();
                        println!("{} connected", members.len());
                        for (addr, username) in members {
                            match addr {
                                Some(addr) => println!("  {} ({})", username, addr),
                                None => println!("  {}", username),
                            }
                        }
                    }
                    Some(ConsoleCommand::Quit) => break,
                    None if line.trim().is_empty() => {}
                    None => println!("Commands: kick <name>, say <text>, list, quit"),
                }
            }
        }
    }

    handle.shutdown().await.context("Listener failed")?;
    tracing::info!("Chat server stopped");
    Ok(())
}
