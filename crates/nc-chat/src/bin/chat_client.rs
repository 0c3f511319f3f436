//! Chat client
//!
//! Connects to a chat server, logs in and relays stdin lines. Typing
//! `disconnect` leaves the room.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nc_channel::config::load_config;
use nc_chat::{ChatClient, ClientConfig, ExponentialBackoff};

#[derive(Parser)]
#[command(name = "chat-client")]
#[command(about = "NetChannel chat client")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Username (prompted for when absent)
    #[arg(short, long)]
    username: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
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
        Some(path) => load_config::<ClientConfig>(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => ClientConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let (line_tx, mut lines) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = stdin.next_line().await {
            if line_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let username = match args.username.or(config.username.clone()) {
        Some(username) => username,
        None => {
            print!("Username: ");
            std::io::stdout().flush()?;
            lines
                .recv()
                .await
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .context("No username given")?
        }
    };

    let client = ChatClient::new(config.channel.clone(), username, |line| {
        print!("{}", line);
        let _ = std::io::stdout().flush();
    });
    let mut backoff = ExponentialBackoff::from_config(&config.backoff);

    println!("Connecting to {}:{}...", config.host, config.port);
    client
        .connect(&config.host, config.port, &mut backoff, None)
        .await
        .context("Failed to connect")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                client.disconnect().await;
                break;
            }
            _ = client.channel().closed() => {
                if client.should_reconnect() {
                    println!("Connection lost ({}), reconnecting...", client.channel().disconnect_reason());
                    client.reconnect(&mut backoff, None).await.context("Failed to reconnect")?;
                    println!("Reconnected");
                } else {
                    println!("Disconnected: {}", client.channel().disconnect_reason());
                    break;
                }
            }
            line = lines.recv() => {
                let Some(line) = line else {
                    client.disconnect().await;
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "disconnect" {
                    client.disconnect().await;
                    break;
                }
                if let Err(e) = client.say(line) {
                    tracing::warn!("Failed to send line: {}", e);
                }
            }
        }
    }

    Ok(())
}
