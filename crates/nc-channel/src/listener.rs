//! Accept loop for server channels
//!
//! Every accepted socket gets its own [`Channel`], started with
//! [`Channel::init_from_socket`]. The accept loop owns the registry of live
//! channels, drops the ones whose session has ended and closes the rest on
//! shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ConnectionCallback};
use crate::config::ListenerConfig;
use crate::error::ChannelError;
use crate::types::{ChannelState, ConnectionEvent, ConnectionId};

/// Reason sent to every peer when the listener shuts down
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// TCP listener producing server channels
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ListenerConfig,
    callback: Option<ConnectionCallback>,
    cancel: CancellationToken,
    channel_count: Arc<AtomicUsize>,
}

impl Listener {
    /// Bind to the configured address
    pub async fn bind(config: ListenerConfig) -> Result<Self, ChannelError> {
        let listener = TcpListener::bind(&config.bind_address).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            config,
            callback: None,
            cancel: CancellationToken::new(),
            channel_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Install the lifecycle callback handed to every accepted channel
    ///
    /// Handlers for the new channel are best bound from the
    /// [`ConnectionEvent::ClientConnect`] call, before any message can arrive.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Channel, ConnectionEvent) -> bool + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token that stops the accept loop when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept connections until cancelled, then close every channel
    pub async fn run(self) -> Result<(), ChannelError> {
        tracing::info!("Listening on {}", self.local_addr);

        let mut registry: HashMap<ConnectionId, Channel> = HashMap::new();
        let mut reap = time::interval(self.config.reap_interval);
        reap.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Listener shutting down");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            self.handle_connection(&mut registry, socket, peer_addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                _ = reap.tick() => {}
            }

            reap_closed(&mut registry);
            self.channel_count.store(registry.len(), Ordering::Release);
        }

        let channels: Vec<Channel> = registry.into_values().collect();
        if !channels.is_empty() {
            tracing::info!("Closing {} channels", channels.len());
        }
        join_all(channels.iter().map(|channel| channel.disconnect(SHUTDOWN_REASON))).await;
        self.channel_count.store(0, Ordering::Release);

        Ok(())
    }

    /// Run the accept loop on its own task
    pub fn spawn(self) -> ListenerHandle {
        let cancel = self.cancel.clone();
        let local_addr = self.local_addr;
        let channel_count = Arc::clone(&self.channel_count);
        let task = tokio::spawn(self.run());

        ListenerHandle {
            cancel,
            local_addr,
            channel_count,
            task,
        }
    }

    fn handle_connection(
        &self,
        registry: &mut HashMap<ConnectionId, Channel>,
        socket: TcpStream,
        peer_addr: SocketAddr,
    ) {
        tracing::info!("New connection from {}", peer_addr);

        let channel = Channel::new(self.config.accepted_channel_config());
        match channel.init_from_socket(socket, self.callback.clone()) {
            Ok(()) => {
                registry.insert(channel.id(), channel);
            }
            Err(ChannelError::Rejected) => {}
            Err(e) => {
                tracing::warn!("Failed to start channel for {}: {}", peer_addr, e);
            }
        }
    }
}

/// Drop channels whose session has fully ended
fn reap_closed(registry: &mut HashMap<ConnectionId, Channel>) {
    registry.retain(|id, channel| {
        let alive = channel.is_active_socket() || channel.state() != ChannelState::Idle;
        if !alive {
            tracing::debug!("Reaped {}", id);
        }
        alive
    });
}

/// Handle to a spawned [`Listener`]
pub struct ListenerHandle {
    cancel: CancellationToken,
    local_addr: SocketAddr,
    channel_count: Arc<AtomicUsize>,
    task: JoinHandle<Result<(), ChannelError>>,
}

impl ListenerHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live channels as of the last loop iteration
    pub fn channel_count(&self) -> usize {
        self.channel_count.load(Ordering::Acquire)
    }

    /// Token that stops the accept loop when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting, disconnect every channel and wait for the loop to end
    pub async fn shutdown(self) -> Result<(), ChannelError> {
        self.cancel.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ChannelError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                e,
            ))),
        }
    }
}
