//! Sequenced point-to-point message channel
//!
//! A [`Channel`] is a cheap, cloneable handle. While connected, a single
//! dedicated I/O task owns the socket: it reads and reassembles frames,
//! enforces ordering and the handshake, dispatches inbound messages to the
//! bound handlers and writes everything queued with [`Channel::send`].
//! Every other method only touches the queues, atomics and watches shared
//! with that task, so handlers may freely call back into the channel.

mod handlers;
mod pump;

pub use handlers::{
    ConnectionCallback, DisconnectHandler, Intermediate, MessageHandler, ProgressHandler,
    Transmission, TransmissionHandler, TransmissionProgress,
};

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use nc_protocol::{ConnectRequest, Message, ProtocolError, TransmissionHeader, MAX_PROPERTIES_LEN};
use parking_lot::{Mutex, RwLock};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{clamp_tick_rate, ChannelConfig};
use crate::error::ChannelError;
use crate::queue::MessageQueue;
use crate::types::{ChannelRole, ChannelState, ConnectionEvent, ConnectionId, DisconnectFlags};

use handlers::Handlers;
use pump::Pump;

/// Size of the chunks a transmission payload is streamed in
pub const TRANSFER_CHUNK: usize = 1500;

/// Reason reported when a session ends without an explicit one
pub const DEFAULT_DISCONNECT_REASON: &str = "Connection lost";

/// Handle to a sequenced message channel
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    config: ChannelConfig,
    role: Mutex<ChannelRole>,
    tick_rate: AtomicU32,

    state: watch::Sender<ChannelState>,
    /// Next outbound sequence number, published after every frame
    outgoing: watch::Sender<i32>,
    /// Last accepted inbound sequence number
    incoming: AtomicI32,
    transmission_seq: AtomicU32,

    flags: AtomicU32,
    disconnect_reason: Mutex<String>,
    handshake_validated: AtomicBool,
    active_transmission: AtomicBool,
    force_flush: AtomicBool,
    flush_on_close: AtomicBool,

    send_queue: MessageQueue,
    recv_queue: MessageQueue,
    wake: Notify,

    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,

    reconnect_target: Mutex<Option<(String, u16)>>,
    peer_addr: Mutex<Option<SocketAddr>>,
    handlers: RwLock<Handlers>,
}

impl Channel {
    /// Create an idle channel
    pub fn new(config: ChannelConfig) -> Self {
        let tick_rate = config.effective_tick_rate();
        let (state, _) = watch::channel(ChannelState::Idle);
        let (outgoing, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::next(),
                config,
                role: Mutex::new(ChannelRole::Client),
                tick_rate: AtomicU32::new(tick_rate),
                state,
                outgoing,
                incoming: AtomicI32::new(0),
                transmission_seq: AtomicU32::new(0),
                flags: AtomicU32::new(0),
                disconnect_reason: Mutex::new(DEFAULT_DISCONNECT_REASON.to_string()),
                handshake_validated: AtomicBool::new(false),
                active_transmission: AtomicBool::new(false),
                force_flush: AtomicBool::new(false),
                flush_on_close: AtomicBool::new(false),
                send_queue: MessageQueue::new(),
                recv_queue: MessageQueue::new(),
                wake: Notify::new(),
                cancel: Mutex::new(CancellationToken::new()),
                task: Mutex::new(None),
                reconnect_target: Mutex::new(None),
                peer_addr: Mutex::new(None),
                handlers: RwLock::new(Handlers::default()),
            }),
        }
    }

    // ---- Lifecycle ----

    /// Dial `host:port`, start the I/O task and send the connect request
    ///
    /// Returns once the request has been written. The channel becomes
    /// active when the server's acknowledgement arrives.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), ChannelError> {
        self.begin_session(ChannelRole::Client)?;

        let stream = match self.open(host, port).await {
            Ok(stream) => stream,
            Err(e) => {
                self.inner.state.send_replace(ChannelState::Idle);
                return Err(e);
            }
        };

        *self.inner.reconnect_target.lock() = Some((host.to_string(), port));
        *self.inner.peer_addr.lock() = stream.peer_addr().ok();
        tracing::info!("Connected to {}:{}", host, port);

        self.spawn_pump(stream);
        self.send(Message::ConnectRequest(ConnectRequest::current()));
        self.transmit().await;

        Ok(())
    }

    async fn open(&self, host: &str, port: u16) -> Result<TcpStream, ChannelError> {
        let addr = lookup_host((host, port))
            .await
            .map_err(|e| ChannelError::Resolve {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| ChannelError::Resolve {
                host: host.to_string(),
                reason: "no addresses found".to_string(),
            })?;

        let stream = time::timeout(self.inner.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ChannelError::ConnectTimeout(addr))?
            .map_err(|source| ChannelError::Connect { addr, source })?;
        stream.set_nodelay(true)?;

        Ok(stream)
    }

    /// Adopt an accepted socket as the server side of a session
    ///
    /// `callback` is consulted with [`ConnectionEvent::ClientConnect`] before
    /// anything is started and rejects the peer by returning `false`. It is
    /// kept and called again with [`ConnectionEvent::ClientDisconnect`] when
    /// the session ends.
    pub fn init_from_socket(
        &self,
        stream: TcpStream,
        callback: Option<ConnectionCallback>,
    ) -> Result<(), ChannelError> {
        self.begin_session(ChannelRole::Server)?;

        let peer_addr = match stream
            .set_nodelay(true)
            .and_then(|_| stream.peer_addr())
        {
            Ok(addr) => addr,
            Err(e) => {
                self.inner.state.send_replace(ChannelState::Idle);
                return Err(e.into());
            }
        };
        *self.inner.peer_addr.lock() = Some(peer_addr);
        self.inner.handlers.write().connection = callback.clone();

        // Queued first so a disconnect requested by the callback follows it
        self.inner.send_queue.add(Message::ConnectAck {
            tick_rate: self.tick_rate() as i32,
        });

        if let Some(callback) = callback {
            if !callback(self, ConnectionEvent::ClientConnect) {
                tracing::info!("Connection from {} rejected", peer_addr);
                self.inner.send_queue.release();
                self.inner.state.send_replace(ChannelState::Idle);
                return Err(ChannelError::Rejected);
            }
        }

        self.spawn_pump(stream);
        self.inner.wake.notify_one();

        Ok(())
    }

    /// Reset per-session state and claim the channel for a new session
    fn begin_session(&self, role: ChannelRole) -> Result<(), ChannelError> {
        let mut claimed = false;
        self.inner.state.send_if_modified(|state| {
            if *state == ChannelState::Idle {
                *state = ChannelState::Connecting;
                claimed = true;
            }
            claimed
        });
        if !claimed {
            return Err(ChannelError::AlreadyConnected);
        }

        *self.inner.role.lock() = role;
        self.inner.flags.store(0, Ordering::Release);
        *self.inner.disconnect_reason.lock() = DEFAULT_DISCONNECT_REASON.to_string();
        self.inner
            .tick_rate
            .store(self.inner.config.effective_tick_rate(), Ordering::Release);
        self.reset_session_counters();

        let dropped = self.inner.send_queue.len();
        if dropped > 0 {
            tracing::debug!("Discarding {} messages queued while disconnected", dropped);
        }
        self.inner.send_queue.release();
        self.inner.recv_queue.release();

        *self.inner.cancel.lock() = CancellationToken::new();
        Ok(())
    }

    fn spawn_pump(&self, stream: TcpStream) {
        let cancel = self.inner.cancel.lock().clone();
        let span = tracing::info_span!("channel", id = %self.id(), role = %self.role());

        self.inner.state.send_replace(ChannelState::Handshaking);
        let pump = Pump::new(self.clone(), stream, cancel);
        let task = tokio::spawn(pump.run().instrument(span));
        *self.inner.task.lock() = Some(task);
    }

    fn reset_session_counters(&self) {
        self.inner.incoming.store(0, Ordering::Release);
        self.inner.outgoing.send_replace(0);
        self.inner.handshake_validated.store(false, Ordering::Release);
        self.inner.active_transmission.store(false, Ordering::Release);
        self.inner.force_flush.store(false, Ordering::Release);
        self.inner.flush_on_close.store(false, Ordering::Release);
    }

    /// Return to `Idle` after the I/O task is gone
    fn finish_session(&self) {
        self.inner.send_queue.release();
        self.inner.recv_queue.release();
        self.reset_session_counters();
        self.inner.state.send_replace(ChannelState::Idle);
    }

    /// Ask the I/O task to send a Disconnect and stop
    ///
    /// Does not wait; safe to call from a handler running on the I/O task.
    pub fn request_disconnect(&self, reason: &str) {
        if matches!(self.state(), ChannelState::Idle | ChannelState::Closing) {
            return;
        }

        let message = Message::disconnect(reason);
        if let Message::Disconnect { reason } = &message {
            *self.inner.disconnect_reason.lock() = reason.clone();
        }
        tracing::info!("Disconnecting: {}", reason);

        self.inner.send_queue.add(message);
        self.inner.flush_on_close.store(true, Ordering::Release);
        self.inner.cancel.lock().cancel();
    }

    /// Send a Disconnect with `reason` and close the session
    pub async fn disconnect(&self, reason: &str) {
        self.request_disconnect(reason);
        self.close_connection().await;
    }

    /// Stop the I/O task and wait for it to finish tearing down
    ///
    /// Idempotent. If the task does not stop within the configured close
    /// timeout it is logged and detached, never aborted.
    pub async fn close_connection(&self) {
        let close_timeout = self.inner.config.close_timeout;
        self.inner.cancel.lock().cancel();

        let task = self.inner.task.lock().take();
        let Some(task) = task else {
            // Someone else is joining the task, or there never was one
            let _ = time::timeout(close_timeout, self.closed()).await;
            return;
        };

        match time::timeout(close_timeout, task).await {
            Ok(Ok(())) => tracing::debug!("I/O task stopped"),
            Ok(Err(e)) => {
                tracing::error!("I/O task failed: {}", e);
                self.finish_session();
            }
            Err(_) => {
                tracing::error!(
                    "I/O task for {} did not stop within {:?}; detaching it",
                    self.id(),
                    close_timeout
                );
            }
        }
    }

    /// Reconnect a client channel to its last target
    ///
    /// Does nothing if the channel is still connected.
    pub async fn reconnect(&self) -> Result<(), ChannelError> {
        if self.is_connected() {
            return Ok(());
        }
        if self.role() != ChannelRole::Client {
            return Err(ChannelError::NotReconnectable);
        }
        let (host, port) = self
            .inner
            .reconnect_target
            .lock()
            .clone()
            .ok_or(ChannelError::NotReconnectable)?;

        self.close_connection().await;
        tracing::info!("Reconnecting to {}:{}", host, port);
        self.connect(&host, port).await
    }

    /// Wait until the channel is idle
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|state| *state == ChannelState::Idle).await;
    }

    // ---- Sending ----

    /// Queue a message and wake the I/O task
    pub fn send(&self, message: Message) {
        self.inner.send_queue.add(message);
        self.inner.wake.notify_one();
    }

    /// Queue an application payload
    pub fn send_payload(&self, payload: impl Into<Bytes>) {
        self.send(Message::handler(payload));
    }

    /// Queue a bulk payload, returning its transmission id
    ///
    /// The payload is streamed after its header frame in
    /// [`TRANSFER_CHUNK`]-sized pieces. Empty payloads are ignored.
    pub fn send_data(
        &self,
        data: impl Into<Bytes>,
        properties: impl Into<Bytes>,
    ) -> Result<Option<u32>, ChannelError> {
        let data = data.into();
        let properties = properties.into();

        if data.is_empty() {
            tracing::debug!("Ignoring empty transmission");
            return Ok(None);
        }
        if properties.len() > MAX_PROPERTIES_LEN {
            return Err(ProtocolError::CapacityExceeded {
                needed: properties.len(),
                available: MAX_PROPERTIES_LEN,
            }
            .into());
        }
        let total_len = u32::try_from(data.len()).map_err(|_| ChannelError::TransmissionTooLarge {
            size: data.len(),
            max: u32::MAX as usize,
        })?;

        let id = self.inner.transmission_seq.fetch_add(1, Ordering::AcqRel);
        self.send(Message::Transmission {
            header: TransmissionHeader {
                id,
                total_len,
                properties,
            },
            data,
        });

        Ok(Some(id))
    }

    /// Force a flush and wait until at least one frame has gone out
    ///
    /// A Ping is sent if nothing is queued. Returns early if the channel is
    /// or becomes disconnected. Must not be awaited from a handler.
    pub async fn transmit(&self) {
        let mut outgoing = self.inner.outgoing.subscribe();
        let mut state = self.inner.state.subscribe();
        let start = *outgoing.borrow_and_update();
        state.borrow_and_update();

        self.inner.force_flush.store(true, Ordering::Release);
        self.inner.wake.notify_one();

        loop {
            if *outgoing.borrow() != start || !state.borrow().is_connected() {
                return;
            }
            tokio::select! {
                changed = outgoing.changed() => if changed.is_err() { return },
                changed = state.changed() => if changed.is_err() { return },
            }
        }
    }

    // ---- Handlers ----

    /// Bind the handler for inbound application messages
    pub fn set_message_handler<F>(&self, handler: F)
    where
        F: Fn(&Channel, Bytes) + Send + Sync + 'static,
    {
        self.inner.handlers.write().message = Some(Arc::new(handler));
    }

    /// Bind the handler for completed inbound transmissions
    pub fn set_transmission_handler<F>(&self, handler: F)
    where
        F: Fn(&Channel, Transmission) + Send + Sync + 'static,
    {
        self.inner.handlers.write().transmission = Some(Arc::new(handler));
    }

    /// Bind the handler for inbound transmission progress
    pub fn set_progress_handler<F>(&self, handler: F)
    where
        F: Fn(&Channel, &TransmissionProgress<'_>) + Send + Sync + 'static,
    {
        self.inner.handlers.write().progress = Some(Arc::new(handler));
    }

    /// Bind the handler for peer-initiated disconnects
    pub fn set_disconnect_handler<F>(&self, handler: F)
    where
        F: Fn(&Channel, &str) + Send + Sync + 'static,
    {
        self.inner.handlers.write().disconnect = Some(Arc::new(handler));
    }

    /// Install a body transform on both directions
    pub fn set_intermediate<I>(&self, intermediate: I)
    where
        I: Intermediate + 'static,
    {
        self.inner.handlers.write().intermediate = Some(Arc::new(intermediate));
    }

    /// Remove the body transform
    pub fn clear_intermediate(&self) {
        self.inner.handlers.write().intermediate = None;
    }

    fn handler<T>(&self, pick: impl FnOnce(&Handlers) -> Option<T>) -> Option<T> {
        pick(&self.inner.handlers.read())
    }

    // ---- Introspection ----

    /// Process-unique id of this channel
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Configuration the channel was built with
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Role of the current or last session
    pub fn role(&self) -> ChannelRole {
        *self.inner.role.lock()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    /// Whether a socket is open
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Whether the I/O task is writing
    pub fn is_sending(&self) -> bool {
        self.state() == ChannelState::Sending
    }

    /// Whether the I/O task is consuming inbound data
    pub fn is_receiving(&self) -> bool {
        self.state() == ChannelState::Receiving
    }

    /// Whether an I/O task is alive for this channel
    pub fn is_active_socket(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    /// Whether a transmission payload is being streamed in either direction
    pub fn is_active_transmission(&self) -> bool {
        self.inner.active_transmission.load(Ordering::Acquire)
    }

    /// Whether the handshake has completed
    pub fn is_handshake_validated(&self) -> bool {
        self.inner.handshake_validated.load(Ordering::Acquire)
    }

    /// Why the last session ended
    pub fn flags(&self) -> DisconnectFlags {
        DisconnectFlags::from_bits_truncate(self.inner.flags.load(Ordering::Acquire))
    }

    /// Reason attached to the last disconnect
    pub fn disconnect_reason(&self) -> String {
        self.inner.disconnect_reason.lock().clone()
    }

    /// Address of the peer of the current or last session
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.inner.peer_addr.lock()
    }

    /// Sequence number the next outbound frame will carry
    pub fn outgoing_sequence(&self) -> i32 {
        *self.inner.outgoing.borrow()
    }

    /// Last accepted inbound sequence number
    pub fn incoming_sequence(&self) -> i32 {
        self.inner.incoming.load(Ordering::Acquire)
    }

    /// Id the next transmission will get
    pub fn transmission_sequence(&self) -> u32 {
        self.inner.transmission_seq.load(Ordering::Acquire)
    }

    /// Messages waiting for the I/O task
    pub fn pending_messages(&self) -> usize {
        self.inner.send_queue.len()
    }

    /// Ticks per second of the I/O task
    pub fn tick_rate(&self) -> u32 {
        self.inner.tick_rate.load(Ordering::Acquire)
    }

    /// Change the tick rate, clamped to the supported range
    pub fn set_tick_rate(&self, rate: i32) {
        self.inner
            .tick_rate
            .store(clamp_tick_rate(rate), Ordering::Release);
    }

    // ---- Shared with the I/O task ----

    fn raise_flags(&self, flags: DisconnectFlags) {
        self.inner.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    fn set_disconnect_reason(&self, reason: impl Into<String>) {
        *self.inner.disconnect_reason.lock() = reason.into();
    }

    /// Mark the I/O task busy without leaving the connected states
    fn set_activity(&self, activity: ChannelState) {
        self.inner.state.send_if_modified(|state| {
            if state.is_connected() && *state != activity {
                *state = activity;
                true
            } else {
                false
            }
        });
    }

    /// Return to `Active` or `Handshaking` after a burst of I/O
    fn settle_activity(&self) {
        let settled = if self.is_handshake_validated() {
            ChannelState::Active
        } else {
            ChannelState::Handshaking
        };
        self.set_activity(settled);
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("role", &self.role())
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}
