//! The per-session I/O task
//!
//! The task is the only owner of the socket, the carry-over buffer and the
//! outbound sequence counter. It wakes on every tick, on flush requests and
//! whenever the socket turns readable, and always finishes by tearing the
//! session down.

use std::io;
use std::sync::atomic::Ordering;

use bytes::{Bytes, BytesMut};
use nc_protocol::{
    Frame, FrameCodec, Message, MessageType, OutboundFrame, TransmissionHeader, HEADER_SIZE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;

use super::handlers::{Transmission, TransmissionProgress};
use super::{Channel, TRANSFER_CHUNK};
use crate::config::tick_interval;
use crate::error::ChannelError;
use crate::sequence::Sequencer;
use crate::types::{ChannelRole, ChannelState, ConnectionEvent, DisconnectFlags};

/// Spare capacity reserved in the carry-over buffer before each read
const READ_RESERVE: usize = 8 * 1024;

enum Wake {
    Cancelled,
    Flush,
    Readable,
    Tick,
    Failed(io::Error),
}

pub(super) struct Pump {
    channel: Channel,
    stream: TcpStream,
    cancel: CancellationToken,
    codec: FrameCodec,
    /// Bytes read but not yet forming a complete frame
    carry: BytesMut,
    sequencer: Sequencer,
    /// Sequence number of the next outbound frame
    outgoing: i32,
    /// Ticks since the last outbound batch
    keepalive: u32,
}

fn ticker(tick_rate: u32) -> Interval {
    let mut interval = time::interval(tick_interval(tick_rate));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl Pump {
    pub(super) fn new(channel: Channel, stream: TcpStream, cancel: CancellationToken) -> Self {
        Self {
            channel,
            stream,
            cancel,
            codec: FrameCodec::new(),
            carry: BytesMut::with_capacity(READ_RESERVE),
            sequencer: Sequencer::new(),
            outgoing: 0,
            keepalive: 0,
        }
    }

    pub(super) async fn run(mut self) {
        tracing::debug!("I/O task started");

        let cancel = self.cancel.clone();
        let channel = self.channel.clone();
        let mut tick_rate = channel.tick_rate();
        let mut ticks = ticker(tick_rate);

        loop {
            let wake = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wake::Cancelled,
                _ = channel.inner.wake.notified() => Wake::Flush,
                ready = self.stream.readable() => match ready {
                    Ok(()) => Wake::Readable,
                    Err(e) => Wake::Failed(e),
                },
                _ = ticks.tick() => Wake::Tick,
            };

            let result = match wake {
                Wake::Cancelled => {
                    if channel.inner.flush_on_close.swap(false, Ordering::AcqRel) {
                        if let Err(e) = self.process_outgoing(false).await {
                            tracing::debug!("Final flush failed: {}", e);
                        }
                    }
                    break;
                }
                Wake::Failed(e) => Err(e.into()),
                Wake::Flush => self.process_socket(true).await,
                Wake::Readable => self.process_socket(false).await,
                Wake::Tick => {
                    self.keepalive = self.keepalive.saturating_add(1);
                    self.process_socket(false).await
                }
            };

            if let Err(e) = result {
                self.fail(e);
                break;
            }

            let current = channel.tick_rate();
            if current != tick_rate {
                tracing::debug!("Tick rate changed from {} to {}", tick_rate, current);
                tick_rate = current;
                ticks = ticker(tick_rate);
            }
        }

        self.teardown().await;
    }

    /// One pass over the socket
    ///
    /// Outbound work is skipped on a pass that consumed inbound frames unless
    /// a flush was requested.
    async fn process_socket(&mut self, flush: bool) -> Result<(), ChannelError> {
        let consumed = self.process_incoming().await?;
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        if !consumed || flush {
            let force_ping = self.channel.inner.force_flush.swap(false, Ordering::AcqRel);
            self.process_outgoing(force_ping).await?;
        }
        Ok(())
    }

    // ---- Inbound ----

    /// Read what is available, queue every complete frame and dispatch
    ///
    /// Returns whether at least one frame was consumed.
    async fn process_incoming(&mut self) -> Result<bool, ChannelError> {
        self.carry.reserve(READ_RESERVE);
        match self.stream.try_read_buf(&mut self.carry) {
            Ok(0) => {
                return Err(ChannelError::ConnectionLost(
                    "connection closed by peer".to_string(),
                ))
            }
            Ok(read) => tracing::trace!("Read {} bytes ({} buffered)", read, self.carry.len()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        self.channel.set_activity(ChannelState::Receiving);

        let mut consumed = false;
        while let Some(frame) = self.codec.decode(&mut self.carry)? {
            let sequence = frame.header.sequence;
            self.sequencer.accept(sequence)?;
            self.channel.inner.incoming.store(sequence, Ordering::Release);
            consumed = true;

            let Some(message) = self.admit(frame)? else {
                continue;
            };
            let message = match message {
                Message::Transmission { header, .. } => self.receive_transmission(header).await?,
                other => other,
            };
            self.channel.inner.recv_queue.add(message);
        }

        self.channel.settle_activity();
        self.dispatch();

        Ok(consumed)
    }

    /// Enforce handshake ordering and decode the frame body
    ///
    /// Connect requests are consumed here and never reach the queue.
    fn admit(&mut self, frame: Frame) -> Result<Option<Message>, ChannelError> {
        let message_type = frame.message_type()?;
        let role = self.channel.role();
        let validated = self.channel.is_handshake_validated();

        match (role, message_type) {
            (ChannelRole::Server, MessageType::ConnectRequest) => {}
            (ChannelRole::Server, MessageType::ConnectAck)
            | (ChannelRole::Client, MessageType::ConnectRequest) => {
                return Err(ChannelError::UnexpectedMessage {
                    message: message_type.name(),
                    role,
                });
            }
            (ChannelRole::Server, _) if !validated => {
                return Err(ChannelError::Handshake(format!(
                    "{} message before connect request",
                    message_type.name()
                )));
            }
            _ => {}
        }

        let body = match self.channel.handler(|h| h.intermediate.clone()) {
            Some(intermediate) => {
                let mut body = BytesMut::from(&frame.body[..]);
                intermediate.incoming(&mut body);
                body.freeze()
            }
            None => frame.body,
        };
        let message = Message::deserialize(message_type, &body)?;

        if let Message::ConnectRequest(request) = message {
            if validated {
                tracing::warn!("Ignoring repeated connect request");
                return Ok(None);
            }
            if !request.is_valid() {
                return Err(ChannelError::Handshake(format!(
                    "protocol mismatch (header {:#x}, uid {:#x})",
                    request.protocol_header, request.protocol_uid
                )));
            }
            self.channel
                .inner
                .handshake_validated
                .store(true, Ordering::Release);
            tracing::info!("Handshake validated");
            return Ok(None);
        }

        Ok(Some(message))
    }

    async fn receive_transmission(
        &mut self,
        header: TransmissionHeader,
    ) -> Result<Message, ChannelError> {
        let total = header.total_len as usize;
        let max = self.channel.inner.config.max_transmission_len;
        if total > max {
            return Err(ChannelError::TransmissionTooLarge { size: total, max });
        }

        self.channel
            .inner
            .active_transmission
            .store(true, Ordering::Release);
        let result = self.read_transmission(&header, total).await;
        self.channel
            .inner
            .active_transmission
            .store(false, Ordering::Release);

        let data = result?;
        tracing::debug!("Received transmission {} ({} bytes)", header.id, total);
        Ok(Message::Transmission { header, data })
    }

    /// Collect `total` raw bytes, starting with whatever is already buffered
    async fn read_transmission(
        &mut self,
        header: &TransmissionHeader,
        total: usize,
    ) -> Result<Bytes, ChannelError> {
        let io_timeout = self.channel.inner.config.io_timeout;
        let mut data = BytesMut::with_capacity(total);

        let buffered = self.carry.len().min(total);
        data.extend_from_slice(&self.carry.split_to(buffered));
        self.report_progress(header, data.len(), total);

        let mut chunk = [0u8; TRANSFER_CHUNK];
        while data.len() < total {
            let want = (total - data.len()).min(TRANSFER_CHUNK);
            let read = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(ChannelError::ConnectionLost(
                        "channel closed during transmission".to_string(),
                    ));
                }
                read = time::timeout(io_timeout, self.stream.read(&mut chunk[..want])) => {
                    read.map_err(|_| ChannelError::Timeout("transmission read"))??
                }
            };
            if read == 0 {
                return Err(ChannelError::ConnectionLost(
                    "connection closed during transmission".to_string(),
                ));
            }
            data.extend_from_slice(&chunk[..read]);
            self.report_progress(header, data.len(), total);
        }

        Ok(data.freeze())
    }

    fn report_progress(&self, header: &TransmissionHeader, received: usize, total: usize) {
        if let Some(handler) = self.channel.handler(|h| h.progress.clone()) {
            let progress = TransmissionProgress {
                id: header.id,
                properties: &header.properties,
                received,
                total,
            };
            handler(&self.channel, &progress);
        }
    }

    /// Hand every queued inbound message to its handler, in order
    fn dispatch(&mut self) {
        for message in self.channel.inner.recv_queue.drain() {
            if self.cancel.is_cancelled() {
                break;
            }
            self.process_message(message);
        }
    }

    fn process_message(&mut self, message: Message) {
        match message {
            Message::ConnectAck { tick_rate } => {
                self.channel.set_tick_rate(tick_rate);
                self.channel
                    .inner
                    .handshake_validated
                    .store(true, Ordering::Release);
                self.channel.settle_activity();
                tracing::info!(
                    "Connection acknowledged (tick rate {})",
                    self.channel.tick_rate()
                );
            }
            Message::Ping { last_seen } => {
                tracing::trace!("Ping, peer last accepted {}", last_seen);
            }
            Message::Disconnect { reason } => {
                tracing::info!("Peer disconnected: {}", reason);
                self.channel.raise_flags(DisconnectFlags::BY_HOST);
                self.channel.set_disconnect_reason(reason.as_str());
                if let Some(handler) = self.channel.handler(|h| h.disconnect.clone()) {
                    handler(&self.channel, &reason);
                }
                self.cancel.cancel();
            }
            Message::Handler(payload) => match self.channel.handler(|h| h.message.clone()) {
                Some(handler) => handler(&self.channel, payload),
                None => tracing::debug!("No message handler, dropping {} bytes", payload.len()),
            },
            Message::Transmission { header, data } => {
                match self.channel.handler(|h| h.transmission.clone()) {
                    Some(handler) => handler(
                        &self.channel,
                        Transmission {
                            id: header.id,
                            properties: header.properties,
                            data,
                        },
                    ),
                    None => tracing::debug!(
                        "No transmission handler, dropping transmission {}",
                        header.id
                    ),
                }
            }
            Message::ConnectRequest(_) => {}
        }
    }

    // ---- Outbound ----

    /// Write everything queued, adding a Ping when the link has been quiet
    /// or a flush was forced with nothing to send
    async fn process_outgoing(&mut self, force_ping: bool) -> Result<(), ChannelError> {
        let threshold = self
            .channel
            .inner
            .config
            .keepalive_threshold(self.channel.tick_rate());

        let batch: Vec<Message> = {
            let mut queue = self.channel.inner.send_queue.lock();
            if self.keepalive > threshold || (force_ping && queue.is_empty()) {
                queue.push_back(Message::Ping {
                    last_seen: self.channel.incoming_sequence(),
                });
            }
            queue.drain(..).collect()
        };
        if batch.is_empty() {
            return Ok(());
        }

        self.channel.set_activity(ChannelState::Sending);
        let mut written = 0;
        for message in &batch {
            if self.write_message(message).await? {
                written += 1;
            }
        }
        // A forced flush must put at least one frame on the wire
        if force_ping && written == 0 {
            let ping = Message::Ping {
                last_seen: self.channel.incoming_sequence(),
            };
            self.write_message(&ping).await?;
        }
        self.keepalive = 0;
        self.channel.settle_activity();

        Ok(())
    }

    /// Encode and write one frame, returning `false` if it was dropped
    ///
    /// A dropped message does not use up a sequence number.
    async fn write_message(&mut self, message: &Message) -> Result<bool, ChannelError> {
        let mut frame = BytesMut::new();
        if let Err(e) = self
            .codec
            .encode(OutboundFrame::new(self.outgoing, message), &mut frame)
        {
            tracing::warn!("Dropping {} message: {}", message.message_type().name(), e);
            return Ok(false);
        }
        if let Some(intermediate) = self.channel.handler(|h| h.intermediate.clone()) {
            intermediate.outgoing(&mut frame[HEADER_SIZE..]);
        }

        self.write_all(&frame, "frame write").await?;
        if let Message::Transmission { header, data } = message {
            self.stream_transmission(header, data).await?;
        }

        tracing::trace!(
            "Sent {} frame {} ({} bytes)",
            message.message_type().name(),
            self.outgoing,
            frame.len()
        );
        self.outgoing = self.outgoing.wrapping_add(1);
        self.channel.inner.outgoing.send_replace(self.outgoing);

        Ok(true)
    }

    async fn stream_transmission(
        &mut self,
        header: &TransmissionHeader,
        data: &Bytes,
    ) -> Result<(), ChannelError> {
        self.channel
            .inner
            .active_transmission
            .store(true, Ordering::Release);

        let mut result = Ok(());
        for chunk in data.chunks(TRANSFER_CHUNK) {
            if let Err(e) = self.write_all(chunk, "transmission write").await {
                result = Err(e);
                break;
            }
        }

        self.channel
            .inner
            .active_transmission
            .store(false, Ordering::Release);
        if result.is_ok() {
            tracing::debug!("Sent transmission {} ({} bytes)", header.id, data.len());
        }
        result
    }

    async fn write_all(&mut self, buf: &[u8], operation: &'static str) -> Result<(), ChannelError> {
        let io_timeout = self.channel.inner.config.io_timeout;
        time::timeout(io_timeout, self.stream.write_all(buf))
            .await
            .map_err(|_| ChannelError::Timeout(operation))??;
        Ok(())
    }

    // ---- Teardown ----

    fn fail(&self, error: ChannelError) {
        if self.cancel.is_cancelled() {
            tracing::debug!("Session ended while closing: {}", error);
            return;
        }

        if error.is_protocol_violation() {
            tracing::warn!("Protocol violation: {}", error);
        } else {
            tracing::info!("Connection failed: {}", error);
        }
        self.channel.raise_flags(DisconnectFlags::BY_PROTOCOL);
        self.channel.set_disconnect_reason(error.to_string());
    }

    async fn teardown(mut self) {
        self.channel.inner.state.send_replace(ChannelState::Closing);
        if let Err(e) = self.stream.shutdown().await {
            tracing::trace!("Socket shutdown failed: {}", e);
        }

        let Self { channel, stream, .. } = self;
        drop(stream);

        if channel.role() == ChannelRole::Server {
            if let Some(callback) = channel.handler(|h| h.connection.clone()) {
                callback(&channel, ConnectionEvent::ClientDisconnect);
            }
        }

        channel.finish_session();
        tracing::info!(
            "Channel closed: {} (flags {:#x})",
            channel.disconnect_reason(),
            channel.flags().bits()
        );
    }
}
