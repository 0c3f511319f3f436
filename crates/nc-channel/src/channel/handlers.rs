//! Application callbacks bound to a channel

use std::sync::Arc;

use bytes::Bytes;

use super::Channel;
use crate::types::ConnectionEvent;

/// Called on the I/O task for every inbound application message
pub type MessageHandler = Arc<dyn Fn(&Channel, Bytes) + Send + Sync>;

/// Called on the I/O task for every completed inbound transmission
pub type TransmissionHandler = Arc<dyn Fn(&Channel, Transmission) + Send + Sync>;

/// Called on the I/O task after each chunk of an inbound transmission
pub type ProgressHandler = Arc<dyn Fn(&Channel, &TransmissionProgress<'_>) + Send + Sync>;

/// Called on the I/O task when the peer sends a Disconnect, before teardown
pub type DisconnectHandler = Arc<dyn Fn(&Channel, &str) + Send + Sync>;

/// Server-side lifecycle callback; `false` on `ClientConnect` rejects the peer
pub type ConnectionCallback = Arc<dyn Fn(&Channel, ConnectionEvent) -> bool + Send + Sync>;

/// A completed inbound bulk payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    /// Sender-assigned transmission id
    pub id: u32,
    /// Out-of-band metadata supplied by the sender
    pub properties: Bytes,
    /// Payload
    pub data: Bytes,
}

/// Progress of an inbound transmission
#[derive(Debug, Clone, Copy)]
pub struct TransmissionProgress<'a> {
    /// Sender-assigned transmission id
    pub id: u32,
    /// Out-of-band metadata supplied by the sender
    pub properties: &'a [u8],
    /// Bytes received so far
    pub received: usize,
    /// Bytes announced by the sender
    pub total: usize,
}

impl TransmissionProgress<'_> {
    /// Whether every announced byte has arrived
    pub fn is_complete(&self) -> bool {
        self.received >= self.total
    }
}

/// In-place rewrite of message bodies
///
/// `outgoing` runs on every body after serialization and `incoming` on every
/// body before deserialization. Both must preserve the length, and
/// `incoming` must undo `outgoing`. The frame header and the raw bytes of a
/// transmission are never passed through.
pub trait Intermediate: Send + Sync {
    /// Rewrite a body about to be written
    fn outgoing(&self, body: &mut [u8]);

    /// Rewrite a body that was just read
    fn incoming(&self, body: &mut [u8]);
}

#[derive(Default)]
pub(crate) struct Handlers {
    pub(crate) message: Option<MessageHandler>,
    pub(crate) transmission: Option<TransmissionHandler>,
    pub(crate) progress: Option<ProgressHandler>,
    pub(crate) disconnect: Option<DisconnectHandler>,
    pub(crate) connection: Option<ConnectionCallback>,
    pub(crate) intermediate: Option<Arc<dyn Intermediate>>,
}
