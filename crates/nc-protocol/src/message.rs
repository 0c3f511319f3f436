//! Message types for the NetChannel protocol
//!
//! Every frame carries exactly one message. The type tag travels in the
//! frame header (the manifest); this module only deals with the body that
//! follows it.
//!
//! # Type tags
//!
//! Tags are single bits split into three ranges so that they can never
//! collide:
//!
//! - client range, bits 0-7: `ConnectRequest`
//! - server range, bits 8-15: `ConnectAck`
//! - protocol-control range, bits 16-23: `Ping`, `Disconnect`, `Handler`,
//!   `Transmission`
//!
//! # Message Flow
//!
//! 1. Client connects and sends `ConnectRequest` carrying the handshake constants
//! 2. Server validates them; until then it accepts nothing else
//! 3. Server sends `ConnectAck` with its tick rate, the client adopts it
//! 4. `Handler` messages carry opaque application payloads both ways
//! 5. `Ping` keeps an idle channel alive
//! 6. `Transmission` announces a raw payload streamed right after the frame
//! 7. `Disconnect` carries the reason for an orderly close

use bytes::Bytes;

use crate::buf::{ByteReader, ByteWriter};
use crate::error::ProtocolError;
use crate::frame::PAYLOAD_SIZE;

/// Protocol revision spoken by this implementation.
pub const PROTOCOL_VERSION: i32 = 3;

/// Mask applied to [`PROTOCOL_VERSION`] in the connect request.
pub const PROTOCOL_MASK: i32 = 0x2C4E_1F37;

/// Fixed protocol identifier checked during the handshake.
pub const PROTOCOL_UID: i32 = 0x4E43_484E;

/// Longest disconnect reason in bytes, NUL terminator excluded.
pub const MAX_REASON_LEN: usize = 127;

/// Fixed part of a transmission header: id, total length, properties length.
pub const TRANSMISSION_HEADER_SIZE: usize = 12;

/// Largest properties blob that still fits in one frame.
pub const MAX_PROPERTIES_LEN: usize = PAYLOAD_SIZE - TRANSMISSION_HEADER_SIZE;

/// Tag ranges of the bit-flag namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRange {
    /// Sent by clients only
    Client,
    /// Sent by servers only
    Server,
    /// Sent by either side
    Control,
}

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Handshake request (client to server)
    ConnectRequest = 1 << 0,
    /// Handshake acknowledgment (server to client)
    ConnectAck = 1 << 8,
    /// Keepalive
    Ping = 1 << 16,
    /// Orderly close with a reason
    Disconnect = 1 << 17,
    /// Opaque application payload
    Handler = 1 << 18,
    /// Header of a streamed bulk payload
    Transmission = 1 << 19,
}

impl MessageType {
    /// All message types
    pub const ALL: [MessageType; 6] = [
        MessageType::ConnectRequest,
        MessageType::ConnectAck,
        MessageType::Ping,
        MessageType::Disconnect,
        MessageType::Handler,
        MessageType::Transmission,
    ];

    /// Convert to u32
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// Convert from u32
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x0000_0001 => Some(Self::ConnectRequest),
            0x0000_0100 => Some(Self::ConnectAck),
            0x0001_0000 => Some(Self::Ping),
            0x0002_0000 => Some(Self::Disconnect),
            0x0004_0000 => Some(Self::Handler),
            0x0008_0000 => Some(Self::Transmission),
            _ => None,
        }
    }

    /// Range the tag belongs to
    pub fn range(&self) -> MessageRange {
        match self.as_u32() {
            0x0000_0001..=0x0000_0080 => MessageRange::Client,
            0x0000_0100..=0x0000_8000 => MessageRange::Server,
            _ => MessageRange::Control,
        }
    }

    /// Short name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectRequest => "connect-request",
            Self::ConnectAck => "connect-ack",
            Self::Ping => "ping",
            Self::Disconnect => "disconnect",
            Self::Handler => "handler",
            Self::Transmission => "transmission",
        }
    }
}

/// Handshake values a client presents to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRequest {
    /// `PROTOCOL_VERSION ^ PROTOCOL_MASK`
    pub protocol_header: i32,
    /// `PROTOCOL_UID`
    pub protocol_uid: i32,
}

impl ConnectRequest {
    /// Request carrying this implementation's constants
    pub fn current() -> Self {
        Self {
            protocol_header: PROTOCOL_VERSION ^ PROTOCOL_MASK,
            protocol_uid: PROTOCOL_UID,
        }
    }

    /// Whether the peer speaks the same protocol
    pub fn is_valid(&self) -> bool {
        *self == Self::current()
    }
}

/// Announcement of a raw payload that follows the frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmissionHeader {
    /// Per-channel transmission id
    pub id: u32,
    /// Number of raw bytes that follow
    pub total_len: u32,
    /// Out-of-band metadata (e.g. a file name)
    pub properties: Bytes,
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Client handshake
    ConnectRequest(ConnectRequest),

    /// Server handshake reply
    ConnectAck {
        /// Server tick rate the client should adopt
        tick_rate: i32,
    },

    /// Keepalive
    Ping {
        /// Last sequence number the sender accepted from us
        last_seen: i32,
    },

    /// Orderly close
    Disconnect {
        /// Human-readable reason, at most 127 bytes
        reason: String,
    },

    /// Opaque application payload, forwarded verbatim
    Handler(Bytes),

    /// Bulk payload; only the header goes into the frame
    Transmission {
        /// Header serialized into the frame
        header: TransmissionHeader,
        /// Raw bytes streamed after the frame
        data: Bytes,
    },
}

impl Message {
    /// Build a disconnect message, truncating the reason to 127 bytes
    ///
    /// The reason also ends at its first NUL, which the wire format uses as
    /// the terminator.
    pub fn disconnect(reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if let Some(nul) = reason.find('\0') {
            reason.truncate(nul);
        }
        if reason.len() > MAX_REASON_LEN {
            let mut end = MAX_REASON_LEN;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason.truncate(end);
        }
        Message::Disconnect { reason }
    }

    /// Build an application message
    pub fn handler(payload: impl Into<Bytes>) -> Self {
        Message::Handler(payload.into())
    }

    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ConnectRequest(_) => MessageType::ConnectRequest,
            Message::ConnectAck { .. } => MessageType::ConnectAck,
            Message::Ping { .. } => MessageType::Ping,
            Message::Disconnect { .. } => MessageType::Disconnect,
            Message::Handler(_) => MessageType::Handler,
            Message::Transmission { .. } => MessageType::Transmission,
        }
    }

    /// Write the message body, returning the number of bytes written
    ///
    /// Fails instead of truncating when the body does not fit the writer.
    pub fn serialize(&self, writer: &mut ByteWriter) -> Result<usize, ProtocolError> {
        let start = writer.bytes_written();
        match self {
            Message::ConnectRequest(request) => {
                writer.write_i32(request.protocol_header)?;
                writer.write_i32(request.protocol_uid)?;
            }
            Message::ConnectAck { tick_rate } => writer.write_i32(*tick_rate)?,
            Message::Ping { last_seen } => writer.write_i32(*last_seen)?,
            Message::Disconnect { reason } => {
                if reason.len() > MAX_REASON_LEN {
                    return Err(ProtocolError::InvalidString("disconnect reason too long"));
                }
                writer.write_cstr(reason)?;
            }
            Message::Handler(payload) => writer.write_bytes(payload)?,
            Message::Transmission { header, .. } => {
                if header.properties.len() > MAX_PROPERTIES_LEN {
                    return Err(ProtocolError::CapacityExceeded {
                        needed: header.properties.len(),
                        available: MAX_PROPERTIES_LEN,
                    });
                }
                writer.write_u32(header.id)?;
                writer.write_u32(header.total_len)?;
                writer.write_u32(header.properties.len() as u32)?;
                writer.write_bytes(&header.properties)?;
            }
        }
        Ok(writer.bytes_written() - start)
    }

    /// Parse a message body of the given type
    ///
    /// A `Transmission` comes back with empty `data`; the raw payload is
    /// read from the stream by the receiver.
    pub fn deserialize(message_type: MessageType, body: &[u8]) -> Result<Self, ProtocolError> {
        let kind = message_type.name();
        let mut reader = ByteReader::new(body);

        let message = match message_type {
            MessageType::ConnectRequest => Message::ConnectRequest(ConnectRequest {
                protocol_header: reader.read_i32()?,
                protocol_uid: reader.read_i32()?,
            }),
            MessageType::ConnectAck => Message::ConnectAck {
                tick_rate: reader.read_i32()?,
            },
            MessageType::Ping => Message::Ping {
                last_seen: reader.read_i32()?,
            },
            MessageType::Disconnect => Message::Disconnect {
                // Peers may send any bytes; the goodbye must survive them
                reason: reader.read_cstr_lossy(MAX_REASON_LEN)?,
            },
            MessageType::Handler => {
                Message::Handler(Bytes::copy_from_slice(reader.read_remaining()))
            }
            MessageType::Transmission => {
                let id = reader.read_u32()?;
                let total_len = reader.read_u32()?;
                let props_len = reader.read_u32()? as usize;
                if total_len == 0 {
                    return Err(ProtocolError::malformed(kind, "empty transmission"));
                }
                if props_len != reader.bytes_left() {
                    return Err(ProtocolError::malformed(kind, "properties length mismatch"));
                }
                let properties = Bytes::copy_from_slice(reader.read_bytes(props_len)?);
                Message::Transmission {
                    header: TransmissionHeader {
                        id,
                        total_len,
                        properties,
                    },
                    data: Bytes::new(),
                }
            }
        };

        if reader.bytes_left() != 0 {
            return Err(ProtocolError::malformed(kind, "trailing bytes"));
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: &Message) -> Message {
        let mut writer = ByteWriter::with_capacity(PAYLOAD_SIZE);
        message.serialize(&mut writer).unwrap();
        Message::deserialize(message.message_type(), writer.as_slice()).unwrap()
    }

    #[test]
    fn test_message_type_roundtrip() {
        for msg_type in MessageType::ALL {
            let value = msg_type.as_u32();
            assert_eq!(MessageType::from_u32(value), Some(msg_type));
        }
        assert_eq!(MessageType::from_u32(0), None);
        assert_eq!(MessageType::from_u32(1 << 1), None);
    }

    #[test]
    fn test_tags_do_not_collide() {
        let combined = MessageType::ALL
            .iter()
            .fold(0u32, |acc, t| {
                assert_eq!(acc & t.as_u32(), 0);
                acc | t.as_u32()
            });
        assert_eq!(combined.count_ones() as usize, MessageType::ALL.len());
    }

    #[test]
    fn test_tag_ranges() {
        assert_eq!(MessageType::ConnectRequest.range(), MessageRange::Client);
        assert_eq!(MessageType::ConnectAck.range(), MessageRange::Server);
        for t in [
            MessageType::Ping,
            MessageType::Disconnect,
            MessageType::Handler,
            MessageType::Transmission,
        ] {
            assert_eq!(t.range(), MessageRange::Control);
        }
    }

    #[test]
    fn test_connect_request_validation() {
        assert!(ConnectRequest::current().is_valid());

        let stale = ConnectRequest {
            protocol_header: (PROTOCOL_VERSION - 1) ^ PROTOCOL_MASK,
            protocol_uid: PROTOCOL_UID,
        };
        assert!(!stale.is_valid());

        let foreign = ConnectRequest {
            protocol_uid: 0,
            ..ConnectRequest::current()
        };
        assert!(!foreign.is_valid());
    }

    #[test]
    fn test_control_messages_survive_roundtrip() {
        for message in [
            Message::ConnectRequest(ConnectRequest::current()),
            Message::ConnectAck { tick_rate: 64 },
            Message::Ping { last_seen: 1234 },
            Message::disconnect("Server shutting down"),
            Message::handler(Bytes::from_static(b"\x01hello\0")),
        ] {
            assert_eq!(roundtrip(&message), message);
        }
    }

    #[test]
    fn test_disconnect_reason_at_limit() {
        let reason = "r".repeat(MAX_REASON_LEN);
        let message = Message::disconnect(reason.clone());
        assert_eq!(roundtrip(&message), Message::Disconnect { reason });
    }

    #[test]
    fn test_disconnect_constructor_truncates_on_char_boundary() {
        let reason = format!("{}é", "x".repeat(MAX_REASON_LEN - 1));
        let Message::Disconnect { reason } = Message::disconnect(reason) else {
            panic!("Expected Disconnect message");
        };
        assert_eq!(reason.len(), MAX_REASON_LEN - 1);
    }

    #[test]
    fn test_disconnect_constructor_stops_at_nul() {
        let message = Message::disconnect("kicked\0hidden");
        assert_eq!(
            message,
            Message::Disconnect {
                reason: "kicked".to_string()
            }
        );
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn test_disconnect_reason_with_invalid_utf8_is_kept() {
        let message = Message::deserialize(MessageType::Disconnect, b"caf\xe9\0").unwrap();
        assert_eq!(
            message,
            Message::Disconnect {
                reason: "caf\u{fffd}".to_string()
            }
        );
    }

    #[test]
    fn test_oversized_reason_is_rejected_not_truncated() {
        let message = Message::Disconnect {
            reason: "x".repeat(MAX_REASON_LEN + 1),
        };
        let mut writer = ByteWriter::with_capacity(PAYLOAD_SIZE);
        assert!(message.serialize(&mut writer).is_err());
    }

    #[test]
    fn test_handler_payload_at_max_size() {
        let payload = Bytes::from(vec![0xAB; PAYLOAD_SIZE]);
        let message = Message::handler(payload);
        assert_eq!(roundtrip(&message), message);

        let too_big = Message::handler(vec![0u8; PAYLOAD_SIZE + 1]);
        let mut writer = ByteWriter::with_capacity(PAYLOAD_SIZE);
        assert!(matches!(
            too_big.serialize(&mut writer),
            Err(ProtocolError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_transmission_header_roundtrip() {
        let message = Message::Transmission {
            header: TransmissionHeader {
                id: 3,
                total_len: 1 << 20,
                properties: Bytes::from_static(b"report.pdf\0"),
            },
            data: Bytes::new(),
        };
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn test_transmission_properties_length_must_match() {
        let mut writer = ByteWriter::with_capacity(64);
        writer.write_u32(1).unwrap();
        writer.write_u32(10).unwrap();
        writer.write_u32(5).unwrap();
        writer.write_bytes(b"abc").unwrap();
        assert!(Message::deserialize(MessageType::Transmission, writer.as_slice()).is_err());
    }

    #[test]
    fn test_fixed_size_bodies_reject_trailing_bytes() {
        let mut writer = ByteWriter::with_capacity(16);
        writer.write_i32(1).unwrap();
        writer.write_u8(0).unwrap();
        assert!(Message::deserialize(MessageType::Ping, writer.as_slice()).is_err());
        assert!(Message::deserialize(MessageType::ConnectAck, &[0, 0]).is_err());
    }
}
