//! nc-protocol: Wire protocol for NetChannel
//!
//! This crate defines the framing, the message set and the byte cursors used
//! by a NetChannel session on top of a single reliable byte stream.

pub mod buf;
pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use buf::{ByteReader, ByteWriter};
pub use codec::{Frame, FrameCodec, OutboundFrame};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MANIFEST_SIZE, MAX_FRAME_LENGTH, PAYLOAD_SIZE};
pub use message::{
    ConnectRequest, Message, MessageRange, MessageType, TransmissionHeader, MAX_PROPERTIES_LEN,
    MAX_REASON_LEN, PROTOCOL_MASK, PROTOCOL_UID, PROTOCOL_VERSION,
};
