//! Tokio codec for framed protocol messages
//!
//! The codec is stateless: whatever has not yet formed a complete frame stays
//! in the source buffer, which doubles as the carry-over between reads.
//! Sequence numbers and tag legality are checked by the channel, not here.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::buf::ByteWriter;
use crate::error::ProtocolError;
use crate::frame::{FrameHeader, HEADER_SIZE, MANIFEST_SIZE, MAX_FRAME_LENGTH};
use crate::message::{Message, MessageType};

/// A complete inbound frame with header and raw body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header
    pub header: FrameHeader,
    /// Body bytes following the manifest
    pub body: Bytes,
}

impl Frame {
    /// Resolve the raw type tag
    pub fn message_type(&self) -> Result<MessageType, ProtocolError> {
        MessageType::from_u32(self.header.message_type)
            .ok_or(ProtocolError::UnknownMessageType(self.header.message_type))
    }
}

/// An outbound message paired with the sequence number it will carry
#[derive(Debug, Clone, Copy)]
pub struct OutboundFrame<'a> {
    /// Sequence number assigned by the sender
    pub sequence: i32,
    /// Message to serialize
    pub message: &'a Message,
}

impl<'a> OutboundFrame<'a> {
    /// Create a new outbound frame
    pub fn new(sequence: i32, message: &'a Message) -> Self {
        Self { sequence, message }
    }
}

/// Codec for encoding/decoding protocol frames
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Largest accepted `length` field
    max_length: usize,
}

impl FrameCodec {
    /// Create a new codec accepting frames up to [`MAX_FRAME_LENGTH`]
    pub fn new() -> Self {
        Self {
            max_length: MAX_FRAME_LENGTH,
        }
    }

    /// Largest accepted `length` field
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None); // Need more data
        }

        let header = FrameHeader::decode(&src[..])?;

        let length = header.length as usize;
        if length > self.max_length {
            tracing::debug!("Frame {} declares {} bytes", header.sequence, length);
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_length,
            });
        }

        let frame_len = header.frame_len();
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        tracing::trace!(
            "Decoded frame {} ({:#x}, {} bytes)",
            header.sequence,
            header.message_type,
            frame_len
        );
        let mut raw = src.split_to(frame_len);
        raw.advance(HEADER_SIZE);

        Ok(Some(Frame {
            header,
            body: raw.freeze(),
        }))
    }
}

impl Encoder<OutboundFrame<'_>> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: OutboundFrame<'_>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = ByteWriter::with_capacity(self.max_length - MANIFEST_SIZE);
        frame.message.serialize(&mut body)?;

        let header = FrameHeader::new(
            frame.sequence,
            frame.message.message_type().as_u32(),
            body.bytes_written(),
        );
        header.encode(dst);
        dst.extend_from_slice(body.as_slice());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PAYLOAD_SIZE, PREFIX_SIZE};
    use crate::message::ConnectRequest;

    fn encode_all(messages: &[Message]) -> BytesMut {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        for (seq, message) in messages.iter().enumerate() {
            codec
                .encode(OutboundFrame::new(seq as i32, message), &mut buf)
                .unwrap();
        }
        buf
    }

    fn decode_all(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            let message_type = frame.message_type().unwrap();
            out.push(Message::deserialize(message_type, &frame.body).unwrap());
        }
        out
    }

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::ConnectRequest(ConnectRequest::current()),
            Message::handler(Bytes::from_static(b"ping")),
            Message::Ping { last_seen: 7 },
            Message::disconnect("bye"),
        ]
    }

    #[test]
    fn test_codec_roundtrip() {
        let messages = sample_messages();
        let mut buf = encode_all(&messages);

        let mut codec = FrameCodec::new();
        assert_eq!(decode_all(&mut codec, &mut buf), messages);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_assigns_sequence_and_length() {
        let message = Message::handler(Bytes::from_static(b"abc"));
        let mut buf = encode_all(std::slice::from_ref(&message));
        assert_eq!(buf.len(), HEADER_SIZE + 3);

        let frame = FrameCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header.sequence, 0);
        assert_eq!(frame.header.length, 7);
        assert_eq!(frame.header.frame_len(), PREFIX_SIZE + 7);
        assert_eq!(frame.body.as_ref(), b"abc");
    }

    #[test]
    fn test_codec_partial_read() {
        let mut full = encode_all(&[Message::Ping { last_seen: 12345 }]);

        let mut codec = FrameCodec::new();
        let mut partial = full.split_to(HEADER_SIZE - 1);

        // Should return None (need more data)
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Add the rest
        partial.extend_from_slice(&full);

        let decoded = decode_all(&mut codec, &mut partial);
        assert_eq!(decoded, vec![Message::Ping { last_seen: 12345 }]);
    }

    #[test]
    fn test_split_at_every_offset_yields_same_messages() {
        let messages = sample_messages();
        let stream = encode_all(&messages).freeze();

        for split in 0..=stream.len() {
            let mut codec = FrameCodec::new();
            let mut carry = BytesMut::new();
            let mut decoded = Vec::new();

            carry.extend_from_slice(&stream[..split]);
            decoded.extend(decode_all(&mut codec, &mut carry));
            carry.extend_from_slice(&stream[split..]);
            decoded.extend(decode_all(&mut codec, &mut carry));

            assert_eq!(decoded, messages, "split at {}", split);
            assert!(carry.is_empty());
        }
    }

    #[test]
    fn test_byte_by_byte_feed() {
        let messages = sample_messages();
        let stream = encode_all(&messages).freeze();

        let mut codec = FrameCodec::new();
        let mut carry = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in stream.iter() {
            carry.extend_from_slice(&[*byte]);
            decoded.extend(decode_all(&mut codec, &mut carry));
        }
        assert_eq!(decoded, messages);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let header = FrameHeader::new(0, MessageType::Handler.as_u32(), PAYLOAD_SIZE + 1);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        let result = FrameCodec::new().decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_unknown_type_surfaces_on_resolve() {
        let header = FrameHeader::new(0, 1 << 30, 0);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        let frame = FrameCodec::new().decode(&mut buf).unwrap().unwrap();
        assert!(matches!(
            frame.message_type(),
            Err(ProtocolError::UnknownMessageType(0x4000_0000))
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let message = Message::handler(vec![0u8; PAYLOAD_SIZE + 1]);
        let mut buf = BytesMut::new();
        let result = FrameCodec::new().encode(OutboundFrame::new(0, &message), &mut buf);
        assert!(matches!(result, Err(ProtocolError::CapacityExceeded { .. })));
        assert!(buf.is_empty());
    }
}
