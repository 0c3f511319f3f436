//! Frame header encoding/decoding
//!
//! The frame format uses a 12-byte header:
//! - sequence: 4 bytes (i32, little-endian)
//! - length: 4 bytes (i32, little-endian), counts the type tag plus the body
//! - message_type: 4 bytes (u32, little-endian), the manifest
//!
//! A frame therefore occupies `8 + length` bytes on the wire and its body
//! is `length - 4` bytes long.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

/// Size of the frame header in bytes (sequence, length and manifest)
pub const HEADER_SIZE: usize = 12;

/// Size of the type tag that leads every message payload
pub const MANIFEST_SIZE: usize = 4;

/// Bytes before the `length`-counted part of a frame
pub const PREFIX_SIZE: usize = HEADER_SIZE - MANIFEST_SIZE;

/// Maximum body size of a single frame
pub const PAYLOAD_SIZE: usize = 4096;

/// Largest value the `length` field may carry
pub const MAX_FRAME_LENGTH: usize = MANIFEST_SIZE + PAYLOAD_SIZE;

/// Frame header containing ordering and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Sender-assigned sequence number
    pub sequence: i32,
    /// Length of the manifest plus body in bytes
    pub length: i32,
    /// Raw message type tag
    pub message_type: u32,
}

impl FrameHeader {
    /// Create a header for a body of `body_len` bytes
    pub fn new(sequence: i32, message_type: u32, body_len: usize) -> Self {
        Self {
            sequence,
            length: (MANIFEST_SIZE + body_len) as i32,
            message_type,
        }
    }

    /// Length of the body that follows the header
    pub fn body_len(&self) -> usize {
        self.length as usize - MANIFEST_SIZE
    }

    /// Total number of bytes the frame occupies on the wire
    pub fn frame_len(&self) -> usize {
        PREFIX_SIZE + self.length as usize
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_i32_le(self.sequence);
        dst.put_i32_le(self.length);
        dst.put_u32_le(self.message_type);
    }

    /// Decode a header from the front of `src` without consuming it
    ///
    /// Fails if fewer than [`HEADER_SIZE`] bytes are available or if the
    /// declared length cannot even hold the type tag.
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Err(ProtocolError::IncompleteHeader {
                expected: HEADER_SIZE,
                actual: src.len(),
            });
        }

        let mut cursor = &src[..HEADER_SIZE];
        let sequence = cursor.get_i32_le();
        let length = cursor.get_i32_le();
        let message_type = cursor.get_u32_le();

        if length < MANIFEST_SIZE as i32 {
            return Err(ProtocolError::InvalidLength(length));
        }

        Ok(Self {
            sequence,
            length,
            message_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader::new(42, 1 << 18, 123);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = FrameHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.body_len(), 123);
        assert_eq!(decoded.frame_len(), HEADER_SIZE + 123);
    }

    #[test]
    fn test_header_is_little_endian() {
        let header = FrameHeader::new(1, 0x0001_0000, 0);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        assert_eq!(&buf[..], &[1, 0, 0, 0, 4, 0, 0, 0, 0, 0, 1, 0]);
    }

    #[test]
    fn test_insufficient_bytes() {
        let result = FrameHeader::decode(&[0u8; 11]);
        assert!(matches!(
            result,
            Err(ProtocolError::IncompleteHeader {
                expected: 12,
                actual: 11
            })
        ));
    }

    #[test]
    fn test_non_positive_length() {
        for length in [0i32, -1, 3] {
            let mut buf = BytesMut::new();
            buf.put_i32_le(0);
            buf.put_i32_le(length);
            buf.put_u32_le(1);
            assert!(matches!(
                FrameHeader::decode(&buf),
                Err(ProtocolError::InvalidLength(l)) if l == length
            ));
        }
    }
}
