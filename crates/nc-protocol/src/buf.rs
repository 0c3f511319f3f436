//! Forward-only byte cursors
//!
//! Every message body and every application payload is written with a
//! [`ByteWriter`] and read back with a [`ByteReader`]. Both track how many
//! bytes have been consumed and refuse to run past their bounds: writes fail
//! with [`ProtocolError::CapacityExceeded`], reads with
//! [`ProtocolError::Truncated`]. All integers are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Bounded writer over a growable buffer
#[derive(Debug)]
pub struct ByteWriter {
    buf: BytesMut,
    capacity: usize,
}

impl ByteWriter {
    /// Create a writer that accepts at most `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        let available = self.bytes_left();
        if needed > available {
            return Err(ProtocolError::CapacityExceeded { needed, available });
        }
        Ok(())
    }

    /// Write a single byte
    pub fn write_u8(&mut self, value: u8) -> Result<(), ProtocolError> {
        self.ensure(1)?;
        self.buf.put_u8(value);
        Ok(())
    }

    /// Write a signed 16-bit integer
    pub fn write_i16(&mut self, value: i16) -> Result<(), ProtocolError> {
        self.ensure(2)?;
        self.buf.put_i16_le(value);
        Ok(())
    }

    /// Write an unsigned 16-bit integer
    pub fn write_u16(&mut self, value: u16) -> Result<(), ProtocolError> {
        self.ensure(2)?;
        self.buf.put_u16_le(value);
        Ok(())
    }

    /// Write a signed 32-bit integer
    pub fn write_i32(&mut self, value: i32) -> Result<(), ProtocolError> {
        self.ensure(4)?;
        self.buf.put_i32_le(value);
        Ok(())
    }

    /// Write an unsigned 32-bit integer
    pub fn write_u32(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.ensure(4)?;
        self.buf.put_u32_le(value);
        Ok(())
    }

    /// Write a 32-bit float
    pub fn write_f32(&mut self, value: f32) -> Result<(), ProtocolError> {
        self.ensure(4)?;
        self.buf.put_f32_le(value);
        Ok(())
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.ensure(data.len())?;
        self.buf.put_slice(data);
        Ok(())
    }

    /// Write a string followed by a NUL terminator
    pub fn write_cstr(&mut self, value: &str) -> Result<(), ProtocolError> {
        if value.as_bytes().contains(&0) {
            return Err(ProtocolError::InvalidString("interior NUL"));
        }
        self.ensure(value.len() + 1)?;
        self.buf.put_slice(value.as_bytes());
        self.buf.put_u8(0);
        Ok(())
    }

    /// Number of bytes written so far
    pub fn bytes_written(&self) -> usize {
        self.buf.len()
    }

    /// Number of bytes that can still be written
    pub fn bytes_left(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// View the bytes written so far
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer, returning the written bytes
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Bounds-checked reader over a byte slice
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    read: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a reader over `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, read: 0 }
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        if needed > self.data.len() {
            return Err(ProtocolError::Truncated {
                needed,
                remaining: self.data.len(),
            });
        }
        Ok(())
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        self.read += 1;
        Ok(self.data.get_u8())
    }

    /// Read a signed 16-bit integer
    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        self.ensure(2)?;
        self.read += 2;
        Ok(self.data.get_i16_le())
    }

    /// Read an unsigned 16-bit integer
    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.ensure(2)?;
        self.read += 2;
        Ok(self.data.get_u16_le())
    }

    /// Read a signed 32-bit integer
    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        self.ensure(4)?;
        self.read += 4;
        Ok(self.data.get_i32_le())
    }

    /// Read an unsigned 32-bit integer
    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.ensure(4)?;
        self.read += 4;
        Ok(self.data.get_u32_le())
    }

    /// Read a 32-bit float
    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        self.ensure(4)?;
        self.read += 4;
        Ok(self.data.get_f32_le())
    }

    /// Read `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        self.ensure(len)?;
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        self.read += len;
        Ok(head)
    }

    /// Read a NUL-terminated string of at most `max_len` bytes (terminator excluded)
    pub fn read_cstr(&mut self, max_len: usize) -> Result<String, ProtocolError> {
        let raw = self.read_cstr_bytes(max_len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidString("not valid UTF-8"))
    }

    /// Like [`read_cstr`](Self::read_cstr), replacing invalid UTF-8 with U+FFFD
    pub fn read_cstr_lossy(&mut self, max_len: usize) -> Result<String, ProtocolError> {
        let raw = self.read_cstr_bytes(max_len)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    fn read_cstr_bytes(&mut self, max_len: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::InvalidString("missing NUL terminator"))?;
        if end > max_len {
            return Err(ProtocolError::InvalidString("string too long"));
        }
        let raw = self.read_bytes(end + 1)?;
        Ok(&raw[..end])
    }

    /// Consume everything that is left
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let rest = self.data;
        self.read += rest.len();
        self.data = &[];
        rest
    }

    /// Number of bytes read so far
    pub fn bytes_read(&self) -> usize {
        self.read
    }

    /// Number of bytes not yet read
    pub fn bytes_left(&self) -> usize {
        self.data.len()
    }
}
