//! Little-endian writers for command area payloads
//!
//! `WireBuffer` grows a heap buffer for messages that go through the long
//! message transport. `SliceWriter` writes in place into a fixed region such
//! as the command area and refuses to run past its end.

use tfacc_common::{Result, TfaccError};

/// Sink for wire-encoded values
pub trait WireWrite {
    /// Append raw bytes
    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Append a little-endian i32
    fn put_i32(&mut self, value: i32) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Append a little-endian f32
    fn put_f32(&mut self, value: f32) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    /// Append a length as i32, rejecting lengths the firmware cannot read
    fn put_len(&mut self, len: usize) -> Result<()> {
        self.put_i32(i32::try_from(len)?)
    }

    /// Append an i32 length prefix followed by the bytes
    fn put_prefixed(&mut self, bytes: &[u8]) -> Result<()> {
        self.put_len(bytes.len())?;
        self.put_bytes(bytes)
    }
}

/// Growable message buffer
#[derive(Debug, Clone, Default)]
pub struct WireBuffer {
    buffer: Vec<u8>,
}

impl WireBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

impl WireWrite for WireBuffer {
    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    // Infallible for the heap buffer, skip the length check path
    fn put_i32(&mut self, value: i32) -> Result<()> {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

/// In-place writer over a fixed byte region
#[derive(Debug)]
pub struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Write zeros up to `offset`
    pub fn pad_to(&mut self, offset: usize) -> Result<()> {
        if offset < self.pos || offset > self.buf.len() {
            return Err(TfaccError::invalid_input(format!(
                "cannot pad from {} to {} in a {} byte region",
                self.pos,
                offset,
                self.buf.len()
            )));
        }
        self.buf[self.pos..offset].fill(0);
        self.pos = offset;
        Ok(())
    }
}

impl WireWrite for SliceWriter<'_> {
    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(TfaccError::invalid_input(format!(
                "write of {} bytes at {} overflows a {} byte region",
                bytes.len(),
                self.pos,
                self.buf.len()
            )));
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }
}

/// Read a little-endian i32 at `offset`
pub fn read_i32(buf: &[u8], offset: usize) -> Option<i32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a little-endian f32 at `offset`
pub fn read_f32(buf: &[u8], offset: usize) -> Option<f32> {
    read_i32(buf, offset).map(|bits| f32::from_bits(bits as u32))
}
