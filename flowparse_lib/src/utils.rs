use std::fmt::Write;

use crate::error::*;

/// Bounds-checked big-endian reader over one packet or FlowSet body.
///
/// Every read checks the remaining length first and reports a
/// `TruncatedPacket` instead of panicking on short input.
#[derive(Clone, Debug)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteCursor { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        check_packet_size(self.remaining(), len).map_err(|_| DecodeError::TruncatedPacket {
            needed: self.pos + len,
            available: self.data.len(),
        })?;
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let field_slice = self.take(2)?;
        Ok(u16::from_be_bytes([field_slice[0], field_slice[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let field_slice = self.take(4)?;
        Ok(u32::from_be_bytes([field_slice[0], field_slice[1], field_slice[2], field_slice[3]]))
    }

    pub fn peek_u16(&self) -> Result<u16> {
        self.clone().read_u16()
    }
}

pub fn check_packet_size(byte_count: usize, needed: usize) -> Result<()> {
    if byte_count < needed {
        Err(DecodeError::TruncatedPacket { needed, available: byte_count })
    }
    else {
        Ok(())
    }
}

/// Big-endian unsigned integer of 1 to 8 bytes, no sign extension.
pub fn read_be_uint(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
