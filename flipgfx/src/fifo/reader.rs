// Endian-aware FIFO byte reader.
//
// The command stream is consumed strictly left-to-right; a short read
// anywhere is stream corruption and fatal, since the decoder cannot
// re-synchronize after losing framing.

use crate::error::{dump_around, GxError, Result};

/// Byte order of the operand stream. Captured streams are big-endian;
/// one replay variant stores operands little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// Sequential reader over a FIFO byte buffer.
pub struct FifoReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> FifoReader<'a> {
    pub fn new(bytes: &'a [u8], order: ByteOrder) -> Self {
        Self {
            bytes,
            pos: 0,
            order,
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Fatal truncation error with surrounding-byte context.
    fn truncated(&self, needed: usize) -> GxError {
        GxError::Truncated {
            offset: self.pos,
            needed,
            remaining: self.remaining(),
            context: dump_around(self.bytes, self.pos.min(self.bytes.len())),
        }
    }

    /// Fatal unknown-opcode error with surrounding-byte context.
    pub fn unknown_opcode(&self, opcode: u8, at: usize) -> GxError {
        GxError::UnknownOpcode {
            opcode,
            offset: at,
            context: dump_around(self.bytes, at),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.remaining() < 1 {
            return Err(self.truncated(1));
        }
        let b = self.bytes[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(match self.order {
            ByteOrder::Big => u16::from_be_bytes([b[0], b[1]]),
            ByteOrder::Little => u16::from_le_bytes([b[0], b[1]]),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(match self.order {
            ByteOrder::Big => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            ByteOrder::Little => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        })
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Borrow `n` raw bytes and advance.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.truncated(n));
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Skip `n` bytes (used for unimplemented opcodes with known fixed
    /// payload sizes).
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(self.truncated(n));
        }
        self.pos += n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_reads() {
        let bytes = [0x12, 0x34, 0x56, 0x78, 0xAB, 0xCD];
        let mut r = FifoReader::new(&bytes, ByteOrder::Big);
        assert_eq!(r.read_u32().unwrap(), 0x1234_5678);
        assert_eq!(r.read_u16().unwrap(), 0xABCD);
        assert!(r.is_empty());
    }

    #[test]
    fn little_endian_reads() {
        let bytes = [0x78, 0x56, 0x34, 0x12];
        let mut r = FifoReader::new(&bytes, ByteOrder::Little);
        assert_eq!(r.read_u32().unwrap(), 0x1234_5678);
    }

    #[test]
    fn f32_round_trips_through_bits() {
        let v = 123.456f32;
        let bytes = v.to_bits().to_be_bytes();
        let mut r = FifoReader::new(&bytes, ByteOrder::Big);
        assert_eq!(r.read_f32().unwrap(), v);
    }

    #[test]
    fn truncated_read_is_fatal_with_context() {
        let bytes = [0x61, 0x00];
        let mut r = FifoReader::new(&bytes, ByteOrder::Big);
        r.read_u8().unwrap();
        let err = r.read_u32().unwrap_err();
        match err {
            GxError::Truncated {
                offset,
                needed,
                remaining,
                context,
            } => {
                assert_eq!(offset, 1);
                assert_eq!(needed, 4);
                assert_eq!(remaining, 1);
                assert!(context.contains("[00]"));
            }
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn skip_past_end_is_fatal() {
        let bytes = [0u8; 3];
        let mut r = FifoReader::new(&bytes, ByteOrder::Big);
        assert!(r.skip(4).is_err());
        assert!(r.skip(3).is_ok());
    }
}
