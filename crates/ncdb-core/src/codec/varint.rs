//! Unsigned LEB128 varints.

use crate::errors::{NcdbError, NcdbResult};

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Number of bytes `value` occupies once encoded.
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(varint_len(value));
    write_varint(&mut out, value);
    out
}

/// Decode one varint at `offset`; returns the value and the offset just past it.
pub fn decode_varint(buf: &[u8], offset: usize) -> NcdbResult<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    let mut pos = offset;
    loop {
        let byte = *buf
            .get(pos)
            .ok_or_else(|| NcdbError::truncated("varint runs past end of buffer"))?;
        pos += 1;
        let payload = (byte & 0x7F) as u64;
        if shift >= 64 || (shift == 63 && payload > 1) {
            return Err(NcdbError::InvalidData("varint overflows u64".to_string()));
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok((result, pos));
        }
        shift += 7;
    }
}

pub fn encode_varints(values: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len());
    for &v in values {
        write_varint(&mut out, v);
    }
    out
}

/// Decode `count` back-to-back varints starting at `offset`.
pub fn decode_varints(buf: &[u8], count: usize, offset: usize) -> NcdbResult<(Vec<u64>, usize)> {
    // A varint is at least one byte, so cap the preallocation by what is left.
    let mut values = Vec::with_capacity(count.min(buf.len().saturating_sub(offset)));
    let mut pos = offset;
    for _ in 0..count {
        let (v, next) = decode_varint(buf, pos)?;
        values.push(v);
        pos = next;
    }
    Ok((values, pos))
}

/// Sequential reader over a byte slice used by the binary member decoders.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn varint(&mut self) -> NcdbResult<u64> {
        let (v, next) = decode_varint(self.buf, self.pos)?;
        self.pos = next;
        Ok(v)
    }

    /// Varint that must fit a `usize` (counts, lengths, indices).
    pub fn varint_usize(&mut self) -> NcdbResult<usize> {
        let v = self.varint()?;
        usize::try_from(v)
            .map_err(|_| NcdbError::InvalidData(format!("length {v} does not fit usize")))
    }

    pub fn byte(&mut self) -> NcdbResult<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| NcdbError::truncated("expected a byte"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn bytes(&mut self, len: usize) -> NcdbResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| NcdbError::truncated("byte run past end of buffer"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos.min(self.buf.len())..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_single_byte() {
        assert_eq!(encode_varint(0), vec![0x00]);
        assert_eq!(encode_varint(127), vec![0x7F]);
        assert_eq!(encode_varint(128), vec![0x80, 0x01]);
        assert_eq!(encode_varint(300), vec![0xAC, 0x02]);
    }

    #[test]
    fn test_round_trip_boundaries() {
        for v in [0, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, 1 << 35, u64::MAX] {
            let enc = encode_varint(v);
            assert_eq!(enc.len(), varint_len(v));
            assert_eq!(decode_varint(&enc, 0).unwrap(), (v, enc.len()));
        }
        assert_eq!(encode_varint(u64::MAX).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn test_decode_at_offset() {
        let mut buf = vec![0xFF];
        buf.extend(encode_varint(1000));
        assert_eq!(decode_varint(&buf, 1).unwrap(), (1000, 3));
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(
            decode_varint(&[0x80, 0x80], 0),
            Err(NcdbError::TruncatedInput(_))
        ));
        assert!(matches!(
            decode_varint(&[], 0),
            Err(NcdbError::TruncatedInput(_))
        ));
    }

    #[test]
    fn test_overflow_rejected() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x02];
        assert!(matches!(
            decode_varint(&buf, 0),
            Err(NcdbError::InvalidData(_))
        ));
    }

    #[test]
    fn test_bulk_no_framing() {
        let values = vec![0, 5, 200, 70_000, u64::MAX];
        let enc = encode_varints(&values);
        let expected_len: usize = values.iter().map(|&v| varint_len(v)).sum();
        assert_eq!(enc.len(), expected_len);
        let (dec, end) = decode_varints(&enc, values.len(), 0).unwrap();
        assert_eq!(dec, values);
        assert_eq!(end, enc.len());
    }

    #[test]
    fn test_bulk_count_exceeds_buffer() {
        let enc = encode_varints(&[1, 2]);
        assert!(decode_varints(&enc, 3, 0).is_err());
    }

    #[test]
    fn test_byte_reader() {
        let mut buf = vec![0x01];
        buf.extend(encode_varint(500));
        buf.extend(b"abc");
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.byte().unwrap(), 1);
        assert_eq!(r.varint().unwrap(), 500);
        assert_eq!(r.bytes(3).unwrap(), b"abc");
        assert!(r.is_empty());
        assert!(r.bytes(1).is_err());
    }
}
