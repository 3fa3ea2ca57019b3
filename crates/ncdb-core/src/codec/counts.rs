//! Hit-count array (`counts.bin`).
//!
//! Layout: one mode byte, varint count, then either `count` little-endian
//! `u32`s or `count` back-to-back varints.

use tracing::debug;

use crate::codec::varint::{decode_varints, encode_varints, write_varint, ByteReader};
use crate::errors::{NcdbError, NcdbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountsMode {
    FixedU32 = 0,
    Varint = 1,
}

impl CountsMode {
    fn from_byte(b: u8) -> NcdbResult<Self> {
        match b {
            0 => Ok(CountsMode::FixedU32),
            1 => Ok(CountsMode::Varint),
            other => Err(NcdbError::InvalidData(format!("unknown counts mode {other}"))),
        }
    }
}

/// Mode the encoder picks for `counts`: varint when any value needs more
/// than 32 bits or when it is strictly smaller than the fixed layout.
pub fn choose_mode(counts: &[u64], varint_bytes: usize) -> CountsMode {
    let has_large = counts.iter().any(|&c| c > u32::MAX as u64);
    if has_large || varint_bytes < counts.len() * 4 {
        CountsMode::Varint
    } else {
        CountsMode::FixedU32
    }
}

pub fn encode_counts(counts: &[u64]) -> Vec<u8> {
    let varint_payload = encode_varints(counts);
    let mode = choose_mode(counts, varint_payload.len());
    debug!(
        count = counts.len(),
        varint_bytes = varint_payload.len(),
        ?mode,
        "encoding counts"
    );

    let mut out = Vec::with_capacity(varint_payload.len().max(counts.len() * 4) + 11);
    out.push(mode as u8);
    write_varint(&mut out, counts.len() as u64);
    match mode {
        CountsMode::Varint => out.extend_from_slice(&varint_payload),
        CountsMode::FixedU32 => {
            for &c in counts {
                // choose_mode guarantees every value fits
                out.extend_from_slice(&(c as u32).to_le_bytes());
            }
        }
    }
    out
}

pub fn decode_counts(data: &[u8]) -> NcdbResult<Vec<u64>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = ByteReader::new(data);
    let mode = CountsMode::from_byte(reader.byte()?)?;
    let count = reader.varint_usize()?;

    match mode {
        CountsMode::Varint => {
            let payload = reader.rest();
            // Every byte below 0x80 means every value is a one-byte varint.
            if payload.len() >= count && payload[..count].iter().all(|&b| b < 0x80) {
                return Ok(payload[..count].iter().map(|&b| b as u64).collect());
            }
            let (values, _) = decode_varints(data, count, reader.position())?;
            Ok(values)
        }
        CountsMode::FixedU32 => {
            let needed = count
                .checked_mul(4)
                .ok_or_else(|| NcdbError::InvalidData("counts length overflows".to_string()))?;
            let raw = reader.bytes(needed)?;
            Ok(raw
                .chunks_exact(4)
                .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]) as u64)
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_round_trip() {
        let enc = encode_counts(&[]);
        assert_eq!(enc, vec![CountsMode::FixedU32 as u8, 0]);
        assert_eq!(decode_counts(&enc).unwrap(), Vec::<u64>::new());
        assert_eq!(decode_counts(&[]).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn test_small_counts_use_varint_fast_path() {
        let counts = vec![0u64; 1000];
        let enc = encode_counts(&counts);
        assert_eq!(enc[0], CountsMode::Varint as u8);
        assert_eq!(enc.len(), 1 + 2 + 1000);
        assert_eq!(decode_counts(&enc).unwrap(), counts);
    }

    #[test]
    fn test_large_varied_counts_use_fixed() {
        let counts: Vec<u64> = (0..64).map(|i| 0x1000_0000 + i * 7919).collect();
        let enc = encode_counts(&counts);
        assert_eq!(enc[0], CountsMode::FixedU32 as u8);
        assert_eq!(decode_counts(&enc).unwrap(), counts);
    }

    #[test]
    fn test_values_above_u32_force_varint() {
        let counts = vec![1u64 << 33, 5, u64::MAX];
        let enc = encode_counts(&counts);
        assert_eq!(enc[0], CountsMode::Varint as u8);
        assert_eq!(decode_counts(&enc).unwrap(), counts);
    }

    #[test]
    fn test_tie_prefers_fixed() {
        // Each value needs exactly four varint bytes: 4n == 4n.
        let counts = vec![1u64 << 21; 3];
        assert_eq!(choose_mode(&counts, 12), CountsMode::FixedU32);
    }

    #[test]
    fn test_mixed_general_path() {
        let counts = vec![5, 10, 0, 300, 1, 128];
        assert_eq!(decode_counts(&encode_counts(&counts)).unwrap(), counts);
    }

    #[test]
    fn test_fixed_truncated() {
        let mut enc = encode_counts(&(0..8).map(|i| 0xFFFF_0000u64 + i).collect::<Vec<_>>());
        enc.truncate(enc.len() - 2);
        assert!(matches!(
            decode_counts(&enc),
            Err(NcdbError::TruncatedInput(_))
        ));
    }

    #[test]
    fn test_unknown_mode() {
        assert!(matches!(
            decode_counts(&[7, 0]),
            Err(NcdbError::InvalidData(_))
        ));
    }
}
