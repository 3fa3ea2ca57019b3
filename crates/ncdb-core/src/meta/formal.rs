//! `formal.bin`: per-coveritem formal verification results.
//!
//! Layout: varint version, varint entry count, then per entry the delta of
//! the flat coveritem index, the status code, the proof radius and the
//! witness path as `len + 1` followed by its bytes (`0` means no witness).

use crate::codec::varint::{write_varint, ByteReader};
use crate::config::MAX_STRING_LEN;
use crate::errors::{NcdbError, NcdbResult};
use crate::meta::{coveritem_at, read_binary_header};
use crate::models::{CoverageDb, FormalResult, FormalStatus, ScopeId};

pub const MEMBER: &str = "formal.bin";
const VERSION: u64 = 1;

pub fn serialize(db: &CoverageDb, flat: &[(ScopeId, usize)]) -> NcdbResult<Option<Vec<u8>>> {
    let entries: Vec<(usize, &FormalResult)> = flat
        .iter()
        .enumerate()
        .filter_map(|(idx, &(id, pos))| {
            let formal = db.scope(id).coveritems[pos].formal.as_ref()?;
            (!formal.is_default()).then_some((idx, formal))
        })
        .collect();
    if entries.is_empty() {
        return Ok(None);
    }

    let mut out = Vec::new();
    write_varint(&mut out, VERSION);
    write_varint(&mut out, entries.len() as u64);
    let mut prev = 0;
    for (idx, formal) in entries {
        write_varint(&mut out, (idx - prev) as u64);
        write_varint(&mut out, formal.status.code());
        write_varint(&mut out, formal.radius);
        match &formal.witness {
            Some(w) => {
                write_varint(&mut out, w.len() as u64 + 1);
                out.extend_from_slice(w.as_bytes());
            }
            None => write_varint(&mut out, 0),
        }
        prev = idx;
    }
    Ok(Some(out))
}

pub fn apply(db: &mut CoverageDb, flat: &[(ScopeId, usize)], data: &[u8]) -> NcdbResult<()> {
    if data.is_empty() {
        return Ok(());
    }
    let mut reader = ByteReader::new(data);
    let count = read_binary_header(MEMBER, VERSION, &mut reader)?;
    let mut idx = 0u64;
    for _ in 0..count {
        idx = idx
            .checked_add(reader.varint()?)
            .ok_or_else(|| NcdbError::InvalidData("formal index overflows".to_string()))?;
        let status = FormalStatus::from_code(reader.varint()?)?;
        let radius = reader.varint()?;
        let witness = match reader.varint()? {
            0 => None,
            n if n - 1 > MAX_STRING_LEN => {
                return Err(NcdbError::InvalidData(format!(
                    "witness path of {} bytes",
                    n - 1
                )))
            }
            n => {
                let raw = reader.bytes((n - 1) as usize)?;
                Some(
                    std::str::from_utf8(raw)
                        .map_err(|e| NcdbError::InvalidData(format!("witness path: {e}")))?
                        .to_string(),
                )
            }
        };
        let (id, pos) = coveritem_at(flat, idx)?;
        db.scope_mut(id).coveritems[pos].formal = Some(FormalResult {
            status,
            radius,
            witness,
        });
    }
    Ok(())
}
