//! `coveritem_flags.bin`: non-zero coveritem flags, delta-indexed over the
//! flat coveritem order.

use crate::codec::varint::{write_varint, ByteReader};
use crate::errors::{NcdbError, NcdbResult};
use crate::meta::{coveritem_at, read_binary_header};
use crate::models::{CoverageDb, ScopeId};

pub const MEMBER: &str = "coveritem_flags.bin";
const VERSION: u64 = 1;

pub fn serialize(db: &CoverageDb, flat: &[(ScopeId, usize)]) -> NcdbResult<Option<Vec<u8>>> {
    let entries: Vec<(usize, u64)> = flat
        .iter()
        .enumerate()
        .map(|(idx, &(id, pos))| (idx, db.scope(id).coveritems[pos].flags))
        .filter(|&(_, flags)| flags != 0)
        .collect();
    if entries.is_empty() {
        return Ok(None);
    }
    let mut out = Vec::with_capacity(2 + entries.len() * 2);
    write_varint(&mut out, VERSION);
    write_varint(&mut out, entries.len() as u64);
    let mut prev = 0;
    for (idx, flags) in entries {
        write_varint(&mut out, (idx - prev) as u64);
        write_varint(&mut out, flags);
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
            .ok_or_else(|| NcdbError::InvalidData("coveritem index overflows".to_string()))?;
        let flags = reader.varint()?;
        let (id, pos) = coveritem_at(flat, idx)?;
        db.scope_mut(id).coveritems[pos].flags = flags;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::dfs::flat_coveritems;
    use crate::models::{CoverType, ScopeType};

    #[test]
    fn test_sparse_round_trip() {
        let mut db = CoverageDb::new();
        let cp = db.create_scope(None, "cp", ScopeType::Coverpoint);
        for name in ["a", "b", "c", "d"] {
            db.create_next_cover(cp, name, CoverType::CvgBin, 0);
        }
        db.scope_mut(cp).coveritems[1].flags = 0x10;
        db.scope_mut(cp).coveritems[3].flags = 0x4000_0000;
        let flat = flat_coveritems(&db);
        let bytes = serialize(&db, &flat).unwrap().unwrap();
        // version, count, (delta 1, flags), (delta 2, flags...)
        assert_eq!(&bytes[..4], &[1, 2, 1, 0x10]);
        assert_eq!(bytes[4], 2);

        let mut fresh = db.clone();
        for ci in &mut fresh.scope_mut(cp).coveritems {
            ci.flags = 0;
        }
        apply(&mut fresh, &flat, &bytes).unwrap();
        assert_eq!(fresh, db);
    }

    #[test]
    fn test_all_zero_no_member() {
        let mut db = CoverageDb::new();
        let cp = db.create_scope(None, "cp", ScopeType::Coverpoint);
        db.create_next_cover(cp, "a", CoverType::CvgBin, 0);
        assert!(serialize(&db, &flat_coveritems(&db)).unwrap().is_none());
    }

    #[test]
    fn test_unsupported_version() {
        let mut db = CoverageDb::new();
        assert!(matches!(
            apply(&mut db, &[], &[2, 0]),
            Err(NcdbError::UnsupportedVersion { version: 2, .. })
        ));
    }
}
