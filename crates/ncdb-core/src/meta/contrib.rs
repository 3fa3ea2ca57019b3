//! `contrib/{history_index}.bin`: per-test contribution deltas.
//!
//! One member per history node with recorded hits. Layout: varint version,
//! varint entry count, then `(delta bin index, count)` pairs in ascending
//! flat coveritem order.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::codec::varint::{write_varint, ByteReader};
use crate::errors::{NcdbError, NcdbResult};
use crate::meta::read_binary_header;
use crate::models::CoverageDb;

pub const PREFIX: &str = "contrib/";
const VERSION: u64 = 1;

static MEMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^contrib/(\d+)\.bin$").unwrap());

pub fn member_name(history_idx: usize) -> String {
    format!("{PREFIX}{history_idx}.bin")
}

/// History index encoded in a member name, or `None` for anything that is
/// not a contribution member.
pub fn parse_member_name(name: &str) -> Option<usize> {
    MEMBER_RE
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn encode_bins(bins: &BTreeMap<usize, u64>) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + bins.len() * 2);
    write_varint(&mut out, VERSION);
    write_varint(&mut out, bins.len() as u64);
    let mut prev = 0;
    for (&bin, &count) in bins {
        write_varint(&mut out, (bin - prev) as u64);
        write_varint(&mut out, count);
        prev = bin;
    }
    out
}

pub fn decode_bins(data: &[u8]) -> NcdbResult<BTreeMap<usize, u64>> {
    let mut reader = ByteReader::new(data);
    let count = read_binary_header(PREFIX, VERSION, &mut reader)?;
    let mut bins = BTreeMap::new();
    let mut bin = 0usize;
    for _ in 0..count {
        bin = bin
            .checked_add(reader.varint_usize()?)
            .ok_or_else(|| NcdbError::InvalidData("contribution bin overflows".to_string()))?;
        let hits = reader.varint()?;
        *bins.entry(bin).or_insert(0) += hits;
    }
    Ok(bins)
}

/// One `(member name, bytes)` pair per history node with non-empty contributions.
pub fn serialize(db: &CoverageDb) -> Vec<(String, Vec<u8>)> {
    db.contributions
        .iter()
        .filter(|(_, bins)| !bins.is_empty())
        .map(|(&hist, bins)| (member_name(hist), encode_bins(bins)))
        .collect()
}

/// Merge every contribution member into `db.contributions`. History must
/// already be loaded; `coveritems` is the length of the flat coveritem order.
pub fn apply<'a, I>(db: &mut CoverageDb, coveritems: usize, members: I) -> NcdbResult<()>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    for (name, data) in members {
        let Some(hist) = parse_member_name(name) else {
            warn!(member = name, "skipping malformed contribution member");
            continue;
        };
        if hist >= db.history.len() {
            return Err(NcdbError::IndexOutOfRange {
                what: "history",
                index: hist as u64,
                len: db.history.len(),
            });
        }
        for (bin, hits) in decode_bins(data)? {
            if bin >= coveritems {
                return Err(NcdbError::IndexOutOfRange {
                    what: "coveritem DFS",
                    index: bin as u64,
                    len: coveritems,
                });
            }
            db.record_contribution(hist, bin, hits);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HistoryNode;

    fn with_tests(n: usize) -> CoverageDb {
        let mut db = CoverageDb::new();
        for i in 0..n {
            db.add_history(HistoryNode::test(&format!("t{i}")));
        }
        db
    }

    #[test]
    fn test_member_names() {
        assert_eq!(member_name(12), "contrib/12.bin");
        assert_eq!(parse_member_name("contrib/12.bin"), Some(12));
        assert_eq!(parse_member_name("contrib/x.bin"), None);
        assert_eq!(parse_member_name("contrib/1.bin.bak"), None);
        assert_eq!(parse_member_name("attrs.json"), None);
    }

    #[test]
    fn test_delta_encoding() {
        let bins: BTreeMap<usize, u64> = [(3, 1), (4, 7), (200, 2)].into_iter().collect();
        let bytes = encode_bins(&bins);
        assert_eq!(&bytes[..6], &[1, 3, 3, 1, 1, 7]);
        assert_eq!(decode_bins(&bytes).unwrap(), bins);
    }

    #[test]
    fn test_round_trip_through_db() {
        let mut db = with_tests(3);
        db.record_contribution(0, 1, 5);
        db.record_contribution(2, 0, 1);
        db.record_contribution(2, 4, 9);
        let members = serialize(&db);
        assert_eq!(members.len(), 2);

        let mut fresh = with_tests(3);
        apply(
            &mut fresh,
            5,
            members.iter().map(|(n, d)| (n.as_str(), d.as_slice())),
        )
        .unwrap();
        assert_eq!(fresh.contributions, db.contributions);
    }

    #[test]
    fn test_bin_out_of_range() {
        let mut db = with_tests(1);
        let bins: BTreeMap<usize, u64> = [(8, 1)].into_iter().collect();
        let data = encode_bins(&bins);
        let err = apply(&mut db, 4, [("contrib/0.bin", data.as_slice())]).unwrap_err();
        assert!(matches!(err, NcdbError::IndexOutOfRange { index: 8, .. }));
    }

    #[test]
    fn test_unknown_history_index() {
        let mut db = with_tests(1);
        let data = encode_bins(&BTreeMap::new());
        assert!(apply(&mut db, 4, [("contrib/3.bin", data.as_slice())]).is_err());
    }
}
