//! Sparse metadata members.
//!
//! Every member maps DFS indices (scope order or flat coveritem order) to
//! non-default values. Writers return `None` when nothing is non-default and
//! the member is left out of the container; readers treat an empty slice as
//! an absent member.

pub mod attrs;
pub mod contrib;
pub mod coveritem_flags;
pub mod cross;
pub mod design_units;
pub mod formal;
pub mod fsm;
pub mod properties;
pub mod tags;
pub mod toggle;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::varint::ByteReader;
use crate::errors::{NcdbError, NcdbResult};
use crate::models::ScopeId;

#[derive(Serialize)]
struct EnvelopeOut<'a, T: Serialize> {
    version: u64,
    entries: &'a [T],
}

#[derive(Deserialize)]
struct VersionProbe {
    #[serde(default = "legacy_version")]
    version: u64,
}

fn legacy_version() -> u64 {
    1
}

#[derive(Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct EnvelopeIn<T> {
    #[serde(default = "Vec::new")]
    entries: Vec<T>,
}

/// `{"version": v, "entries": [...]}`, or `None` when there are no entries.
pub(crate) fn json_entries<T: Serialize>(version: u64, entries: &[T]) -> NcdbResult<Option<Vec<u8>>> {
    if entries.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_vec(&EnvelopeOut { version, entries })?))
}

/// Version tag of a JSON member; a missing tag reads as version 1.
pub(crate) fn json_version(data: &[u8]) -> NcdbResult<u64> {
    Ok(serde_json::from_slice::<VersionProbe>(data)?.version)
}

/// Entries of a single-version JSON member.
pub(crate) fn read_json_entries<T: DeserializeOwned>(
    member: &str,
    supported: u64,
    data: &[u8],
) -> NcdbResult<Vec<T>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let version = json_version(data)?;
    if version != supported {
        return Err(NcdbError::unsupported(member, version));
    }
    Ok(serde_json::from_slice::<EnvelopeIn<T>>(data)?.entries)
}

/// Header of a binary sparse member: checks the version, returns the entry count.
pub(crate) fn read_binary_header(
    member: &str,
    supported: u64,
    reader: &mut ByteReader<'_>,
) -> NcdbResult<usize> {
    let version = reader.varint()?;
    if version != supported {
        return Err(NcdbError::unsupported(member, version));
    }
    reader.varint_usize()
}

pub(crate) fn scope_at(order: &[ScopeId], idx: u64) -> NcdbResult<ScopeId> {
    usize::try_from(idx)
        .ok()
        .and_then(|i| order.get(i))
        .copied()
        .ok_or(NcdbError::IndexOutOfRange {
            what: "scope DFS",
            index: idx,
            len: order.len(),
        })
}

pub(crate) fn coveritem_at<T: Copy>(flat: &[T], idx: u64) -> NcdbResult<T> {
    usize::try_from(idx)
        .ok()
        .and_then(|i| flat.get(i))
        .copied()
        .ok_or(NcdbError::IndexOutOfRange {
            what: "coveritem DFS",
            index: idx,
            len: flat.len(),
        })
}
