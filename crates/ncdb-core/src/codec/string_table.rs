//! Deduplicated string pool (`strings.bin`).
//!
//! Layout: varint count, then for each string a varint byte length followed
//! by its UTF-8 bytes, in insertion order. Index 0 is always `""`.

use std::collections::HashMap;

use crate::codec::varint::{write_varint, ByteReader};
use crate::config::MAX_STRING_LEN;
use crate::errors::{NcdbError, NcdbResult};

#[derive(Debug, Clone)]
pub struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, u32>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    pub fn new() -> Self {
        let mut table = Self {
            strings: Vec::new(),
            index: HashMap::new(),
        };
        table.add("");
        table
    }

    /// Index of `s`, appending it first if it is not yet present.
    pub fn add(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        idx
    }

    pub fn get(&self, idx: u64) -> NcdbResult<&str> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.strings.get(i))
            .map(String::as_str)
            .ok_or(NcdbError::IndexOutOfRange {
                what: "string table",
                index: idx,
                len: self.strings.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let payload: usize = self.strings.iter().map(|s| s.len() + 1).sum();
        let mut out = Vec::with_capacity(payload + 5);
        write_varint(&mut out, self.strings.len() as u64);
        for s in &self.strings {
            write_varint(&mut out, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        out
    }

    /// Rebuild a table so every index assigned at encode time is preserved.
    pub fn from_bytes(data: &[u8]) -> NcdbResult<Self> {
        let mut reader = ByteReader::new(data);
        let count = reader.varint_usize()?;
        let mut table = Self {
            strings: Vec::with_capacity(count.min(data.len())),
            index: HashMap::with_capacity(count.min(data.len())),
        };
        for _ in 0..count {
            let len = reader.varint()?;
            if len > MAX_STRING_LEN {
                return Err(NcdbError::InvalidData(format!(
                    "string of {len} bytes exceeds limit"
                )));
            }
            let raw = reader.bytes(len as usize)?;
            let s = std::str::from_utf8(raw)
                .map_err(|e| NcdbError::InvalidData(format!("string table entry: {e}")))?;
            let idx = table.strings.len() as u32;
            table.index.entry(s.to_string()).or_insert(idx);
            table.strings.push(s.to_string());
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_zero_is_empty() {
        let table = StringTable::new();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).unwrap(), "");
    }

    #[test]
    fn test_add_deduplicates() {
        let mut table = StringTable::new();
        let a = table.add("top");
        let b = table.add("cg");
        assert_eq!(table.add("top"), a);
        assert_eq!(table.add(""), 0);
        assert_ne!(a, b);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_serialize_round_trip_keeps_indices() {
        let mut table = StringTable::new();
        let names = ["top", "cg1", "cp1", "bin\u{e9}", "top"];
        let ids: Vec<u32> = names.iter().map(|n| table.add(n)).collect();
        let restored = StringTable::from_bytes(&table.serialize()).unwrap();
        for (name, id) in names.iter().zip(ids) {
            assert_eq!(restored.get(id as u64).unwrap(), *name);
        }
        assert_eq!(restored.len(), table.len());
    }

    #[test]
    fn test_layout() {
        let mut table = StringTable::new();
        table.add("ab");
        assert_eq!(table.serialize(), vec![2, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_get_out_of_range() {
        let table = StringTable::new();
        assert!(matches!(
            table.get(7),
            Err(NcdbError::IndexOutOfRange { index: 7, len: 1, .. })
        ));
    }

    #[test]
    fn test_truncated_bytes() {
        assert!(matches!(
            StringTable::from_bytes(&[2, 0, 5, b'a']),
            Err(NcdbError::TruncatedInput(_))
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(matches!(
            StringTable::from_bytes(&[1, 1, 0xFF]),
            Err(NcdbError::InvalidData(_))
        ));
    }
}
