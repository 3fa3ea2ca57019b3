//! `tags.json`: free-form scope tags.

use serde::{Deserialize, Serialize};

use crate::errors::NcdbResult;
use crate::meta::{json_entries, read_json_entries, scope_at};
use crate::models::{CoverageDb, ScopeId};

pub const MEMBER: &str = "tags.json";
const VERSION: u64 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct TagEntry {
    idx: u64,
    tags: Vec<String>,
}

pub fn serialize(db: &CoverageDb, order: &[ScopeId]) -> NcdbResult<Option<Vec<u8>>> {
    let entries: Vec<TagEntry> = order
        .iter()
        .enumerate()
        .filter(|(_, &id)| !db.scope(id).tags.is_empty())
        .map(|(idx, &id)| TagEntry {
            idx: idx as u64,
            tags: db.scope(id).tags.clone(),
        })
        .collect();
    json_entries(VERSION, &entries)
}

pub fn apply(db: &mut CoverageDb, order: &[ScopeId], data: &[u8]) -> NcdbResult<()> {
    for entry in read_json_entries::<TagEntry>(MEMBER, VERSION, data)? {
        let id = scope_at(order, entry.idx)?;
        let tags = &mut db.scope_mut(id).tags;
        for tag in entry.tags {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    Ok(())
}
