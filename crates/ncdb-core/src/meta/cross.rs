//! `cross.json`: which sibling coverpoints each cross scope crosses.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::NcdbResult;
use crate::meta::{json_entries, read_json_entries, scope_at};
use crate::models::{CoverageDb, ScopeId, ScopeType};

pub const MEMBER: &str = "cross.json";
const VERSION: u64 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CrossEntry {
    idx: u64,
    crossed: Vec<String>,
}

pub fn serialize(db: &CoverageDb, order: &[ScopeId]) -> NcdbResult<Option<Vec<u8>>> {
    let entries: Vec<CrossEntry> = order
        .iter()
        .enumerate()
        .filter_map(|(idx, &id)| {
            let node = db.scope(id);
            if node.scope_type != ScopeType::Cross || node.crossed.is_empty() {
                return None;
            }
            Some(CrossEntry {
                idx: idx as u64,
                crossed: node
                    .crossed
                    .iter()
                    .map(|&cp| db.scope(cp).name.clone())
                    .collect(),
            })
        })
        .collect();
    json_entries(VERSION, &entries)
}

/// Resolve crossed names against the siblings of each cross scope.
pub fn apply(db: &mut CoverageDb, order: &[ScopeId], data: &[u8]) -> NcdbResult<()> {
    for entry in read_json_entries::<CrossEntry>(MEMBER, VERSION, data)? {
        let id = scope_at(order, entry.idx)?;
        if db.scope(id).scope_type != ScopeType::Cross {
            warn!(idx = entry.idx, "cross entry on non-cross scope");
            continue;
        }
        let siblings = db.children(db.scope(id).parent);
        let mut resolved = Vec::with_capacity(entry.crossed.len());
        for name in &entry.crossed {
            match siblings
                .iter()
                .copied()
                .find(|&s| s != id && db.scope(s).name == *name)
            {
                Some(cp) => resolved.push(cp),
                None => warn!(cross = %db.scope(id).name, coverpoint = %name, "crossed coverpoint not found"),
            }
        }
        db.scope_mut(id).crossed = resolved;
    }
    Ok(())
}
