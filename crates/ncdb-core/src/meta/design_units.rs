//! `design_units.json`: name index of design-unit scopes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{NcdbError, NcdbResult};
use crate::meta::{json_version, scope_at};
use crate::models::{CoverageDb, ScopeId};

pub const MEMBER: &str = "design_units.json";
const VERSION: u64 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct UnitEntry {
    name: String,
    idx: u64,
    #[serde(rename = "type")]
    scope_type: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Units {
    version: u64,
    #[serde(default)]
    units: Vec<UnitEntry>,
}

pub fn serialize(db: &CoverageDb, order: &[ScopeId]) -> NcdbResult<Option<Vec<u8>>> {
    let units: Vec<UnitEntry> = order
        .iter()
        .enumerate()
        .filter(|&(_, &id)| db.scope(id).scope_type.is_design_unit())
        .map(|(idx, &id)| UnitEntry {
            name: db.scope(id).name.clone(),
            idx: idx as u64,
            scope_type: db.scope(id).scope_type.code(),
        })
        .collect();
    if units.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_vec(&Units {
        version: VERSION,
        units,
    })?))
}

/// Install the stored index as `db.du_index`; an absent member leaves the
/// database on its DFS-scan fallback.
pub fn apply(db: &mut CoverageDb, order: &[ScopeId], data: &[u8]) -> NcdbResult<()> {
    if data.is_empty() {
        return Ok(());
    }
    let version = json_version(data)?;
    if version != VERSION {
        return Err(NcdbError::unsupported(MEMBER, version));
    }
    let payload: Units = serde_json::from_slice(data)?;
    let mut index = IndexMap::with_capacity(payload.units.len());
    for unit in payload.units {
        let id = scope_at(order, unit.idx)?;
        let node = db.scope(id);
        if !node.scope_type.is_design_unit() || node.name != unit.name {
            warn!(idx = unit.idx, name = %unit.name, "design unit entry does not match scope");
            continue;
        }
        index.insert(unit.name, id);
    }
    db.du_index = Some(index);
    Ok(())
}
