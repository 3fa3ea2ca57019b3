//! `toggle.json`: canonical name, metric, type and direction of toggle scopes.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::NcdbResult;
use crate::meta::{json_entries, read_json_entries, scope_at};
use crate::models::{CoverageDb, ScopeId, ScopeType, ToggleDir, ToggleInfo, ToggleMetric, ToggleType};

pub const MEMBER: &str = "toggle.json";
const VERSION: u64 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ToggleEntry {
    idx: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    canonical: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metric: Option<u64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    toggle_type: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dir: Option<u64>,
}

fn entry_for(idx: usize, name: &str, info: &ToggleInfo) -> Option<ToggleEntry> {
    let defaults = ToggleInfo::default();
    let entry = ToggleEntry {
        idx: idx as u64,
        canonical: info.canonical.clone().filter(|c| c != name),
        metric: (info.metric != defaults.metric).then(|| info.metric.code()),
        toggle_type: (info.toggle_type != defaults.toggle_type).then(|| info.toggle_type.code()),
        dir: (info.dir != defaults.dir).then(|| info.dir.code()),
    };
    let changed = entry.canonical.is_some()
        || entry.metric.is_some()
        || entry.toggle_type.is_some()
        || entry.dir.is_some();
    changed.then_some(entry)
}

pub fn serialize(db: &CoverageDb, order: &[ScopeId]) -> NcdbResult<Option<Vec<u8>>> {
    let entries: Vec<ToggleEntry> = order
        .iter()
        .enumerate()
        .filter_map(|(idx, &id)| {
            let node = db.scope(id);
            if node.scope_type != ScopeType::Toggle {
                return None;
            }
            entry_for(idx, &node.name, node.toggle.as_ref()?)
        })
        .collect();
    json_entries(VERSION, &entries)
}

pub fn apply(db: &mut CoverageDb, order: &[ScopeId], data: &[u8]) -> NcdbResult<()> {
    for entry in read_json_entries::<ToggleEntry>(MEMBER, VERSION, data)? {
        let id = scope_at(order, entry.idx)?;
        let node = db.scope_mut(id);
        if node.scope_type != ScopeType::Toggle {
            warn!(idx = entry.idx, name = %node.name, "toggle entry on non-toggle scope");
            continue;
        }
        let info = node.toggle.get_or_insert_with(ToggleInfo::default);
        if let Some(canonical) = entry.canonical {
            info.canonical = Some(canonical);
        }
        if let Some(code) = entry.metric {
            info.metric = ToggleMetric::from_code(code)?;
        }
        if let Some(code) = entry.toggle_type {
            info.toggle_type = ToggleType::from_code(code)?;
        }
        if let Some(code) = entry.dir {
            info.dir = ToggleDir::from_code(code)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::dfs::dfs_scopes;

    #[test]
    fn test_only_non_default_fields_written() {
        let mut db = CoverageDb::new();
        let a = db.create_scope(None, "clk", ScopeType::Toggle);
        let b = db.create_scope(None, "data", ScopeType::Toggle);
        db.scope_mut(a).toggle = Some(ToggleInfo::default());
        db.scope_mut(b).toggle = Some(ToggleInfo {
            canonical: Some("top.u_core.data".into()),
            dir: ToggleDir::In,
            ..ToggleInfo::default()
        });
        let order = dfs_scopes(&db);
        let bytes = serialize(&db, &order).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let entries = json["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["idx"], 1);
        assert_eq!(entries[0]["dir"], 2);
        assert!(entries[0].get("metric").is_none());

        let mut fresh = db.clone();
        fresh.scope_mut(b).toggle = None;
        apply(&mut fresh, &order, &bytes).unwrap();
        assert_eq!(fresh.scope(b).toggle, db.scope(b).toggle);
    }

    #[test]
    fn test_canonical_equal_to_name_is_default() {
        let mut db = CoverageDb::new();
        let a = db.create_scope(None, "clk", ScopeType::Toggle);
        db.scope_mut(a).toggle = Some(ToggleInfo {
            canonical: Some("clk".into()),
            ..ToggleInfo::default()
        });
        assert!(serialize(&db, &dfs_scopes(&db)).unwrap().is_none());
    }

    #[test]
    fn test_bad_metric_code() {
        let mut db = CoverageDb::new();
        db.create_scope(None, "clk", ScopeType::Toggle);
        let order = dfs_scopes(&db);
        let data = br#"{"version":1,"entries":[{"idx":0,"metric":42}]}"#;
        assert!(apply(&mut db, &order, data).is_err());
    }
}
