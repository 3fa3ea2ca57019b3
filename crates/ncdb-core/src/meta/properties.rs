//! `properties.json`: typed scope and coveritem properties.
//!
//! Each entry is `(kind, idx, key, type, value)`. Scope entries index the
//! scope DFS order, coveritem entries the flat coveritem order.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{NcdbError, NcdbResult};
use crate::meta::{coveritem_at, json_entries, read_json_entries, scope_at};
use crate::models::{CoverageDb, PropertyKey, PropertyMap, ScopeId, Value};

pub const MEMBER: &str = "properties.json";
const VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Target {
    Scope,
    Coveritem,
}

#[derive(Debug, Serialize, Deserialize)]
struct PropertyEntry {
    kind: Target,
    idx: u64,
    key: i64,
    #[serde(rename = "type")]
    value_type: String,
    value: serde_json::Value,
}

fn entries_for(kind: Target, idx: usize, props: &PropertyMap, out: &mut Vec<PropertyEntry>) -> NcdbResult<()> {
    for (key, value) in props {
        let (domain, code) = key.code();
        out.push(PropertyEntry {
            kind,
            idx: idx as u64,
            key: code,
            value_type: domain.to_string(),
            value: serde_json::to_value(value)?,
        });
    }
    Ok(())
}

pub fn serialize(
    db: &CoverageDb,
    order: &[ScopeId],
    flat: &[(ScopeId, usize)],
) -> NcdbResult<Option<Vec<u8>>> {
    let mut entries = Vec::new();
    for (idx, &id) in order.iter().enumerate() {
        entries_for(Target::Scope, idx, &db.scope(id).properties, &mut entries)?;
    }
    for (idx, &(id, pos)) in flat.iter().enumerate() {
        entries_for(
            Target::Coveritem,
            idx,
            &db.scope(id).coveritems[pos].properties,
            &mut entries,
        )?;
    }
    json_entries(VERSION, &entries)
}

fn decode_value(entry: &PropertyEntry) -> NcdbResult<Value> {
    let bad = || {
        NcdbError::InvalidData(format!(
            "property {} declared {} holds {}",
            entry.key, entry.value_type, entry.value
        ))
    };
    match entry.value_type.as_str() {
        "str" => entry.value.as_str().map(Value::from).ok_or_else(bad),
        "int" => entry.value.as_i64().map(Value::Int).ok_or_else(bad),
        "real" => entry.value.as_f64().map(Value::Real).ok_or_else(bad),
        other => Err(NcdbError::InvalidData(format!(
            "unknown property type '{other}'"
        ))),
    }
}

pub fn apply(
    db: &mut CoverageDb,
    order: &[ScopeId],
    flat: &[(ScopeId, usize)],
    data: &[u8],
) -> NcdbResult<()> {
    for entry in read_json_entries::<PropertyEntry>(MEMBER, VERSION, data)? {
        let value = decode_value(&entry)?;
        let Some(key) = PropertyKey::from_code(&entry.value_type, entry.key) else {
            warn!(key = entry.key, kind = %entry.value_type, "skipping unknown property");
            continue;
        };
        let props = match entry.kind {
            Target::Scope => {
                let id = scope_at(order, entry.idx)?;
                &mut db.scope_mut(id).properties
            }
            Target::Coveritem => {
                let (id, pos) = coveritem_at(flat, entry.idx)?;
                &mut db.scope_mut(id).coveritems[pos].properties
            }
        };
        props.insert(key, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::dfs::{dfs_scopes, flat_coveritems};
    use crate::models::{CoverType, ScopeType};

    #[test]
    fn test_round_trip_each_domain() {
        let mut db = CoverageDb::new();
        let br = db.create_scope(None, "if_12", ScopeType::Branch);
        db.create_next_cover(br, "true", CoverType::BranchBin, 1);
        db.create_next_cover(br, "false", CoverType::BranchBin, 0);
        {
            let n = db.scope_mut(br);
            n.properties.insert(PropertyKey::Comment, Value::from("hot path"));
            n.properties.insert(PropertyKey::BranchHasElse, Value::Int(1));
            n.properties.insert(PropertyKey::CvgWeight, Value::Real(2.5));
            n.coveritems[1]
                .properties
                .insert(PropertyKey::StmtIndex, Value::Int(3));
        }
        let order = dfs_scopes(&db);
        let flat = flat_coveritems(&db);
        let bytes = serialize(&db, &order, &flat).unwrap().unwrap();

        let mut fresh = db.clone();
        fresh.scope_mut(br).properties.clear();
        fresh.scope_mut(br).coveritems[1].properties.clear();
        apply(&mut fresh, &order, &flat, &bytes).unwrap();
        assert_eq!(fresh, db);
    }

    #[test]
    fn test_no_properties_no_member() {
        let mut db = CoverageDb::new();
        db.create_scope(None, "top", ScopeType::Instance);
        let order = dfs_scopes(&db);
        assert!(serialize(&db, &order, &[]).unwrap().is_none());
    }

    #[test]
    fn test_unknown_key_skipped() {
        let mut db = CoverageDb::new();
        let top = db.create_scope(None, "top", ScopeType::Instance);
        let order = dfs_scopes(&db);
        let data = br#"{"version":1,"entries":[{"kind":"scope","idx":0,"key":999,"type":"str","value":"x"}]}"#;
        apply(&mut db, &order, &[], data).unwrap();
        assert!(db.scope(top).properties.is_empty());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut db = CoverageDb::new();
        db.create_scope(None, "top", ScopeType::Instance);
        let order = dfs_scopes(&db);
        let data = br#"{"version":1,"entries":[{"kind":"scope","idx":0,"key":12,"type":"str","value":5}]}"#;
        assert!(matches!(
            apply(&mut db, &order, &[], data),
            Err(NcdbError::InvalidData(_))
        ));
    }
}
