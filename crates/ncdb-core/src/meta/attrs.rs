//! `attrs.json`: user-defined attributes.
//!
//! Version 2 carries four sections: scopes (by DFS index), coveritems (by
//! scope DFS index and position), history nodes (by kind and index within
//! that kind) and database-global attributes. Version 1 files, which only
//! hold scope attributes under `entries`, are still read.
//!
//! Coveritem positions of a toggle pair are canonical (`0 -> 1` first), the
//! order the scope tree decodes them in, whatever order they are stored in.

use serde::{Deserialize, Serialize};

use crate::errors::{NcdbError, NcdbResult};
use crate::meta::{json_version, scope_at};
use crate::models::{
    AttrMap, CoverageDb, HistoryKind, HistoryNode, ScopeId, ScopeNode, TOGGLE_BIN_0_TO_1, TOGGLE_BIN_1_TO_0,
};

pub const MEMBER: &str = "attrs.json";
const VERSION: u64 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct ScopeAttrs {
    idx: u64,
    attrs: AttrMap,
}

#[derive(Debug, Serialize, Deserialize)]
struct CoverAttrs {
    scope_idx: u64,
    ci_idx: u64,
    attrs: AttrMap,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryAttrs {
    kind: HistoryKind,
    idx: u64,
    attrs: AttrMap,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AttrsV2 {
    version: u64,
    #[serde(default)]
    scopes: Vec<ScopeAttrs>,
    #[serde(default)]
    coveritems: Vec<CoverAttrs>,
    #[serde(default)]
    history: Vec<HistoryAttrs>,
    #[serde(default)]
    global: AttrMap,
}

#[derive(Debug, Deserialize)]
struct AttrsV1 {
    #[serde(default)]
    entries: Vec<ScopeAttrs>,
}

pub fn serialize(db: &CoverageDb, order: &[ScopeId]) -> NcdbResult<Option<Vec<u8>>> {
    let mut payload = AttrsV2 {
        version: VERSION,
        global: db.attrs.clone(),
        ..Default::default()
    };
    for (idx, &id) in order.iter().enumerate() {
        let node = db.scope(id);
        if !node.attrs.is_empty() {
            payload.scopes.push(ScopeAttrs {
                idx: idx as u64,
                attrs: node.attrs.clone(),
            });
        }
        for (pos, ci) in node.coveritems.iter().enumerate() {
            if !ci.attrs.is_empty() {
                payload.coveritems.push(CoverAttrs {
                    scope_idx: idx as u64,
                    ci_idx: canonical_position(node, pos) as u64,
                    attrs: ci.attrs.clone(),
                });
            }
        }
    }
    for kind in [HistoryKind::Test, HistoryKind::Merge] {
        for (within, (_, node)) in db.history_of_kind(kind).enumerate() {
            if !node.attrs.is_empty() {
                payload.history.push(HistoryAttrs {
                    kind,
                    idx: within as u64,
                    attrs: node.attrs.clone(),
                });
            }
        }
    }

    encode(payload)
}

fn encode(payload: AttrsV2) -> NcdbResult<Option<Vec<u8>>> {
    if payload.scopes.is_empty()
        && payload.coveritems.is_empty()
        && payload.history.is_empty()
        && payload.global.is_empty()
    {
        return Ok(None);
    }
    Ok(Some(serde_json::to_vec(&payload)?))
}

/// Decode either version into the v2 layout; empty input has no attributes.
fn parse(data: &[u8]) -> NcdbResult<AttrsV2> {
    if data.is_empty() {
        return Ok(AttrsV2::default());
    }
    match json_version(data)? {
        1 => {
            let v1: AttrsV1 = serde_json::from_slice(data)?;
            Ok(AttrsV2 {
                version: VERSION,
                scopes: v1.entries,
                ..Default::default()
            })
        }
        2 => Ok(serde_json::from_slice(data)?),
        other => Err(NcdbError::unsupported(MEMBER, other)),
    }
}

fn toggle_labels(node: &ScopeNode) -> Option<[&'static str; 2]> {
    node.is_toggle_pair().then_some([TOGGLE_BIN_0_TO_1, TOGGLE_BIN_1_TO_0])
}

fn canonical_position(node: &ScopeNode, pos: usize) -> usize {
    match toggle_labels(node) {
        Some(labels) => labels
            .iter()
            .position(|l| *l == node.coveritems[pos].name)
            .unwrap_or(pos),
        None => pos,
    }
}

fn stored_position(node: &ScopeNode, canonical: usize) -> Option<usize> {
    match toggle_labels(node) {
        Some(labels) => {
            let label = labels.get(canonical)?;
            node.coveritems.iter().position(|c| c.name == *label)
        }
        None => (canonical < node.coveritems.len()).then_some(canonical),
    }
}

/// Apply attributes; history attributes need `db.history` to be populated first.
pub fn apply(db: &mut CoverageDb, order: &[ScopeId], data: &[u8]) -> NcdbResult<()> {
    let payload = parse(data)?;
    apply_scopes(db, order, payload.scopes)?;
    for entry in payload.coveritems {
        let id = scope_at(order, entry.scope_idx)?;
        let node = db.scope_mut(id);
        let len = node.coveritems.len();
        let pos = usize::try_from(entry.ci_idx)
            .ok()
            .and_then(|i| stored_position(node, i))
            .ok_or(NcdbError::IndexOutOfRange {
                what: "coveritem position",
                index: entry.ci_idx,
                len,
            })?;
        node.coveritems[pos].attrs.extend(entry.attrs);
    }
    for entry in payload.history {
        let slot = slot_of_kind(&db.history, entry.kind, entry.idx)?;
        db.history[slot].attrs.extend(entry.attrs);
    }
    db.attrs.extend(payload.global);
    Ok(())
}

/// Absolute position of the `idx`-th record of `kind`.
fn slot_of_kind(history: &[HistoryNode], kind: HistoryKind, idx: u64) -> NcdbResult<usize> {
    let slots: Vec<usize> = history
        .iter()
        .enumerate()
        .filter(|(_, h)| h.kind == kind)
        .map(|(i, _)| i)
        .collect();
    usize::try_from(idx)
        .ok()
        .and_then(|i| slots.get(i))
        .copied()
        .ok_or(NcdbError::IndexOutOfRange {
            what: "history",
            index: idx,
            len: slots.len(),
        })
}

/// Combine the `attrs.json` members of same-schema merge inputs.
///
/// Scope and coveritem attributes come from the first input, since every
/// input shares its tree. Global attributes are first-wins across inputs.
/// History attributes of every input are re-keyed through `remap` onto
/// `out_history`; a record folded into a record of another kind (a TEST
/// squashed into the summary) loses its attributes.
pub(crate) fn merge(
    inputs: &[(Option<&[u8]>, &[HistoryNode])],
    remap: &[Vec<usize>],
    out_history: &[HistoryNode],
) -> NcdbResult<Option<Vec<u8>>> {
    let mut out = AttrsV2 {
        version: VERSION,
        ..Default::default()
    };
    for (k, ((data, history), map)) in inputs.iter().zip(remap).enumerate() {
        let payload = parse(data.unwrap_or_default())?;
        if k == 0 {
            out.scopes = payload.scopes;
            out.coveritems = payload.coveritems;
        }
        for (key, value) in payload.global {
            out.global.entry(key).or_insert(value);
        }
        for entry in payload.history {
            let slot = slot_of_kind(history, entry.kind, entry.idx)?;
            let Some(&target) = map.get(slot) else {
                continue;
            };
            if out_history.get(target).map(|h| h.kind) != Some(entry.kind) {
                continue;
            }
            let idx = out_history[..target].iter().filter(|h| h.kind == entry.kind).count() as u64;
            match out.history.iter_mut().find(|h| h.kind == entry.kind && h.idx == idx) {
                Some(existing) => {
                    for (key, value) in entry.attrs {
                        existing.attrs.entry(key).or_insert(value);
                    }
                }
                None => out.history.push(HistoryAttrs {
                    kind: entry.kind,
                    idx,
                    attrs: entry.attrs,
                }),
            }
        }
    }
    out.history.sort_by_key(|h| (h.kind == HistoryKind::Merge, h.idx));
    encode(out)
}

fn apply_scopes(db: &mut CoverageDb, order: &[ScopeId], entries: Vec<ScopeAttrs>) -> NcdbResult<()> {
    for entry in entries {
        let id = scope_at(order, entry.idx)?;
        db.scope_mut(id).attrs.extend(entry.attrs);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::dfs::dfs_scopes;
    use crate::config::WriteOptions;
    use crate::container::{read_container_bytes, write_container_bytes};
    use crate::models::{CoverType, HistoryNode, ScopeType, Value};

    fn sample() -> (CoverageDb, ScopeId) {
        let mut db = CoverageDb::new();
        let top = db.create_scope(None, "top", ScopeType::Instance);
        let cp = db.create_scope(Some(top), "cp", ScopeType::Coverpoint);
        db.create_next_cover(cp, "a", CoverType::CvgBin, 0);
        db.create_next_cover(cp, "b", CoverType::CvgBin, 0);
        db.add_history(HistoryNode::test("t1"));
        db.add_history(HistoryNode::new("m1", HistoryKind::Merge));
        db.add_history(HistoryNode::test("t2"));
        (db, cp)
    }

    fn strip(db: &mut CoverageDb) {
        for s in &mut db.scopes {
            s.attrs.clear();
            for ci in &mut s.coveritems {
                ci.attrs.clear();
            }
        }
        for h in &mut db.history {
            h.attrs.clear();
        }
        db.attrs.clear();
    }

    #[test]
    fn test_all_sections_round_trip() {
        let (mut db, cp) = sample();
        db.scope_mut(cp).attrs.insert("owner".into(), Value::from("alice"));
        db.scope_mut(cp).coveritems[1]
            .attrs
            .insert("weight".into(), Value::Real(0.5));
        db.history[2].attrs.insert("seed".into(), Value::Int(7));
        db.attrs.insert("project".into(), Value::from("soc"));

        let order = dfs_scopes(&db);
        let bytes = serialize(&db, &order).unwrap().unwrap();
        let mut fresh = db.clone();
        strip(&mut fresh);
        apply(&mut fresh, &order, &bytes).unwrap();
        assert_eq!(fresh, db);
    }

    #[test]
    fn test_history_index_is_per_kind() {
        let (mut db, _) = sample();
        db.history[2].attrs.insert("k".into(), Value::Int(1));
        let bytes = serialize(&db, &dfs_scopes(&db)).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["history"][0]["kind"], "TEST");
        assert_eq!(json["history"][0]["idx"], 1);
    }

    #[test]
    fn test_v1_still_readable() {
        let (mut db, cp) = sample();
        let order = dfs_scopes(&db);
        let data = br#"{"version":1,"entries":[{"idx":1,"attrs":{"note":"legacy"}}]}"#;
        apply(&mut db, &order, data).unwrap();
        assert_eq!(db.scope(cp).attrs["note"], Value::from("legacy"));
    }

    #[test]
    fn test_empty_is_absent() {
        let (db, _) = sample();
        assert!(serialize(&db, &dfs_scopes(&db)).unwrap().is_none());
    }

    #[test]
    fn test_reversed_toggle_pair_keeps_attr_on_its_bin() {
        let mut db = CoverageDb::new();
        let top = db.create_scope(None, "top", ScopeType::Instance);
        let sig = db.create_scope(Some(top), "clk_en", ScopeType::Branch);
        db.create_next_cover(sig, TOGGLE_BIN_1_TO_0, CoverType::ToggleBin, 4);
        db.create_next_cover(sig, TOGGLE_BIN_0_TO_1, CoverType::ToggleBin, 9);
        db.scope_mut(sig).coveritems[0]
            .attrs
            .insert("waived".into(), Value::from("yes"));

        let bytes = write_container_bytes(&db, &WriteOptions::default()).unwrap();
        let back = read_container_bytes(&bytes).unwrap();
        let pair = back.scope(back.scope(back.roots[0]).children[0]);
        let fall = pair.coveritem(TOGGLE_BIN_1_TO_0).unwrap();
        assert_eq!(fall.count, 4);
        assert_eq!(fall.attrs["waived"], Value::from("yes"));
        assert!(pair.coveritem(TOGGLE_BIN_0_TO_1).unwrap().attrs.is_empty());
    }

    #[test]
    fn test_merge_rekeys_history_of_every_input() {
        let (mut a, _) = sample();
        a.attrs.insert("project".into(), Value::from("soc"));
        let mut b = CoverageDb::new();
        b.add_history(HistoryNode::test("t3"));
        b.history[0].attrs.insert("seed".into(), Value::Int(7));
        b.attrs.insert("project".into(), Value::from("other"));
        b.attrs.insert("site".into(), Value::from("lab"));

        let a_bytes = serialize(&a, &dfs_scopes(&a)).unwrap().unwrap();
        let b_bytes = serialize(&b, &[]).unwrap().unwrap();
        let mut out_history = a.history.clone();
        out_history.extend(b.history.iter().cloned());
        let remap = vec![vec![0, 1, 2], vec![3]];
        let merged = merge(
            &[
                (Some(a_bytes.as_slice()), a.history.as_slice()),
                (Some(b_bytes.as_slice()), b.history.as_slice()),
            ],
            &remap,
            &out_history,
        )
        .unwrap()
        .unwrap();

        let mut out = a.clone();
        strip(&mut out);
        out.history = out_history.clone();
        for h in &mut out.history {
            h.attrs.clear();
        }
        apply(&mut out, &dfs_scopes(&a), &merged).unwrap();
        assert_eq!(out.history[3].attrs["seed"], Value::Int(7));
        assert_eq!(out.attrs["project"], Value::from("soc"));
        assert_eq!(out.attrs["site"], Value::from("lab"));
    }

    #[test]
    fn test_merge_drops_history_folded_into_other_kind() {
        let mut a = CoverageDb::new();
        a.add_history(HistoryNode::test("t1"));
        a.history[0].attrs.insert("seed".into(), Value::Int(7));
        let bytes = serialize(&a, &[]).unwrap().unwrap();
        let summary = vec![HistoryNode::new("merged_summary", HistoryKind::Merge)];
        let merged = merge(&[(Some(bytes.as_slice()), a.history.as_slice())], &[vec![0]], &summary).unwrap();
        assert!(merged.is_none());
    }

    #[test]
    fn test_unknown_version() {
        let (mut db, _) = sample();
        let order = dfs_scopes(&db);
        assert!(matches!(
            apply(&mut db, &order, br#"{"version":3}"#),
            Err(NcdbError::UnsupportedVersion { version: 3, .. })
        ));
    }
}
