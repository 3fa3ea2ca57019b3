//! `fsm.json` and the FSM table rebuild.
//!
//! State and transition bins already live in the scope tree as coveritems of
//! the `FsmStates`/`FsmTrans` children of an FSM scope. The member only keeps
//! state indices that differ from their position; every read rebuilds the
//! tables of every FSM scope whether or not the member is present.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::NcdbResult;
use crate::meta::{json_entries, read_json_entries, scope_at};
use crate::models::{CoverageDb, FsmState, FsmTables, ScopeId, ScopeType};

pub const MEMBER: &str = "fsm.json";
const VERSION: u64 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateIndex {
    name: String,
    index: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct FsmEntry {
    fsm_idx: u64,
    states: Vec<StateIndex>,
}

pub fn serialize(db: &CoverageDb, order: &[ScopeId]) -> NcdbResult<Option<Vec<u8>>> {
    let mut entries = Vec::new();
    for (idx, &id) in order.iter().enumerate() {
        let node = db.scope(id);
        if node.scope_type != ScopeType::Fsm {
            continue;
        }
        let Some(tables) = &node.fsm else { continue };
        let states: Vec<StateIndex> = tables
            .states
            .iter()
            .enumerate()
            .filter(|(pos, (_, st))| st.index != *pos as i64)
            .map(|(_, (name, st))| StateIndex {
                name: name.clone(),
                index: st.index,
            })
            .collect();
        if !states.is_empty() {
            entries.push(FsmEntry {
                fsm_idx: idx as u64,
                states,
            });
        }
    }
    json_entries(VERSION, &entries)
}

/// Rebuild the tables of every FSM scope, then apply stored index overrides.
pub fn apply(db: &mut CoverageDb, order: &[ScopeId], data: &[u8]) -> NcdbResult<()> {
    let mut overrides: HashMap<ScopeId, HashMap<String, i64>> = HashMap::new();
    for entry in read_json_entries::<FsmEntry>(MEMBER, VERSION, data)? {
        let id = scope_at(order, entry.fsm_idx)?;
        overrides
            .entry(id)
            .or_default()
            .extend(entry.states.into_iter().map(|s| (s.name, s.index)));
    }

    for &id in order {
        if db.scope(id).scope_type != ScopeType::Fsm {
            continue;
        }
        let tables = rebuild(db, id, overrides.get(&id));
        db.scope_mut(id).fsm = Some(tables);
    }
    Ok(())
}

/// Re-derive one FSM scope's tables from its bins, keeping the state
/// indices it already carries.
pub(crate) fn refresh(db: &mut CoverageDb, fsm: ScopeId) {
    let keep: Option<HashMap<String, i64>> = db.scope(fsm).fsm.as_ref().map(|t| {
        t.states
            .iter()
            .map(|(name, st)| (name.clone(), st.index))
            .collect()
    });
    let tables = rebuild(db, fsm, keep.as_ref());
    db.scope_mut(fsm).fsm = Some(tables);
}

fn rebuild(db: &CoverageDb, fsm: ScopeId, overrides: Option<&HashMap<String, i64>>) -> FsmTables {
    let node = db.scope(fsm);
    let child_of = |ty: ScopeType| {
        node.children
            .iter()
            .copied()
            .find(|&c| db.scope(c).scope_type == ty)
    };

    let mut tables = FsmTables::default();
    let Some(states_scope) = child_of(ScopeType::FsmStates) else {
        return tables;
    };
    for (pos, ci) in db.scope(states_scope).coveritems.iter().enumerate() {
        let index = overrides
            .and_then(|o| o.get(&ci.name))
            .copied()
            .unwrap_or(pos as i64);
        tables.states.insert(
            ci.name.clone(),
            FsmState {
                index,
                visit_count: ci.count,
            },
        );
    }

    if let Some(trans_scope) = child_of(ScopeType::FsmTrans) {
        for ci in &db.scope(trans_scope).coveritems {
            let Some((from, to)) = ci.name.split_once("->") else {
                continue;
            };
            if tables.states.contains_key(from) && tables.states.contains_key(to) {
                tables
                    .transitions
                    .insert((from.to_string(), to.to_string()), ci.count);
            }
        }
    }
    tables
}
