//! The DFS order every index-addressed member agrees on.
//!
//! Pre-order, parent before children, children in list order. Toggle-pair
//! scopes occupy one slot and are never descended into.

use crate::models::{CoverageDb, ScopeId};

pub fn dfs_scopes(db: &CoverageDb) -> Vec<ScopeId> {
    let mut out = Vec::with_capacity(db.scopes.len());
    let mut stack: Vec<ScopeId> = db.roots.iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
        out.push(id);
        let node = db.scope(id);
        if node.is_toggle_pair() {
            continue;
        }
        stack.extend(node.children.iter().rev().copied());
    }
    out
}

/// Every coveritem as `(scope, position)` in counts order.
pub fn flat_coveritems(db: &CoverageDb) -> Vec<(ScopeId, usize)> {
    flat_coveritems_of(db, &dfs_scopes(db))
}

pub fn flat_coveritems_of(db: &CoverageDb, order: &[ScopeId]) -> Vec<(ScopeId, usize)> {
    let mut out = Vec::new();
    for &id in order {
        let node = db.scope(id);
        if node.is_toggle_pair() {
            // encoded in fixed 0->1, 1->0 order regardless of storage order
            for label in [crate::models::TOGGLE_BIN_0_TO_1, crate::models::TOGGLE_BIN_1_TO_0] {
                if let Some(pos) = node.coveritems.iter().position(|c| c.name == label) {
                    out.push((id, pos));
                }
            }
        } else {
            out.extend((0..node.coveritems.len()).map(|pos| (id, pos)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CoverType, ScopeType};

    fn sample() -> CoverageDb {
        let mut db = CoverageDb::new();
        let top = db.create_scope(None, "top", ScopeType::Instance);
        let cg = db.create_scope(Some(top), "cg", ScopeType::Covergroup);
        let cp = db.create_scope(Some(cg), "cp", ScopeType::Coverpoint);
        db.create_next_cover(cp, "a", CoverType::CvgBin, 1);
        db.create_next_cover(cp, "b", CoverType::CvgBin, 2);
        let sig = db.create_scope(Some(top), "sig", ScopeType::Toggle);
        db.create_toggle_pair(Some(sig), "bit0", 3, 4);
        db.create_scope(None, "other", ScopeType::DuModule);
        db
    }

    #[test]
    fn test_preorder() {
        let db = sample();
        let names: Vec<&str> = dfs_scopes(&db)
            .into_iter()
            .map(|id| db.scope(id).name.as_str())
            .collect();
        assert_eq!(names, vec!["top", "cg", "cp", "sig", "bit0", "other"]);
    }

    #[test]
    fn test_flat_coveritems_order() {
        let db = sample();
        let flat = flat_coveritems(&db);
        let names: Vec<&str> = flat
            .iter()
            .map(|&(s, p)| db.scope(s).coveritems[p].name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "0 -> 1", "1 -> 0"]);
    }

    #[test]
    fn test_toggle_pair_stored_reversed_still_rise_first() {
        let mut db = CoverageDb::new();
        let b = db.create_scope(None, "bit", ScopeType::Branch);
        db.create_next_cover(b, "1 -> 0", CoverType::ToggleBin, 9);
        db.create_next_cover(b, "0 -> 1", CoverType::ToggleBin, 8);
        assert_eq!(flat_coveritems(&db), vec![(b, 1), (b, 0)]);
    }

    #[test]
    fn test_detached_scopes_excluded() {
        let mut db = sample();
        db.create_detached("ghost", ScopeType::DuModule);
        assert_eq!(dfs_scopes(&db).len(), 6);
    }
}
