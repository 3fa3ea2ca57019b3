//! Structural merge of decoded databases.
//!
//! A source child matches a target child with the same name and scope type
//! that no earlier source sibling has claimed; unmatched children are copied
//! in with their static fields. Coveritems match by position within their
//! scope: counts of matched items are summed and the rest are appended.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::codec::dfs;
use crate::config::{MergeOptions, MAX_SCOPE_DEPTH, MERGE_TOOL_CATEGORY};
use crate::container::{read_container, write_container};
use crate::errors::{NcdbError, NcdbResult};
use crate::merge::{
    display_paths, merge_history_node, plan_history, read_parallel, remap_contributions, MergePath,
    MergeStats,
};
use crate::meta;
use crate::models::{CoverageDb, HistoryKind, HistoryNode, ScopeId, ScopeNode, ScopeType};

/// Where every source scope and coveritem landed in the target.
#[derive(Debug, Default)]
pub(crate) struct TreeMap {
    pub scopes: HashMap<ScopeId, ScopeId>,
    pub items: HashMap<(ScopeId, usize), (ScopeId, usize)>,
}

/// Fields a newly created target scope copies from its source.
fn copy_static(dst: &mut ScopeNode, src: &ScopeNode) {
    dst.source = src.source.clone();
    dst.weight = src.weight;
    dst.goal = src.goal;
    dst.flags = src.flags;
    dst.source_type = src.source_type;
    dst.tags = src.tags.clone();
    dst.attrs = src.attrs.clone();
    dst.properties = src.properties.clone();
    dst.toggle = src.toggle.clone();
    dst.fsm = src.fsm.clone();
}

fn merge_coveritems(
    target: &mut CoverageDb,
    tgt: ScopeId,
    src_db: &CoverageDb,
    src: ScopeId,
    map: &mut TreeMap,
    stats: &mut MergeStats,
) -> NcdbResult<()> {
    for (pos, item) in src_db.scope(src).coveritems.iter().enumerate() {
        let items = &mut target.scope_mut(tgt).coveritems;
        if let Some(existing) = items.get_mut(pos) {
            if existing.name != item.name {
                debug!(target_name = %existing.name, source_name = %item.name, pos, "positional coveritem match with differing names");
            }
            existing.count = existing
                .count
                .checked_add(item.count)
                .ok_or_else(|| NcdbError::Merge(format!("hit count overflow at coveritem '{}'", item.name)))?;
            stats.coveritems_matched += 1;
            map.items.insert((src, pos), (tgt, pos));
        } else {
            items.push(item.clone());
            stats.coveritems_added += 1;
            map.items.insert((src, pos), (tgt, items.len() - 1));
        }
        stats.total_hits_added = stats.total_hits_added.saturating_add(item.count);
    }
    Ok(())
}

/// Merge the scope tree of `src` into `target`, returning where each source
/// scope and coveritem ended up.
pub(crate) fn merge_structure(
    target: &mut CoverageDb,
    src: &CoverageDb,
    stats: &mut MergeStats,
) -> NcdbResult<TreeMap> {
    let mut map = TreeMap::default();
    let mut stack: Vec<(Option<ScopeId>, Option<ScopeId>, usize)> = vec![(None, None, 0)];

    while let Some((src_parent, tgt_parent, depth)) = stack.pop() {
        if depth > MAX_SCOPE_DEPTH {
            return Err(NcdbError::Merge(format!(
                "scope nesting exceeds {MAX_SCOPE_DEPTH}"
            )));
        }
        let mut claimed: HashSet<ScopeId> = HashSet::new();
        let mut pairs = Vec::with_capacity(src.children(src_parent).len());
        for &child in src.children(src_parent) {
            let node = src.scope(child);
            let matched = target
                .children(tgt_parent)
                .iter()
                .copied()
                .find(|&c| {
                    let t = target.scope(c);
                    !claimed.contains(&c) && t.name == node.name && t.scope_type == node.scope_type
                });
            let tgt = match matched {
                Some(t) => {
                    stats.scopes_matched += 1;
                    t
                }
                None => {
                    let t = target.create_scope(tgt_parent, &node.name, node.scope_type);
                    copy_static(target.scope_mut(t), node);
                    stats.scopes_added += 1;
                    t
                }
            };
            claimed.insert(tgt);
            map.scopes.insert(child, tgt);
            merge_coveritems(target, tgt, src, child, &mut map, stats)?;
            pairs.push((child, tgt));
        }
        for (child, tgt) in pairs.into_iter().rev() {
            stack.push((Some(child), Some(tgt), depth + 1));
        }
    }

    link_references(target, src, &mut map);
    for id in dfs::dfs_scopes(target) {
        if target.scope(id).scope_type == ScopeType::Fsm {
            meta::fsm::refresh(target, id);
        }
    }
    target.du_index = None;
    Ok(map)
}

/// Carry design-unit links and cross lists over to target scopes that do not
/// have them yet.
fn link_references(target: &mut CoverageDb, src: &CoverageDb, map: &mut TreeMap) {
    let mut pending: Vec<(ScopeId, ScopeId)> = map.scopes.iter().map(|(&s, &t)| (s, t)).collect();
    pending.sort_unstable();
    for (s, t) in pending {
        let node = src.scope(s);
        if let Some(du) = node.du {
            if target.scope(t).du.is_none() {
                let du_tgt = match map.scopes.get(&du) {
                    Some(&d) => d,
                    None => {
                        let placeholder = src.scope(du);
                        let d = target.create_detached(&placeholder.name, placeholder.scope_type);
                        map.scopes.insert(du, d);
                        d
                    }
                };
                target.scope_mut(t).du = Some(du_tgt);
            }
        }
        if !node.crossed.is_empty() && target.scope(t).crossed.is_empty() {
            let crossed: Vec<ScopeId> = node
                .crossed
                .iter()
                .filter_map(|c| map.scopes.get(c).copied())
                .collect();
            if crossed.len() != node.crossed.len() {
                warn!(scope = %src.path_of(s), "cross lost coverpoints that were not merged");
            }
            target.scope_mut(t).crossed = crossed;
        }
    }
}

fn flat_index(db: &CoverageDb) -> HashMap<(ScopeId, usize), usize> {
    dfs::flat_coveritems(db)
        .into_iter()
        .enumerate()
        .map(|(i, key)| (key, i))
        .collect()
}

/// Merge `src` into `target` in memory: scopes and counts, then the
/// source's history records and per-test contributions.
pub fn merge_trees(target: &mut CoverageDb, src: &CoverageDb) -> NcdbResult<MergeStats> {
    let mut stats = MergeStats::new(MergePath::CrossSchema);
    let old_flat = dfs::flat_coveritems(target);
    let tree = merge_structure(target, src, &mut stats)?;
    let new_index = flat_index(target);

    let existing = std::mem::take(&mut target.contributions);
    let identity: Vec<usize> = (0..target.history.len()).collect();
    remap_contributions(&mut target.contributions, &existing, &identity, |bin| {
        old_flat.get(bin).and_then(|key| new_index.get(key)).copied()
    })?;

    let offset = target.history.len();
    target.history.extend(src.history.iter().cloned());
    let history_map: Vec<usize> = (offset..offset + src.history.len()).collect();
    let src_flat = dfs::flat_coveritems(src);
    remap_contributions(&mut target.contributions, &src.contributions, &history_map, |bin| {
        src_flat
            .get(bin)
            .and_then(|key| tree.items.get(key))
            .and_then(|key| new_index.get(key))
            .copied()
    })?;

    stats.tests_merged = src.test_count() as u64;
    Ok(stats)
}

/// Decode every container and merge them structurally into a new container
/// at `target`.
pub fn merge_cross_schema(sources: &[PathBuf], target: &Path, opts: &MergeOptions) -> NcdbResult<MergeStats> {
    if sources.is_empty() {
        return Err(NcdbError::Merge("no source files provided".to_string()));
    }
    let started = Instant::now();
    let inputs = read_parallel(sources, opts.workers, read_container)?;

    let mut out = CoverageDb::new();
    out.path_separator = inputs[0].path_separator.clone();
    out.ucis_version = inputs[0].ucis_version.clone();

    let mut stats = MergeStats::new(MergePath::CrossSchema);
    let mut trees = Vec::with_capacity(inputs.len());
    for db in &inputs {
        trees.push(merge_structure(&mut out, db, &mut stats)?);
        for (key, value) in &db.attrs {
            out.attrs.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    let merge_node = merge_history_node(
        &target.display().to_string(),
        &display_paths(sources),
        MERGE_TOOL_CATEGORY,
    );
    let histories: Vec<&[HistoryNode]> = inputs.iter().map(|db| db.history.as_slice()).collect();
    let plan = plan_history(&histories, merge_node, opts);

    let out_index = flat_index(&out);
    for ((db, tree), map) in inputs.iter().zip(&trees).zip(&plan.remap) {
        let src_flat = dfs::flat_coveritems(db);
        remap_contributions(&mut out.contributions, &db.contributions, map, |bin| {
            src_flat
                .get(bin)
                .and_then(|key| tree.items.get(key))
                .and_then(|key| out_index.get(key))
                .copied()
        })?;
    }
    out.contributions.retain(|_, bins| !bins.is_empty());
    out.history = plan.history;
    stats.tests_merged = plan.tests_merged;

    write_container(&out, target, &opts.write)?;
    info!(
        target = %target.display(),
        sources = sources.len(),
        scopes_added = stats.scopes_added,
        scopes_matched = stats.scopes_matched,
        tests = out.history_of_kind(HistoryKind::Test).count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "cross-schema merge complete"
    );
    Ok(stats)
}
