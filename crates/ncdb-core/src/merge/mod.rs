//! Merge engine.
//!
//! [`merge_containers`] inspects every input's manifest once and picks one
//! of two paths: when all schema hashes agree the counts arrays are summed
//! without decoding any scope tree ([`merge_same_schema`]); otherwise every
//! input is decoded and merged structurally ([`merge_cross_schema`]).
//! [`merge_into_sqlite`] runs the structural merge against a SQLite target
//! inside one transaction.

pub mod fast;
pub mod sqlite;
pub mod structural;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::{MergeOptions, MERGE_TOOL_CATEGORY, SQUASHED_HISTORY_NAME};
use crate::container::manifest::now_utc;
use crate::container::read_manifest;
use crate::errors::{NcdbError, NcdbResult};
use crate::models::{Contributions, CoverageDb, HistoryKind, HistoryNode};
use crate::store::SqliteStore;

pub use fast::merge_same_schema;
pub use sqlite::{merge_into_sqlite, merge_into_sqlite_copy};
pub use structural::{merge_cross_schema, merge_trees};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePath {
    SameSchema,
    CrossSchema,
    Sqlite,
}

impl MergePath {
    pub fn as_str(self) -> &'static str {
        match self {
            MergePath::SameSchema => "same_schema",
            MergePath::CrossSchema => "cross_schema",
            MergePath::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStats {
    pub path: MergePath,
    pub scopes_matched: u64,
    pub scopes_added: u64,
    pub coveritems_matched: u64,
    pub coveritems_added: u64,
    pub total_hits_added: u64,
    pub tests_merged: u64,
}

impl MergeStats {
    pub fn new(path: MergePath) -> Self {
        Self {
            path,
            scopes_matched: 0,
            scopes_added: 0,
            coveritems_matched: 0,
            coveritems_added: 0,
            total_hits_added: 0,
            tests_merged: 0,
        }
    }

    pub(crate) fn absorb(&mut self, other: &MergeStats) {
        self.scopes_matched += other.scopes_matched;
        self.scopes_added += other.scopes_added;
        self.coveritems_matched += other.coveritems_matched;
        self.coveritems_added += other.coveritems_added;
        self.total_hits_added = self.total_hits_added.saturating_add(other.total_hits_added);
        self.tests_merged += other.tests_merged;
    }
}

/// A database to merge into a SQLite target.
pub enum Source<'a> {
    Sqlite(&'a SqliteStore),
    Memory(&'a CoverageDb),
}

/// Merge NCDB containers at `sources` into a new container at `target`.
pub fn merge_containers(sources: &[PathBuf], target: &Path, opts: &MergeOptions) -> NcdbResult<MergeStats> {
    if sources.is_empty() {
        return Err(NcdbError::Merge("no source files provided".to_string()));
    }
    let manifests = sources
        .iter()
        .map(|p| read_manifest(p))
        .collect::<NcdbResult<Vec<_>>>()?;
    let same = manifests
        .windows(2)
        .all(|w| w[0].schema_hash == w[1].schema_hash);

    info!(
        sources = sources.len(),
        target = %target.display(),
        path = if same { "same_schema" } else { "cross_schema" },
        "merging containers"
    );
    if same {
        merge_same_schema(sources, target, opts)
    } else {
        merge_cross_schema(sources, target, opts)
    }
}

pub(crate) fn merge_history_node(target: &str, sources: &[String], tool_category: &str) -> HistoryNode {
    let mut node = HistoryNode::new(target, HistoryKind::Merge);
    node.physical_name = Some(target.to_string());
    node.date = Some(now_utc());
    node.tool_category = Some(tool_category.to_string());
    node.comment = Some(format!("Merged from: {}", sources.join(", ")));
    node
}

fn summary_node() -> HistoryNode {
    let mut node = HistoryNode::new(SQUASHED_HISTORY_NAME, HistoryKind::Merge);
    node.date = Some(now_utc());
    node.tool_category = Some(MERGE_TOOL_CATEGORY.to_string());
    node.same_tests = Some(0);
    node
}

pub(crate) fn is_summary(node: &HistoryNode) -> bool {
    node.kind == HistoryKind::Merge && node.logical_name == SQUASHED_HISTORY_NAME
}

/// Output history of a container merge plus, per input, where each of its
/// history records ended up.
#[derive(Debug)]
pub(crate) struct HistoryPlan {
    pub history: Vec<HistoryNode>,
    pub remap: Vec<Vec<usize>>,
    pub tests_merged: u64,
}

/// Concatenate the inputs' histories and append `merge_node`, or with
/// `squash_history` fold every TEST record and earlier summaries into a
/// single `merged_summary` record.
pub(crate) fn plan_history(inputs: &[&[HistoryNode]], merge_node: HistoryNode, opts: &MergeOptions) -> HistoryPlan {
    let tests_merged = inputs
        .iter()
        .flat_map(|h| h.iter())
        .filter(|n| n.kind == HistoryKind::Test)
        .count() as u64;

    if !(opts.create_history && opts.squash_history) {
        let mut history = Vec::new();
        let mut remap = Vec::with_capacity(inputs.len());
        for nodes in inputs {
            remap.push((history.len()..history.len() + nodes.len()).collect());
            history.extend(nodes.iter().cloned());
        }
        if opts.create_history {
            history.push(merge_node);
        }
        return HistoryPlan {
            history,
            remap,
            tests_merged,
        };
    }

    let folded = |n: &HistoryNode| n.kind == HistoryKind::Test || is_summary(n);
    let kept = inputs
        .iter()
        .flat_map(|h| h.iter())
        .filter(|n| !folded(n))
        .count();
    let summary_idx = kept;

    let mut summary: Option<HistoryNode> = None;
    let mut carried = 0u64;
    let mut history = Vec::with_capacity(kept + 1);
    let mut remap = Vec::with_capacity(inputs.len());
    for nodes in inputs {
        let mut map = Vec::with_capacity(nodes.len());
        for node in nodes.iter() {
            if folded(node) {
                if is_summary(node) {
                    carried += node.same_tests.unwrap_or(0);
                    summary.get_or_insert_with(|| node.clone());
                }
                map.push(summary_idx);
            } else {
                map.push(history.len());
                history.push(node.clone());
            }
        }
        remap.push(map);
    }
    let mut summary = summary.unwrap_or_else(summary_node);
    summary.same_tests = Some(carried + tests_merged);
    summary.date = Some(now_utc());
    history.push(summary);
    HistoryPlan {
        history,
        remap,
        tests_merged,
    }
}

/// Re-key one input's contributions into the output: history indices via
/// `history_map`, coveritem indices via `bin_map`. Collisions are summed.
pub(crate) fn remap_contributions(
    out: &mut Contributions,
    input: &Contributions,
    history_map: &[usize],
    mut bin_map: impl FnMut(usize) -> Option<usize>,
) -> NcdbResult<()> {
    for (&hist, bins) in input {
        let &new_hist = history_map.get(hist).ok_or(NcdbError::IndexOutOfRange {
            what: "history",
            index: hist as u64,
            len: history_map.len(),
        })?;
        let slot: &mut BTreeMap<usize, u64> = out.entry(new_hist).or_default();
        for (&bin, &count) in bins {
            if let Some(new_bin) = bin_map(bin) {
                let acc = slot.entry(new_bin).or_insert(0);
                *acc = acc.saturating_add(count);
            }
        }
    }
    Ok(())
}

/// Run `read` over every source on a pool of `workers` threads, falling back
/// to the calling thread when the pool cannot be built. Results keep the
/// order of `sources`.
pub(crate) fn read_parallel<T, F>(sources: &[PathBuf], workers: usize, read: F) -> NcdbResult<Vec<T>>
where
    T: Send,
    F: Fn(&Path) -> NcdbResult<T> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();
    match pool {
        Ok(pool) => pool.install(|| sources.par_iter().map(|p| read(p)).collect()),
        Err(e) => {
            warn!(error = %e, "merge worker pool unavailable; reading inputs sequentially");
            sources.iter().map(|p| read(p)).collect()
        }
    }
}

pub(crate) fn display_paths(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.display().to_string()).collect()
}
