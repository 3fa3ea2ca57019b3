//! Structural merge into a SQLite coverage database.
//!
//! The whole call runs in one transaction on the target store. Scopes are
//! matched by `(parent, name, type)` in SQL, coveritems by `cover_index`.
//! Source files of newly added scopes are resolved through a path -> id
//! table built once per call.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, warn};

use crate::codec::dfs;
use crate::config::{MergeOptions, SQLITE_MERGE_TOOL_CATEGORY, SQUASHED_HISTORY_NAME};
use crate::container::manifest::now_utc;
use crate::errors::{NcdbError, NcdbResult};
use crate::merge::{merge_history_node, MergePath, MergeStats, Source};
use crate::models::{CoverageDb, HistoryKind, HistoryNode, ScopeId};
use crate::store::database::{from_sql, to_sql};
use crate::store::SqliteStore;

fn candidates(store: &SqliteStore, parent: Option<i64>, name: &str, scope_type: i64) -> NcdbResult<Vec<i64>> {
    let mut stmt = store.conn().prepare_cached(
        "SELECT scope_id FROM scopes \
         WHERE parent_id IS ?1 AND scope_name = ?2 AND scope_type = ?3 \
         ORDER BY ordinal, scope_id;",
    )?;
    let rows = stmt.query_map(params![parent, name, scope_type], |row| row.get(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn next_ordinal(store: &SqliteStore, parent: Option<i64>) -> NcdbResult<i64> {
    Ok(store.conn().query_row(
        "SELECT COALESCE(MAX(ordinal) + 1, 0) FROM scopes WHERE parent_id IS ?1;",
        params![parent],
        |row| row.get(0),
    )?)
}

fn coveritem_at(store: &SqliteStore, scope_id: i64, index: i64) -> NcdbResult<Option<(i64, i64)>> {
    Ok(store
        .conn()
        .query_row(
            "SELECT cover_id, cover_data FROM coveritems WHERE scope_id = ?1 AND cover_index = ?2;",
            params![scope_id, index],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

fn source_label(source: &Source<'_>) -> String {
    match source {
        Source::Sqlite(store) => store
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string()),
        Source::Memory(_) => "<memory>".to_string(),
    }
}

/// History ids the source's records map to in the target.
fn merge_history(
    store: &SqliteStore,
    src: &CoverageDb,
    opts: &MergeOptions,
    stats: &mut MergeStats,
) -> NcdbResult<HashMap<usize, i64>> {
    let mut map = HashMap::new();
    if !opts.create_history {
        return Ok(map);
    }
    let tests: Vec<(usize, &HistoryNode)> = src.history_of_kind(HistoryKind::Test).collect();
    stats.tests_merged += tests.len() as u64;

    if opts.squash_history {
        let (summary_id, mut summary) = match store.find_history(HistoryKind::Merge, SQUASHED_HISTORY_NAME)? {
            Some(found) => found,
            None => {
                let mut node = HistoryNode::new(SQUASHED_HISTORY_NAME, HistoryKind::Merge);
                node.date = Some(now_utc());
                node.tool_category = Some(SQLITE_MERGE_TOOL_CATEGORY.to_string());
                node.same_tests = Some(0);
                (store.insert_history(&node)?, node)
            }
        };
        summary.same_tests = Some(summary.same_tests.unwrap_or(0) + tests.len() as u64);
        store.update_history(summary_id, &summary)?;
        map.extend(tests.iter().map(|&(idx, _)| (idx, summary_id)));
        return Ok(map);
    }

    for (idx, node) in tests {
        let id = match store.find_history(HistoryKind::Test, &node.logical_name)? {
            Some((existing, _)) => {
                debug!(test = %node.logical_name, "test already recorded in target");
                existing
            }
            None => store.insert_history(node)?,
        };
        map.insert(idx, id);
    }
    Ok(map)
}

/// Merge one decoded source into the open transaction on `store`.
fn merge_one(
    store: &SqliteStore,
    src: &CoverageDb,
    opts: &MergeOptions,
    files: &mut HashMap<String, i64>,
) -> NcdbResult<MergeStats> {
    let mut stats = MergeStats::new(MergePath::Sqlite);
    let history = merge_history(store, src, opts, &mut stats)?;

    let mut scope_ids: HashMap<ScopeId, i64> = HashMap::new();
    let mut cover_ids: HashMap<(ScopeId, usize), i64> = HashMap::new();
    let mut added: Vec<ScopeId> = Vec::new();
    let mut stack: Vec<(Option<ScopeId>, Option<i64>)> = vec![(None, None)];

    while let Some((src_parent, tgt_parent)) = stack.pop() {
        let mut claimed: HashSet<i64> = HashSet::new();
        let mut pairs = Vec::new();
        for &child in src.children(src_parent) {
            let node = src.scope(child);
            let type_code = to_sql(node.scope_type.code(), "scope type")?;
            let matched = candidates(store, tgt_parent, &node.name, type_code)?
                .into_iter()
                .find(|id| !claimed.contains(id));
            let scope_id = match matched {
                Some(id) => {
                    stats.scopes_matched += 1;
                    id
                }
                None => {
                    let ordinal = next_ordinal(store, tgt_parent)?;
                    stats.scopes_added += 1;
                    added.push(child);
                    store.insert_scope(tgt_parent, ordinal, node, files)?
                }
            };
            claimed.insert(scope_id);
            scope_ids.insert(child, scope_id);

            for (pos, item) in node.coveritems.iter().enumerate() {
                let index = pos as i64;
                let cover_id = match coveritem_at(store, scope_id, index)? {
                    Some((cover_id, data)) => {
                        let total = from_sql(data, "count")?
                            .checked_add(item.count)
                            .ok_or_else(|| NcdbError::Merge(format!("hit count overflow at coveritem '{}'", item.name)))?;
                        store.conn().execute(
                            "UPDATE coveritems SET cover_data = ?1 WHERE cover_id = ?2;",
                            params![to_sql(total, "count")?, cover_id],
                        )?;
                        stats.coveritems_matched += 1;
                        cover_id
                    }
                    None => {
                        stats.coveritems_added += 1;
                        store.insert_coveritem(scope_id, index, item)?
                    }
                };
                stats.total_hits_added = stats.total_hits_added.saturating_add(item.count);
                cover_ids.insert((child, pos), cover_id);
            }
            pairs.push((child, scope_id));
        }
        for (child, scope_id) in pairs.into_iter().rev() {
            stack.push((Some(child), Some(scope_id)));
        }
    }

    for id in added {
        let Some(du) = src.scope(id).du else { continue };
        match scope_ids.get(&du) {
            Some(&du_id) => store.set_scope_du(scope_ids[&id], du_id)?,
            None => warn!(scope = %src.path_of(id), "design unit not in the merged hierarchy; link dropped"),
        }
    }

    let flat = dfs::flat_coveritems(src);
    for (hist, bins) in &src.contributions {
        let Some(&history_id) = history.get(hist) else {
            continue;
        };
        for (&bin, &count) in bins {
            let key = flat.get(bin).ok_or(NcdbError::IndexOutOfRange {
                what: "coveritem",
                index: bin as u64,
                len: flat.len(),
            })?;
            if let Some(&cover_id) = cover_ids.get(key) {
                store.add_contribution(history_id, cover_id, count)?;
            }
        }
    }
    Ok(stats)
}

/// Merge `sources` into `store`. Either every source is merged or the
/// target is left exactly as it was.
pub fn merge_into_sqlite(store: &SqliteStore, sources: &[Source<'_>], opts: &MergeOptions) -> NcdbResult<MergeStats> {
    let mut dbs: Vec<Cow<'_, CoverageDb>> = Vec::with_capacity(sources.len());
    for source in sources {
        dbs.push(match source {
            Source::Sqlite(s) => Cow::Owned(s.load()?),
            Source::Memory(db) => Cow::Borrowed(*db),
        });
    }
    let labels: Vec<String> = sources.iter().map(source_label).collect();

    let stats = store.in_transaction(|store| {
        let mut files = store.file_ids()?;
        let mut total = MergeStats::new(MergePath::Sqlite);
        for db in &dbs {
            total.absorb(&merge_one(store, db, opts, &mut files)?);
        }
        if opts.create_history && !opts.squash_history {
            let name = format!("merge_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
            let node = merge_history_node(&name, &labels, SQLITE_MERGE_TOOL_CATEGORY);
            store.insert_history(&node)?;
        }
        Ok(total)
    })?;

    info!(
        target = ?store.path(),
        sources = sources.len(),
        scopes_added = stats.scopes_added,
        coveritems_matched = stats.coveritems_matched,
        tests = stats.tests_merged,
        "sqlite merge complete"
    );
    Ok(stats)
}

/// Snapshot `target` to `output` with the online-backup API and merge into
/// the copy; `target` itself is never written.
pub fn merge_into_sqlite_copy(
    target: &Path,
    output: &Path,
    sources: &[Source<'_>],
    opts: &MergeOptions,
) -> NcdbResult<MergeStats> {
    if !target.exists() {
        return Err(NcdbError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("merge target does not exist: {}", target.display()),
        )));
    }
    SqliteStore::open(target)?.backup_to(output)?;
    let copy = SqliteStore::open(output)?;
    merge_into_sqlite(&copy, sources, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteOptions;
    use crate::models::{CoverType, ScopeType, SourceLocation};

    fn opts(squash: bool) -> MergeOptions {
        MergeOptions {
            workers: 1,
            create_history: true,
            squash_history: squash,
            write: WriteOptions::default(),
        }
    }

    fn run(test: &str, counts: [u64; 3]) -> CoverageDb {
        let mut db = CoverageDb::new();
        let cg = db.create_scope(None, "cg1", ScopeType::Covergroup);
        db.scope_mut(cg).source = Some(SourceLocation {
            file: "tb/cov.sv".into(),
            line: 10,
            token: 0,
        });
        let cp = db.create_scope(Some(cg), "cp1", ScopeType::Coverpoint);
        for (i, c) in counts.into_iter().enumerate() {
            db.create_next_cover(cp, &format!("b{i}"), CoverType::CvgBin, c);
        }
        let t = db.add_history(HistoryNode::test(test));
        db.record_contribution(t, 0, counts[0]);
        db
    }

    fn counts(db: &CoverageDb) -> Vec<u64> {
        dfs::flat_coveritems(db)
            .into_iter()
            .map(|(s, p)| db.scope(s).coveritems[p].count)
            .collect()
    }

    #[test]
    fn test_merge_memory_sources() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save(&run("t1", [5, 10, 0])).unwrap();
        let b = run("t2", [1, 1, 1]);
        let stats = merge_into_sqlite(&store, &[Source::Memory(&b)], &opts(false)).unwrap();
        assert_eq!(stats.path, MergePath::Sqlite);
        assert_eq!(stats.scopes_matched, 2);
        assert_eq!(stats.coveritems_matched, 3);
        assert_eq!(stats.tests_merged, 1);

        let db = store.load().unwrap();
        assert_eq!(counts(&db), vec![6, 11, 1]);
        assert_eq!(db.test_count(), 2);
        let merges: Vec<&HistoryNode> = db.history_of_kind(HistoryKind::Merge).map(|(_, h)| h).collect();
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].tool_category.as_deref(), Some(SQLITE_MERGE_TOOL_CATEGORY));
        assert_eq!(db.contributions[&1][&0], 1);

        let files: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM files;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(files, 1);
    }

    #[test]
    fn test_new_scopes_and_items_appended() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save(&run("t1", [1, 1, 1])).unwrap();

        let mut src = run("t2", [1, 1, 1]);
        let cp = dfs::dfs_scopes(&src)[1];
        src.create_next_cover(cp, "b3", CoverType::CvgBin, 4);
        let du = src.create_scope(None, "core", ScopeType::DuModule);
        src.create_instance(None, "u_core", du);

        let stats = merge_into_sqlite(&store, &[Source::Memory(&src)], &opts(false)).unwrap();
        assert_eq!(stats.scopes_added, 2);
        assert_eq!(stats.coveritems_added, 1);

        let db = store.load().unwrap();
        assert_eq!(counts(&db), vec![2, 2, 2, 4]);
        let inst = db.find_child(None, "u_core", ScopeType::Instance).unwrap();
        assert_eq!(db.scope(db.scope(inst).du.unwrap()).name, "core");
    }

    #[test]
    fn test_same_test_name_not_duplicated() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save(&run("t1", [1, 0, 0])).unwrap();
        merge_into_sqlite(&store, &[Source::Memory(&run("t1", [1, 0, 0]))], &opts(false)).unwrap();
        let db = store.load().unwrap();
        assert_eq!(db.test_count(), 1);
        assert_eq!(db.contributions[&0][&0], 2);
    }

    #[test]
    fn test_sqlite_source() {
        let store = SqliteStore::open_in_memory().unwrap();
        let other = SqliteStore::open_in_memory().unwrap();
        other.save(&run("t9", [0, 3, 0])).unwrap();
        merge_into_sqlite(&store, &[Source::Sqlite(&other)], &opts(false)).unwrap();
        let db = store.load().unwrap();
        assert_eq!(counts(&db), vec![0, 3, 0]);
        assert_eq!(db.scope(db.roots[0]).source.as_ref().unwrap().file, "tb/cov.sv");
    }

    #[test]
    fn test_failure_rolls_back_everything() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save(&run("t1", [1, 2, 3])).unwrap();
        let before = store.load().unwrap();

        let good = run("t2", [1, 1, 1]);
        let mut bad = run("t3", [1, 1, 1]);
        let late = bad.create_scope(None, "zz", ScopeType::Covergroup);
        bad.create_next_cover(late, "huge", CoverType::CvgBin, u64::MAX);

        let err = merge_into_sqlite(
            &store,
            &[Source::Memory(&good), Source::Memory(&bad)],
            &opts(false),
        )
        .unwrap_err();
        assert!(matches!(err, NcdbError::InvalidData(_)));
        assert_eq!(store.load().unwrap(), before);
    }

    #[test]
    fn test_squash_accumulates_summary() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = run("t1", [1, 0, 0]);
        let b = run("t2", [0, 1, 0]);
        merge_into_sqlite(&store, &[Source::Memory(&a), Source::Memory(&b)], &opts(true)).unwrap();
        merge_into_sqlite(&store, &[Source::Memory(&run("t3", [0, 0, 1]))], &opts(true)).unwrap();

        let db = store.load().unwrap();
        assert_eq!(db.test_count(), 0);
        assert_eq!(db.history.len(), 1);
        assert_eq!(db.history[0].logical_name, SQUASHED_HISTORY_NAME);
        assert_eq!(db.history[0].same_tests, Some(3));
        assert_eq!(counts(&db), vec![1, 1, 1]);
    }

    #[test]
    fn test_merge_into_copy_leaves_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.db");
        SqliteStore::open(&target).unwrap().save(&run("t1", [1, 1, 1])).unwrap();

        let output = dir.path().join("out").join("merged.db");
        let src = run("t2", [2, 2, 2]);
        merge_into_sqlite_copy(&target, &output, &[Source::Memory(&src)], &opts(false)).unwrap();

        assert_eq!(counts(&SqliteStore::open(&target).unwrap().load().unwrap()), vec![1, 1, 1]);
        assert_eq!(counts(&SqliteStore::open(&output).unwrap().load().unwrap()), vec![3, 3, 3]);
    }

    #[test]
    fn test_merge_into_copy_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let err = merge_into_sqlite_copy(
            &dir.path().join("missing.db"),
            &dir.path().join("out.db"),
            &[],
            &opts(false),
        )
        .unwrap_err();
        assert!(matches!(err, NcdbError::Io(_)));
    }
}
