//! Same-schema merge: element-wise count addition.
//!
//! Inputs are read in parallel on a bounded rayon pool; the reduction and
//! the write run on the calling thread once every read has finished. The
//! scope tree is never decoded; the first input's structural members are
//! copied into the output byte for byte. `attrs.json` is the exception: its
//! history section is keyed by history position, so every input's member is
//! decoded and re-keyed onto the merged history.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::codec::{decode_counts, encode_counts};
use crate::config::{MergeOptions, MERGE_TOOL_CATEGORY};
use crate::container::manifest::{now_utc, Manifest};
use crate::container::reader::{history_of, manifest_of, member, open_archive, required};
use crate::container::writer::{persist, zip_members};
use crate::container::{history, MEMBER_COUNTS, MEMBER_HISTORY, MEMBER_MANIFEST};
use crate::errors::{NcdbError, NcdbResult};
use crate::merge::{
    display_paths, merge_history_node, plan_history, read_parallel, remap_contributions, MergePath,
    MergeStats,
};
use crate::meta::{attrs, contrib};
use crate::models::{Contributions, HistoryKind, HistoryNode};

struct FastInput {
    manifest: Manifest,
    counts: Vec<u64>,
    history: Vec<HistoryNode>,
    attrs: Option<Vec<u8>>,
    contributions: Contributions,
}

fn read_input(path: &Path) -> NcdbResult<FastInput> {
    let started = Instant::now();
    let mut zip = open_archive(path)?;
    let manifest = manifest_of(&mut zip)?;
    let counts = decode_counts(&required(&mut zip, MEMBER_COUNTS)?)?;
    let history = history_of(&mut zip)?;
    let attrs = member(&mut zip, attrs::MEMBER)?;

    let names: Vec<String> = zip
        .file_names()
        .filter(|n| n.starts_with(contrib::PREFIX))
        .map(str::to_string)
        .collect();
    let mut contributions = Contributions::new();
    for name in names {
        let Some(idx) = contrib::parse_member_name(&name) else {
            warn!(path = %path.display(), member = %name, "ignoring malformed contribution member");
            continue;
        };
        let bins = contrib::decode_bins(&required(&mut zip, &name)?)?;
        if let Some(&bin) = bins.keys().next_back().filter(|&&b| b >= counts.len()) {
            return Err(NcdbError::IndexOutOfRange {
                what: "coveritem",
                index: bin as u64,
                len: counts.len(),
            });
        }
        contributions.insert(idx, bins);
    }

    debug!(
        path = %path.display(),
        coveritems = counts.len(),
        history = history.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "read merge input"
    );
    Ok(FastInput {
        manifest,
        counts,
        history,
        attrs,
        contributions,
    })
}

/// Element-wise sum of equally long count arrays.
pub(crate) fn sum_counts<'a>(arrays: impl IntoIterator<Item = &'a [u64]>) -> NcdbResult<Vec<u64>> {
    let mut arrays = arrays.into_iter();
    let Some(first) = arrays.next() else {
        return Ok(Vec::new());
    };
    let mut acc = first.to_vec();
    for counts in arrays {
        if counts.len() != acc.len() {
            return Err(NcdbError::SchemaMismatch {
                expected: acc.len(),
                actual: counts.len(),
            });
        }
        for (slot, &c) in acc.iter_mut().zip(counts) {
            *slot = slot
                .checked_add(c)
                .ok_or_else(|| NcdbError::Merge("hit count overflow".to_string()))?;
        }
    }
    Ok(acc)
}

/// Merge containers that share one schema hash into `target`.
pub fn merge_same_schema(sources: &[PathBuf], target: &Path, opts: &MergeOptions) -> NcdbResult<MergeStats> {
    if sources.is_empty() {
        return Err(NcdbError::Merge("no source files provided".to_string()));
    }
    let started = Instant::now();
    let inputs = read_parallel(sources, opts.workers, read_input)?;

    let schema = &inputs[0].manifest.schema_hash;
    if let Some(other) = inputs.iter().find(|i| &i.manifest.schema_hash != schema) {
        return Err(NcdbError::Merge(format!(
            "schema hash {} differs from {}",
            other.manifest.schema_hash, schema
        )));
    }
    let merged = sum_counts(inputs.iter().map(|i| i.counts.as_slice()))?;

    let target_name = target.display().to_string();
    let merge_node = merge_history_node(&target_name, &display_paths(sources), MERGE_TOOL_CATEGORY);
    let histories: Vec<&[HistoryNode]> = inputs.iter().map(|i| i.history.as_slice()).collect();
    let plan = plan_history(&histories, merge_node, opts);

    let mut contributions = Contributions::new();
    for (input, map) in inputs.iter().zip(&plan.remap) {
        remap_contributions(&mut contributions, &input.contributions, map, Some)?;
    }

    let manifest = Manifest {
        created: opts.write.created.clone().unwrap_or_else(now_utc),
        coveritem_count: merged.len() as u64,
        test_count: plan
            .history
            .iter()
            .filter(|h| h.kind == HistoryKind::Test)
            .count() as u64,
        total_hits: merged.iter().fold(0u64, |acc, &c| acc.saturating_add(c)),
        covered_bins: merged.iter().filter(|&&c| c > 0).count() as u64,
        ..inputs[0].manifest.clone()
    };

    let attr_inputs: Vec<(Option<&[u8]>, &[HistoryNode])> = inputs
        .iter()
        .map(|i| (i.attrs.as_deref(), i.history.as_slice()))
        .collect();
    let merged_attrs = attrs::merge(&attr_inputs, &plan.remap, &plan.history)?;

    let mut members = vec![
        (MEMBER_MANIFEST.to_string(), manifest.to_bytes()?),
        (MEMBER_COUNTS.to_string(), encode_counts(&merged)),
        (MEMBER_HISTORY.to_string(), history::serialize(&plan.history)?),
    ];
    if let Some(data) = merged_attrs {
        members.push((attrs::MEMBER.to_string(), data));
    }
    let mut first = open_archive(&sources[0])?;
    let structural: Vec<String> = first
        .file_names()
        .filter(|n| {
            !matches!(*n, MEMBER_MANIFEST | MEMBER_COUNTS | MEMBER_HISTORY | attrs::MEMBER)
                && !n.starts_with(contrib::PREFIX)
        })
        .map(str::to_string)
        .collect();
    for name in structural {
        let data = required(&mut first, &name)?;
        members.push((name, data));
    }
    members.extend(
        contributions
            .iter()
            .filter(|(_, bins)| !bins.is_empty())
            .map(|(&idx, bins)| (contrib::member_name(idx), contrib::encode_bins(bins))),
    );

    let bytes = zip_members(&members, opts.write.compression)?;
    persist(target, &bytes)?;

    let mut stats = MergeStats::new(MergePath::SameSchema);
    stats.coveritems_matched = (merged.len() * inputs.len().saturating_sub(1)) as u64;
    stats.total_hits_added = inputs[1..]
        .iter()
        .flat_map(|i| i.counts.iter())
        .fold(0u64, |acc, &c| acc.saturating_add(c));
    stats.tests_merged = plan.tests_merged;
    info!(
        target = %target.display(),
        sources = sources.len(),
        coveritems = merged.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "same-schema merge complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Compression, WriteOptions};
    use crate::container::{read_container, read_counts, read_manifest, write_container};
    use crate::models::{CoverType, CoverageDb, ScopeType, Value};

    fn opts(squash: bool) -> MergeOptions {
        MergeOptions {
            workers: 4,
            create_history: true,
            squash_history: squash,
            write: WriteOptions {
                compression: Compression::Deflate,
                created: None,
            },
        }
    }

    fn cg1(counts: [u64; 3], test: &str) -> CoverageDb {
        let mut db = CoverageDb::new();
        let cg = db.create_scope(None, "cg1", ScopeType::Covergroup);
        let cp = db.create_scope(Some(cg), "cp1", ScopeType::Coverpoint);
        for (i, c) in counts.into_iter().enumerate() {
            db.create_next_cover(cp, &format!("b{i}"), CoverType::CvgBin, c);
        }
        let t = db.add_history(HistoryNode::test(test));
        for (i, c) in counts.into_iter().enumerate().filter(|(_, c)| *c > 0) {
            db.record_contribution(t, i, c);
        }
        db
    }

    fn write(dir: &Path, name: &str, db: &CoverageDb) -> PathBuf {
        let path = dir.join(name);
        write_container(db, &path, &WriteOptions::default()).unwrap();
        path
    }

    #[test]
    fn test_cg1_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.cdb", &cg1([5, 10, 0], "t1"));
        let b = write(dir.path(), "b.cdb", &cg1([1, 1, 1], "t2"));
        assert_eq!(
            read_manifest(&a).unwrap().schema_hash,
            read_manifest(&b).unwrap().schema_hash
        );

        let out = dir.path().join("merged.cdb");
        let stats = merge_same_schema(&[a, b], &out, &opts(false)).unwrap();
        assert_eq!(stats.path, MergePath::SameSchema);
        assert_eq!(stats.tests_merged, 2);
        assert_eq!(stats.total_hits_added, 3);
        assert_eq!(read_counts(&out).unwrap(), vec![6, 11, 1]);

        let db = read_container(&out).unwrap();
        assert_eq!(db.test_count(), 2);
        assert_eq!(db.history_of_kind(HistoryKind::Merge).count(), 1);
        assert_eq!(db.history[2].tool_category.as_deref(), Some(MERGE_TOOL_CATEGORY));
        assert_eq!(db.contributions[&0][&1], 10);
        assert_eq!(db.contributions[&1][&2], 1);

        let manifest = read_manifest(&out).unwrap();
        assert_eq!(manifest.total_hits, 18);
        assert_eq!(manifest.covered_bins, 3);
        assert_eq!(manifest.test_count, 2);
    }

    #[test]
    fn test_commutative() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.cdb", &cg1([7, 0, 2], "ta"));
        let b = write(dir.path(), "b.cdb", &cg1([u32::MAX as u64 + 5, 3, 0], "tb"));
        let ab = dir.path().join("ab.cdb");
        let ba = dir.path().join("ba.cdb");
        merge_same_schema(&[a.clone(), b.clone()], &ab, &opts(false)).unwrap();
        merge_same_schema(&[b, a], &ba, &opts(false)).unwrap();
        let want = vec![u32::MAX as u64 + 12, 3, 2];
        assert_eq!(read_counts(&ab).unwrap(), want);
        assert_eq!(read_counts(&ba).unwrap(), want);
    }

    #[test]
    fn test_length_mismatch_is_schema_mismatch() {
        assert!(matches!(
            sum_counts([&[1u64, 2][..], &[1u64][..]]),
            Err(NcdbError::SchemaMismatch {
                expected: 2,
                actual: 1
            })
        ));
        assert_eq!(sum_counts(Vec::<&[u64]>::new()).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn test_mismatched_hash_rejected_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.cdb", &cg1([1, 1, 1], "ta"));
        let mut other = cg1([1, 1, 1], "tb");
        other.create_scope(None, "extra", ScopeType::Covergroup);
        let b = write(dir.path(), "b.cdb", &other);
        let out = dir.path().join("out.cdb");
        assert!(merge_same_schema(&[a, b], &out, &opts(false)).is_err());
        assert!(!out.exists());
    }

    #[test]
    fn test_squash_history() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.cdb", &cg1([1, 0, 0], "t1"));
        let b = write(dir.path(), "b.cdb", &cg1([0, 2, 0], "t2"));
        let first = dir.path().join("first.cdb");
        merge_same_schema(&[a, b], &first, &opts(true)).unwrap();

        let c = write(dir.path(), "c.cdb", &cg1([0, 0, 3], "t3"));
        let second = dir.path().join("second.cdb");
        let stats = merge_same_schema(&[first, c], &second, &opts(true)).unwrap();
        assert_eq!(stats.tests_merged, 1);

        let db = read_container(&second).unwrap();
        assert_eq!(db.history.len(), 1);
        assert_eq!(db.history[0].same_tests, Some(3));
        assert_eq!(db.contributions[&0].values().sum::<u64>(), 6);
        assert_eq!(read_counts(&second).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_structural_members_copied_from_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut tagged = cg1([1, 1, 1], "t1");
        tagged.scope_mut(0).tags.push("smoke".into());
        let a = write(dir.path(), "a.cdb", &tagged);
        let b = write(dir.path(), "b.cdb", &cg1([1, 1, 1], "t2"));
        let out = dir.path().join("out.cdb");
        merge_same_schema(&[a, b], &out, &opts(false)).unwrap();
        let db = read_container(&out).unwrap();
        assert_eq!(db.scope(db.roots[0]).tags, vec!["smoke".to_string()]);
    }

    #[test]
    fn test_squash_drops_attrs_of_folded_tests() {
        let dir = tempfile::tempdir().unwrap();
        let mut seeded = cg1([1, 0, 0], "t1");
        seeded.history[0].attrs.insert("seed".into(), Value::Int(7));
        seeded.scope_mut(0).attrs.insert("owner".into(), Value::from("dv"));
        let a = write(dir.path(), "a.cdb", &seeded);
        let b = write(dir.path(), "b.cdb", &cg1([0, 1, 0], "t2"));
        let out = dir.path().join("out.cdb");
        merge_same_schema(&[a, b], &out, &opts(true)).unwrap();

        let db = read_container(&out).unwrap();
        assert_eq!(db.history.len(), 1);
        assert!(db.history[0].attrs.is_empty());
        assert_eq!(db.scope(db.roots[0]).attrs["owner"], Value::from("dv"));
    }

    #[test]
    fn test_history_and_global_attrs_of_later_inputs_survive() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = cg1([1, 0, 0], "t1");
        first.attrs.insert("project".into(), Value::from("soc"));
        let mut second = cg1([0, 1, 0], "t2");
        second.history[0].attrs.insert("seed".into(), Value::Int(7));
        second.attrs.insert("project".into(), Value::from("other"));
        second.attrs.insert("site".into(), Value::from("lab"));
        let a = write(dir.path(), "a.cdb", &first);
        let b = write(dir.path(), "b.cdb", &second);
        let out = dir.path().join("out.cdb");
        merge_same_schema(&[a, b], &out, &opts(false)).unwrap();

        let db = read_container(&out).unwrap();
        assert!(db.history[0].attrs.is_empty());
        assert_eq!(db.history[1].attrs["seed"], Value::Int(7));
        assert_eq!(db.attrs["project"], Value::from("soc"));
        assert_eq!(db.attrs["site"], Value::from("lab"));
    }
}
