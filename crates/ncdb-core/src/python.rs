//! PyO3 bindings for the `_ncdb_core` extension module.
//!
//! Codec primitives take and return `bytes`; merge entry points release the
//! GIL and return their `MergeStats` as a dict.

use std::path::{Path, PathBuf};

use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict};
use pyo3::wrap_pyfunction;

use crate::codec::{counts, varint};
use crate::config::{self, MergeOptions};
use crate::container::{self, CdbFormat, Manifest};
use crate::errors::{NcdbError, NcdbResult};
use crate::merge::{self, MergeStats, Source};
use crate::models::CoverageDb;
use crate::store::SqliteStore;

#[pyfunction]
fn encode_varint(py: Python<'_>, value: u64) -> Bound<'_, PyBytes> {
    PyBytes::new(py, &varint::encode_varint(value))
}

#[pyfunction]
#[pyo3(signature = (data, offset=0))]
fn decode_varint(data: &[u8], offset: usize) -> PyResult<(u64, usize)> {
    Ok(varint::decode_varint(data, offset)?)
}

#[pyfunction]
fn encode_varints(py: Python<'_>, values: Vec<u64>) -> Bound<'_, PyBytes> {
    PyBytes::new(py, &varint::encode_varints(&values))
}

#[pyfunction]
#[pyo3(signature = (data, count, offset=0))]
fn decode_varints(data: &[u8], count: usize, offset: usize) -> PyResult<(Vec<u64>, usize)> {
    Ok(varint::decode_varints(data, count, offset)?)
}

#[pyfunction]
fn encode_counts(py: Python<'_>, values: Vec<u64>) -> Bound<'_, PyBytes> {
    PyBytes::new(py, &counts::encode_counts(&values))
}

#[pyfunction]
fn decode_counts(data: &[u8]) -> PyResult<Vec<u64>> {
    Ok(counts::decode_counts(data)?)
}

#[pyfunction]
fn detect_format(path: &str) -> PyResult<&'static str> {
    Ok(container::detect_format(Path::new(path))?.as_str())
}

fn manifest_dict<'py>(py: Python<'py>, manifest: &Manifest) -> PyResult<Bound<'py, PyDict>> {
    let d = PyDict::new(py);
    d.set_item("format", &manifest.format)?;
    d.set_item("version", &manifest.version)?;
    d.set_item("ucis_version", &manifest.ucis_version)?;
    d.set_item("created", &manifest.created)?;
    d.set_item("path_separator", &manifest.path_separator)?;
    d.set_item("scope_count", manifest.scope_count)?;
    d.set_item("coveritem_count", manifest.coveritem_count)?;
    d.set_item("test_count", manifest.test_count)?;
    d.set_item("total_hits", manifest.total_hits)?;
    d.set_item("covered_bins", manifest.covered_bins)?;
    d.set_item("schema_hash", &manifest.schema_hash)?;
    d.set_item("generator", &manifest.generator)?;
    Ok(d)
}

#[pyfunction]
fn read_manifest<'py>(py: Python<'py>, path: &str) -> PyResult<Bound<'py, PyDict>> {
    let manifest = container::read_manifest(Path::new(path))?;
    manifest_dict(py, &manifest)
}

#[pyfunction]
fn read_counts(py: Python<'_>, path: &str) -> PyResult<Vec<u64>> {
    let path = PathBuf::from(path);
    Ok(py.allow_threads(|| container::read_counts(&path))?)
}

fn stats_dict<'py>(py: Python<'py>, stats: &MergeStats) -> PyResult<Bound<'py, PyDict>> {
    let d = PyDict::new(py);
    d.set_item("path", stats.path.as_str())?;
    d.set_item("scopes_matched", stats.scopes_matched)?;
    d.set_item("scopes_added", stats.scopes_added)?;
    d.set_item("coveritems_matched", stats.coveritems_matched)?;
    d.set_item("coveritems_added", stats.coveritems_added)?;
    d.set_item("total_hits_added", stats.total_hits_added)?;
    d.set_item("tests_merged", stats.tests_merged)?;
    Ok(d)
}

fn merge_options(workers: Option<i64>, create_history: bool, squash_history: bool) -> MergeOptions {
    let mut opts = MergeOptions {
        create_history,
        squash_history,
        ..MergeOptions::default()
    };
    if let Some(w) = workers {
        opts = opts.with_workers(w);
    }
    opts
}

#[pyfunction]
#[pyo3(signature = (sources, target, workers=None, create_history=true, squash_history=false))]
fn merge_containers<'py>(
    py: Python<'py>,
    sources: Vec<String>,
    target: &str,
    workers: Option<i64>,
    create_history: bool,
    squash_history: bool,
) -> PyResult<Bound<'py, PyDict>> {
    let sources: Vec<PathBuf> = sources.into_iter().map(PathBuf::from).collect();
    let target = PathBuf::from(target);
    let opts = merge_options(workers, create_history, squash_history);
    let stats = py.allow_threads(|| merge::merge_containers(&sources, &target, &opts))?;
    stats_dict(py, &stats)
}

/// Opened inputs of a SQLite merge; `Source` values borrow from these.
enum Opened {
    Store(SqliteStore),
    Container(CoverageDb),
}

fn open_source(path: &Path) -> NcdbResult<Opened> {
    match container::detect_format(path)? {
        CdbFormat::Sqlite => Ok(Opened::Store(SqliteStore::open(path)?)),
        CdbFormat::Ncdb => Ok(Opened::Container(container::read_container(path)?)),
        CdbFormat::Unknown => Err(NcdbError::UnknownFormat(path.display().to_string())),
    }
}

fn run_sqlite_merge(
    target: &Path,
    output: Option<&Path>,
    sources: &[PathBuf],
    opts: &MergeOptions,
) -> NcdbResult<MergeStats> {
    let opened = sources.iter().map(|p| open_source(p)).collect::<NcdbResult<Vec<_>>>()?;
    let refs: Vec<Source<'_>> = opened
        .iter()
        .map(|o| match o {
            Opened::Store(store) => Source::Sqlite(store),
            Opened::Container(db) => Source::Memory(db),
        })
        .collect();
    match output {
        Some(output) => merge::merge_into_sqlite_copy(target, output, &refs, opts),
        None => merge::merge_into_sqlite(&SqliteStore::open(target)?, &refs, opts),
    }
}

/// Merge SQLite databases or NCDB containers into the SQLite database at
/// `target`, or into a copy of it at `output`.
#[pyfunction]
#[pyo3(signature = (target, sources, output=None, create_history=true, squash_history=false))]
fn merge_sqlite<'py>(
    py: Python<'py>,
    target: &str,
    sources: Vec<String>,
    output: Option<String>,
    create_history: bool,
    squash_history: bool,
) -> PyResult<Bound<'py, PyDict>> {
    let target = PathBuf::from(target);
    let output = output.map(PathBuf::from);
    let sources: Vec<PathBuf> = sources.into_iter().map(PathBuf::from).collect();
    let opts = merge_options(None, create_history, squash_history);
    let stats = py.allow_threads(|| run_sqlite_merge(&target, output.as_deref(), &sources, &opts))?;
    stats_dict(py, &stats)
}

/// Convert between the two on-disk formats based on the source's magic bytes.
#[pyfunction]
fn convert(py: Python<'_>, source: &str, target: &str) -> PyResult<()> {
    let source = PathBuf::from(source);
    let target = PathBuf::from(target);
    py.allow_threads(|| -> NcdbResult<()> {
        match open_source(&source)? {
            Opened::Store(store) => {
                container::write_container(&store.load()?, &target, &Default::default())?;
            }
            Opened::Container(db) => SqliteStore::open(&target)?.save(&db)?,
        }
        Ok(())
    })?;
    Ok(())
}

#[pymodule]
fn _ncdb_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("FORMAT", container::manifest::FORMAT)?;
    m.add("FORMAT_VERSION", container::manifest::FORMAT_VERSION)?;
    m.add("GENERATOR", config::GENERATOR)?;
    m.add("MAX_MERGE_WORKERS", config::MAX_MERGE_WORKERS)?;
    m.add("DEFAULT_MERGE_WORKERS", config::DEFAULT_MERGE_WORKERS)?;

    m.add_function(wrap_pyfunction!(encode_varint, m)?)?;
    m.add_function(wrap_pyfunction!(decode_varint, m)?)?;
    m.add_function(wrap_pyfunction!(encode_varints, m)?)?;
    m.add_function(wrap_pyfunction!(decode_varints, m)?)?;
    m.add_function(wrap_pyfunction!(encode_counts, m)?)?;
    m.add_function(wrap_pyfunction!(decode_counts, m)?)?;

    m.add_function(wrap_pyfunction!(detect_format, m)?)?;
    m.add_function(wrap_pyfunction!(read_manifest, m)?)?;
    m.add_function(wrap_pyfunction!(read_counts, m)?)?;
    m.add_function(wrap_pyfunction!(convert, m)?)?;

    m.add_function(wrap_pyfunction!(merge_containers, m)?)?;
    m.add_function(wrap_pyfunction!(merge_sqlite, m)?)?;
    Ok(())
}
