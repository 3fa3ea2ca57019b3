//! Container reader.

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::codec::{decode_counts, decode_scope_tree, dfs, StringTable};
use crate::container::manifest::Manifest;
use crate::container::{
    history, sources, MEMBER_COUNTS, MEMBER_HISTORY, MEMBER_MANIFEST, MEMBER_SCOPE_TREE,
    MEMBER_SOURCES, MEMBER_STRINGS,
};
use crate::errors::{NcdbError, NcdbResult};
use crate::meta;
use crate::models::{CoverageDb, HistoryNode};

/// A member's bytes, or `None` when the archive does not contain it.
pub(crate) fn member<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> NcdbResult<Option<Vec<u8>>> {
    match zip.by_name(name) {
        Ok(mut file) => {
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)?;
            Ok(Some(buf))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn required<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> NcdbResult<Vec<u8>> {
    member(zip, name)?.ok_or_else(|| NcdbError::MissingMember(name.to_string()))
}

fn optional<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> NcdbResult<Vec<u8>> {
    Ok(member(zip, name)?.unwrap_or_default())
}

pub(crate) fn open_archive(path: &Path) -> NcdbResult<ZipArchive<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(ZipArchive::new(BufReader::new(file))?)
}

pub(crate) fn manifest_of<R: Read + Seek>(zip: &mut ZipArchive<R>) -> NcdbResult<Manifest> {
    Manifest::from_bytes(&required(zip, MEMBER_MANIFEST)?)
}

pub(crate) fn history_of<R: Read + Seek>(zip: &mut ZipArchive<R>) -> NcdbResult<Vec<HistoryNode>> {
    history::parse(&required(zip, MEMBER_HISTORY)?)
}

/// Decode the full database held in `zip`.
///
/// Members are applied in dependency order: the scope tree first, then
/// history (attribute and contribution members index into it), then the
/// sparse members, attributes last.
pub(crate) fn decode_archive<R: Read + Seek>(zip: &mut ZipArchive<R>) -> NcdbResult<CoverageDb> {
    let manifest = manifest_of(zip)?;
    let strings = StringTable::from_bytes(&required(zip, MEMBER_STRINGS)?)?;
    let counts = decode_counts(&required(zip, MEMBER_COUNTS)?)?;
    let files = sources::parse(&required(zip, MEMBER_SOURCES)?)?;
    let tree = required(zip, MEMBER_SCOPE_TREE)?;

    let mut db = CoverageDb::new();
    db.path_separator = manifest.path_separator.clone();
    db.ucis_version = manifest.ucis_version.clone();
    decode_scope_tree(&tree, &strings, &files, &counts, &mut db)?;
    db.history = history_of(zip)?;

    let order = dfs::dfs_scopes(&db);
    let flat = dfs::flat_coveritems_of(&db, &order);

    meta::tags::apply(&mut db, &order, &optional(zip, meta::tags::MEMBER)?)?;
    meta::properties::apply(
        &mut db,
        &order,
        &flat,
        &optional(zip, meta::properties::MEMBER)?,
    )?;
    meta::toggle::apply(&mut db, &order, &optional(zip, meta::toggle::MEMBER)?)?;
    meta::fsm::apply(&mut db, &order, &optional(zip, meta::fsm::MEMBER)?)?;
    meta::cross::apply(&mut db, &order, &optional(zip, meta::cross::MEMBER)?)?;
    meta::design_units::apply(
        &mut db,
        &order,
        &optional(zip, meta::design_units::MEMBER)?,
    )?;

    let contrib_names: Vec<String> = zip
        .file_names()
        .filter(|n| n.starts_with(meta::contrib::PREFIX))
        .map(str::to_string)
        .collect();
    let mut contrib_members = Vec::with_capacity(contrib_names.len());
    for name in contrib_names {
        let data = required(zip, &name)?;
        contrib_members.push((name, data));
    }
    meta::contrib::apply(
        &mut db,
        flat.len(),
        contrib_members
            .iter()
            .map(|(n, d)| (n.as_str(), d.as_slice())),
    )?;

    meta::formal::apply(&mut db, &flat, &optional(zip, meta::formal::MEMBER)?)?;
    meta::coveritem_flags::apply(
        &mut db,
        &flat,
        &optional(zip, meta::coveritem_flags::MEMBER)?,
    )?;
    meta::attrs::apply(&mut db, &order, &optional(zip, meta::attrs::MEMBER)?)?;

    debug!(
        scopes = order.len(),
        coveritems = flat.len(),
        history = db.history.len(),
        "decoded container"
    );
    Ok(db)
}

pub fn read_container(path: &Path) -> NcdbResult<CoverageDb> {
    decode_archive(&mut open_archive(path)?)
}

pub fn read_container_bytes(bytes: &[u8]) -> NcdbResult<CoverageDb> {
    decode_archive(&mut ZipArchive::new(Cursor::new(bytes))?)
}

/// Read only `manifest.json`.
pub fn read_manifest(path: &Path) -> NcdbResult<Manifest> {
    manifest_of(&mut open_archive(path)?)
}

/// Read only the hit-count array, without touching the scope tree.
pub fn read_counts(path: &Path) -> NcdbResult<Vec<u64>> {
    decode_counts(&required(&mut open_archive(path)?, MEMBER_COUNTS)?)
}
