//! Container writer.
//!
//! Every member is encoded into memory and the archive is assembled into a
//! single buffer before anything touches the filesystem. On-disk writes go
//! through a sibling temporary file that is renamed into place.

use std::io::{Cursor, Write};
use std::path::Path;

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::codec::{dfs, encode_counts, encode_scope_tree, StringTable};
use crate::config::{Compression, WriteOptions};
use crate::container::manifest::Manifest;
use crate::container::{
    history, sources, MEMBER_COUNTS, MEMBER_HISTORY, MEMBER_MANIFEST, MEMBER_SCOPE_TREE,
    MEMBER_SOURCES, MEMBER_STRINGS,
};
use crate::errors::NcdbResult;
use crate::meta;
use crate::models::CoverageDb;

/// Encoded members of one container, in archive order.
pub(crate) type Members = Vec<(String, Vec<u8>)>;

/// Encode every member of `db`. Optional members with nothing to store are
/// left out.
pub(crate) fn encode_members(db: &CoverageDb, opts: &WriteOptions) -> NcdbResult<(Manifest, Members)> {
    let mut strings = StringTable::new();
    let tree = encode_scope_tree(db, &mut strings);
    let order = dfs::dfs_scopes(db);
    let flat = dfs::flat_coveritems_of(db, &order);

    let manifest = Manifest::build(
        db,
        &tree.bytes,
        &tree.counts,
        order.len(),
        opts.created.as_deref(),
    );

    let mut members: Members = vec![
        (MEMBER_MANIFEST.to_string(), manifest.to_bytes()?),
        (MEMBER_STRINGS.to_string(), strings.serialize()),
        (MEMBER_SCOPE_TREE.to_string(), tree.bytes),
        (MEMBER_COUNTS.to_string(), encode_counts(&tree.counts)),
        (MEMBER_HISTORY.to_string(), history::serialize(&db.history)?),
        (MEMBER_SOURCES.to_string(), sources::serialize(&tree.files)?),
    ];

    let optional = [
        (meta::attrs::MEMBER, meta::attrs::serialize(db, &order)?),
        (meta::tags::MEMBER, meta::tags::serialize(db, &order)?),
        (
            meta::properties::MEMBER,
            meta::properties::serialize(db, &order, &flat)?,
        ),
        (meta::toggle::MEMBER, meta::toggle::serialize(db, &order)?),
        (meta::fsm::MEMBER, meta::fsm::serialize(db, &order)?),
        (meta::cross::MEMBER, meta::cross::serialize(db, &order)?),
        (
            meta::design_units::MEMBER,
            meta::design_units::serialize(db, &order)?,
        ),
        (meta::formal::MEMBER, meta::formal::serialize(db, &flat)?),
        (
            meta::coveritem_flags::MEMBER,
            meta::coveritem_flags::serialize(db, &flat)?,
        ),
    ];
    for (name, data) in optional {
        if let Some(data) = data {
            members.push((name.to_string(), data));
        }
    }
    members.extend(meta::contrib::serialize(db));
    Ok((manifest, members))
}

/// Assemble `members` into a ZIP archive held in memory.
pub(crate) fn zip_members(members: &[(String, Vec<u8>)], compression: Compression) -> NcdbResult<Vec<u8>> {
    let method = match compression {
        Compression::Deflate => CompressionMethod::Deflated,
        Compression::Stored => CompressionMethod::Stored,
    };
    let options = SimpleFileOptions::default().compression_method(method);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in members {
        debug!(member = %name, bytes = data.len(), "writing member");
        zip.start_file(name.as_str(), options)?;
        zip.write_all(data)?;
    }
    Ok(zip.finish()?.into_inner())
}

/// Write `bytes` to `path` via a temporary sibling and a rename.
pub(crate) fn persist(path: &Path, bytes: &[u8]) -> NcdbResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = Path::new(&tmp_name);
    std::fs::write(tmp, bytes)?;
    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(e.into());
    }
    Ok(())
}

pub fn write_container_bytes(db: &CoverageDb, opts: &WriteOptions) -> NcdbResult<Vec<u8>> {
    let (_, members) = encode_members(db, opts)?;
    zip_members(&members, opts.compression)
}

/// Write `db` to `path`; returns the manifest that was stored.
pub fn write_container(db: &CoverageDb, path: &Path, opts: &WriteOptions) -> NcdbResult<Manifest> {
    let (manifest, members) = encode_members(db, opts)?;
    let bytes = zip_members(&members, opts.compression)?;
    persist(path, &bytes)?;
    info!(
        path = %path.display(),
        bytes = bytes.len(),
        members = members.len(),
        scopes = manifest.scope_count,
        coveritems = manifest.coveritem_count,
        "wrote container"
    );
    Ok(manifest)
}
