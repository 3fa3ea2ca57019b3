//! Scope hierarchy encoding (`scope_tree.bin`).
//!
//! One record per scope in DFS pre-order. A toggle pair is a marker byte
//! plus a name reference; everything else is a regular record:
//!
//! ```text
//! 0x00 scope_type name_ref presence [flags] [file_id line token] [weight]
//!      [at_least] [goal] [source_type] n_children n_coveritems
//!      [cover_type name_ref*n_coveritems]
//! ```
//!
//! All integers are varints and names are string-table references. Hit counts
//! are not stored here; the encoder hands them back in DFS order for
//! `counts.bin` and the decoder consumes them in the same order.

use std::collections::HashMap;

use tracing::debug;

use crate::codec::string_table::StringTable;
use crate::codec::varint::{write_varint, ByteReader};
use crate::config::MAX_SCOPE_DEPTH;
use crate::errors::{NcdbError, NcdbResult};
use crate::models::{
    CoverType, CoverageDb, ScopeId, ScopeType, SourceLocation, SourceType, TOGGLE_BIN_0_TO_1,
    TOGGLE_BIN_1_TO_0,
};

pub const MARKER_REGULAR: u8 = 0x00;
pub const MARKER_TOGGLE_PAIR: u8 = 0x01;

pub const PRESENCE_FLAGS: u64 = 0x01;
pub const PRESENCE_SOURCE: u64 = 0x02;
pub const PRESENCE_WEIGHT: u64 = 0x04;
pub const PRESENCE_AT_LEAST: u64 = 0x08;
/// Reserved for covergroup options; never written.
pub const PRESENCE_CVG_OPTS: u64 = 0x10;
pub const PRESENCE_GOAL: u64 = 0x20;
pub const PRESENCE_SOURCE_TYPE: u64 = 0x40;

const KNOWN_PRESENCE: u64 = PRESENCE_FLAGS
    | PRESENCE_SOURCE
    | PRESENCE_WEIGHT
    | PRESENCE_AT_LEAST
    | PRESENCE_GOAL
    | PRESENCE_SOURCE_TYPE;

/// Output of one encode pass.
#[derive(Debug, Clone, Default)]
pub struct EncodedTree {
    pub bytes: Vec<u8>,
    /// Hit counts in DFS order.
    pub counts: Vec<u64>,
    /// Source file paths, indexed by the file ids written into `bytes`.
    pub files: Vec<String>,
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

struct Encoder<'a> {
    db: &'a CoverageDb,
    strings: &'a mut StringTable,
    out: EncodedTree,
    file_ids: HashMap<String, u64>,
}

impl Encoder<'_> {
    fn file_id(&mut self, file: &str) -> u64 {
        if let Some(&id) = self.file_ids.get(file) {
            return id;
        }
        let id = self.out.files.len() as u64;
        self.out.files.push(file.to_string());
        self.file_ids.insert(file.to_string(), id);
        id
    }

    fn write_toggle_pair(&mut self, id: ScopeId) {
        let node = self.db.scope(id);
        let name_ref = self.strings.add(&node.name);
        self.out.bytes.push(MARKER_TOGGLE_PAIR);
        write_varint(&mut self.out.bytes, name_ref as u64);
        for label in [TOGGLE_BIN_0_TO_1, TOGGLE_BIN_1_TO_0] {
            let count = node.coveritem(label).map(|c| c.count).unwrap_or(0);
            self.out.counts.push(count);
        }
    }

    fn write_regular(&mut self, id: ScopeId) {
        let db = self.db;
        let node = db.scope(id);
        let name_ref = self.strings.add(&node.name);

        let first = node.coveritems.first();
        let at_least_override = first
            .filter(|ci| ci.at_least != ci.cover_type.default_at_least())
            .map(|ci| ci.at_least);

        let mut presence = 0u64;
        if node.flags != 0 {
            presence |= PRESENCE_FLAGS;
        }
        if node.source.is_some() {
            presence |= PRESENCE_SOURCE;
        }
        if node.weight != 1 {
            presence |= PRESENCE_WEIGHT;
        }
        if at_least_override.is_some() {
            presence |= PRESENCE_AT_LEAST;
        }
        if node.goal.is_some() {
            presence |= PRESENCE_GOAL;
        }
        if node.source_type != SourceType::None {
            presence |= PRESENCE_SOURCE_TYPE;
        }

        let file_id = node.source.as_ref().map(|src| self.file_id(&src.file));

        let buf = &mut self.out.bytes;
        buf.push(MARKER_REGULAR);
        write_varint(buf, node.scope_type.code());
        write_varint(buf, name_ref as u64);
        write_varint(buf, presence);

        if presence & PRESENCE_FLAGS != 0 {
            write_varint(buf, node.flags);
        }
        if let (Some(src), Some(fid)) = (&node.source, file_id) {
            write_varint(buf, fid);
            write_varint(buf, src.line);
            write_varint(buf, src.token);
        }
        if presence & PRESENCE_WEIGHT != 0 {
            write_varint(buf, node.weight);
        }
        if let Some(at_least) = at_least_override {
            write_varint(buf, at_least);
        }
        if let Some(goal) = node.goal {
            write_varint(buf, goal);
        }
        if presence & PRESENCE_SOURCE_TYPE != 0 {
            write_varint(buf, node.source_type.code());
        }

        write_varint(buf, node.children.len() as u64);
        write_varint(buf, node.coveritems.len() as u64);
        if let Some(first) = first {
            // Homogeneous per scope: the first item's type stands for all.
            if node.coveritems.iter().any(|ci| ci.cover_type != first.cover_type) {
                debug!(scope = %db.path_of(id), "mixed coveritem types; encoding as {:?}", first.cover_type);
            }
            write_varint(buf, first.cover_type.code());
            for ci in &node.coveritems {
                let ref_idx = self.strings.add(&ci.name);
                write_varint(&mut self.out.bytes, ref_idx as u64);
                self.out.counts.push(ci.count);
            }
        }
    }
}

/// Encode every attached scope of `db`, adding names to `strings`.
pub fn encode_scope_tree(db: &CoverageDb, strings: &mut StringTable) -> EncodedTree {
    let mut enc = Encoder {
        db,
        strings,
        out: EncodedTree::default(),
        file_ids: HashMap::new(),
    };
    let mut stack: Vec<ScopeId> = db.roots.iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
        let node = db.scope(id);
        if node.is_toggle_pair() {
            enc.write_toggle_pair(id);
            continue;
        }
        enc.write_regular(id);
        stack.extend(node.children.iter().rev().copied());
    }
    debug!(
        bytes = enc.out.bytes.len(),
        counts = enc.out.counts.len(),
        files = enc.out.files.len(),
        "encoded scope tree"
    );
    enc.out
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

struct Decoder<'a> {
    reader: ByteReader<'a>,
    strings: &'a StringTable,
    files: &'a [String],
    counts: std::slice::Iter<'a, u64>,
    consumed: usize,
}

impl Decoder<'_> {
    fn next_count(&mut self) -> NcdbResult<u64> {
        self.consumed += 1;
        self.counts.next().copied().ok_or_else(|| {
            NcdbError::InvalidData(format!(
                "scope tree needs more than the {} stored hit counts",
                self.consumed - 1
            ))
        })
    }

    fn name(&mut self) -> NcdbResult<String> {
        let idx = self.reader.varint()?;
        Ok(self.strings.get(idx)?.to_string())
    }

    /// Decode one record under `parent`; returns the new scope and its child count.
    fn read_record(
        &mut self,
        db: &mut CoverageDb,
        parent: Option<ScopeId>,
    ) -> NcdbResult<(ScopeId, usize)> {
        match self.reader.byte()? {
            MARKER_TOGGLE_PAIR => {
                let name = self.name()?;
                let rise = self.next_count()?;
                let fall = self.next_count()?;
                Ok((db.create_toggle_pair(parent, &name, rise, fall), 0))
            }
            MARKER_REGULAR => self.read_regular(db, parent),
            other => Err(NcdbError::InvalidData(format!(
                "unknown scope record marker {other:#04x}"
            ))),
        }
    }

    fn read_regular(
        &mut self,
        db: &mut CoverageDb,
        parent: Option<ScopeId>,
    ) -> NcdbResult<(ScopeId, usize)> {
        let scope_type = ScopeType::from_code(self.reader.varint()?)?;
        let name = self.name()?;
        let presence = self.reader.varint()?;
        if presence & !KNOWN_PRESENCE != 0 {
            return Err(NcdbError::InvalidData(format!(
                "unsupported presence bits {presence:#x} on scope '{name}'"
            )));
        }

        let flags = if presence & PRESENCE_FLAGS != 0 {
            self.reader.varint()?
        } else {
            0
        };
        let source = if presence & PRESENCE_SOURCE != 0 {
            let file_id = self.reader.varint()?;
            let line = self.reader.varint()?;
            let token = self.reader.varint()?;
            let file = usize::try_from(file_id)
                .ok()
                .and_then(|i| self.files.get(i))
                .ok_or(NcdbError::IndexOutOfRange {
                    what: "source file",
                    index: file_id,
                    len: self.files.len(),
                })?;
            Some(SourceLocation {
                file: file.clone(),
                line,
                token,
            })
        } else {
            None
        };
        let weight = if presence & PRESENCE_WEIGHT != 0 {
            self.reader.varint()?
        } else {
            1
        };
        let at_least_override = if presence & PRESENCE_AT_LEAST != 0 {
            Some(self.reader.varint()?)
        } else {
            None
        };
        let goal = if presence & PRESENCE_GOAL != 0 {
            Some(self.reader.varint()?)
        } else {
            None
        };
        let source_type = if presence & PRESENCE_SOURCE_TYPE != 0 {
            SourceType::from_code(self.reader.varint()?)?
        } else {
            SourceType::None
        };

        let n_children = self.reader.varint_usize()?;
        let n_items = self.reader.varint_usize()?;

        let id = if scope_type == ScopeType::Instance {
            let sibling = db.children(parent).iter().copied().find(|&c| {
                let sib = db.scope(c);
                sib.scope_type.is_design_unit() && sib.name == name
            });
            let du = match sibling {
                Some(du) => du,
                None => db.create_detached(&name, ScopeType::DuModule),
            };
            db.create_instance(parent, &name, du)
        } else {
            db.create_scope(parent, &name, scope_type)
        };
        {
            let node = db.scope_mut(id);
            node.flags = flags;
            node.source = source;
            node.weight = weight;
            node.goal = goal;
            node.source_type = source_type;
        }

        if n_items > 0 {
            let cover_type = CoverType::from_code(self.reader.varint()?)?;
            let at_least = at_least_override.unwrap_or_else(|| cover_type.default_at_least());
            for _ in 0..n_items {
                let ci_name = self.name()?;
                let count = self.next_count()?;
                let pos = db.create_next_cover(id, &ci_name, cover_type, count);
                db.scope_mut(id).coveritems[pos].at_least = at_least;
            }
        }
        Ok((id, n_children))
    }
}

/// Rebuild the scope hierarchy encoded in `bytes` into `db`.
///
/// `counts` must hold exactly one hit count per decoded coveritem, in DFS
/// order. An `Instance` scope whose design unit sibling has not been decoded
/// yet points at a detached placeholder; once the whole stream is read a
/// single pass over the tree ([`resolve_instance_design_units`]) swaps every
/// placeholder for the real design unit of the same name. Returns the number
/// of coveritems decoded.
pub fn decode_scope_tree(
    bytes: &[u8],
    strings: &StringTable,
    files: &[String],
    counts: &[u64],
    db: &mut CoverageDb,
) -> NcdbResult<usize> {
    let mut dec = Decoder {
        reader: ByteReader::new(bytes),
        strings,
        files,
        counts: counts.iter(),
        consumed: 0,
    };

    // Open scopes still waiting for children: (scope, children left).
    let mut open: Vec<(ScopeId, usize)> = Vec::new();
    loop {
        while matches!(open.last(), Some(&(_, 0))) {
            open.pop();
        }
        let parent = match open.last_mut() {
            Some((id, left)) => {
                *left -= 1;
                Some(*id)
            }
            None if dec.reader.is_empty() => break,
            None => None,
        };
        let (id, n_children) = dec.read_record(db, parent)?;
        if n_children > 0 {
            if open.len() >= MAX_SCOPE_DEPTH {
                return Err(NcdbError::InvalidData(format!(
                    "scope nesting exceeds {MAX_SCOPE_DEPTH}"
                )));
            }
            open.push((id, n_children));
        }
    }

    if dec.consumed != counts.len() {
        return Err(NcdbError::InvalidData(format!(
            "scope tree holds {} coveritems but counts has {}",
            dec.consumed,
            counts.len()
        )));
    }

    resolve_instance_design_units(db);
    debug!(
        scopes = db.scopes.len(),
        coveritems = dec.consumed,
        "decoded scope tree"
    );
    Ok(dec.consumed)
}

/// Point every `Instance` scope that references a detached placeholder at
/// the real design unit sibling with the same name, when one exists.
pub fn resolve_instance_design_units(db: &mut CoverageDb) {
    let parents: Vec<Option<ScopeId>> = std::iter::once(None)
        .chain(crate::codec::dfs::dfs_scopes(db).into_iter().map(Some))
        .collect();
    for parent in parents {
        let patches: Vec<(ScopeId, ScopeId)> = {
            let children = db.children(parent);
            let units: HashMap<&str, ScopeId> = children
                .iter()
                .copied()
                .filter(|&c| db.scope(c).scope_type.is_design_unit())
                .map(|c| (db.scope(c).name.as_str(), c))
                .collect();
            children
                .iter()
                .copied()
                .filter_map(|c| {
                    let node = db.scope(c);
                    let du = node.du?;
                    if !db.scope(du).detached {
                        return None;
                    }
                    units.get(node.name.as_str()).map(|&real| (c, real))
                })
                .collect()
        };
        for (inst, real) in patches {
            db.scope_mut(inst).du = Some(real);
        }
    }
}
