//! SQLite-backed coverage database.
//!
//! The relational sibling of the NCDB container. A [`SqliteStore`] owns one
//! connection; whole-database writes and merges run inside an explicit
//! transaction so a failure never leaves a partial database behind.
//!
//! Scopes, coveritems, source files, typed properties, history records and
//! per-test contributions are stored. Toggle and FSM details are derived
//! again from the scope tree on load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::codec::dfs;
use crate::errors::{NcdbError, NcdbResult};
use crate::meta;
use crate::models::{
    CoverItem, CoverType, CoverageDb, HistoryNode, PropertyKey, ScopeId, ScopeNode,
    ScopeType, SourceLocation, SourceType, Value,
};
use crate::store::schema;

pub(crate) fn to_sql(value: u64, what: &str) -> NcdbResult<i64> {
    i64::try_from(value)
        .map_err(|_| NcdbError::InvalidData(format!("{what} {value} does not fit in SQLite INTEGER")))
}

pub(crate) fn from_sql(value: i64, what: &str) -> NcdbResult<u64> {
    u64::try_from(value).map_err(|_| NcdbError::InvalidData(format!("negative {what} {value}")))
}

struct ScopeRow {
    id: i64,
    parent: Option<i64>,
    ordinal: i64,
    scope_type: i64,
    name: String,
    file_id: Option<i64>,
    line: Option<i64>,
    token: Option<i64>,
    weight: i64,
    goal: Option<i64>,
    flags: i64,
    source_type: i64,
    du: Option<i64>,
}

pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and bring its schema
    /// up to date.
    pub fn open(path: impl AsRef<Path>) -> NcdbResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let store = Self {
            conn,
            path: Some(path),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> NcdbResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn, path: None };
        store.init_schema()?;
        Ok(store)
    }

    /// Create missing tables and indexes, then run pending migrations.
    pub fn init_schema(&self) -> NcdbResult<()> {
        for stmt in schema::SCHEMA_STATEMENTS {
            self.conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&self.conn)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> i32 {
        schema::get_schema_version(&self.conn)
    }

    pub fn get_meta(&self, key: &str) -> NcdbResult<Option<String>> {
        schema::get_meta(&self.conn, key)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> NcdbResult<()> {
        schema::set_meta(&self.conn, key, value)
    }

    // -- transactions --------------------------------------------------------

    pub fn begin(&self) -> NcdbResult<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(())
    }

    pub fn commit(&self) -> NcdbResult<()> {
        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    pub fn rollback(&self) -> NcdbResult<()> {
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }

    /// Run `f` inside one transaction; any error rolls everything back.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> NcdbResult<T>) -> NcdbResult<T> {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "rolling back transaction");
                if let Err(rb) = self.rollback() {
                    warn!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }

    // -- row helpers shared with the SQLite merge ------------------------------

    pub(crate) fn file_ids(&self) -> NcdbResult<HashMap<String, i64>> {
        let mut stmt = self.conn.prepare("SELECT file_id, file_path FROM files;")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(0)?)))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Id of `path` in the files table, inserting it on first use.
    pub(crate) fn intern_file(&self, cache: &mut HashMap<String, i64>, path: &str) -> NcdbResult<i64> {
        if let Some(&id) = cache.get(path) {
            return Ok(id);
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO files(file_path) VALUES (?1);",
            params![path],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT file_id FROM files WHERE file_path = ?1;",
            params![path],
            |row| row.get(0),
        )?;
        cache.insert(path.to_string(), id);
        Ok(id)
    }

    pub(crate) fn insert_scope(
        &self,
        parent: Option<i64>,
        ordinal: i64,
        node: &ScopeNode,
        files: &mut HashMap<String, i64>,
    ) -> NcdbResult<i64> {
        let (file_id, line, token) = match &node.source {
            Some(src) => (
                Some(self.intern_file(files, &src.file)?),
                Some(to_sql(src.line, "line")?),
                Some(to_sql(src.token, "token")?),
            ),
            None => (None, None, None),
        };
        let goal = node.goal.map(|g| to_sql(g, "goal")).transpose()?;
        self.conn.execute(
            "INSERT INTO scopes ( \
                 parent_id, scope_type, scope_name, ordinal, file_id, line, token, \
                 weight, goal, flags, source_type \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                parent,
                to_sql(node.scope_type.code(), "scope type")?,
                node.name,
                ordinal,
                file_id,
                line,
                token,
                to_sql(node.weight, "weight")?,
                goal,
                to_sql(node.flags, "flags")?,
                to_sql(node.source_type.code(), "source type")?,
            ],
        )?;
        let scope_id = self.conn.last_insert_rowid();
        for (key, value) in &node.properties {
            self.insert_property("scope_properties", "scope_id", scope_id, *key, value)?;
        }
        Ok(scope_id)
    }

    pub(crate) fn set_scope_du(&self, scope_id: i64, du_id: i64) -> NcdbResult<()> {
        self.conn.execute(
            "UPDATE scopes SET du_scope_id = ?1 WHERE scope_id = ?2;",
            params![du_id, scope_id],
        )?;
        Ok(())
    }

    pub(crate) fn insert_coveritem(&self, scope_id: i64, index: i64, item: &CoverItem) -> NcdbResult<i64> {
        self.conn.execute(
            "INSERT INTO coveritems ( \
                 scope_id, cover_index, cover_name, cover_type, cover_data, at_least, flags \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                scope_id,
                index,
                item.name,
                to_sql(item.cover_type.code(), "cover type")?,
                to_sql(item.count, "count")?,
                to_sql(item.at_least, "at_least")?,
                to_sql(item.flags, "flags")?,
            ],
        )?;
        let cover_id = self.conn.last_insert_rowid();
        for (key, value) in &item.properties {
            self.insert_property("coveritem_properties", "cover_id", cover_id, *key, value)?;
        }
        Ok(cover_id)
    }

    fn insert_property(
        &self,
        table: &str,
        owner_col: &str,
        owner: i64,
        key: PropertyKey,
        value: &Value,
    ) -> NcdbResult<()> {
        let (domain, code) = key.code();
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {table}({owner_col}, key_domain, key_code, value_json) \
                 VALUES (?1, ?2, ?3, ?4);"
            ),
            params![owner, domain, code, serde_json::to_string(value)?],
        )?;
        Ok(())
    }

    pub(crate) fn next_history_ordinal(&self) -> NcdbResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(ordinal) + 1, 0) FROM history_nodes;",
            [],
            |row| row.get(0),
        )?)
    }

    pub(crate) fn insert_history(&self, node: &HistoryNode) -> NcdbResult<i64> {
        let ordinal = self.next_history_ordinal()?;
        self.conn.execute(
            "INSERT INTO history_nodes(ordinal, kind, logical_name, test_status, record_json) \
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                ordinal,
                node.kind.code(),
                node.logical_name,
                to_sql(node.test_status, "test status")?,
                serde_json::to_string(node)?,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub(crate) fn update_history(&self, history_id: i64, node: &HistoryNode) -> NcdbResult<()> {
        self.conn.execute(
            "UPDATE history_nodes SET logical_name = ?1, test_status = ?2, record_json = ?3 \
             WHERE history_id = ?4;",
            params![
                node.logical_name,
                to_sql(node.test_status, "test status")?,
                serde_json::to_string(node)?,
                history_id,
            ],
        )?;
        Ok(())
    }

    /// First history record of `kind` named `name`.
    pub(crate) fn find_history(
        &self,
        kind: crate::models::HistoryKind,
        name: &str,
    ) -> NcdbResult<Option<(i64, HistoryNode)>> {
        let row: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT history_id, record_json FROM history_nodes \
                 WHERE kind = ?1 AND logical_name = ?2 ORDER BY ordinal LIMIT 1;",
                params![kind.code(), name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((id, json)) => Ok(Some((id, serde_json::from_str(&json)?))),
            None => Ok(None),
        }
    }

    pub(crate) fn add_contribution(&self, history_id: i64, cover_id: i64, count: u64) -> NcdbResult<()> {
        self.conn.execute(
            "INSERT INTO coveritem_tests(history_id, cover_id, count_contribution) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(history_id, cover_id) DO UPDATE SET \
                 count_contribution = count_contribution + excluded.count_contribution;",
            params![history_id, cover_id, to_sql(count, "contribution")?],
        )?;
        Ok(())
    }

    // -- whole-database load / save --------------------------------------------

    /// Replace the stored database with `db` in one transaction.
    pub fn save(&self, db: &CoverageDb) -> NcdbResult<()> {
        self.in_transaction(|store| store.write_all(db))?;
        info!(
            path = ?self.path,
            scopes = db.scopes.len(),
            history = db.history.len(),
            "saved coverage database"
        );
        Ok(())
    }

    fn write_all(&self, db: &CoverageDb) -> NcdbResult<()> {
        self.conn.execute_batch(
            "DELETE FROM coveritem_tests;
             DELETE FROM coveritem_properties;
             DELETE FROM scope_properties;
             DELETE FROM coveritems;
             DELETE FROM history_nodes;
             UPDATE scopes SET du_scope_id = NULL;
             DELETE FROM scopes;
             DELETE FROM files;",
        )?;
        self.set_meta("path_separator", &db.path_separator)?;
        self.set_meta("ucis_version", &db.ucis_version)?;

        let order = dfs::dfs_scopes(db);
        let mut files = HashMap::new();
        let mut scope_ids: HashMap<ScopeId, i64> = HashMap::with_capacity(order.len());
        let mut cover_ids: HashMap<(ScopeId, usize), i64> = HashMap::new();

        for &id in &order {
            let node = db.scope(id);
            let parent = match node.parent {
                Some(p) => Some(*scope_ids.get(&p).ok_or_else(|| {
                    NcdbError::InvalidData(format!("scope {id} written before its parent {p}"))
                })?),
                None => None,
            };
            let ordinal = db
                .children(node.parent)
                .iter()
                .position(|&c| c == id)
                .unwrap_or(0) as i64;
            let scope_id = self.insert_scope(parent, ordinal, node, &mut files)?;
            scope_ids.insert(id, scope_id);
            for (pos, item) in node.coveritems.iter().enumerate() {
                let cover_id = self.insert_coveritem(scope_id, pos as i64, item)?;
                cover_ids.insert((id, pos), cover_id);
            }
        }

        for &id in &order {
            let Some(du) = db.scope(id).du else { continue };
            match scope_ids.get(&du) {
                Some(&du_id) => self.set_scope_du(scope_ids[&id], du_id)?,
                None => warn!(scope = %db.path_of(id), "design unit is not part of the hierarchy; link dropped"),
            }
        }

        let mut history_ids = Vec::with_capacity(db.history.len());
        for node in &db.history {
            history_ids.push(self.insert_history(node)?);
        }

        let flat = dfs::flat_coveritems_of(db, &order);
        for (&hist, bins) in &db.contributions {
            let history_id = *history_ids.get(hist).ok_or(NcdbError::IndexOutOfRange {
                what: "history",
                index: hist as u64,
                len: history_ids.len(),
            })?;
            for (&bin, &count) in bins {
                let key = *flat.get(bin).ok_or(NcdbError::IndexOutOfRange {
                    what: "coveritem",
                    index: bin as u64,
                    len: flat.len(),
                })?;
                self.add_contribution(history_id, cover_ids[&key], count)?;
            }
        }
        Ok(())
    }

    /// Load the whole stored database into memory.
    pub fn load(&self) -> NcdbResult<CoverageDb> {
        let mut db = CoverageDb::new();
        if let Some(sep) = self.get_meta("path_separator")? {
            db.path_separator = sep;
        }
        if let Some(version) = self.get_meta("ucis_version")? {
            db.ucis_version = version;
        }

        let files: HashMap<i64, String> = self
            .file_ids()?
            .into_iter()
            .map(|(path, id)| (id, path))
            .collect();

        let rows = self.scope_rows()?;
        let mut children: HashMap<Option<i64>, Vec<usize>> = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            children.entry(row.parent).or_default().push(i);
        }
        for list in children.values_mut() {
            list.sort_by_key(|&i| (rows[i].ordinal, rows[i].id));
        }

        // Pre-order walk so parents are created before their children.
        let mut arena_of: HashMap<i64, ScopeId> = HashMap::with_capacity(rows.len());
        let mut stack: Vec<(usize, Option<ScopeId>)> = children
            .get(&None)
            .map(|roots| roots.iter().rev().map(|&i| (i, None)).collect())
            .unwrap_or_default();
        while let Some((i, parent)) = stack.pop() {
            let row = &rows[i];
            let scope_type = ScopeType::from_code(from_sql(row.scope_type, "scope type")?)?;
            let id = db.create_scope(parent, &row.name, scope_type);
            let node = db.scope_mut(id);
            node.weight = from_sql(row.weight, "weight")?;
            node.goal = row.goal.map(|g| from_sql(g, "goal")).transpose()?;
            node.flags = from_sql(row.flags, "flags")?;
            node.source_type = SourceType::from_code(from_sql(row.source_type, "source type")?)?;
            if let Some(file_id) = row.file_id {
                let file = files.get(&file_id).ok_or(NcdbError::IndexOutOfRange {
                    what: "file",
                    index: file_id as u64,
                    len: files.len(),
                })?;
                node.source = Some(SourceLocation {
                    file: file.clone(),
                    line: from_sql(row.line.unwrap_or(0), "line")?,
                    token: from_sql(row.token.unwrap_or(0), "token")?,
                });
            }
            arena_of.insert(row.id, id);
            if let Some(kids) = children.get(&Some(row.id)) {
                stack.extend(kids.iter().rev().map(|&k| (k, Some(id))));
            }
        }
        if arena_of.len() < rows.len() {
            warn!(
                unreachable = rows.len() - arena_of.len(),
                "scopes not reachable from a root were skipped"
            );
        }
        for row in &rows {
            let (Some(du), Some(&id)) = (row.du, arena_of.get(&row.id)) else {
                continue;
            };
            match arena_of.get(&du) {
                Some(&du_id) => db.scope_mut(id).du = Some(du_id),
                None => warn!(scope = %row.name, du, "dangling design unit reference"),
            }
        }

        let cover_of = self.load_coveritems(&mut db, &arena_of)?;
        self.load_properties(&mut db, &arena_of, &cover_of)?;

        let mut history_index: HashMap<i64, usize> = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT history_id, record_json FROM history_nodes ORDER BY ordinal, history_id;")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
            for row in rows {
                let (history_id, json) = row?;
                let node: HistoryNode = serde_json::from_str(&json)?;
                history_index.insert(history_id, db.add_history(node));
            }
        }

        let order = dfs::dfs_scopes(&db);
        let flat = dfs::flat_coveritems_of(&db, &order);
        let flat_index: HashMap<(ScopeId, usize), usize> =
            flat.iter().enumerate().map(|(i, &key)| (key, i)).collect();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT history_id, cover_id, count_contribution FROM coveritem_tests;")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })?;
            for row in rows {
                let (history_id, cover_id, count) = row?;
                let (Some(&hist), Some(key)) = (history_index.get(&history_id), cover_of.get(&cover_id)) else {
                    continue;
                };
                if let Some(&bin) = flat_index.get(key) {
                    db.record_contribution(hist, bin, from_sql(count, "contribution")?);
                }
            }
        }

        meta::fsm::apply(&mut db, &order, &[])?;
        debug!(
            scopes = order.len(),
            coveritems = flat.len(),
            history = db.history.len(),
            "loaded coverage database"
        );
        Ok(db)
    }

    fn scope_rows(&self) -> NcdbResult<Vec<ScopeRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT scope_id, parent_id, ordinal, scope_type, scope_name, file_id, line, token, \
                    weight, goal, flags, source_type, du_scope_id \
             FROM scopes;",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ScopeRow {
                id: row.get(0)?,
                parent: row.get(1)?,
                ordinal: row.get(2)?,
                scope_type: row.get(3)?,
                name: row.get(4)?,
                file_id: row.get(5)?,
                line: row.get(6)?,
                token: row.get(7)?,
                weight: row.get(8)?,
                goal: row.get(9)?,
                flags: row.get(10)?,
                source_type: row.get(11)?,
                du: row.get(12)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Attach coveritems to their scopes in `cover_index` order; returns
    /// cover id -> (scope, position).
    fn load_coveritems(
        &self,
        db: &mut CoverageDb,
        arena_of: &HashMap<i64, ScopeId>,
    ) -> NcdbResult<HashMap<i64, (ScopeId, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT cover_id, scope_id, cover_name, cover_type, cover_data, at_least, flags \
             FROM coveritems ORDER BY scope_id, cover_index;",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;
        let mut cover_of = HashMap::new();
        for row in rows {
            let (cover_id, scope_id, name, cover_type, data, at_least, flags) = row?;
            let Some(&scope) = arena_of.get(&scope_id) else {
                continue;
            };
            let cover_type = CoverType::from_code(from_sql(cover_type, "cover type")?)?;
            let pos = db.create_next_cover(scope, &name, cover_type, from_sql(data, "count")?);
            let item = &mut db.scope_mut(scope).coveritems[pos];
            item.at_least = from_sql(at_least, "at_least")?;
            item.flags = from_sql(flags, "flags")?;
            cover_of.insert(cover_id, (scope, pos));
        }
        Ok(cover_of)
    }

    fn load_properties(
        &self,
        db: &mut CoverageDb,
        arena_of: &HashMap<i64, ScopeId>,
        cover_of: &HashMap<i64, (ScopeId, usize)>,
    ) -> NcdbResult<()> {
        for (owner, (key, value)) in self.property_rows("scope_properties", "scope_id")? {
            if let Some(&scope) = arena_of.get(&owner) {
                db.scope_mut(scope).properties.insert(key, value);
            }
        }
        for (owner, (key, value)) in self.property_rows("coveritem_properties", "cover_id")? {
            if let Some(&(scope, pos)) = cover_of.get(&owner) {
                db.scope_mut(scope).coveritems[pos].properties.insert(key, value);
            }
        }
        Ok(())
    }

    fn property_rows(&self, table: &str, owner_col: &str) -> NcdbResult<Vec<(i64, (PropertyKey, Value))>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {owner_col}, key_domain, key_code, value_json FROM {table} \
             ORDER BY {owner_col}, key_domain, key_code;"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (owner, domain, code, json) = row?;
            let Some(key) = PropertyKey::from_code(&domain, code) else {
                debug!(domain = %domain, code, "skipping unknown property key");
                continue;
            };
            let value: Value = serde_json::from_str(&json)?;
            if key.accepts(&value) {
                out.push((owner, (key, value)));
            }
        }
        Ok(out)
    }

    /// Copy the whole database to `destination` with the online-backup API.
    pub fn backup_to(&self, destination: &Path) -> NcdbResult<()> {
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut dst_conn = Connection::open(destination)?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dst_conn)?;
        backup.run_to_completion(100, Duration::from_millis(10), None)?;
        debug!(destination = %destination.display(), "backed up coverage database");
        Ok(())
    }
}
