//! SQLite coverage schema and its migration framework.

use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::NcdbResult;

/// Current schema version. Migrations run from whatever the database
/// currently reports up to this value.
pub const SCHEMA_VERSION: i32 = 3;

/// Baseline DDL. `IF NOT EXISTS` everywhere so replaying it on an
/// initialised database is harmless.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS db_metadata (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS files (
        file_id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_path TEXT NOT NULL UNIQUE
    );",
    "CREATE TABLE IF NOT EXISTS scopes (
        scope_id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER REFERENCES scopes(scope_id) ON DELETE CASCADE,
        scope_type INTEGER NOT NULL,
        scope_name TEXT NOT NULL,
        ordinal INTEGER NOT NULL DEFAULT 0,
        file_id INTEGER REFERENCES files(file_id),
        line INTEGER,
        token INTEGER,
        weight INTEGER NOT NULL DEFAULT 1,
        goal INTEGER,
        flags INTEGER NOT NULL DEFAULT 0,
        source_type INTEGER NOT NULL DEFAULT 10,
        du_scope_id INTEGER REFERENCES scopes(scope_id)
    );",
    "CREATE TABLE IF NOT EXISTS coveritems (
        cover_id INTEGER PRIMARY KEY AUTOINCREMENT,
        scope_id INTEGER NOT NULL REFERENCES scopes(scope_id) ON DELETE CASCADE,
        cover_index INTEGER NOT NULL,
        cover_name TEXT NOT NULL,
        cover_type INTEGER NOT NULL,
        cover_data INTEGER NOT NULL DEFAULT 0,
        at_least INTEGER NOT NULL DEFAULT 0,
        flags INTEGER NOT NULL DEFAULT 0,
        UNIQUE(scope_id, cover_index)
    );",
    "CREATE TABLE IF NOT EXISTS history_nodes (
        history_id INTEGER PRIMARY KEY AUTOINCREMENT,
        ordinal INTEGER NOT NULL,
        kind INTEGER NOT NULL,
        logical_name TEXT NOT NULL,
        test_status INTEGER NOT NULL DEFAULT 0,
        record_json TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE INDEX IF NOT EXISTS idx_scopes_parent ON scopes(parent_id, ordinal);",
    "CREATE INDEX IF NOT EXISTS idx_scopes_name ON scopes(parent_id, scope_name, scope_type);",
    "CREATE INDEX IF NOT EXISTS idx_coveritems_scope ON coveritems(scope_id, cover_index);",
    "CREATE INDEX IF NOT EXISTS idx_history_kind ON history_nodes(kind, logical_name);",
];

/// Run all pending migrations from the stored version up to
/// [`SCHEMA_VERSION`]. Each step runs inside a SAVEPOINT so a failure rolls
/// back only that step.
pub fn migrate_schema(conn: &Connection) -> NcdbResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT ncdb_migrate_step;")?;

        let step_result = (|| -> NcdbResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                2 => migrate_to_v2(conn)?,
                3 => migrate_to_v3(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT ncdb_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT ncdb_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT ncdb_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Stored schema version; 0 when the key is absent or unparseable.
pub fn get_schema_version(conn: &Connection) -> i32 {
    get_meta(conn, "schema_version")
        .ok()
        .flatten()
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: i32) -> NcdbResult<()> {
    set_meta(conn, "schema_version", &version.to_string())
}

pub fn get_meta(conn: &Connection, key: &str) -> NcdbResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM db_metadata WHERE key = ?1;",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> NcdbResult<()> {
    conn.execute(
        "INSERT INTO db_metadata(key, value) VALUES(?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![key, value],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> NcdbResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

/// v0 -> v1: baseline created by [`SCHEMA_STATEMENTS`].
fn migrate_to_v1(_conn: &Connection) -> NcdbResult<()> {
    Ok(())
}

/// v1 -> v2: per-test hit contributions.
fn migrate_to_v2(conn: &Connection) -> NcdbResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS coveritem_tests (
            history_id INTEGER NOT NULL REFERENCES history_nodes(history_id) ON DELETE CASCADE,
            cover_id INTEGER NOT NULL REFERENCES coveritems(cover_id) ON DELETE CASCADE,
            count_contribution INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(history_id, cover_id)
        );
        CREATE INDEX IF NOT EXISTS idx_coveritem_tests_cover ON coveritem_tests(cover_id);",
    )?;
    Ok(())
}

/// v2 -> v3: typed scope and coveritem properties.
fn migrate_to_v3(conn: &Connection) -> NcdbResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS scope_properties (
            scope_id INTEGER NOT NULL REFERENCES scopes(scope_id) ON DELETE CASCADE,
            key_domain TEXT NOT NULL,
            key_code INTEGER NOT NULL,
            value_json TEXT NOT NULL,
            PRIMARY KEY(scope_id, key_domain, key_code)
        );
        CREATE TABLE IF NOT EXISTS coveritem_properties (
            cover_id INTEGER NOT NULL REFERENCES coveritems(cover_id) ON DELETE CASCADE,
            key_domain TEXT NOT NULL,
            key_code INTEGER NOT NULL,
            value_json TEXT NOT NULL,
            PRIMARY KEY(cover_id, key_domain, key_code)
        );",
    )?;
    Ok(())
}
