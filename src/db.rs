use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{is_lock_error, LibraryError, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0000_catalog",
        "CREATE TABLE IF NOT EXISTS user (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS book (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            author TEXT,
            total_volumes INTEGER NOT NULL DEFAULT 1,
            cover_url TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_book_title ON book (title);
        CREATE TABLE IF NOT EXISTS file (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            book_id INTEGER NOT NULL REFERENCES book(id) ON DELETE CASCADE,
            file_path TEXT NOT NULL UNIQUE,
            volume_number INTEGER NOT NULL DEFAULT 1,
            total_pages INTEGER NOT NULL DEFAULT 0,
            title TEXT,
            author TEXT,
            cover_url TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_file_book ON file (book_id, volume_number);",
    ),
    (
        "0001_reading_state",
        "CREATE TABLE IF NOT EXISTS reading_state (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES user(id) ON DELETE CASCADE,
            file_id INTEGER NOT NULL REFERENCES file(id) ON DELETE CASCADE,
            current_page INTEGER NOT NULL DEFAULT 1,
            last_read_at INTEGER NOT NULL,
            UNIQUE (user_id, file_id)
        );
        CREATE INDEX IF NOT EXISTS idx_reading_state_recent
            ON reading_state (user_id, last_read_at);",
    ),
];

/// Opens the catalog database, creating its directory and applying any
/// pending migrations.
pub fn open(db_path: &Path) -> Result<Connection> {
    if let Some(dir) = db_path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }

    let conn = Connection::open(db_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // WAL is unavailable for in-memory databases; sqlite answers "memory".
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    prepare(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    prepare(&conn)?;
    Ok(conn)
}

fn prepare(conn: &Connection) -> Result<()> {
    // sqlite's lower() only folds ASCII
    conn.create_scalar_function(
        "fold_case",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.map(|text| text.to_lowercase()))
        },
    )?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT
        );
        CREATE TABLE IF NOT EXISTS schema_migrations (
            id TEXT PRIMARY KEY NOT NULL,
            applied_at INTEGER NOT NULL
        );",
    )?;

    for (id, sql) in MIGRATIONS {
        apply_migration(conn, id, sql)?;
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

fn apply_migration(conn: &Connection, id: &str, sql: &str) -> Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM schema_migrations WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(());
    }
    conn.execute_batch(sql)?;
    conn.execute(
        "INSERT INTO schema_migrations (id, applied_at) VALUES (?1, ?2)",
        params![id, chrono::Utc::now().timestamp_millis()],
    )?;
    log::info!("applied migration {}", id);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreHealth {
    Healthy,
    /// A lock was observed and cleared by the forced commit.
    Healed,
}

/// Startup probe: one trivial read and one trivial write. On a lock error the
/// connection rolls back whatever it holds and runs an empty committing
/// transaction, then probes again.
pub fn probe_and_heal(conn: &Connection) -> Result<StoreHealth> {
    heal_with(conn, probe)
}

fn heal_with<P>(conn: &Connection, mut probe: P) -> Result<StoreHealth>
where
    P: FnMut(&Connection) -> rusqlite::Result<()>,
{
    match probe(conn) {
        Ok(()) => Ok(StoreHealth::Healthy),
        Err(err) if is_lock_error(&err) => {
            log::warn!("catalog store reported a lock during startup probe: {}", err);
            // Nothing to roll back is fine here.
            let _ = conn.execute_batch("ROLLBACK");
            conn.execute_batch("BEGIN IMMEDIATE; COMMIT;")
                .map_err(lock_or_store)?;
            probe(conn).map_err(lock_or_store)?;
            log::info!("catalog store lock cleared");
            Ok(StoreHealth::Healed)
        }
        Err(err) => Err(err.into()),
    }
}

fn probe(conn: &Connection) -> rusqlite::Result<()> {
    let _: i64 = conn.query_row("SELECT COUNT(*) FROM meta", [], |row| row.get(0))?;
    conn.execute(
        "INSERT INTO meta (key, value) VALUES ('last_probe', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![chrono::Utc::now().timestamp_millis().to_string()],
    )?;
    Ok(())
}

fn lock_or_store(err: rusqlite::Error) -> LibraryError {
    if is_lock_error(&err) {
        LibraryError::StoreLocked
    } else {
        LibraryError::Store(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_applied_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instance").join("library.db");
        drop(open(&path).unwrap());
        let conn = open(&path).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }

    #[test]
    fn probe_reports_healthy_store() {
        let conn = open_in_memory().unwrap();
        assert_eq!(probe_and_heal(&conn).unwrap(), StoreHealth::Healthy);
    }

    #[test]
    fn probe_surfaces_lock_held_by_another_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.db");
        let holder = open(&path).unwrap();
        let conn = open(&path).unwrap();
        conn.busy_timeout(Duration::from_millis(0)).unwrap();

        holder.execute_batch("BEGIN EXCLUSIVE;").unwrap();
        let err = probe_and_heal(&conn).unwrap_err();
        assert!(err.is_lock_error());

        holder.execute_batch("COMMIT;").unwrap();
        assert_eq!(probe_and_heal(&conn).unwrap(), StoreHealth::Healthy);
    }

    fn busy() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        )
    }

    #[test]
    fn transient_lock_is_healed_and_probed_again() {
        let conn = open_in_memory().unwrap();
        // a transaction left open by an earlier failure
        conn.execute_batch("BEGIN;").unwrap();

        let mut calls = 0;
        let health = heal_with(&conn, |conn| {
            calls += 1;
            if calls == 1 {
                return Err(busy());
            }
            probe(conn)
        })
        .unwrap();

        assert_eq!(health, StoreHealth::Healed);
        assert_eq!(calls, 2);
        assert!(conn.is_autocommit());
        let stamped: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = 'last_probe'", [], |row| row.get(0))
            .optional()
            .unwrap();
        assert!(stamped.is_some());
    }

    #[test]
    fn lock_that_survives_the_heal_is_reported() {
        let conn = open_in_memory().unwrap();
        let err = heal_with(&conn, |_| Err(busy())).unwrap_err();
        assert!(matches!(err, LibraryError::StoreLocked));
    }
}
