//! The marketplace store: one SQLite file holding users, jobs, milestones,
//! applications, reviews, and the escrow outbox.
//!
//! Connections run in WAL mode with foreign keys enforced, so deleting a job
//! cascades to the rows it owns.

pub mod migrations;
pub mod query;
pub mod schema;
pub mod write;

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::{path::Path, time::Duration};
use tracing::debug;

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the store at `path`, creating it if needed, and migrate it.
///
/// # Errors
///
/// Returns an error if the file cannot be opened, configured, or migrated.
pub fn open_store(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create store directory {}", dir.display()))?;
    }
    let mut conn =
        Connection::open(path).with_context(|| format!("open store {}", path.display()))?;
    configure_connection(&conn).context("configure store connection")?;
    let version = migrations::migrate(&mut conn).context("apply store migrations")?;
    debug!(path = %path.display(), version, "opened store");
    Ok(conn)
}

/// In-memory store with the full schema, for tests and dry runs.
///
/// # Errors
///
/// Returns an error if the schema cannot be applied.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("open in-memory store")?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("enable foreign keys")?;
    migrations::migrate(&mut conn).context("apply store migrations")?;
    Ok(conn)
}

/// Begin a write transaction that takes the database write lock up front.
///
/// Status checks made inside it cannot be raced by another writer.
///
/// # Errors
///
/// Returns an error if the lock cannot be acquired within the busy timeout.
pub fn begin_immediate(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::{LATEST_SCHEMA_VERSION, current_schema_version};

    fn pragma(conn: &Connection, name: &str) -> String {
        conn.pragma_query_value(None, name, |row| row.get::<_, rusqlite::types::Value>(0))
            .map(|value| match value {
                rusqlite::types::Value::Integer(n) => n.to_string(),
                rusqlite::types::Value::Text(t) => t.to_ascii_lowercase(),
                other => format!("{other:?}"),
            })
            .expect("pragma")
    }

    #[test]
    fn file_store_is_configured_and_migrated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_store(&dir.path().join("nested/onwork.sqlite3")).expect("open");

        assert_eq!(pragma(&conn, "journal_mode"), "wal");
        assert_eq!(pragma(&conn, "foreign_keys"), "1");
        assert_eq!(
            pragma(&conn, "busy_timeout"),
            DEFAULT_BUSY_TIMEOUT.as_millis().to_string()
        );
        assert_eq!(current_schema_version(&conn).expect("version"), LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn rows_survive_reopening() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("onwork.sqlite3");
        open_store(&path)
            .expect("open")
            .execute(
                "INSERT INTO users (user_id, name, email, created_at_us)
                 VALUES ('usr-a', 'Ada', 'ada@example.com', 1)",
                [],
            )
            .expect("insert");

        let conn = open_store(&path).expect("reopen");
        let users: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .expect("count");
        assert_eq!(users, 1);
    }

    #[test]
    fn immediate_transaction_rolls_back_on_drop() {
        let conn = open_in_memory().expect("open");
        {
            let tx = begin_immediate(&conn).expect("begin");
            tx.execute(
                "INSERT INTO users (user_id, name, email, created_at_us)
                 VALUES ('usr-a', 'Ada', 'ada@example.com', 1)",
                [],
            )
            .expect("insert");
        }
        let users: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .expect("count");
        assert_eq!(users, 0);
    }
}
