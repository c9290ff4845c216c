//! Versioned schema steps for the marketplace store.
//!
//! `PRAGMA user_version` holds the last applied step. `store_meta` mirrors it
//! so the version is visible to plain SQL readers.

use super::schema;
use rusqlite::{Connection, Error, types::Type};
use tracing::debug;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "core tables",
        sql: schema::MIGRATION_V1_SQL,
    },
    Migration {
        version: 2,
        name: "projection indexes",
        sql: schema::MIGRATION_V2_SQL,
    },
    Migration {
        version: 3,
        name: "rejected outbox rows",
        sql: schema::MIGRATION_V3_SQL,
    },
];

/// Schema version written by this build.
pub const LATEST_SCHEMA_VERSION: u32 = 3;

/// The store's `user_version`.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read or is negative.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let raw: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(raw).map_err(|e| Error::FromSqlConversionFailure(0, Type::Integer, Box::new(e)))
}

/// Bring the store up to [`LATEST_SCHEMA_VERSION`] and return the version
/// it ends at.
///
/// Steps at or below the stored version are skipped. Each remaining step
/// commits on its own, so a failure leaves the store at the previous step.
///
/// # Errors
///
/// Returns an error if a step fails, or if the store was written by a newer
/// build.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let start = current_schema_version(conn)?;
    if start > LATEST_SCHEMA_VERSION {
        return Err(Error::InvalidParameterName(format!(
            "store schema v{start} is newer than this build (v{LATEST_SCHEMA_VERSION})"
        )));
    }

    let mut version = start;
    for step in MIGRATIONS.iter().filter(|m| m.version > start) {
        let tx = conn.transaction()?;
        tx.execute_batch(step.sql)?;
        tx.execute(
            "UPDATE store_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(step.version)],
        )?;
        tx.pragma_update(None, "user_version", i64::from(step.version))?;
        tx.commit()?;
        debug!(version = step.version, name = step.name, "applied store migration");
        version = step.version;
    }
    Ok(version)
}
