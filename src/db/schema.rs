// src/db/schema.rs

//! Receipt database schema and migrations
//!
//! The schema is versioned through a `schema_version` table; migrations are
//! applied in order on every open, so older databases are brought forward
//! transparently.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version.unwrap_or(0))
}

/// Apply all pending migrations
pub fn migrate(conn: &Connection) -> Result<()> {
    let current = get_schema_version(conn)?;
    if current >= SCHEMA_VERSION {
        debug!("Receipt schema is up to date (version {})", current);
        return Ok(());
    }

    for version in (current + 1)..=SCHEMA_VERSION {
        info!("Applying receipt schema migration {}", version);
        apply_migration(conn, version)?;
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        other => Err(Error::Config(format!("unknown schema migration {other}"))),
    }
}

/// Version 1: install receipts keyed by formula name
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE receipts (
            name TEXT PRIMARY KEY,
            version TEXT NOT NULL,
            digest TEXT NOT NULL,
            prefix TEXT NOT NULL,
            installed_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}
