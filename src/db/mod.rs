// src/db/mod.rs

//! Persistent install receipts
//!
//! A receipt is written only after a formula's install stage has fully
//! succeeded, and is the sole source of truth for "is this installed".

mod receipt;
pub mod schema;

pub use receipt::Receipt;

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// How long a writer waits on another process holding the database
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Open (creating if needed) the receipt database and bring its schema up to date
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    debug!("Opening receipt database at {}", path.display());
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    debug!("Receipt database journal mode: {}", mode);
    schema::migrate(&conn)?;
    Ok(conn)
}
