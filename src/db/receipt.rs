// src/db/receipt.rs

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Record of a completed install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub name: String,
    pub version: String,
    /// Prefixed digest of the resource the install was built from
    pub digest: String,
    /// Keg prefix the install stage wrote into
    pub prefix: PathBuf,
    pub installed_at: DateTime<Utc>,
}

impl Receipt {
    /// Insert or replace the receipt for this name
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO receipts (name, version, digest, prefix, installed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                version = excluded.version,
                digest = excluded.digest,
                prefix = excluded.prefix,
                installed_at = excluded.installed_at",
            params![
                &self.name,
                &self.version,
                &self.digest,
                self.prefix.to_string_lossy(),
                self.installed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT name, version, digest, prefix, installed_at FROM receipts WHERE name = ?1",
        )?;
        let receipt = stmt.query_row([name], Self::from_row).optional()?;
        Ok(receipt)
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT name, version, digest, prefix, installed_at FROM receipts ORDER BY name",
        )?;
        let receipts = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(receipts)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let prefix: String = row.get(3)?;
        let installed_at: String = row.get(4)?;
        let installed_at = DateTime::parse_from_rfc3339(&installed_at)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?
            .with_timezone(&Utc);

        Ok(Self {
            name: row.get(0)?,
            version: row.get(1)?,
            digest: row.get(2)?,
            prefix: PathBuf::from(prefix),
            installed_at,
        })
    }
}
