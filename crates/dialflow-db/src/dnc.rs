//! Do-not-call list persistence helpers.
//!
//! Numbers are stored already normalized; normalization itself lives in
//! `dialflow-compliance`. This table is the source of truth; the in-memory
//! cache is a derived projection.

use crate::StoreError;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

/// One blocked number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DncEntry {
    pub phone: String,
    pub reason: Option<String>,
    pub added_at: String,
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<DncEntry> {
    Ok(DncEntry {
        phone: row.get(0)?,
        reason: row.get(1)?,
        added_at: row.get(2)?,
    })
}

/// Adds a normalized number to the list. Re-adding updates the reason.
pub fn add_dnc_number(
    conn: &Connection,
    phone: &str,
    reason: Option<&str>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO dnc_numbers (phone, reason) VALUES (?1, ?2)
         ON CONFLICT(phone) DO UPDATE SET reason = excluded.reason",
        params![phone, reason],
    )?;
    Ok(())
}

/// Removes a normalized number from the list.
pub fn remove_dnc_number(conn: &Connection, phone: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM dnc_numbers WHERE phone = ?1", [phone])?;
    Ok(())
}

/// Lists every blocked number.
pub fn list_dnc_numbers(conn: &Connection) -> Result<Vec<DncEntry>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT phone, reason, added_at FROM dnc_numbers ORDER BY added_at DESC")?;
    let rows = stmt.query_map([], map_row)?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

/// Membership test for a single normalized number.
pub fn is_dnc_listed(conn: &Connection, phone: &str) -> Result<bool, StoreError> {
    let listed: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM dnc_numbers WHERE phone = ?1)",
        [phone],
        |row| row.get(0),
    )?;
    Ok(listed)
}
