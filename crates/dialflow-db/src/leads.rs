//! Lead persistence helpers.

use crate::StoreError;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// A lead awaiting (or past) outreach.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub status: String,
    pub created_at: String,
}

fn map_row_to_lead(row: &Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        name: row.get(1)?,
        company: row.get(2)?,
        phone: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Inserts a new lead.
pub fn create_lead(conn: &Connection, lead: &Lead) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO leads (id, name, company, phone, status) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![lead.id, lead.name, lead.company, lead.phone, lead.status],
    )?;
    Ok(())
}

/// Retrieves a lead by id.
pub fn get_lead(conn: &Connection, id: &str) -> Result<Lead, StoreError> {
    conn.query_row(
        "SELECT id, name, company, phone, status, created_at FROM leads WHERE id = ?1",
        [id],
        map_row_to_lead,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound {
        entity: "lead",
        id: id.to_string(),
    })
}

/// Retrieves a batch of leads, preserving the requested order.
///
/// Unknown ids are skipped rather than erroring: spawn validation decides
/// what to do about missing or phoneless leads.
pub fn get_leads(conn: &Connection, ids: &[String]) -> Result<Vec<Lead>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, company, phone, status, created_at FROM leads WHERE id = ?1",
    )?;

    let mut leads = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(lead) = stmt.query_row([id], map_row_to_lead).optional()? {
            leads.push(lead);
        }
    }
    Ok(leads)
}

/// Updates a lead's status label.
pub fn update_lead_status(conn: &Connection, id: &str, status: &str) -> Result<(), StoreError> {
    let changed = conn.execute("UPDATE leads SET status = ?2 WHERE id = ?1", params![id, status])?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "lead",
            id: id.to_string(),
        });
    }
    Ok(())
}
