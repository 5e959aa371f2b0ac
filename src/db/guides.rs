//! Guide profile reads and writes

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use std::collections::HashMap;

use super::models::{format_timestamp, AvailabilityStatus, Guide, GUIDE_ACCOUNT_ROLE};
use crate::error::DispatchError;

/// Input for creating or replacing a guide profile
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertGuideInput {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default = "default_account_role")]
    pub account_role: String,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub availability: Option<AvailabilityStatus>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub preferred_destinations: Vec<String>,
}

fn default_account_role() -> String {
    GUIDE_ACCOUNT_ROLE.to_string()
}

impl UpsertGuideInput {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phone: None,
            account_role: default_account_role(),
            branch_id: None,
            availability: None,
            rating: 0.0,
            preferred_destinations: Vec::new(),
        }
    }
}

/// Create or replace a guide profile
pub fn upsert_guide(
    conn: &Connection,
    input: &UpsertGuideInput,
    now: DateTime<Utc>,
) -> Result<Guide, DispatchError> {
    let preferred = serde_json::to_string(&input.preferred_destinations)?;

    conn.execute(
        "INSERT INTO guides
            (id, name, phone, account_role, branch_id, availability_status, rating,
             preferred_destinations, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            phone = excluded.phone,
            account_role = excluded.account_role,
            branch_id = excluded.branch_id,
            availability_status = excluded.availability_status,
            rating = excluded.rating,
            preferred_destinations = excluded.preferred_destinations",
        params![
            input.id,
            input.name,
            input.phone,
            input.account_role,
            input.branch_id,
            input.availability,
            input.rating,
            preferred,
            format_timestamp(now),
        ],
    )?;

    get_guide(conn, &input.id)?
        .ok_or_else(|| DispatchError::Internal(format!("guide {} vanished after upsert", input.id)))
}

/// Get a guide by ID, including soft-deleted ones
pub fn get_guide(conn: &Connection, id: &str) -> Result<Option<Guide>, DispatchError> {
    let guide = conn
        .query_row("SELECT * FROM guides WHERE id = ?", params![id], Guide::from_row)
        .optional()?;
    Ok(guide)
}

/// Soft-delete a guide
pub fn soft_delete_guide(
    conn: &Connection,
    id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DispatchError> {
    let changed = conn.execute(
        "UPDATE guides SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        params![format_timestamp(now), id],
    )?;
    Ok(changed > 0)
}

/// Record a guide's availability (`None` clears it back to unset)
pub fn set_availability(
    conn: &Connection,
    id: &str,
    availability: Option<AvailabilityStatus>,
) -> Result<bool, DispatchError> {
    let changed = conn.execute(
        "UPDATE guides SET availability_status = ?1 WHERE id = ?2",
        params![availability, id],
    )?;
    Ok(changed > 0)
}

/// Guides that may be scheduled: not deleted, guide role, standby or unset.
///
/// Ordered by id so callers get a stable pool.
pub fn list_schedulable_guides(conn: &Connection) -> Result<Vec<Guide>, DispatchError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM guides
         WHERE deleted_at IS NULL
           AND account_role = ?1
           AND (availability_status IS NULL OR availability_status = 'standby')
         ORDER BY id",
    )?;

    let guides = stmt
        .query_map(params![GUIDE_ACCOUNT_ROLE], Guide::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(guides)
}

/// Number of live assignments each guide holds, keyed by guide id
pub fn live_workloads(conn: &Connection) -> Result<HashMap<String, u32>, DispatchError> {
    let mut stmt = conn.prepare(
        "SELECT guide_id, COUNT(*) FROM trip_assignments
         WHERE status IN ('pending_confirmation', 'confirmed')
           AND checked_out_at IS NULL
         GROUP BY guide_id",
    )?;

    let rows = stmt
        .query_map([], |row| {
            let guide_id: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((guide_id, count as u32))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LedgerDb;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 3, 0, 0).unwrap()
    }

    #[test]
    fn test_upsert_and_get() {
        let db = LedgerDb::open_in_memory().unwrap();
        let mut input = UpsertGuideInput::new("g-1", "Ayu");
        input.preferred_destinations = vec!["Bromo".into()];

        let guide = db.with_conn(|conn| upsert_guide(conn, &input, now())).unwrap();
        assert_eq!(guide.name, "Ayu");
        assert_eq!(guide.preferred_destinations, vec!["Bromo".to_string()]);
        assert!(guide.is_schedulable());

        input.name = "Ayu W.".into();
        let guide = db.with_conn(|conn| upsert_guide(conn, &input, now())).unwrap();
        assert_eq!(guide.name, "Ayu W.");
    }

    #[test]
    fn test_schedulable_filter() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            upsert_guide(conn, &UpsertGuideInput::new("g-unset", "A"), now())?;

            let mut standby = UpsertGuideInput::new("g-standby", "B");
            standby.availability = Some(AvailabilityStatus::Standby);
            upsert_guide(conn, &standby, now())?;

            let mut busy = UpsertGuideInput::new("g-busy", "C");
            busy.availability = Some(AvailabilityStatus::OnTrip);
            upsert_guide(conn, &busy, now())?;

            let mut staff = UpsertGuideInput::new("g-staff", "D");
            staff.account_role = "admin".into();
            upsert_guide(conn, &staff, now())?;

            upsert_guide(conn, &UpsertGuideInput::new("g-gone", "E"), now())?;
            soft_delete_guide(conn, "g-gone", now())?;
            Ok(())
        })
        .unwrap();

        let ids: Vec<String> = db
            .with_conn(list_schedulable_guides)
            .unwrap()
            .into_iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(ids, vec!["g-standby".to_string(), "g-unset".to_string()]);
    }

    #[test]
    fn test_availability_change_leaves_pool() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| upsert_guide(conn, &UpsertGuideInput::new("g-1", "Ayu"), now()))
            .unwrap();

        assert!(db
            .with_conn(|conn| set_availability(conn, "g-1", Some(AvailabilityStatus::NotAvailable)))
            .unwrap());
        assert!(db.with_conn(list_schedulable_guides).unwrap().is_empty());

        db.with_conn(|conn| set_availability(conn, "g-1", None)).unwrap();
        assert_eq!(db.with_conn(list_schedulable_guides).unwrap().len(), 1);
        assert!(!db.with_conn(|conn| set_availability(conn, "nobody", None)).unwrap());
    }
}
