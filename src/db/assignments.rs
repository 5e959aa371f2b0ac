//! Trip assignment history
//!
//! Rows are never deleted. Status changes go through conditional updates so a
//! stale caller cannot overwrite a transition that already happened.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

use super::models::{
    format_date, format_timestamp, parse_timestamp, AssignmentMethod, AssignmentStatus, GuideRole,
    TripAssignment,
};
use super::partition::PartitionScope;
use crate::error::DispatchError;

// ============================================================================
// Input Types
// ============================================================================

/// Values for a new `pending_confirmation` row
#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub trip_id: String,
    pub guide_id: String,
    pub role: GuideRole,
    pub fee_amount: i64,
    pub method: AssignmentMethod,
    pub reassigned_from_guide_id: Option<String>,
    pub confirmation_deadline: DateTime<Utc>,
}

/// A checked-out assignment, as seen by the auditor
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletedAssignment {
    pub assignment_id: String,
    pub trip_id: String,
    pub guide_id: String,
    pub branch_id: Option<String>,
    pub fee_amount: i64,
    pub checked_out_at: DateTime<Utc>,
}

// ============================================================================
// Write Operations
// ============================================================================

/// Insert a new pending assignment, refusing if the (trip, role) slot is taken.
///
/// The live check and the insert share one transaction; the partial unique
/// index backs it up against writers on other connections.
pub fn insert_assignment(
    conn: &mut Connection,
    new: &NewAssignment,
    now: DateTime<Utc>,
) -> Result<TripAssignment, DispatchError> {
    let tx = conn.transaction()?;

    if let Some(live) = find_live(&tx, &new.trip_id, new.role)? {
        return Err(DispatchError::Conflict(format!(
            "trip {} already has a {} {} assignment ({})",
            new.trip_id, live.status, new.role, live.guide_id
        )));
    }

    let id = Uuid::new_v4().to_string();
    let ts = format_timestamp(now);
    let inserted = tx.execute(
        "INSERT INTO trip_assignments
            (id, trip_id, guide_id, role, status, confirmation_deadline,
             assignment_method, reassigned_from_guide_id, fee_amount, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            id,
            new.trip_id,
            new.guide_id,
            new.role,
            AssignmentStatus::PendingConfirmation,
            format_timestamp(new.confirmation_deadline),
            new.method,
            new.reassigned_from_guide_id,
            new.fee_amount,
            ts,
        ],
    );

    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, msg)) if e.code == ErrorCode::ConstraintViolation => {
            return Err(DispatchError::Conflict(format!(
                "cannot assign {} to trip {}: {}",
                new.guide_id,
                new.trip_id,
                msg.unwrap_or_else(|| "constraint violation".into())
            )));
        }
        Err(e) => return Err(e.into()),
    }

    let row = require_assignment(&tx, &id)?;
    tx.commit()?;
    Ok(row)
}

/// Move a `pending_confirmation` row to `to`, stamping the matching columns.
///
/// Returns `false` when the row was not pending (or does not exist).
pub fn transition_pending(
    conn: &Connection,
    id: &str,
    to: AssignmentStatus,
    now: DateTime<Utc>,
    reason: Option<&str>,
) -> Result<bool, DispatchError> {
    let ts = format_timestamp(now);
    let sql = match to {
        AssignmentStatus::Confirmed => {
            "UPDATE trip_assignments
             SET status = ?1, confirmed_at = ?2, confirmation_deadline = NULL, updated_at = ?2
             WHERE id = ?3 AND status = 'pending_confirmation'"
        }
        AssignmentStatus::Rejected => {
            "UPDATE trip_assignments
             SET status = ?1, rejected_at = ?2, rejection_reason = ?4, updated_at = ?2
             WHERE id = ?3 AND status = 'pending_confirmation'"
        }
        AssignmentStatus::AutoReassigned | AssignmentStatus::Expired => {
            "UPDATE trip_assignments
             SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'pending_confirmation'"
        }
        AssignmentStatus::PendingConfirmation => {
            return Err(DispatchError::InvalidInput(
                "cannot transition into pending_confirmation".into(),
            ));
        }
    };

    let changed = if to == AssignmentStatus::Rejected {
        conn.execute(sql, params![to, ts, id, reason])?
    } else {
        conn.execute(sql, params![to, ts, id])?
    };
    Ok(changed > 0)
}

/// Stamp check-in on a confirmed assignment
pub fn record_check_in(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<bool, DispatchError> {
    let changed = conn.execute(
        "UPDATE trip_assignments SET checked_in_at = ?1, updated_at = ?1
         WHERE id = ?2 AND status = 'confirmed' AND checked_in_at IS NULL",
        params![format_timestamp(now), id],
    )?;
    Ok(changed > 0)
}

/// Stamp check-out on a confirmed assignment
pub fn record_check_out(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<bool, DispatchError> {
    let changed = conn.execute(
        "UPDATE trip_assignments SET checked_out_at = ?1, updated_at = ?1
         WHERE id = ?2 AND status = 'confirmed' AND checked_out_at IS NULL",
        params![format_timestamp(now), id],
    )?;
    Ok(changed > 0)
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get assignment by ID
pub fn get_assignment(conn: &Connection, id: &str) -> Result<Option<TripAssignment>, DispatchError> {
    let row = conn
        .query_row(
            "SELECT * FROM trip_assignments WHERE id = ?",
            params![id],
            TripAssignment::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Get assignment by ID or fail with `NotFound`
pub fn require_assignment(conn: &Connection, id: &str) -> Result<TripAssignment, DispatchError> {
    get_assignment(conn, id)?.ok_or_else(|| DispatchError::NotFound(format!("assignment {}", id)))
}

/// The live assignment occupying a (trip, role) slot, if any
pub fn find_live(
    conn: &Connection,
    trip_id: &str,
    role: GuideRole,
) -> Result<Option<TripAssignment>, DispatchError> {
    let row = conn
        .query_row(
            "SELECT * FROM trip_assignments
             WHERE trip_id = ?1 AND role = ?2
               AND status IN ('pending_confirmation', 'confirmed')
             LIMIT 1",
            params![trip_id, role],
            TripAssignment::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Full assignment history of a trip, oldest first
pub fn list_for_trip(conn: &Connection, trip_id: &str) -> Result<Vec<TripAssignment>, DispatchError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM trip_assignments WHERE trip_id = ? ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map(params![trip_id], TripAssignment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Pending assignments whose deadline is strictly before `now`
pub fn list_expired_pending(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<Vec<TripAssignment>, DispatchError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM trip_assignments
         WHERE status = 'pending_confirmation'
           AND confirmation_deadline IS NOT NULL
           AND confirmation_deadline < ?1
         ORDER BY confirmation_deadline, trip_id, rowid",
    )?;
    let rows = stmt
        .query_map(params![format_timestamp(now)], TripAssignment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Number of rows in `status` for a trip
pub fn count_with_status(
    conn: &Connection,
    trip_id: &str,
    status: AssignmentStatus,
) -> Result<u32, DispatchError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM trip_assignments WHERE trip_id = ?1 AND status = ?2",
        params![trip_id, status],
        |row| row.get(0),
    )?;
    Ok(count as u32)
}

/// Guides who rejected, were auto-reassigned away from, or expired on a trip
pub fn exclusion_set(conn: &Connection, trip_id: &str) -> Result<BTreeSet<String>, DispatchError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT guide_id FROM trip_assignments
         WHERE trip_id = ?1
           AND status IN ('rejected', 'auto_reassigned', 'expired')",
    )?;
    let ids = stmt
        .query_map(params![trip_id], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(ids)
}

/// Guides currently holding any live slot on a trip
pub fn live_guides(conn: &Connection, trip_id: &str) -> Result<BTreeSet<String>, DispatchError> {
    let mut stmt = conn.prepare(
        "SELECT guide_id FROM trip_assignments
         WHERE trip_id = ?1 AND status IN ('pending_confirmation', 'confirmed')",
    )?;
    let ids = stmt
        .query_map(params![trip_id], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(ids)
}

/// Latest rows of (trip, role) chains that ended in `auto_reassigned` with no
/// successor, for trips dated `from` or later.
pub fn list_unfilled(conn: &Connection, from: NaiveDate) -> Result<Vec<TripAssignment>, DispatchError> {
    let mut stmt = conn.prepare(
        "SELECT a.* FROM trip_assignments a
         JOIN trips t ON t.id = a.trip_id
         WHERE a.status = 'auto_reassigned'
           AND t.trip_date >= ?1
           AND NOT EXISTS (
               SELECT 1 FROM trip_assignments b
               WHERE b.trip_id = a.trip_id
                 AND b.role = a.role
                 AND b.id <> a.id
                 AND (b.status IN ('pending_confirmation', 'confirmed')
                      OR b.created_at > a.created_at
                      OR (b.created_at = a.created_at AND b.rowid > a.rowid))
           )
         ORDER BY t.trip_date, a.trip_id, a.role",
    )?;
    let rows = stmt
        .query_map(params![format_date(from)], TripAssignment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Checked-out assignments within a partition, keyed by the trip's branch
pub fn list_completed(
    conn: &Connection,
    scope: &PartitionScope,
) -> Result<Vec<CompletedAssignment>, DispatchError> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.trip_id, a.guide_id, t.branch_id, a.fee_amount, a.checked_out_at
         FROM trip_assignments a
         JOIN trips t ON t.id = a.trip_id
         WHERE a.checked_out_at IS NOT NULL
           AND (?1 IS NULL OR t.branch_id = ?1)
         ORDER BY a.checked_out_at, a.id",
    )?;

    let rows = stmt
        .query_map(params![scope.branch_id()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(assignment_id, trip_id, guide_id, branch_id, fee_amount, checked_out)| {
            let checked_out_at = parse_timestamp(&checked_out).map_err(|e| {
                DispatchError::Internal(format!(
                    "assignment {} has unreadable checked_out_at '{}': {}",
                    assignment_id, checked_out, e
                ))
            })?;
            Ok(CompletedAssignment {
                assignment_id,
                trip_id,
                guide_id,
                branch_id,
                fee_amount,
                checked_out_at,
            })
        })
        .collect()
}
