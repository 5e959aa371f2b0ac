//! Trip reference reads and writes

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

use super::models::{format_date, Trip};
use crate::error::DispatchError;

/// Input for recording a trip
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTripInput {
    pub id: String,
    pub trip_code: String,
    pub trip_date: NaiveDate,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub pax_count: i64,
}

/// Insert or replace a trip
pub fn upsert_trip(conn: &Connection, input: &CreateTripInput) -> Result<Trip, DispatchError> {
    if input.id.is_empty() || input.trip_code.is_empty() {
        return Err(DispatchError::InvalidInput("trip id and trip_code are required".into()));
    }

    conn.execute(
        "INSERT INTO trips (id, trip_code, trip_date, destination, branch_id, pax_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            trip_code = excluded.trip_code,
            trip_date = excluded.trip_date,
            destination = excluded.destination,
            branch_id = excluded.branch_id,
            pax_count = excluded.pax_count",
        params![
            input.id,
            input.trip_code,
            format_date(input.trip_date),
            input.destination,
            input.branch_id,
            input.pax_count,
        ],
    )?;

    Ok(Trip {
        id: input.id.clone(),
        trip_code: input.trip_code.clone(),
        trip_date: input.trip_date,
        destination: input.destination.clone(),
        branch_id: input.branch_id.clone(),
        pax_count: input.pax_count,
    })
}

/// Get trip by ID
pub fn get_trip(conn: &Connection, id: &str) -> Result<Option<Trip>, DispatchError> {
    let trip = conn
        .query_row("SELECT * FROM trips WHERE id = ?", params![id], Trip::from_row)
        .optional()?;
    Ok(trip)
}

/// Get trip by ID or fail with `NotFound`
pub fn require_trip(conn: &Connection, id: &str) -> Result<Trip, DispatchError> {
    get_trip(conn, id)?.ok_or_else(|| DispatchError::NotFound(format!("trip {}", id)))
}
