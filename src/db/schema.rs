//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::DispatchError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), DispatchError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, DispatchError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    Ok(version.unwrap_or(0))
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), DispatchError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<(), DispatchError> {
    conn.execute_batch(REFERENCE_SCHEMA)
        .map_err(|e| DispatchError::Internal(format!("Failed to create reference tables: {}", e)))?;

    conn.execute_batch(ASSIGNMENT_SCHEMA)
        .map_err(|e| DispatchError::Internal(format!("Failed to create assignment tables: {}", e)))?;

    conn.execute_batch(LEDGER_SCHEMA)
        .map_err(|e| DispatchError::Internal(format!("Failed to create ledger tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| DispatchError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), DispatchError> {
    info!(from_version, "No migration steps registered");
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Guides and trips, written by the surrounding application
const REFERENCE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS guides (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    phone TEXT,
    account_role TEXT NOT NULL DEFAULT 'guide',
    branch_id TEXT,

    -- standby | on_trip | not_available; NULL means never recorded
    availability_status TEXT,
    rating REAL NOT NULL DEFAULT 0,
    -- JSON array of destination names
    preferred_destinations TEXT,

    deleted_at TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trips (
    id TEXT PRIMARY KEY NOT NULL,
    trip_code TEXT NOT NULL,
    trip_date TEXT NOT NULL,
    destination TEXT,
    branch_id TEXT,
    pax_count INTEGER NOT NULL DEFAULT 0
);
"#;

/// Assignment history, append-only per trip
const ASSIGNMENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS trip_assignments (
    id TEXT PRIMARY KEY NOT NULL,
    trip_id TEXT NOT NULL,
    guide_id TEXT NOT NULL,
    role TEXT NOT NULL,
    status TEXT NOT NULL,

    confirmation_deadline TEXT,
    confirmed_at TEXT,
    rejected_at TEXT,
    rejection_reason TEXT,

    assignment_method TEXT NOT NULL DEFAULT 'manual',
    reassigned_from_guide_id TEXT,
    fee_amount INTEGER NOT NULL DEFAULT 0,

    -- Trip completion from the guide's side
    checked_in_at TEXT,
    checked_out_at TEXT,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (trip_id) REFERENCES trips(id),
    FOREIGN KEY (guide_id) REFERENCES guides(id)
);

-- At most one live assignment per (trip, role)
CREATE UNIQUE INDEX IF NOT EXISTS idx_assignments_live_slot
    ON trip_assignments(trip_id, role)
    WHERE status IN ('pending_confirmation', 'confirmed');
"#;

/// Wallets and their transaction log
const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    id TEXT PRIMARY KEY NOT NULL,
    guide_id TEXT NOT NULL UNIQUE,
    -- Cached; must equal SUM(wallet_transactions.amount)
    balance INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (guide_id) REFERENCES guides(id)
);

CREATE TABLE IF NOT EXISTS wallet_transactions (
    id TEXT PRIMARY KEY NOT NULL,
    wallet_id TEXT NOT NULL,
    transaction_type TEXT NOT NULL,
    amount INTEGER NOT NULL,
    balance_before INTEGER NOT NULL,
    balance_after INTEGER NOT NULL,
    reference_type TEXT,
    reference_id TEXT,
    description TEXT,
    created_at TEXT NOT NULL,

    FOREIGN KEY (wallet_id) REFERENCES wallets(id)
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_guides_branch ON guides(branch_id);
CREATE INDEX IF NOT EXISTS idx_trips_branch ON trips(branch_id);
CREATE INDEX IF NOT EXISTS idx_trips_date ON trips(trip_date);

CREATE INDEX IF NOT EXISTS idx_assignments_trip ON trip_assignments(trip_id);
CREATE INDEX IF NOT EXISTS idx_assignments_guide ON trip_assignments(guide_id);
CREATE INDEX IF NOT EXISTS idx_assignments_deadline
    ON trip_assignments(status, confirmation_deadline);

CREATE INDEX IF NOT EXISTS idx_transactions_wallet ON wallet_transactions(wallet_id, created_at);
CREATE INDEX IF NOT EXISTS idx_transactions_reference
    ON wallet_transactions(reference_type, reference_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_live_slot_index_rejects_second_live_row() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let insert = "INSERT INTO trip_assignments
            (id, trip_id, guide_id, role, status, created_at, updated_at)
            VALUES (?1, 't1', ?2, 'lead', ?3, 'x', 'x')";
        conn.execute(insert, ["a1", "g1", "pending_confirmation"]).unwrap();
        conn.execute(insert, ["a2", "g2", "rejected"]).unwrap();
        assert!(conn.execute(insert, ["a3", "g3", "confirmed"]).is_err());
    }
}
