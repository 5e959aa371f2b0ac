//! SQLite ledger store
//!
//! Holds the records the dispatcher reads and writes: guides and trips
//! (reference data owned by the surrounding application), the append-only
//! assignment history, and the wallet transaction log.
//!
//! ## Tables
//!
//! - `guides` - Guide profiles with availability and rating
//! - `trips` - Scheduled trips (date, destination, branch)
//! - `trip_assignments` - Assignment history per trip/role
//! - `wallets` - Guide wallets with cached balance
//! - `wallet_transactions` - Append-only ledger entries
//!
//! Each helper issues row-level atomic statements. Multi-statement sequences
//! that must not interleave run inside `with_conn_mut` transactions.

pub mod schema;
pub mod models;
pub mod partition;
pub mod guides;
pub mod trips;
pub mod assignments;
pub mod wallets;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::DispatchError;

/// SQLite database for the dispatch ledger
pub struct LedgerDb {
    conn: Mutex<Connection>,
}

impl LedgerDb {
    /// Open or create the ledger database
    pub fn open(storage_dir: &Path) -> Result<Self, DispatchError> {
        let db_path = storage_dir.join("dispatch.db");
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)?;

        // WAL keeps audit reads from blocking sweep writes
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, DispatchError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), DispatchError> {
        self.with_conn(schema::init_schema)
    }

    /// Run a read (or single-statement write) against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DispatchError>
    where
        F: FnOnce(&Connection) -> Result<T, DispatchError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| DispatchError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access (for transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, DispatchError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DispatchError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| DispatchError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, DispatchError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, DispatchError> {
                let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                guide_count: count("SELECT COUNT(*) FROM guides")?,
                trip_count: count("SELECT COUNT(*) FROM trips")?,
                assignment_count: count("SELECT COUNT(*) FROM trip_assignments")?,
                pending_count: count(
                    "SELECT COUNT(*) FROM trip_assignments WHERE status = 'pending_confirmation'",
                )?,
                transaction_count: count("SELECT COUNT(*) FROM wallet_transactions")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub guide_count: u64,
    pub trip_count: u64,
    pub assignment_count: u64,
    pub pending_count: u64,
    pub transaction_count: u64,
}

// Re-exports
pub use models::{
    AssignmentMethod, AssignmentStatus, AvailabilityStatus, Guide, GuideRole, TransactionType,
    Trip, TripAssignment, Wallet, WalletTransaction,
};
pub use partition::PartitionScope;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_file_backed() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = LedgerDb::open(dir.path()).unwrap();
        assert!(dir.path().join("dispatch.db").exists());

        let stats = db.stats().unwrap();
        assert_eq!(stats.assignment_count, 0);
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let dir = tempfile::TempDir::new().unwrap();
        drop(LedgerDb::open(dir.path()).unwrap());
        let db = LedgerDb::open(dir.path()).unwrap();
        assert_eq!(db.stats().unwrap().trip_count, 0);
    }
}
