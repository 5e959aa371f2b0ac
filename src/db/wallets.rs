//! Wallet ledger: append-only transactions plus a cached balance
//!
//! Appends run in one SQLite transaction that reads the cached balance, writes
//! the entry with balance-before/after, and updates the cache.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use super::models::{
    format_timestamp, parse_timestamp, reference_types, TransactionType, Wallet, WalletTransaction,
};
use super::partition::PartitionScope;
use crate::error::DispatchError;

// ============================================================================
// Types
// ============================================================================

/// Entry to append to a guide's wallet
#[derive(Debug, Clone)]
pub struct AppendTransaction {
    pub guide_id: String,
    pub transaction_type: TransactionType,
    /// Signed amount in minor units
    pub amount: i64,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub description: Option<String>,
}

/// A trip earning joined with its wallet owner
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TripEarning {
    pub transaction_id: String,
    pub wallet_id: String,
    pub guide_id: String,
    pub trip_id: String,
    pub branch_id: Option<String>,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// A wallet whose cached balance disagrees with its transaction history
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WalletReconciliation {
    pub wallet_id: String,
    pub guide_id: String,
    pub branch_id: Option<String>,
    /// Sum of the transaction log
    pub expected: i64,
    /// Cached balance on the wallet row
    pub actual: i64,
    /// `actual - expected`
    pub difference: i64,
}

// ============================================================================
// Wallets
// ============================================================================

/// Get a guide's wallet
pub fn get_wallet_for_guide(conn: &Connection, guide_id: &str) -> Result<Option<Wallet>, DispatchError> {
    let wallet = conn
        .query_row(
            "SELECT * FROM wallets WHERE guide_id = ?",
            params![guide_id],
            Wallet::from_row,
        )
        .optional()?;
    Ok(wallet)
}

/// Get a guide's wallet, creating an empty one on first use
pub fn ensure_wallet(conn: &Connection, guide_id: &str, now: DateTime<Utc>) -> Result<Wallet, DispatchError> {
    if let Some(wallet) = get_wallet_for_guide(conn, guide_id)? {
        return Ok(wallet);
    }

    let ts = format_timestamp(now);
    conn.execute(
        "INSERT INTO wallets (id, guide_id, balance, created_at, updated_at)
         VALUES (?1, ?2, 0, ?3, ?3)",
        params![Uuid::new_v4().to_string(), guide_id, ts],
    )?;

    get_wallet_for_guide(conn, guide_id)?
        .ok_or_else(|| DispatchError::Internal(format!("wallet for {} vanished after insert", guide_id)))
}

// ============================================================================
// Transactions
// ============================================================================

/// Append an entry and move the cached balance.
///
/// Refuses a second trip earning for the same wallet and trip (`Conflict`)
/// and withdrawals that would take the balance below zero (`InvalidInput`).
pub fn append_transaction(
    conn: &mut Connection,
    input: &AppendTransaction,
    now: DateTime<Utc>,
) -> Result<WalletTransaction, DispatchError> {
    let tx = conn.transaction()?;
    let wallet = ensure_wallet(&tx, &input.guide_id, now)?;

    if input.transaction_type == TransactionType::Earning
        && input.reference_type.as_deref() == Some(reference_types::TRIP)
    {
        if let Some(trip_id) = input.reference_id.as_deref() {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM wallet_transactions
                     WHERE wallet_id = ?1 AND transaction_type = 'earning'
                       AND reference_type = 'trip' AND reference_id = ?2
                     LIMIT 1",
                    params![wallet.id, trip_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing) = existing {
                return Err(DispatchError::Conflict(format!(
                    "trip {} already paid to guide {} ({})",
                    trip_id, input.guide_id, existing
                )));
            }
        }
    }

    let balance_before = wallet.balance;
    let balance_after = balance_before
        .checked_add(input.amount)
        .ok_or_else(|| DispatchError::InvalidInput("balance overflow".into()))?;

    if input.transaction_type == TransactionType::Withdrawal && balance_after < 0 {
        return Err(DispatchError::InvalidInput(format!(
            "withdrawal of {} exceeds balance {}",
            -input.amount, balance_before
        )));
    }

    let id = Uuid::new_v4().to_string();
    let ts = format_timestamp(now);
    tx.execute(
        "INSERT INTO wallet_transactions
            (id, wallet_id, transaction_type, amount, balance_before, balance_after,
             reference_type, reference_id, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            wallet.id,
            input.transaction_type,
            input.amount,
            balance_before,
            balance_after,
            input.reference_type,
            input.reference_id,
            input.description,
            ts,
        ],
    )?;

    tx.execute(
        "UPDATE wallets SET balance = ?1, updated_at = ?2 WHERE id = ?3",
        params![balance_after, ts, wallet.id],
    )?;

    let entry = tx.query_row(
        "SELECT * FROM wallet_transactions WHERE id = ?",
        params![id],
        WalletTransaction::from_row,
    )?;
    tx.commit()?;
    Ok(entry)
}

/// A wallet's transactions, oldest first
pub fn list_transactions(conn: &Connection, wallet_id: &str) -> Result<Vec<WalletTransaction>, DispatchError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM wallet_transactions WHERE wallet_id = ? ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map(params![wallet_id], WalletTransaction::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Earning entries that reference a trip, within a partition.
///
/// The partition is the trip's branch, even when that is NULL. The guide's
/// branch is used only when the referenced trip row does not exist, matching
/// the key `assignments::list_completed` uses for checkouts.
pub fn list_trip_earnings(
    conn: &Connection,
    scope: &PartitionScope,
) -> Result<Vec<TripEarning>, DispatchError> {
    let mut stmt = conn.prepare(
        "SELECT wt.id, wt.wallet_id, w.guide_id, wt.reference_id,
                CASE WHEN t.id IS NULL THEN g.branch_id ELSE t.branch_id END,
                wt.amount, wt.created_at
         FROM wallet_transactions wt
         JOIN wallets w ON w.id = wt.wallet_id
         LEFT JOIN guides g ON g.id = w.guide_id
         LEFT JOIN trips t ON t.id = wt.reference_id
         WHERE wt.transaction_type = 'earning'
           AND wt.reference_type = 'trip'
           AND wt.reference_id IS NOT NULL
           AND (?1 IS NULL OR CASE WHEN t.id IS NULL THEN g.branch_id ELSE t.branch_id END = ?1)
         ORDER BY wt.created_at, wt.id",
    )?;

    let rows = stmt
        .query_map(params![scope.branch_id()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(transaction_id, wallet_id, guide_id, trip_id, branch_id, amount, created)| {
            let created_at = parse_timestamp(&created).map_err(|e| {
                DispatchError::Internal(format!(
                    "transaction {} has unreadable created_at '{}': {}",
                    transaction_id, created, e
                ))
            })?;
            Ok(TripEarning {
                transaction_id,
                wallet_id,
                guide_id,
                trip_id,
                branch_id,
                amount,
                created_at,
            })
        })
        .collect()
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Compare every wallet's cached balance with the sum of its transactions.
///
/// Only wallets that disagree are returned.
pub fn reconcile_wallets(conn: &Connection) -> Result<Vec<WalletReconciliation>, DispatchError> {
    let mut stmt = conn.prepare(
        "SELECT w.id, w.guide_id, g.branch_id, w.balance,
                COALESCE((SELECT SUM(wt.amount) FROM wallet_transactions wt
                          WHERE wt.wallet_id = w.id), 0) AS expected
         FROM wallets w
         LEFT JOIN guides g ON g.id = w.guide_id
         ORDER BY w.id",
    )?;

    let rows = stmt
        .query_map([], |row| {
            let actual: i64 = row.get(3)?;
            let expected: i64 = row.get(4)?;
            Ok(WalletReconciliation {
                wallet_id: row.get(0)?,
                guide_id: row.get(1)?,
                branch_id: row.get(2)?,
                expected,
                actual,
                difference: actual - expected,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows.into_iter().filter(|r| r.difference != 0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::guides::{upsert_guide, UpsertGuideInput};
    use crate::db::LedgerDb;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 3, 0, 0).unwrap()
    }

    fn db_with_guide() -> LedgerDb {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| upsert_guide(conn, &UpsertGuideInput::new("g-1", "Ayu"), now()))
            .unwrap();
        db
    }

    fn entry(kind: TransactionType, amount: i64, trip: Option<&str>) -> AppendTransaction {
        AppendTransaction {
            guide_id: "g-1".into(),
            transaction_type: kind,
            amount,
            reference_type: trip.map(|_| reference_types::TRIP.to_string()),
            reference_id: trip.map(String::from),
            description: None,
        }
    }

    #[test]
    fn test_append_tracks_running_balance() {
        let db = db_with_guide();
        let first = db
            .with_conn_mut(|conn| append_transaction(conn, &entry(TransactionType::Earning, 150_000, Some("t-1")), now()))
            .unwrap();
        let second = db
            .with_conn_mut(|conn| {
                append_transaction(conn, &entry(TransactionType::Withdrawal, -50_000, None), now() + Duration::hours(1))
            })
            .unwrap();

        assert_eq!((first.balance_before, first.balance_after), (0, 150_000));
        assert_eq!((second.balance_before, second.balance_after), (150_000, 100_000));

        let wallet = db.with_conn(|conn| get_wallet_for_guide(conn, "g-1")).unwrap().unwrap();
        assert_eq!(wallet.balance, 100_000);
        assert!(db.with_conn(reconcile_wallets).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_trip_earning_conflicts() {
        let db = db_with_guide();
        let earning = entry(TransactionType::Earning, 150_000, Some("t-1"));
        db.with_conn_mut(|conn| append_transaction(conn, &earning, now())).unwrap();

        let again = db.with_conn_mut(|conn| append_transaction(conn, &earning, now()));
        assert!(matches!(again, Err(DispatchError::Conflict(_))));
    }

    #[test]
    fn test_overdraw_rejected() {
        let db = db_with_guide();
        let result = db.with_conn_mut(|conn| {
            append_transaction(conn, &entry(TransactionType::Withdrawal, -1, None), now())
        });
        assert!(matches!(result, Err(DispatchError::InvalidInput(_))));
    }

    #[test]
    fn test_reconcile_reports_drift() {
        let db = db_with_guide();
        db.with_conn_mut(|conn| append_transaction(conn, &entry(TransactionType::Earning, 200, Some("t-1")), now()))
            .unwrap();
        db.with_conn(|conn| {
            conn.execute("UPDATE wallets SET balance = 250 WHERE guide_id = 'g-1'", [])?;
            Ok(())
        })
        .unwrap();

        let drift = db.with_conn(reconcile_wallets).unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].expected, 200);
        assert_eq!(drift[0].actual, 250);
        assert_eq!(drift[0].difference, 50);
    }
}
