//! Ledger service - wallet writes for guide earnings
//!
//! Thin validation over `db::wallets`; the store keeps the balance cache and
//! the transaction log in step.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::db::models::{reference_types, TransactionType, Wallet, WalletTransaction};
use crate::db::wallets::{self, AppendTransaction};
use crate::db::LedgerDb;
use crate::error::DispatchError;

pub struct LedgerService {
    db: Arc<LedgerDb>,
}

impl LedgerService {
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self { db }
    }

    /// Credit a guide for a completed trip
    pub fn credit_trip_earning(
        &self,
        guide_id: &str,
        trip_id: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<WalletTransaction, DispatchError> {
        if amount <= 0 {
            return Err(DispatchError::InvalidInput(format!(
                "earning amount must be positive, got {}",
                amount
            )));
        }

        let entry = self.append(
            AppendTransaction {
                guide_id: guide_id.to_string(),
                transaction_type: TransactionType::Earning,
                amount,
                reference_type: Some(reference_types::TRIP.to_string()),
                reference_id: Some(trip_id.to_string()),
                description: Some(format!("Guide fee for trip {}", trip_id)),
            },
            now,
        )?;

        info!(
            guide_id = %guide_id,
            trip_id = %trip_id,
            amount,
            balance = entry.balance_after,
            "Trip earning credited"
        );
        Ok(entry)
    }

    /// Debit a payout from a guide's wallet
    pub fn withdraw(
        &self,
        guide_id: &str,
        amount: i64,
        request_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WalletTransaction, DispatchError> {
        if amount <= 0 {
            return Err(DispatchError::InvalidInput(format!(
                "withdrawal amount must be positive, got {}",
                amount
            )));
        }

        self.append(
            AppendTransaction {
                guide_id: guide_id.to_string(),
                transaction_type: TransactionType::Withdrawal,
                amount: -amount,
                reference_type: request_id.map(|_| reference_types::WITHDRAWAL_REQUEST.to_string()),
                reference_id: request_id.map(String::from),
                description: None,
            },
            now,
        )
    }

    /// Manual correction, positive or negative
    pub fn adjust(
        &self,
        guide_id: &str,
        amount: i64,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<WalletTransaction, DispatchError> {
        if amount == 0 {
            return Err(DispatchError::InvalidInput("adjustment amount is zero".into()));
        }
        if description.trim().is_empty() {
            return Err(DispatchError::InvalidInput("adjustments need a description".into()));
        }

        self.append(
            AppendTransaction {
                guide_id: guide_id.to_string(),
                transaction_type: TransactionType::Adjustment,
                amount,
                reference_type: Some(reference_types::MANUAL.to_string()),
                reference_id: None,
                description: Some(description.to_string()),
            },
            now,
        )
    }

    pub fn wallet(&self, guide_id: &str) -> Result<Option<Wallet>, DispatchError> {
        self.db.with_conn(|conn| wallets::get_wallet_for_guide(conn, guide_id))
    }

    /// Transaction history of a guide's wallet, oldest first
    pub fn transactions(&self, guide_id: &str) -> Result<Vec<WalletTransaction>, DispatchError> {
        self.db.with_conn(|conn| match wallets::get_wallet_for_guide(conn, guide_id)? {
            Some(wallet) => wallets::list_transactions(conn, &wallet.id),
            None => Ok(Vec::new()),
        })
    }

    fn append(
        &self,
        input: AppendTransaction,
        now: DateTime<Utc>,
    ) -> Result<WalletTransaction, DispatchError> {
        self.db.with_conn_mut(|conn| wallets::append_transaction(conn, &input, now))
    }
}
