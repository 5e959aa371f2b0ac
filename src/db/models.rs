//! Row types and status vocabularies for the ledger store

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Timestamp codec
// ============================================================================

/// Encode an instant the way every timestamp column stores it.
///
/// Fixed millisecond precision with a `Z` suffix keeps the text ordering
/// identical to the chronological ordering, so SQL comparisons are valid.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|dt| dt.with_timezone(&Utc))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn conversion_error(idx: &str, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(ColumnError {
        column: idx.to_string(),
        message: e.to_string(),
    }))
}

#[derive(Debug, Error)]
#[error("column {column}: {message}")]
struct ColumnError {
    column: String,
    message: String,
}

fn timestamp_column(row: &Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(column)?;
    parse_timestamp(&text).map_err(|e| conversion_error(column, e))
}

fn optional_timestamp_column(row: &Row, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(column)?;
    text.map(|t| parse_timestamp(&t).map_err(|e| conversion_error(column, e)))
        .transpose()
}

fn date_column(row: &Row, column: &str) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(column)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| conversion_error(column, e))
}

// ============================================================================
// Vocabularies
// ============================================================================

/// Unknown value for one of the string-backed enums
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// String-backed enum stored as TEXT
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: UnknownVariant| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_enum! {
    /// Lifecycle of a trip assignment
    AssignmentStatus, "assignment status" {
        PendingConfirmation => "pending_confirmation",
        Confirmed => "confirmed",
        Rejected => "rejected",
        /// Retired by the sweep after the deadline; a successor was attempted
        AutoReassigned => "auto_reassigned",
        /// Retired by the sweep after the retry cap; needs an operator
        Expired => "expired",
    }
}

impl AssignmentStatus {
    /// Statuses that occupy the (trip, role) slot
    pub const LIVE: [AssignmentStatus; 2] =
        [AssignmentStatus::PendingConfirmation, AssignmentStatus::Confirmed];

    pub fn is_live(&self) -> bool {
        Self::LIVE.contains(self)
    }
}

text_enum! {
    GuideRole, "guide role" {
        Lead => "lead",
        Support => "support",
    }
}

text_enum! {
    AssignmentMethod, "assignment method" {
        Manual => "manual",
        Auto => "auto",
        Reassigned => "reassigned",
    }
}

text_enum! {
    AvailabilityStatus, "availability status" {
        Standby => "standby",
        OnTrip => "on_trip",
        NotAvailable => "not_available",
    }
}

text_enum! {
    TransactionType, "transaction type" {
        Earning => "earning",
        Withdrawal => "withdrawal",
        Adjustment => "adjustment",
        Bonus => "bonus",
    }
}

/// Account role carried by guide profiles
pub const GUIDE_ACCOUNT_ROLE: &str = "guide";

pub mod reference_types {
    pub const TRIP: &str = "trip";
    pub const WITHDRAWAL_REQUEST: &str = "withdrawal_request";
    pub const MANUAL: &str = "manual";
}

// ============================================================================
// Rows
// ============================================================================

/// Guide profile as the scheduler sees it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Guide {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub account_role: String,
    pub branch_id: Option<String>,
    /// `None` means no status recorded, treated as available
    pub availability: Option<AvailabilityStatus>,
    pub rating: f64,
    pub preferred_destinations: Vec<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Guide {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let preferred: Option<String> = row.get("preferred_destinations")?;
        let preferred_destinations = match preferred {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| conversion_error("preferred_destinations", e))?,
            None => Vec::new(),
        };

        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            phone: row.get("phone")?,
            account_role: row.get("account_role")?,
            branch_id: row.get("branch_id")?,
            availability: row.get("availability_status")?,
            rating: row.get("rating")?,
            preferred_destinations,
            deleted_at: optional_timestamp_column(row, "deleted_at")?,
            created_at: timestamp_column(row, "created_at")?,
        })
    }

    /// Eligible for scheduling: a live guide account that is standby or unset
    pub fn is_schedulable(&self) -> bool {
        self.deleted_at.is_none()
            && self.account_role == GUIDE_ACCOUNT_ROLE
            && matches!(self.availability, None | Some(AvailabilityStatus::Standby))
    }
}

/// Trip reference data, owned by the booking side
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trip {
    pub id: String,
    pub trip_code: String,
    pub trip_date: NaiveDate,
    pub destination: Option<String>,
    /// Partition (branch) the trip belongs to
    pub branch_id: Option<String>,
    pub pax_count: i64,
}

impl Trip {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            trip_code: row.get("trip_code")?,
            trip_date: date_column(row, "trip_date")?,
            destination: row.get("destination")?,
            branch_id: row.get("branch_id")?,
            pax_count: row.get("pax_count")?,
        })
    }
}

/// One guide bound to one trip/role, with its lifecycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TripAssignment {
    pub id: String,
    pub trip_id: String,
    pub guide_id: String,
    pub role: GuideRole,
    pub status: AssignmentStatus,
    /// Cleared once confirmed
    pub confirmation_deadline: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub assignment_method: AssignmentMethod,
    pub reassigned_from_guide_id: Option<String>,
    /// Guide fee in minor currency units
    pub fee_amount: i64,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TripAssignment {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            trip_id: row.get("trip_id")?,
            guide_id: row.get("guide_id")?,
            role: row.get("role")?,
            status: row.get("status")?,
            confirmation_deadline: optional_timestamp_column(row, "confirmation_deadline")?,
            confirmed_at: optional_timestamp_column(row, "confirmed_at")?,
            rejected_at: optional_timestamp_column(row, "rejected_at")?,
            rejection_reason: row.get("rejection_reason")?,
            assignment_method: row.get("assignment_method")?,
            reassigned_from_guide_id: row.get("reassigned_from_guide_id")?,
            fee_amount: row.get("fee_amount")?,
            checked_in_at: optional_timestamp_column(row, "checked_in_at")?,
            checked_out_at: optional_timestamp_column(row, "checked_out_at")?,
            created_at: timestamp_column(row, "created_at")?,
            updated_at: timestamp_column(row, "updated_at")?,
        })
    }
}

/// Guide wallet with its cached balance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    pub id: String,
    pub guide_id: String,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            guide_id: row.get("guide_id")?,
            balance: row.get("balance")?,
            created_at: timestamp_column(row, "created_at")?,
            updated_at: timestamp_column(row, "updated_at")?,
        })
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletTransaction {
    pub id: String,
    pub wallet_id: String,
    pub transaction_type: TransactionType,
    /// Signed amount; withdrawals are negative
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            wallet_id: row.get("wallet_id")?,
            transaction_type: row.get("transaction_type")?,
            amount: row.get("amount")?,
            balance_before: row.get("balance_before")?,
            balance_after: row.get("balance_after")?,
            reference_type: row.get("reference_type")?,
            reference_id: row.get("reference_id")?,
            description: row.get("description")?,
            created_at: timestamp_column(row, "created_at")?,
        })
    }
}
