//! Consistency Auditor - read-only reconciliation of trip completions and the ledger
//!
//! Four checks, each keyed on (trip, guide):
//!
//! | Category            | Severity | Condition                                          |
//! |---------------------|----------|----------------------------------------------------|
//! | missing payment     | critical | checked out, fee > 0, no `earning` for the trip    |
//! | orphan payment      | warning  | `earning` for a trip the guide never checked out   |
//! | balance mismatch    | critical | cached wallet balance != sum of its transactions   |
//! | date inconsistency  | warning  | earning created > tolerance away from check-out    |
//!
//! The auditor never writes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::db::assignments::{self, CompletedAssignment};
use crate::db::wallets::{self, TripEarning};
use crate::db::{LedgerDb, PartitionScope};
use crate::error::DispatchError;

use super::events::{DispatchEvent, EventBus};

// ============================================================================
// Report types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Ok,
    IssuesFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingPayment {
    pub assignment_id: String,
    pub trip_id: String,
    pub guide_id: String,
    pub fee_amount: i64,
    pub checked_out_at: DateTime<Utc>,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanPayment {
    pub transaction_id: String,
    pub trip_id: String,
    pub guide_id: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceMismatch {
    pub wallet_id: String,
    pub guide_id: String,
    pub expected: i64,
    pub actual: i64,
    pub difference: i64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateInconsistency {
    pub transaction_id: String,
    pub trip_id: String,
    pub guide_id: String,
    pub checked_out_at: DateTime<Utc>,
    pub transaction_created_at: DateTime<Utc>,
    /// Absolute difference, rounded to 2 decimals
    pub diff_hours: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub total_issues: usize,
    pub critical_issues: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub status: AuditStatus,
    /// Branch id, or `None` for all branches
    pub scope: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub missing_payments: Vec<MissingPayment>,
    pub orphan_payments: Vec<OrphanPayment>,
    pub balance_mismatches: Vec<BalanceMismatch>,
    pub date_inconsistencies: Vec<DateInconsistency>,
    pub summary: AuditSummary,
}

// ============================================================================
// Auditor
// ============================================================================

pub struct ConsistencyAuditor {
    db: Arc<LedgerDb>,
    events: Arc<EventBus>,
    date_tolerance_hours: i64,
}

impl ConsistencyAuditor {
    pub fn new(db: Arc<LedgerDb>, events: Arc<EventBus>, date_tolerance_hours: i64) -> Self {
        Self {
            db,
            events,
            date_tolerance_hours,
        }
    }

    /// Audit one partition. `now` only stamps the report.
    pub fn run(&self, scope: &PartitionScope, now: DateTime<Utc>) -> Result<AuditReport, DispatchError> {
        let (completed, earnings, reconciliation) = self.db.with_conn(|conn| {
            Ok((
                assignments::list_completed(conn, scope)?,
                wallets::list_trip_earnings(conn, scope)?,
                wallets::reconcile_wallets(conn)?,
            ))
        })?;
        debug!(
            scope = %scope,
            completed = completed.len(),
            earnings = earnings.len(),
            "Auditing"
        );

        let by_completion: HashMap<(&str, &str), &CompletedAssignment> = completed
            .iter()
            .map(|c| ((c.trip_id.as_str(), c.guide_id.as_str()), c))
            .collect();
        let mut by_earning: HashMap<(&str, &str), Vec<&TripEarning>> = HashMap::new();
        for e in &earnings {
            by_earning
                .entry((e.trip_id.as_str(), e.guide_id.as_str()))
                .or_default()
                .push(e);
        }

        let missing_payments: Vec<MissingPayment> = completed
            .iter()
            .filter(|c| c.fee_amount > 0)
            .filter(|c| !by_earning.contains_key(&(c.trip_id.as_str(), c.guide_id.as_str())))
            .map(|c| MissingPayment {
                assignment_id: c.assignment_id.clone(),
                trip_id: c.trip_id.clone(),
                guide_id: c.guide_id.clone(),
                fee_amount: c.fee_amount,
                checked_out_at: c.checked_out_at,
                severity: Severity::Critical,
            })
            .collect();

        let mut orphan_payments = Vec::new();
        let mut date_inconsistencies = Vec::new();
        for e in &earnings {
            match by_completion.get(&(e.trip_id.as_str(), e.guide_id.as_str())) {
                None => orphan_payments.push(OrphanPayment {
                    transaction_id: e.transaction_id.clone(),
                    trip_id: e.trip_id.clone(),
                    guide_id: e.guide_id.clone(),
                    amount: e.amount,
                    created_at: e.created_at,
                    severity: Severity::Warning,
                }),
                Some(c) => {
                    let diff_ms = (e.created_at - c.checked_out_at).num_milliseconds().abs();
                    if diff_ms > self.date_tolerance_hours * 3_600_000 {
                        date_inconsistencies.push(DateInconsistency {
                            transaction_id: e.transaction_id.clone(),
                            trip_id: e.trip_id.clone(),
                            guide_id: e.guide_id.clone(),
                            checked_out_at: c.checked_out_at,
                            transaction_created_at: e.created_at,
                            diff_hours: hours_rounded(diff_ms),
                            severity: Severity::Warning,
                        });
                    }
                }
            }
        }

        let balance_mismatches: Vec<BalanceMismatch> = reconciliation
            .into_iter()
            .filter(|r| scope.contains(r.branch_id.as_deref()))
            .map(|r| BalanceMismatch {
                wallet_id: r.wallet_id,
                guide_id: r.guide_id,
                expected: r.expected,
                actual: r.actual,
                difference: r.difference,
                severity: Severity::Critical,
            })
            .collect();

        let critical_issues = missing_payments.len() + balance_mismatches.len();
        let total_issues = critical_issues + orphan_payments.len() + date_inconsistencies.len();
        let summary = AuditSummary {
            total_issues,
            critical_issues,
        };

        self.events.emit(DispatchEvent::AuditCompleted {
            scope: scope.to_string(),
            total_issues,
            critical_issues,
        });

        Ok(AuditReport {
            status: if total_issues == 0 {
                AuditStatus::Ok
            } else {
                AuditStatus::IssuesFound
            },
            scope: scope.branch_id.clone(),
            generated_at: now,
            missing_payments,
            orphan_payments,
            balance_mismatches,
            date_inconsistencies,
            summary,
        })
    }
}

fn hours_rounded(diff_ms: i64) -> f64 {
    let hours = diff_ms as f64 / 3_600_000.0;
    (hours * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::guides::{upsert_guide, UpsertGuideInput};
    use crate::db::models::{format_timestamp, TransactionType};
    use crate::db::trips::{upsert_trip, CreateTripInput};
    use crate::db::wallets::{append_transaction, AppendTransaction};
    use chrono::{Duration, NaiveDate, TimeZone};
    use rusqlite::params;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 10, 10, 0, 0).unwrap()
    }

    fn setup() -> Arc<LedgerDb> {
        let db = Arc::new(LedgerDb::open_in_memory().unwrap());
        db.with_conn(|conn| {
            upsert_guide(conn, &UpsertGuideInput::new("g-1", "Ayu"), t0())?;
            for id in ["t-1", "t-2"] {
                upsert_trip(
                    conn,
                    &CreateTripInput {
                        id: id.into(),
                        trip_code: id.to_uppercase(),
                        trip_date: NaiveDate::from_ymd_opt(2026, 10, 10).unwrap(),
                        destination: None,
                        branch_id: Some("jkt".into()),
                        pax_count: 2,
                    },
                )?;
            }
            Ok(())
        })
        .unwrap();
        db
    }

    /// Insert a confirmed, checked-out assignment directly
    fn complete(db: &LedgerDb, id: &str, trip: &str, fee: i64, at: DateTime<Utc>) {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO trip_assignments
                    (id, trip_id, guide_id, role, status, assignment_method, fee_amount,
                     confirmed_at, checked_in_at, checked_out_at, created_at, updated_at)
                 VALUES (?1, ?2, 'g-1', 'lead', 'confirmed', 'manual', ?3, ?4, ?4, ?4, ?4, ?4)",
                params![id, trip, fee, format_timestamp(at)],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn earn(db: &LedgerDb, trip: &str, amount: i64, at: DateTime<Utc>) -> String {
        db.with_conn_mut(|conn| {
            append_transaction(
                conn,
                &AppendTransaction {
                    guide_id: "g-1".into(),
                    transaction_type: TransactionType::Earning,
                    amount,
                    reference_type: Some("trip".into()),
                    reference_id: Some(trip.into()),
                    description: None,
                },
                at,
            )
        })
        .unwrap()
        .id
    }

    fn auditor(db: Arc<LedgerDb>) -> ConsistencyAuditor {
        ConsistencyAuditor::new(db, Arc::new(EventBus::new()), 24)
    }

    #[test]
    fn test_clean_ledger_is_ok() {
        let db = setup();
        complete(&db, "a-1", "t-1", 100, t0());
        earn(&db, "t-1", 100, t0() + Duration::minutes(5));

        let report = auditor(db).run(&PartitionScope::all(), t0()).unwrap();
        assert_eq!(report.status, AuditStatus::Ok);
        assert_eq!(report.summary, AuditSummary::default());
    }

    #[test]
    fn test_missing_and_orphan_payments() {
        let db = setup();
        complete(&db, "a-1", "t-1", 100, t0());
        complete(&db, "a-free", "t-2", 0, t0());
        let orphan_id = earn(&db, "t-ghost", 50, t0());

        let report = auditor(db).run(&PartitionScope::all(), t0()).unwrap();
        assert_eq!(report.status, AuditStatus::IssuesFound);

        assert_eq!(report.missing_payments.len(), 1);
        assert_eq!(report.missing_payments[0].trip_id, "t-1");
        assert_eq!(report.missing_payments[0].fee_amount, 100);

        assert_eq!(report.orphan_payments.len(), 1);
        assert_eq!(report.orphan_payments[0].transaction_id, orphan_id);
        assert_eq!(report.summary.critical_issues, 1);
        assert_eq!(report.summary.total_issues, 2);
    }

    #[test]
    fn test_date_tolerance_boundary() {
        let db = setup();
        complete(&db, "a-1", "t-1", 100, t0());
        complete(&db, "a-2", "t-2", 100, t0());
        let late = earn(&db, "t-1", 100, t0() + Duration::hours(25));
        earn(&db, "t-2", 100, t0() + Duration::hours(23));

        let report = auditor(db).run(&PartitionScope::all(), t0()).unwrap();
        assert_eq!(report.date_inconsistencies.len(), 1);
        assert_eq!(report.date_inconsistencies[0].transaction_id, late);
        assert!((report.date_inconsistencies[0].diff_hours - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_exactly_tolerance_is_not_flagged() {
        let db = setup();
        complete(&db, "a-1", "t-1", 100, t0());
        earn(&db, "t-1", 100, t0() - Duration::hours(24));

        let report = auditor(db).run(&PartitionScope::all(), t0()).unwrap();
        assert!(report.date_inconsistencies.is_empty());
    }

    #[test]
    fn test_balance_mismatch_is_critical_and_scoped() {
        let db = setup();
        db.with_conn(|conn| {
            conn.execute("UPDATE guides SET branch_id = 'jkt' WHERE id = 'g-1'", [])?;
            Ok(())
        })
        .unwrap();
        earn(&db, "t-ghost", 100, t0());
        db.with_conn(|conn| {
            conn.execute("UPDATE wallets SET balance = 130", [])?;
            Ok(())
        })
        .unwrap();

        let auditor = auditor(db);
        let report = auditor.run(&PartitionScope::branch("jkt"), t0()).unwrap();
        assert_eq!(report.balance_mismatches.len(), 1);
        assert_eq!(report.balance_mismatches[0].difference, 30);
        assert_eq!(report.balance_mismatches[0].severity, Severity::Critical);

        let other = auditor.run(&PartitionScope::branch("sby"), t0()).unwrap();
        assert!(other.balance_mismatches.is_empty());
        assert_eq!(other.status, AuditStatus::Ok);
    }

    #[test]
    fn test_hours_rounding() {
        assert_eq!(hours_rounded(90_061_000), 25.02);
        assert_eq!(hours_rounded(-1), 0.0);
    }
}
