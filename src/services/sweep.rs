//! Expiry Sweep - resolves pending assignments whose deadline has passed
//!
//! Each expired assignment is handled on its own: a per-trip failure is
//! counted and the batch moves on. Only infrastructure errors (store
//! unavailable) abort the run.
//!
//! Runs are serialised through a single-flight lock, so the timer loop and a
//! manual trigger never work on the same assignment chain at once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::db::models::{AssignmentStatus, GuideRole, TripAssignment};
use crate::db::{assignments, trips, LedgerDb};
use crate::error::DispatchError;

use super::events::{DispatchEvent, EventBus};
use super::scheduler::{AssignmentScheduler, FillOutcome};

// ============================================================================
// Report
// ============================================================================

/// What happened to one expired (or requeued) assignment
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TripResult {
    /// A replacement guide was assigned
    Reassigned {
        new_assignment_id: String,
        guide_id: String,
    },
    /// Retired, but nobody eligible was left
    NoCandidates,
    /// Retry cap reached; trip needs manual assignment
    Expired,
    /// Confirmed or rejected between the scan and the update
    Superseded,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripOutcome {
    pub trip_id: String,
    pub role: GuideRole,
    pub assignment_id: String,
    pub previous_guide_id: String,
    /// True when this came from the unfilled requeue rather than an expiry
    pub requeued: bool,
    #[serde(flatten)]
    pub result: TripResult,
}

/// Batch result of one sweep run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub reassigned: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Affected trips, in processing order without duplicates
    pub trip_ids: Vec<String>,
    pub outcomes: Vec<TripOutcome>,
}

impl SweepReport {
    fn record(&mut self, outcome: TripOutcome) {
        match outcome.result {
            TripResult::Reassigned { .. } => self.reassigned += 1,
            TripResult::NoCandidates | TripResult::Error { .. } => self.failed += 1,
            TripResult::Expired => self.skipped += 1,
            TripResult::Superseded => {}
        }
        if !self.trip_ids.contains(&outcome.trip_id) {
            self.trip_ids.push(outcome.trip_id.clone());
        }
        self.outcomes.push(outcome);
    }
}

// ============================================================================
// Sweep
// ============================================================================

pub struct ExpirySweep {
    db: Arc<LedgerDb>,
    scheduler: Arc<AssignmentScheduler>,
    events: Arc<EventBus>,
    max_reassignments: u32,
    requeue_unfilled: bool,
    in_flight: Mutex<()>,
    /// Whether the periodic loop is running
    running: Arc<RwLock<bool>>,
}

impl ExpirySweep {
    pub fn new(
        db: Arc<LedgerDb>,
        scheduler: Arc<AssignmentScheduler>,
        events: Arc<EventBus>,
        max_reassignments: u32,
    ) -> Self {
        Self {
            db,
            scheduler,
            events,
            max_reassignments,
            requeue_unfilled: false,
            in_flight: Mutex::new(()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Also retry (trip, role) slots left empty by an earlier zero-candidate run
    pub fn with_requeue_unfilled(mut self, enabled: bool) -> Self {
        self.requeue_unfilled = enabled;
        self
    }

    /// Run one sweep at instant `now`.
    pub fn run(&self, now: DateTime<Utc>) -> Result<SweepReport, DispatchError> {
        let _guard = self
            .in_flight
            .lock()
            .map_err(|e| DispatchError::Internal(format!("Sweep lock poisoned: {}", e)))?;

        let expired = self
            .db
            .with_conn(|conn| assignments::list_expired_pending(conn, now))?;
        debug!(count = expired.len(), now = %now, "Expired pending assignments");

        let mut report = SweepReport::default();
        let mut attempted: HashSet<(String, GuideRole)> = HashSet::new();

        for assignment in expired {
            attempted.insert((assignment.trip_id.clone(), assignment.role));
            let result = match self.resolve_expired(&assignment, now) {
                Ok(result) => result,
                Err(e) if e.is_infrastructure() => {
                    error!(assignment_id = %assignment.id, error = %e, "Sweep aborted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(assignment_id = %assignment.id, trip_id = %assignment.trip_id, error = %e, "Reassignment failed");
                    TripResult::Error { message: e.to_string() }
                }
            };
            report.record(outcome(&assignment, false, result));
        }

        if self.requeue_unfilled {
            let today = self.scheduler.policy().local_date(now);
            let unfilled = self
                .db
                .with_conn(|conn| assignments::list_unfilled(conn, today))?;

            for last in unfilled {
                if !attempted.insert((last.trip_id.clone(), last.role)) {
                    continue;
                }
                let result = match self.refill(&last, now) {
                    Ok(result) => result,
                    Err(e) if e.is_infrastructure() => return Err(e),
                    Err(e) => {
                        warn!(trip_id = %last.trip_id, role = %last.role, error = %e, "Requeue failed");
                        TripResult::Error { message: e.to_string() }
                    }
                };
                report.record(outcome(&last, true, result));
            }
        }

        info!(
            reassigned = report.reassigned,
            failed = report.failed,
            skipped = report.skipped,
            trips = report.trip_ids.len(),
            "Sweep finished"
        );
        self.events.emit(DispatchEvent::SweepCompleted {
            reassigned: report.reassigned,
            failed: report.failed,
            skipped: report.skipped,
        });

        Ok(report)
    }

    fn resolve_expired(
        &self,
        assignment: &TripAssignment,
        now: DateTime<Utc>,
    ) -> Result<TripResult, DispatchError> {
        let (trip, prior) = self.db.with_conn(|conn| {
            Ok((
                trips::require_trip(conn, &assignment.trip_id)?,
                assignments::count_with_status(
                    conn,
                    &assignment.trip_id,
                    AssignmentStatus::AutoReassigned,
                )?,
            ))
        })?;

        if prior >= self.max_reassignments {
            return match self.scheduler.retire(assignment, AssignmentStatus::Expired, now) {
                Ok(_) => {
                    warn!(
                        trip_id = %trip.id,
                        trip_code = %trip.trip_code,
                        reassignments = prior,
                        "Retry cap reached; trip needs manual assignment"
                    );
                    Ok(TripResult::Expired)
                }
                Err(DispatchError::Conflict(_)) => Ok(TripResult::Superseded),
                Err(e) => Err(e),
            };
        }

        match self.scheduler.retire(assignment, AssignmentStatus::AutoReassigned, now) {
            Ok(_) => {}
            Err(DispatchError::Conflict(_)) => return Ok(TripResult::Superseded),
            Err(e) => return Err(e),
        }

        Ok(match self.scheduler.assign_replacement(&trip, assignment, now)? {
            FillOutcome::Assigned(new) => {
                info!(
                    trip_id = %trip.id,
                    from = %assignment.guide_id,
                    to = %new.guide_id,
                    "Assignment reassigned"
                );
                TripResult::Reassigned {
                    new_assignment_id: new.id,
                    guide_id: new.guide_id,
                }
            }
            FillOutcome::NoCandidates => {
                warn!(trip_id = %trip.id, role = %assignment.role, "No eligible guide left");
                TripResult::NoCandidates
            }
        })
    }

    fn refill(&self, last: &TripAssignment, now: DateTime<Utc>) -> Result<TripResult, DispatchError> {
        let trip = self
            .db
            .with_conn(|conn| trips::require_trip(conn, &last.trip_id))?;
        Ok(match self.scheduler.assign_replacement(&trip, last, now)? {
            FillOutcome::Assigned(new) => TripResult::Reassigned {
                new_assignment_id: new.id,
                guide_id: new.guide_id,
            },
            FillOutcome::NoCandidates => TripResult::NoCandidates,
        })
    }

    // =========================================================================
    // Periodic loop
    // =========================================================================

    /// Start the sweep loop; the first run happens immediately
    pub async fn start(self: Arc<Self>, period: Duration) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Sweep loop already running");
                return;
            }
            *running = true;
        }

        info!("Starting expiry sweep loop (interval: {:?})", period);
        let sweep = Arc::clone(&self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                if !*sweep.running.read().await {
                    info!("Expiry sweep loop stopped");
                    break;
                }

                let job = Arc::clone(&sweep);
                match tokio::task::spawn_blocking(move || job.run(Utc::now())).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Sweep run failed: {}", e),
                    Err(e) => error!("Sweep task panicked: {}", e),
                }
            }
        });
    }

    /// Stop the loop after the current tick
    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("Stopping expiry sweep loop");
    }
}

fn outcome(assignment: &TripAssignment, requeued: bool, result: TripResult) -> TripOutcome {
    TripOutcome {
        trip_id: assignment.trip_id.clone(),
        role: assignment.role,
        assignment_id: assignment.id.clone(),
        previous_guide_id: assignment.guide_id.clone(),
        requeued,
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::guides::{upsert_guide, UpsertGuideInput};
    use crate::db::trips::{upsert_trip, CreateTripInput};
    use crate::services::{CreateAssignmentInput, NotificationOutbox, Services};
    use chrono::{NaiveDate, TimeZone};

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 11, d, h, 0, 0).unwrap()
    }

    /// Services over an in-memory store with one trip, two guides and a
    /// pending lead assignment for `g-a` (deadline 2026-11-01 15:00 UTC)
    fn pending_setup() -> (Arc<LedgerDb>, Services, TripAssignment) {
        let db = Arc::new(LedgerDb::open_in_memory().unwrap());
        let created = Utc.with_ymd_and_hms(2026, 10, 19, 3, 0, 0).unwrap();
        db.with_conn(|conn| {
            for id in ["g-a", "g-b"] {
                upsert_guide(conn, &UpsertGuideInput::new(id, id), created)?;
            }
            upsert_trip(
                conn,
                &CreateTripInput {
                    id: "t-1".into(),
                    trip_code: "BRM-001".into(),
                    trip_date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
                    destination: None,
                    branch_id: None,
                    pax_count: 2,
                },
            )?;
            Ok(())
        })
        .unwrap();

        let (outbox, _rx) = NotificationOutbox::channel();
        let services = Services::new(db.clone(), &Config::default(), outbox).unwrap();
        let pending = services
            .scheduler
            .create_assignment(
                CreateAssignmentInput {
                    trip_id: "t-1".into(),
                    guide_id: "g-a".into(),
                    role: GuideRole::Lead,
                    fee_amount: 0,
                    method: crate::db::models::AssignmentMethod::Manual,
                    reassigned_from_guide_id: None,
                },
                created,
            )
            .unwrap();
        (db, services, pending)
    }

    #[test]
    fn test_confirm_before_retire_is_superseded() {
        let (_db, services, stale) = pending_setup();
        services.scheduler.confirm(&stale.id, at(1, 14)).unwrap();

        let result = services.sweep.resolve_expired(&stale, at(1, 16)).unwrap();
        assert_eq!(result, TripResult::Superseded);

        let mut report = SweepReport::default();
        report.record(outcome(&stale, false, result));
        assert_eq!((report.reassigned, report.failed, report.skipped), (0, 0, 0));

        let current = services.scheduler.get(&stale.id).unwrap().unwrap();
        assert_eq!(current.status, AssignmentStatus::Confirmed);
        assert_eq!(services.scheduler.history("t-1").unwrap().len(), 1);
    }

    #[test]
    fn test_reject_before_cap_expiry_is_superseded() {
        let (db, services, stale) = pending_setup();
        services.scheduler.reject(&stale.id, Some("sick"), at(1, 14)).unwrap();

        // Cap of zero sends every expiry down the terminal path
        let capped = ExpirySweep::new(db, services.scheduler.clone(), services.events.clone(), 0);
        let result = capped.resolve_expired(&stale, at(1, 16)).unwrap();
        assert_eq!(result, TripResult::Superseded);

        let current = services.scheduler.get(&stale.id).unwrap().unwrap();
        assert_eq!(current.status, AssignmentStatus::Rejected);
    }

    #[test]
    fn test_report_counts_and_dedups_trips() {
        let mut report = SweepReport::default();
        let base = TripOutcome {
            trip_id: "t-1".into(),
            role: GuideRole::Lead,
            assignment_id: "a-1".into(),
            previous_guide_id: "g-1".into(),
            requeued: false,
            result: TripResult::Expired,
        };

        report.record(base.clone());
        report.record(TripOutcome {
            role: GuideRole::Support,
            result: TripResult::NoCandidates,
            ..base.clone()
        });
        report.record(TripOutcome {
            trip_id: "t-2".into(),
            result: TripResult::Superseded,
            ..base
        });

        assert_eq!((report.reassigned, report.failed, report.skipped), (0, 1, 1));
        assert_eq!(report.trip_ids, vec!["t-1".to_string(), "t-2".to_string()]);
    }

    #[test]
    fn test_report_wire_shape() {
        let report = SweepReport {
            reassigned: 1,
            trip_ids: vec!["t-1".into()],
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["reassigned"], 1);
        assert_eq!(json["tripIds"][0], "t-1");
    }
}
