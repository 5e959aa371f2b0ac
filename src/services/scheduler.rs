//! Assignment Scheduler - creates assignments and drives their state machine
//!
//! ```text
//! pending_confirmation ──confirm──▶ confirmed ──check-out──▶ (completed)
//!         │
//!         ├──reject──▶ rejected
//!         ├──sweep───▶ auto_reassigned ──▶ new pending row for another guide
//!         └──sweep───▶ expired (retry cap reached)
//! ```
//!
//! Every write is a conditional update or a guarded insert, so a caller acting
//! on a stale view gets a `Conflict` instead of overwriting newer state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::assignments::{self, NewAssignment};
use crate::db::models::{
    AssignmentMethod, AssignmentStatus, Guide, GuideRole, Trip, TripAssignment, WalletTransaction,
    GUIDE_ACCOUNT_ROLE,
};
use crate::db::{guides, trips, LedgerDb};
use crate::deadline::DeadlinePolicy;
use crate::error::DispatchError;

use super::candidates::CandidateSelector;
use super::events::{DispatchEvent, EventBus};
use super::ledger::LedgerService;
use super::notifications::{NotificationOutbox, NotificationRequest};

// ============================================================================
// Types
// ============================================================================

/// Input for creating an assignment
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAssignmentInput {
    pub trip_id: String,
    pub guide_id: String,
    pub role: GuideRole,
    #[serde(default)]
    pub fee_amount: i64,
    #[serde(default = "default_method")]
    pub method: AssignmentMethod,
    #[serde(default)]
    pub reassigned_from_guide_id: Option<String>,
}

fn default_method() -> AssignmentMethod {
    AssignmentMethod::Manual
}

/// Result of asking the scorer for someone to fill a slot
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    Assigned(TripAssignment),
    /// Nobody eligible; not an error
    NoCandidates,
}

/// Result of checking a guide out of a trip
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResult {
    pub assignment: TripAssignment,
    /// `None` when the fee is zero or the trip was already paid
    pub earning: Option<WalletTransaction>,
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct AssignmentScheduler {
    db: Arc<LedgerDb>,
    candidates: Arc<CandidateSelector>,
    ledger: Arc<LedgerService>,
    policy: DeadlinePolicy,
    events: Arc<EventBus>,
    outbox: NotificationOutbox,
}

impl AssignmentScheduler {
    pub fn new(
        db: Arc<LedgerDb>,
        candidates: Arc<CandidateSelector>,
        ledger: Arc<LedgerService>,
        policy: DeadlinePolicy,
        events: Arc<EventBus>,
        outbox: NotificationOutbox,
    ) -> Self {
        Self {
            db,
            candidates,
            ledger,
            policy,
            events,
            outbox,
        }
    }

    pub fn policy(&self) -> &DeadlinePolicy {
        &self.policy
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Create a `pending_confirmation` assignment and queue the guide's notification.
    ///
    /// Fails with `Conflict` if the (trip, role) slot already has a live assignment.
    pub fn create_assignment(
        &self,
        input: CreateAssignmentInput,
        now: DateTime<Utc>,
    ) -> Result<TripAssignment, DispatchError> {
        if input.fee_amount < 0 {
            return Err(DispatchError::InvalidInput(format!(
                "fee_amount must not be negative, got {}",
                input.fee_amount
            )));
        }

        let (trip, guide) = self.db.with_conn(|conn| {
            let trip = trips::require_trip(conn, &input.trip_id)?;
            let guide = guides::get_guide(conn, &input.guide_id)?
                .ok_or_else(|| DispatchError::NotFound(format!("guide {}", input.guide_id)))?;
            Ok((trip, guide))
        })?;

        if guide.deleted_at.is_some() || guide.account_role != GUIDE_ACCOUNT_ROLE {
            return Err(DispatchError::InvalidInput(format!(
                "{} is not an active guide account",
                guide.id
            )));
        }

        let deadline = self.policy.confirmation_deadline(trip.trip_date, now);
        let new = NewAssignment {
            trip_id: trip.id.clone(),
            guide_id: guide.id.clone(),
            role: input.role,
            fee_amount: input.fee_amount,
            method: input.method,
            reassigned_from_guide_id: input.reassigned_from_guide_id,
            confirmation_deadline: deadline,
        };

        let assignment = self
            .db
            .with_conn_mut(|conn| assignments::insert_assignment(conn, &new, now))?;

        info!(
            assignment_id = %assignment.id,
            trip_id = %trip.id,
            guide_id = %guide.id,
            role = %assignment.role,
            method = %assignment.assignment_method,
            deadline = %deadline,
            "Assignment created"
        );

        self.events.emit(DispatchEvent::AssignmentCreated {
            assignment_id: assignment.id.clone(),
            trip_id: trip.id.clone(),
            guide_id: guide.id.clone(),
            role: assignment.role,
            method: assignment.assignment_method,
        });
        self.queue_notification(&guide, &trip, &assignment);

        Ok(assignment)
    }

    /// Score candidates and assign the best one to an empty slot
    pub fn auto_assign(
        &self,
        trip_id: &str,
        role: GuideRole,
        fee_amount: i64,
        now: DateTime<Utc>,
    ) -> Result<FillOutcome, DispatchError> {
        let trip = self.db.with_conn(|conn| trips::require_trip(conn, trip_id))?;
        self.fill_slot(&trip, role, fee_amount, AssignmentMethod::Auto, None, now)
    }

    /// Assign the best remaining candidate in place of a retired assignment
    pub fn assign_replacement(
        &self,
        trip: &Trip,
        retired: &TripAssignment,
        now: DateTime<Utc>,
    ) -> Result<FillOutcome, DispatchError> {
        self.fill_slot(
            trip,
            retired.role,
            retired.fee_amount,
            AssignmentMethod::Reassigned,
            Some(retired.guide_id.clone()),
            now,
        )
    }

    fn fill_slot(
        &self,
        trip: &Trip,
        role: GuideRole,
        fee_amount: i64,
        method: AssignmentMethod,
        replaced_guide_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<FillOutcome, DispatchError> {
        let excluded = self
            .db
            .with_conn(|conn| assignments::exclusion_set(conn, &trip.id))?;
        let ranked = self.candidates.score(trip, &excluded)?;

        let Some(best) = ranked.into_iter().next() else {
            debug!(trip_id = %trip.id, role = %role, excluded = excluded.len(), "No candidates");
            return Ok(FillOutcome::NoCandidates);
        };

        let assignment = self.create_assignment(
            CreateAssignmentInput {
                trip_id: trip.id.clone(),
                guide_id: best.guide_id,
                role,
                fee_amount,
                method,
                reassigned_from_guide_id: replaced_guide_id,
            },
            now,
        )?;
        Ok(FillOutcome::Assigned(assignment))
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Guide accepts. Allowed only while pending and before the deadline.
    pub fn confirm(&self, assignment_id: &str, now: DateTime<Utc>) -> Result<TripAssignment, DispatchError> {
        let assignment = self.db.with_conn(|conn| {
            let current = assignments::require_assignment(conn, assignment_id)?;
            ensure_pending(&current)?;
            if let Some(deadline) = current.confirmation_deadline {
                if now > deadline {
                    return Err(DispatchError::Conflict(format!(
                        "assignment {} passed its confirmation deadline {}",
                        assignment_id, deadline
                    )));
                }
            }
            apply_transition(conn, &current, AssignmentStatus::Confirmed, now, None)
        })?;

        info!(assignment_id = %assignment.id, trip_id = %assignment.trip_id, "Assignment confirmed");
        self.events.emit(DispatchEvent::AssignmentConfirmed {
            assignment_id: assignment.id.clone(),
            trip_id: assignment.trip_id.clone(),
            guide_id: assignment.guide_id.clone(),
        });
        Ok(assignment)
    }

    /// Guide declines. The guide joins the trip's exclusion set.
    pub fn reject(
        &self,
        assignment_id: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TripAssignment, DispatchError> {
        let assignment = self.db.with_conn(|conn| {
            let current = assignments::require_assignment(conn, assignment_id)?;
            ensure_pending(&current)?;
            apply_transition(conn, &current, AssignmentStatus::Rejected, now, reason)
        })?;

        info!(assignment_id = %assignment.id, trip_id = %assignment.trip_id, "Assignment rejected");
        self.events.emit(DispatchEvent::AssignmentRejected {
            assignment_id: assignment.id.clone(),
            trip_id: assignment.trip_id.clone(),
            guide_id: assignment.guide_id.clone(),
        });
        Ok(assignment)
    }

    /// Retire a pending assignment as `auto_reassigned` or `expired`.
    pub fn retire(
        &self,
        assignment: &TripAssignment,
        status: AssignmentStatus,
        now: DateTime<Utc>,
    ) -> Result<TripAssignment, DispatchError> {
        if !matches!(status, AssignmentStatus::AutoReassigned | AssignmentStatus::Expired) {
            return Err(DispatchError::InvalidInput(format!("{} is not a retirement status", status)));
        }

        let retired = self
            .db
            .with_conn(|conn| apply_transition(conn, assignment, status, now, None))?;

        self.events.emit(DispatchEvent::AssignmentRetired {
            assignment_id: retired.id.clone(),
            trip_id: retired.trip_id.clone(),
            guide_id: retired.guide_id.clone(),
            status,
        });
        Ok(retired)
    }

    /// Guide starts the trip
    pub fn check_in(&self, assignment_id: &str, now: DateTime<Utc>) -> Result<TripAssignment, DispatchError> {
        self.db.with_conn(|conn| {
            let current = assignments::require_assignment(conn, assignment_id)?;
            if !assignments::record_check_in(conn, assignment_id, now)? {
                return Err(DispatchError::Conflict(format!(
                    "assignment {} cannot be checked in while {}{}",
                    assignment_id,
                    current.status,
                    if current.checked_in_at.is_some() { " (already checked in)" } else { "" }
                )));
            }
            assignments::require_assignment(conn, assignment_id)
        })
    }

    /// Guide finishes the trip; the fee is credited to their wallet.
    ///
    /// The check-out and the credit are separate writes. If the credit fails
    /// the check-out stands and the auditor reports the missing payment.
    pub fn check_out(&self, assignment_id: &str, now: DateTime<Utc>) -> Result<CheckoutResult, DispatchError> {
        let assignment = self.db.with_conn(|conn| {
            let current = assignments::require_assignment(conn, assignment_id)?;
            if !assignments::record_check_out(conn, assignment_id, now)? {
                return Err(DispatchError::Conflict(format!(
                    "assignment {} cannot be checked out while {}{}",
                    assignment_id,
                    current.status,
                    if current.checked_out_at.is_some() { " (already checked out)" } else { "" }
                )));
            }
            assignments::require_assignment(conn, assignment_id)
        })?;

        self.events.emit(DispatchEvent::TripCheckedOut {
            assignment_id: assignment.id.clone(),
            trip_id: assignment.trip_id.clone(),
            guide_id: assignment.guide_id.clone(),
            fee_amount: assignment.fee_amount,
        });

        if assignment.fee_amount <= 0 {
            return Ok(CheckoutResult { assignment, earning: None });
        }

        let earning = match self.ledger.credit_trip_earning(
            &assignment.guide_id,
            &assignment.trip_id,
            assignment.fee_amount,
            now,
        ) {
            Ok(entry) => Some(entry),
            Err(DispatchError::Conflict(msg)) => {
                warn!(assignment_id = %assignment.id, "Earning already recorded: {}", msg);
                None
            }
            Err(e) => return Err(e),
        };

        Ok(CheckoutResult { assignment, earning })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, assignment_id: &str) -> Result<Option<TripAssignment>, DispatchError> {
        self.db.with_conn(|conn| assignments::get_assignment(conn, assignment_id))
    }

    /// Assignment history of a trip, oldest first
    pub fn history(&self, trip_id: &str) -> Result<Vec<TripAssignment>, DispatchError> {
        self.db.with_conn(|conn| assignments::list_for_trip(conn, trip_id))
    }

    fn queue_notification(&self, guide: &Guide, trip: &Trip, assignment: &TripAssignment) {
        let Some(phone) = guide.phone.clone().filter(|p| !p.trim().is_empty()) else {
            warn!(guide_id = %guide.id, assignment_id = %assignment.id, "Guide has no phone; not notified");
            return;
        };

        self.outbox.enqueue(NotificationRequest {
            phone,
            trip_code: trip.trip_code.clone(),
            trip_date: trip.trip_date,
            guide_id: guide.id.clone(),
            assignment_id: assignment.id.clone(),
        });
    }
}

fn ensure_pending(assignment: &TripAssignment) -> Result<(), DispatchError> {
    if assignment.status != AssignmentStatus::PendingConfirmation {
        return Err(DispatchError::Conflict(format!(
            "assignment {} is {}, not pending_confirmation",
            assignment.id, assignment.status
        )));
    }
    Ok(())
}

/// Conditional update; a lost race surfaces as `Conflict`
fn apply_transition(
    conn: &rusqlite::Connection,
    current: &TripAssignment,
    to: AssignmentStatus,
    now: DateTime<Utc>,
    reason: Option<&str>,
) -> Result<TripAssignment, DispatchError> {
    if !assignments::transition_pending(conn, &current.id, to, now, reason)? {
        let latest = assignments::require_assignment(conn, &current.id)?;
        return Err(DispatchError::Conflict(format!(
            "assignment {} moved to {} before it could become {}",
            current.id, latest.status, to
        )));
    }
    assignments::require_assignment(conn, &current.id)
}
