//! Service layer for guide-dispatch
//!
//! Services hold the scheduling and audit logic between the HTTP handlers
//! and the store helpers in `db/`.
//!
//! ## Architecture
//!
//! ```text
//! HTTP handlers / timer loop / one-shot CLI
//!     ↓  (AuthContext checked here)
//! Services (scheduler, sweep, auditor, ledger)
//!     ↓
//! Store helpers (db/*.rs)
//!     ↓
//! SQLite
//! ```

pub mod response;
pub mod events;
pub mod notifications;
pub mod candidates;
pub mod ledger;
pub mod scheduler;
pub mod sweep;
pub mod auditor;

// Re-exports
pub use auditor::{AuditReport, AuditStatus, ConsistencyAuditor, Severity};
pub use candidates::CandidateSelector;
pub use events::{DispatchEvent, EventBus, EventListener};
pub use ledger::LedgerService;
pub use notifications::{LogNotifier, NotificationOutbox, NotificationRequest, Notifier};
pub use scheduler::{AssignmentScheduler, CheckoutResult, CreateAssignmentInput, FillOutcome};
pub use sweep::{ExpirySweep, SweepReport, TripOutcome, TripResult};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::auth::{AuthContext, ContextRoleChecker, RoleChecker};
use crate::config::Config;
use crate::db::models::TripAssignment;
use crate::db::{LedgerDb, PartitionScope};
use crate::error::DispatchError;
use crate::scoring::{CandidateScorer, WeightedScorer};

/// Roles allowed to run each guarded operation
#[derive(Debug, Clone)]
struct RolePolicy {
    sweep: Vec<String>,
    audit: Vec<String>,
    operator: Vec<String>,
}

/// Service container for dependency injection
///
/// Holds all services with a shared database handle. Pass this to
/// `HttpServer` and the background tasks.
pub struct Services {
    pub scheduler: Arc<AssignmentScheduler>,
    pub sweep: Arc<ExpirySweep>,
    pub auditor: Arc<ConsistencyAuditor>,
    pub ledger: Arc<LedgerService>,
    pub events: Arc<EventBus>,
    checker: Arc<dyn RoleChecker>,
    roles: RolePolicy,
}

impl Services {
    /// Create all services with the default weighted scorer
    pub fn new(
        db: Arc<LedgerDb>,
        config: &Config,
        outbox: NotificationOutbox,
    ) -> Result<Self, DispatchError> {
        let scorer = Arc::new(WeightedScorer::new(config.scoring));
        Self::with_scorer(db, config, outbox, scorer)
    }

    /// Create all services with a custom candidate scorer
    pub fn with_scorer(
        db: Arc<LedgerDb>,
        config: &Config,
        outbox: NotificationOutbox,
        scorer: Arc<dyn CandidateScorer>,
    ) -> Result<Self, DispatchError> {
        let policy = config.deadline_policy()?;
        let events = Arc::new(EventBus::new());

        let candidates = Arc::new(CandidateSelector::new(db.clone(), scorer));
        let ledger = Arc::new(LedgerService::new(db.clone()));
        let scheduler = Arc::new(AssignmentScheduler::new(
            db.clone(),
            candidates,
            ledger.clone(),
            policy,
            events.clone(),
            outbox,
        ));
        let sweep = Arc::new(
            ExpirySweep::new(db.clone(), scheduler.clone(), events.clone(), config.max_reassignments)
                .with_requeue_unfilled(config.requeue_unfilled),
        );
        let auditor = Arc::new(ConsistencyAuditor::new(
            db,
            events.clone(),
            config.date_tolerance_hours,
        ));

        Ok(Self {
            scheduler,
            sweep,
            auditor,
            ledger,
            events,
            checker: Arc::new(ContextRoleChecker),
            roles: RolePolicy {
                sweep: config.sweep_roles.clone(),
                audit: config.audit_roles.clone(),
                operator: config.operator_roles.clone(),
            },
        })
    }

    /// Replace the authorization collaborator
    pub fn with_role_checker(mut self, checker: Arc<dyn RoleChecker>) -> Self {
        self.checker = checker;
        self
    }

    // =========================================================================
    // Guarded operations
    // =========================================================================

    /// Run the expiry sweep on behalf of `ctx`
    pub fn run_sweep(&self, ctx: &AuthContext, now: DateTime<Utc>) -> Result<SweepReport, DispatchError> {
        self.authorize(ctx, &self.roles.sweep, "run sweep")?;
        self.sweep.run(now)
    }

    /// Run the consistency audit on behalf of `ctx`
    pub fn run_audit(
        &self,
        ctx: &AuthContext,
        scope: &PartitionScope,
        now: DateTime<Utc>,
    ) -> Result<AuditReport, DispatchError> {
        self.authorize(ctx, &self.roles.audit, "run audit")?;
        self.auditor.run(scope, now)
    }

    /// Manual assignment by an operator
    pub fn create_assignment(
        &self,
        ctx: &AuthContext,
        input: CreateAssignmentInput,
        now: DateTime<Utc>,
    ) -> Result<TripAssignment, DispatchError> {
        self.authorize(ctx, &self.roles.operator, "create assignment")?;
        self.scheduler.create_assignment(input, now)
    }

    pub fn confirm_assignment(
        &self,
        ctx: &AuthContext,
        assignment_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TripAssignment, DispatchError> {
        self.authorize_assignee(ctx, assignment_id, "confirm assignment")?;
        self.scheduler.confirm(assignment_id, now)
    }

    pub fn reject_assignment(
        &self,
        ctx: &AuthContext,
        assignment_id: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TripAssignment, DispatchError> {
        self.authorize_assignee(ctx, assignment_id, "reject assignment")?;
        self.scheduler.reject(assignment_id, reason, now)
    }

    pub fn check_out(
        &self,
        ctx: &AuthContext,
        assignment_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckoutResult, DispatchError> {
        self.authorize_assignee(ctx, assignment_id, "check out")?;
        self.scheduler.check_out(assignment_id, now)
    }

    fn authorize(&self, ctx: &AuthContext, allowed: &[String], operation: &str) -> Result<(), DispatchError> {
        if self.checker.has_role(ctx, allowed) {
            return Ok(());
        }
        warn!(caller = %ctx, operation, "Unauthorized request rejected");
        Err(DispatchError::Forbidden(format!("{} is not allowed to {}", ctx, operation)))
    }

    /// The assigned guide or an operator.
    ///
    /// A non-operator gets `Forbidden` for unknown ids too, so existence is
    /// only revealed to callers allowed to act.
    fn authorize_assignee(&self, ctx: &AuthContext, assignment_id: &str, operation: &str) -> Result<(), DispatchError> {
        if self.checker.has_role(ctx, &self.roles.operator) {
            return Ok(());
        }
        if let Some(user_id) = ctx.user_id.as_deref() {
            let assigned = self.scheduler.get(assignment_id)?;
            if assigned.is_some_and(|a| a.guide_id == user_id) {
                return Ok(());
            }
        }
        self.authorize(ctx, &self.roles.operator, operation)
    }
}
