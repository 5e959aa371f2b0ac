//! Guide Dispatch - trip guide scheduling and ledger consistency engine
//!
//! Assigns field guides to trips, chases confirmations against an H-1
//! deadline, reassigns expired assignments, and audits trip completions
//! against the guides' wallet ledger.
//!
//! ## Components
//!
//! | Component              | Module                  | Role                                      |
//! |------------------------|-------------------------|-------------------------------------------|
//! | Candidate Scorer       | `scoring`, `services::candidates` | Ranks eligible guides for a trip |
//! | Assignment Scheduler   | `services::scheduler`   | Creates assignments, drives transitions  |
//! | Expiry Sweep           | `services::sweep`       | Retires and reassigns expired ones       |
//! | Consistency Auditor    | `services::auditor`     | Read-only ledger reconciliation          |
//! | Ledger Store           | `db`                    | SQLite records                            |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/guide-dispatch/
//! ├── dispatch.db            # SQLite ledger store (WAL)
//! └── config.toml            # Configuration
//! ```

pub mod auth;
pub mod config;
pub mod db;
pub mod deadline;
pub mod error;
pub mod http;
pub mod scoring;
pub mod services;

// Re-exports
pub use auth::{AuthContext, ContextRoleChecker, RoleChecker, TokenRegistry};
pub use config::Config;
pub use db::{LedgerDb, PartitionScope};
pub use deadline::DeadlinePolicy;
pub use error::DispatchError;
pub use http::HttpServer;
pub use scoring::{CandidateGuide, CandidateScorer, ScoringWeights, WeightedScorer};
pub use services::Services;
