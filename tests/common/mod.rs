//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use guide_dispatch::auth::AuthContext;
use guide_dispatch::db::guides::{upsert_guide, UpsertGuideInput};
use guide_dispatch::db::trips::{upsert_trip, CreateTripInput};
use guide_dispatch::db::GuideRole;
use guide_dispatch::services::{CreateAssignmentInput, NotificationOutbox, NotificationRequest};
use guide_dispatch::{CandidateScorer, Config, LedgerDb, Services, WeightedScorer};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct Fixture {
    pub db: Arc<LedgerDb>,
    pub services: Arc<Services>,
    pub notifications: UnboundedReceiver<NotificationRequest>,
    _dir: TempDir,
}

pub fn fixture() -> Fixture {
    fixture_with(|_| {})
}

pub fn fixture_with(tweak: impl FnOnce(&mut Config)) -> Fixture {
    build(tweak, |config, _| {
        Arc::new(WeightedScorer::new(config.scoring)) as Arc<dyn CandidateScorer>
    })
}

/// Fixture whose scorer is built with access to the store
pub fn fixture_with_scorer(make: impl FnOnce(Arc<LedgerDb>) -> Arc<dyn CandidateScorer>) -> Fixture {
    build(|_| {}, |_, db| make(db))
}

fn build(
    tweak: impl FnOnce(&mut Config),
    make_scorer: impl FnOnce(&Config, Arc<LedgerDb>) -> Arc<dyn CandidateScorer>,
) -> Fixture {
    let dir = TempDir::new().unwrap();
    let mut config = Config {
        storage_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    tweak(&mut config);

    let db = Arc::new(LedgerDb::open(&config.storage_dir).unwrap());
    let (outbox, notifications) = NotificationOutbox::channel();
    let scorer = make_scorer(&config, db.clone());
    let services = Arc::new(Services::with_scorer(db.clone(), &config, outbox, scorer).unwrap());
    Fixture {
        db,
        services,
        notifications,
        _dir: dir,
    }
}

pub fn admin() -> AuthContext {
    AuthContext::user("ops-1", &["admin"])
}

/// Instant from a local (+07:00) wall clock reading
pub fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap() - chrono::Duration::hours(7)
}

pub fn add_guide(db: &LedgerDb, id: &str, rating: f64) {
    let mut input = UpsertGuideInput::new(id, format!("Guide {}", id));
    input.rating = rating;
    input.phone = Some(format!("+62{}", id.len()));
    db.with_conn(|conn| upsert_guide(conn, &input, local(2026, 1, 1, 8, 0)))
        .unwrap();
}

pub fn add_trip(db: &LedgerDb, id: &str, date: NaiveDate, branch: Option<&str>) {
    db.with_conn(|conn| {
        upsert_trip(
            conn,
            &CreateTripInput {
                id: id.into(),
                trip_code: id.to_uppercase(),
                trip_date: date,
                destination: None,
                branch_id: branch.map(String::from),
                pax_count: 2,
            },
        )
    })
    .unwrap();
}

pub fn lead(trip_id: &str, guide_id: &str, fee: i64) -> CreateAssignmentInput {
    CreateAssignmentInput {
        trip_id: trip_id.into(),
        guide_id: guide_id.into(),
        role: GuideRole::Lead,
        fee_amount: fee,
        method: guide_dispatch::db::AssignmentMethod::Manual,
        reassigned_from_guide_id: None,
    }
}
