//! Candidate selection for a trip
//!
//! Builds the eligible pool from the store, removes excluded guides, and
//! ranks what is left with the configured scorer.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::db::models::Trip;
use crate::db::{assignments, guides, LedgerDb};
use crate::error::DispatchError;
use crate::scoring::{rank_candidates, CandidateGuide, CandidateScorer};

/// Candidate Scorer component
pub struct CandidateSelector {
    db: Arc<LedgerDb>,
    scorer: Arc<dyn CandidateScorer>,
}

impl CandidateSelector {
    pub fn new(db: Arc<LedgerDb>, scorer: Arc<dyn CandidateScorer>) -> Self {
        Self { db, scorer }
    }

    /// Ranked candidates for `trip`, best first.
    ///
    /// Guides in `excluded` and guides already holding a live slot on the trip
    /// are left out. An empty result is the normal "no candidates" outcome.
    pub fn score(
        &self,
        trip: &Trip,
        excluded: &BTreeSet<String>,
    ) -> Result<Vec<CandidateGuide>, DispatchError> {
        let (pool, workloads, on_trip) = self.db.with_conn(|conn| {
            Ok((
                guides::list_schedulable_guides(conn)?,
                guides::live_workloads(conn)?,
                assignments::live_guides(conn, &trip.id)?,
            ))
        })?;

        let candidates: Vec<CandidateGuide> = pool
            .into_iter()
            .filter(|g| g.is_schedulable())
            .filter(|g| !excluded.contains(&g.id) && !on_trip.contains(&g.id))
            .map(|g| CandidateGuide {
                workload: workloads.get(&g.id).copied().unwrap_or(0),
                availability: g.availability,
                rating: g.rating,
                preferred_destinations: g.preferred_destinations,
                ..CandidateGuide::new(g.id)
            })
            .collect();

        debug!(
            trip_id = %trip.id,
            excluded = excluded.len(),
            eligible = candidates.len(),
            "Scoring candidates"
        );

        Ok(rank_candidates(self.scorer.as_ref(), trip, candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::guides::{upsert_guide, UpsertGuideInput};
    use crate::db::models::AvailabilityStatus;
    use crate::db::trips::{upsert_trip, CreateTripInput};
    use crate::scoring::WeightedScorer;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn setup() -> (Arc<LedgerDb>, Trip) {
        let db = Arc::new(LedgerDb::open_in_memory().unwrap());
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 3, 0, 0).unwrap();
        let trip = db
            .with_conn(|conn| {
                for (id, rating) in [("g-a", 4.0), ("g-b", 4.8), ("g-c", 3.1)] {
                    let mut input = UpsertGuideInput::new(id, id);
                    input.rating = rating;
                    upsert_guide(conn, &input, now)?;
                }
                let mut away = UpsertGuideInput::new("g-away", "away");
                away.rating = 5.0;
                away.availability = Some(AvailabilityStatus::NotAvailable);
                upsert_guide(conn, &away, now)?;

                upsert_trip(
                    conn,
                    &CreateTripInput {
                        id: "t-1".into(),
                        trip_code: "BRM-001".into(),
                        trip_date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
                        destination: Some("Bromo".into()),
                        branch_id: None,
                        pax_count: 4,
                    },
                )
            })
            .unwrap();
        (db, trip)
    }

    #[test]
    fn test_ranks_eligible_guides() {
        let (db, trip) = setup();
        let selector = CandidateSelector::new(db, Arc::new(WeightedScorer::default()));

        let ranked = selector.score(&trip, &BTreeSet::new()).unwrap();
        let ids: Vec<_> = ranked.iter().map(|c| c.guide_id.as_str()).collect();
        assert_eq!(ids, vec!["g-b", "g-a", "g-c"]);
    }

    #[test]
    fn test_excluded_guides_never_returned() {
        let (db, trip) = setup();
        let selector = CandidateSelector::new(db, Arc::new(WeightedScorer::default()));

        let excluded: BTreeSet<String> = ["g-b".to_string()].into_iter().collect();
        let ranked = selector.score(&trip, &excluded).unwrap();
        assert_eq!(ranked[0].guide_id, "g-a");
        assert!(ranked.iter().all(|c| c.guide_id != "g-b"));
    }

    #[test]
    fn test_everyone_excluded_is_empty_not_error() {
        let (db, trip) = setup();
        let selector = CandidateSelector::new(db, Arc::new(WeightedScorer::default()));

        let excluded: BTreeSet<String> =
            ["g-a", "g-b", "g-c"].into_iter().map(String::from).collect();
        assert!(selector.score(&trip, &excluded).unwrap().is_empty());
    }
}
