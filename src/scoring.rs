//! Candidate scoring
//!
//! Scoring is a pure function of trip metadata and candidate attributes.
//! Deployments can plug in their own [`CandidateScorer`]; the shipped
//! [`WeightedScorer`] combines rating, workload and destination preference.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::db::models::{AvailabilityStatus, Trip};

/// A guide considered for one scheduling attempt. Never persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CandidateGuide {
    pub guide_id: String,
    pub availability: Option<AvailabilityStatus>,
    /// Live assignments the guide already holds
    pub workload: u32,
    pub rating: f64,
    /// Destinations the guide prefers; matched against the trip's destination
    pub preferred_destinations: Vec<String>,
    pub preference_score: f64,
    pub total_score: f64,
}

impl CandidateGuide {
    pub fn new(guide_id: impl Into<String>) -> Self {
        Self {
            guide_id: guide_id.into(),
            availability: None,
            workload: 0,
            rating: 0.0,
            preferred_destinations: Vec::new(),
            preference_score: 0.0,
            total_score: 0.0,
        }
    }
}

/// Strategy for scoring a candidate against a trip
pub trait CandidateScorer: Send + Sync {
    /// Destination preference component, 0.0 to 1.0
    fn preference_score(&self, trip: &Trip, candidate: &CandidateGuide) -> f64 {
        let Some(destination) = trip.destination.as_deref() else {
            return 0.0;
        };
        let matched = candidate
            .preferred_destinations
            .iter()
            .any(|d| d.eq_ignore_ascii_case(destination));
        if matched {
            1.0
        } else {
            0.0
        }
    }

    /// Overall score; higher is better
    fn total_score(&self, trip: &Trip, candidate: &CandidateGuide) -> f64;
}

/// Weights for [`WeightedScorer`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoringWeights {
    #[serde(default = "default_rating_weight")]
    pub rating_weight: f64,
    #[serde(default = "default_workload_weight")]
    pub workload_weight: f64,
    #[serde(default = "default_preference_weight")]
    pub preference_weight: f64,
}

fn default_rating_weight() -> f64 {
    1.0
}

fn default_workload_weight() -> f64 {
    0.5
}

fn default_preference_weight() -> f64 {
    2.0
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            rating_weight: default_rating_weight(),
            workload_weight: default_workload_weight(),
            preference_weight: default_preference_weight(),
        }
    }
}

/// Linear combination of rating, workload and preference
#[derive(Debug, Clone, Default)]
pub struct WeightedScorer {
    weights: ScoringWeights,
}

impl WeightedScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }
}

impl CandidateScorer for WeightedScorer {
    fn total_score(&self, trip: &Trip, candidate: &CandidateGuide) -> f64 {
        let w = &self.weights;
        w.rating_weight * candidate.rating - w.workload_weight * f64::from(candidate.workload)
            + w.preference_weight * self.preference_score(trip, candidate)
    }
}

/// Score every candidate and order them best first.
///
/// Ties (and NaN scores, which sort last) are broken by guide id ascending so
/// the result is reproducible.
pub fn rank_candidates(
    scorer: &dyn CandidateScorer,
    trip: &Trip,
    mut candidates: Vec<CandidateGuide>,
) -> Vec<CandidateGuide> {
    for candidate in candidates.iter_mut() {
        candidate.preference_score = scorer.preference_score(trip, candidate);
        candidate.total_score = scorer.total_score(trip, candidate);
    }

    candidates.sort_by(|a, b| {
        compare_scores(b.total_score, a.total_score).then_with(|| a.guide_id.cmp(&b.guide_id))
    });
    candidates
}

fn compare_scores(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.total_cmp(&b),
    }
}
