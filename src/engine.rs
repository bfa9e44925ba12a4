//! Scoring and classification
//!
//! Turns the accumulated scores and page visits into a persona and an integer
//! confidence. Page-visit points are recomputed from `page_visits` on every
//! pass instead of being folded into `scores`, so classifying the same state
//! twice yields the same result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::PersonaConfig;
use crate::host::KeyValueStore;
use crate::snapshot::SnapshotStore;
use crate::state::PersonaState;
use crate::types::{Category, CategoryScores, PageVisit, Persona, PersonaSnapshot};

const BASE_VISIT_POINTS: f64 = 2.0;
const MAX_DWELL_POINTS: f64 = 8.0;
const MAX_SCROLL_POINTS: f64 = 5.0;
/// Intent at or above this makes a ready buyer regardless of the ranking
const READY_BUYER_INTENT: f64 = 8.0;
/// Leading score below this stays an explorer
const ACTIVATION_FLOOR: f64 = 5.0;
const RETURNING_BONUS: f64 = 10.0;

/// Result of one classification pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub persona: Persona,
    pub confidence: u8,
    /// Effective scores the decision was made on
    pub scores: CategoryScores,
}

/// Points a single non-general page visit contributes
///
/// `2 + min(8, t/10)` when dwell `t` exceeds the engagement threshold, plus
/// `depth/100 * 5` when scroll depth exceeds the scroll threshold.
pub fn page_visit_points(visit: &PageVisit, config: &PersonaConfig) -> f64 {
    let mut points = BASE_VISIT_POINTS;

    if visit.time_spent > config.engagement_threshold {
        points += (visit.time_spent / 10.0).min(MAX_DWELL_POINTS);
    }

    let depth = f64::from(visit.scroll_depth);
    if depth > config.scroll_threshold {
        points += depth / 100.0 * MAX_SCROLL_POINTS;
    }

    points
}

/// Accumulated scores plus the points earned by every categorized page visit
pub fn effective_scores(state: &PersonaState, config: &PersonaConfig) -> CategoryScores {
    let mut scores = state.scores;

    for (page_category, visits) in &state.page_visits {
        let Some(category) = page_category.category() else {
            continue;
        };
        for visit in visits {
            scores.add(category, page_visit_points(visit, config));
        }
    }

    scores
}

/// Stateless classification engine
pub struct PersonaEngine;

impl PersonaEngine {
    /// Classify without touching the state
    pub fn classify(state: &PersonaState, config: &PersonaConfig, now: DateTime<Utc>) -> Classification {
        let scores = effective_scores(state, config);

        if scores.is_empty() {
            return Classification {
                persona: Persona::Explorer,
                confidence: 0,
                scores,
            };
        }

        let ranked = scores.ranked();
        let (top_category, top_score) = ranked[0];
        let second_score = ranked[1].1;

        let confidence = compute_confidence(
            top_score,
            second_score,
            scores.total(),
            state.behavior_features.engagement_score,
            state.elapsed_secs(now),
            state.instant_signals.is_returning,
        );
        let persona = select_persona(&scores, top_category, top_score);

        Classification {
            persona,
            confidence,
            scores,
        }
    }

    /// Classify, write persona and confidence back to the state, and persist a
    /// snapshot when the confidence clears the persistence threshold.
    pub fn calculate_persona(
        state: &mut PersonaState,
        config: &PersonaConfig,
        now: DateTime<Utc>,
        storage: Option<&mut dyn KeyValueStore>,
    ) -> Classification {
        let result = Self::classify(state, config, now);
        state.persona = result.persona;
        state.confidence = result.confidence;

        trace!(
            persona = %result.persona,
            confidence = result.confidence,
            "classified"
        );

        if result.confidence > config.persist_threshold {
            if let Some(storage) = storage {
                let snapshot = PersonaSnapshot {
                    persona: result.persona,
                    confidence: result.confidence,
                    scores: result.scores,
                    timestamp: now.timestamp_millis(),
                };
                SnapshotStore::new(config.storage_key.as_str()).save(storage, &snapshot);
            }
        }

        result
    }
}

/// `round(lead*50 + engagement/100*20 + min(20, elapsed/3) + returning*10)`,
/// clamped to 0-100
fn compute_confidence(
    top: f64,
    second: f64,
    total: f64,
    engagement: f64,
    elapsed_secs: f64,
    returning: bool,
) -> u8 {
    let score_lead = (top - second) / (total + 1.0);
    let engagement_bonus = engagement / 100.0 * 20.0;
    let time_bonus = (elapsed_secs / 3.0).min(20.0);
    let returning_bonus = if returning { RETURNING_BONUS } else { 0.0 };

    let raw = (score_lead * 50.0 + engagement_bonus + time_bonus + returning_bonus).round();
    if raw.is_finite() {
        raw.clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

fn select_persona(scores: &CategoryScores, top_category: Category, top_score: f64) -> Persona {
    if scores.intent >= READY_BUYER_INTENT {
        Persona::ReadyBuyer
    } else if top_score >= ACTIVATION_FLOOR {
        top_category.persona()
    } else {
        Persona::Explorer
    }
}
