//! Feature vector
//!
//! Projects the session state onto a flat, normalized record for server-side
//! model training:
//! - Instant signals as categorical labels
//! - Behavioral features scaled into 0-1
//! - Session counters scaled into 0-1
//! - Raw category scores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PersonaConfig;
use crate::engine::effective_scores;
use crate::state::PersonaState;
use crate::types::{DeviceType, TimeOfDay};

const SCROLL_VELOCITY_SCALE: f64 = 500.0;
const CLICK_RATE_SCALE: f64 = 10.0;
const AVG_TIME_PER_PAGE_SCALE: f64 = 120.0;
const MOUSE_MOVEMENT_SCALE: f64 = 5.0;
const ENGAGEMENT_SCALE: f64 = 100.0;
/// Five minutes
const SESSION_DURATION_SCALE: f64 = 300.0;
const PAGE_COUNT_SCALE: f64 = 10.0;
const TOTAL_CLICKS_SCALE: f64 = 20.0;

/// Normalized training record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    /// Category label or `none`
    pub referrer_category: String,
    /// Category label or `none`
    pub utm_category: String,
    /// Page category label, `general` when unknown
    pub entry_page_category: String,
    pub device_type: Option<DeviceType>,
    pub time_of_day: Option<TimeOfDay>,
    /// 1 for returning visitors, else 0
    pub is_returning: u8,

    pub scroll_velocity: f64,
    pub click_rate: f64,
    pub avg_time_per_page: f64,
    pub mouse_movement_rate: f64,
    pub bounce_risk: f64,
    pub engagement_score: f64,
    pub reading_pattern_code: f64,

    pub session_duration: f64,
    pub page_count: f64,
    pub total_clicks: f64,

    pub value_score: f64,
    pub solution_score: f64,
    pub trust_score: f64,
    pub intent_score: f64,
}

impl FeatureVector {
    /// The normalized numeric fields, by wire name
    pub fn normalized_fields(&self) -> [(&'static str, f64); 10] {
        [
            ("scrollVelocity", self.scroll_velocity),
            ("clickRate", self.click_rate),
            ("avgTimePerPage", self.avg_time_per_page),
            ("mouseMovementRate", self.mouse_movement_rate),
            ("bounceRisk", self.bounce_risk),
            ("engagementScore", self.engagement_score),
            ("readingPatternCode", self.reading_pattern_code),
            ("sessionDuration", self.session_duration),
            ("pageCount", self.page_count),
            ("totalClicks", self.total_clicks),
        ]
    }
}

/// Builds feature vectors from a borrowed session state
pub struct FeatureVectorBuilder;

impl FeatureVectorBuilder {
    pub fn build(state: &PersonaState, config: &PersonaConfig, now: DateTime<Utc>) -> FeatureVector {
        let signals = &state.instant_signals;
        let features = &state.behavior_features;
        let metrics = &state.session_metrics;
        let scores = effective_scores(state, config);

        FeatureVector {
            referrer_category: signals
                .referrer_category
                .map(|c| c.as_str())
                .unwrap_or("none")
                .to_string(),
            utm_category: signals
                .utm_category
                .map(|c| c.as_str())
                .unwrap_or("none")
                .to_string(),
            entry_page_category: signals
                .entry_page_category
                .map(|c| c.as_str())
                .unwrap_or("general")
                .to_string(),
            device_type: signals.device_type,
            time_of_day: signals.time_of_day,
            is_returning: u8::from(signals.is_returning),

            scroll_velocity: saturate(features.scroll_velocity, SCROLL_VELOCITY_SCALE),
            click_rate: saturate(features.click_rate, CLICK_RATE_SCALE),
            avg_time_per_page: saturate(features.avg_time_per_page, AVG_TIME_PER_PAGE_SCALE),
            mouse_movement_rate: saturate(features.mouse_movement_rate, MOUSE_MOVEMENT_SCALE),
            bounce_risk: saturate(features.bounce_risk, 1.0),
            engagement_score: saturate(features.engagement_score, ENGAGEMENT_SCALE),
            reading_pattern_code: features.reading_pattern.code(),

            session_duration: saturate(state.elapsed_secs(now), SESSION_DURATION_SCALE),
            page_count: saturate(f64::from(metrics.page_count), PAGE_COUNT_SCALE),
            total_clicks: saturate(f64::from(metrics.total_clicks), TOTAL_CLICKS_SCALE),

            value_score: scores.value,
            solution_score: scores.solution,
            trust_score: scores.trust,
            intent_score: scores.intent,
        }
    }
}

/// `min(1, value / scale)`, never negative
fn saturate(value: f64, scale: f64) -> f64 {
    if !value.is_finite() {
        return if value > 0.0 { 1.0 } else { 0.0 };
    }
    (value / scale).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BehaviorFeatures, Category, PageCategory, ReadingPattern};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_state_defaults() {
        let config = PersonaConfig::default();
        let state = PersonaState::new(t0());

        let vector = FeatureVectorBuilder::build(&state, &config, t0());

        assert_eq!(vector.referrer_category, "none");
        assert_eq!(vector.utm_category, "none");
        assert_eq!(vector.entry_page_category, "general");
        assert_eq!(vector.device_type, None);
        assert_eq!(vector.is_returning, 0);
        assert_eq!(vector.session_duration, 0.0);
        assert_eq!(vector.value_score, 0.0);
    }

    #[test]
    fn test_numeric_fields_saturate() {
        let config = PersonaConfig::default();
        let mut state = PersonaState::new(t0());
        state.session_metrics.page_count = 40;
        state.session_metrics.total_clicks = 500;
        state.behavior_features = BehaviorFeatures {
            scroll_velocity: 12_000.0,
            avg_time_per_page: 900.0,
            bounce_risk: 0.2,
            click_rate: 75.0,
            mouse_movement_rate: 40.0,
            hover_duration: 300.0,
            reading_pattern: ReadingPattern::Skim,
            engagement_score: 88.0,
        };

        let vector = FeatureVectorBuilder::build(&state, &config, t0() + Duration::hours(2));

        for (name, value) in vector.normalized_fields() {
            assert!((0.0..=1.0).contains(&value), "{name} out of range: {value}");
        }
        assert_eq!(vector.scroll_velocity, 1.0);
        assert_eq!(vector.session_duration, 1.0);
        assert_eq!(vector.page_count, 1.0);
        assert_eq!(vector.reading_pattern_code, 0.5);
        assert!((vector.engagement_score - 0.88).abs() < 1e-9);
    }

    #[test]
    fn test_scores_include_page_visit_points() {
        let config = PersonaConfig::default();
        let mut state = PersonaState::new(t0());
        state.scores.add(Category::Value, 5.0);
        state.instant_signals.entry_page_category = Some(PageCategory::Value);
        state.instant_signals.referrer_category = Some(Category::Value);
        state.start_page("/pricing", t0());
        state.checkpoint_page(t0() + Duration::seconds(20), &config);

        let vector = FeatureVectorBuilder::build(&state, &config, t0() + Duration::seconds(20));

        // 5 accumulated + 2 base + 20/10 dwell
        assert!((vector.value_score - 9.0).abs() < 1e-9);
        assert_eq!(vector.referrer_category, "value");
        assert_eq!(vector.entry_page_category, "value");
    }

    #[test]
    fn test_saturate_handles_non_finite() {
        assert_eq!(saturate(f64::INFINITY, 10.0), 1.0);
        assert_eq!(saturate(f64::NAN, 10.0), 0.0);
        assert_eq!(saturate(-3.0, 10.0), 0.0);
    }
}
