//! Behavior meter
//!
//! Accumulates raw interaction counters (scroll distance, clicks, mouse moves,
//! hover time) and derives the normalized behavioral features from them. The
//! derived features feed back into the category scores through a small set of
//! qualitative rules; scores never flow the other way.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use crate::context::{ClickEvent, ScrollSample};
use crate::state::PersonaState;
use crate::types::{BehaviorFeatures, Category, ConversionEvent, PageCategory, ReadingPattern};

/// Features are not derived before this much of the session has elapsed
pub const MIN_ELAPSED_SECS: f64 = 2.0;

/// Clicks on links/buttons matching this are treated as calls to action
static CTA_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)sign.?up|start|get.?started|try|demo|contact|book")
        .expect("valid CTA pattern")
});

static PRICING_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)pricing|plans|cost").expect("valid pricing pattern"));

const CTA_INTENT_BOOST: f64 = 5.0;
const PRICING_VALUE_BOOST: f64 = 3.0;

/// Stateless meter operating on a borrowed `PersonaState`
pub struct BehaviorMeter;

impl BehaviorMeter {
    /// Count scroll distance and track the current page's maximum depth
    pub fn record_scroll(state: &mut PersonaState, sample: ScrollSample, now: DateTime<Utc>) {
        let metrics = &mut state.session_metrics;
        let distance = (sample.scroll_y - metrics.last_scroll_y).abs();

        metrics.total_scroll_distance += distance;
        metrics.last_scroll_time = Some(now);
        metrics.last_scroll_y = sample.scroll_y;

        state.record_scroll_depth(sample.depth_percent());
    }

    /// Count a click and score CTA / pricing intent from the nearest link or button
    pub fn record_click(state: &mut PersonaState, event: &ClickEvent, now: DateTime<Utc>) {
        state.session_metrics.total_clicks += 1;

        let Some(target) = &event.actionable else {
            return;
        };

        let text = target.text.to_lowercase();
        let href = target.href.as_deref().unwrap_or_default().to_lowercase();
        let haystack = format!("{text}{href}");

        if CTA_PATTERN.is_match(&haystack) {
            state.scores.add(Category::Intent, CTA_INTENT_BOOST);
            state.session_metrics.conversion_events.push(ConversionEvent {
                kind: "cta_click".to_string(),
                time: now,
                text: text.clone(),
            });
            trace!(text = %text, "cta click");
        }

        if PRICING_PATTERN.is_match(&haystack) {
            state.scores.add(Category::Value, PRICING_VALUE_BOOST);
        }
    }

    /// Count a mouse move unless one was counted within `throttle_ms`.
    /// Returns whether the move was counted.
    pub fn record_mouse_move(state: &mut PersonaState, now: DateTime<Utc>, throttle_ms: i64) -> bool {
        let metrics = &mut state.session_metrics;
        let due = match metrics.last_mouse_event {
            Some(last) => (now - last).num_milliseconds() > throttle_ms,
            None => true,
        };
        if due {
            metrics.mouse_events += 1;
            metrics.last_mouse_event = Some(now);
        }
        due
    }

    /// Fold one hover interval into the running hover average
    pub fn record_hover(state: &mut PersonaState, duration_ms: f64) {
        if duration_ms.is_finite() && duration_ms > 0.0 {
            let metrics = &mut state.session_metrics;
            metrics.hover_duration_ms = (metrics.hover_duration_ms + duration_ms) / 2.0;
        }
    }

    /// Recompute `behavior_features` and apply the behavior feedback rules.
    ///
    /// No-op (returns `false`) until [`MIN_ELAPSED_SECS`] have passed.
    pub fn extract_features(state: &mut PersonaState, now: DateTime<Utc>) -> bool {
        let elapsed = state.elapsed_secs(now);
        let Some(features) = derive_features(state, elapsed) else {
            return false;
        };

        state.behavior_features = features;
        Self::apply_behavior_to_scores(state);
        true
    }

    /// Qualitative feedback from behavior into category scores
    pub fn apply_behavior_to_scores(state: &mut PersonaState) {
        let features = state.behavior_features;

        // Deep readers tend to be reading case studies
        if features.reading_pattern == ReadingPattern::Read {
            state.scores.add(Category::Trust, 2.0);
        }

        // Fast scanning with lots of clicking looks like feature exploration
        if features.reading_pattern == ReadingPattern::Scan && features.click_rate > 3.0 {
            state.scores.add(Category::Solution, 2.0);
        }

        if features.engagement_score > 60.0 && state.has_visits_in(PageCategory::Value) {
            state.scores.add(Category::Value, 3.0);
        }

        if features.bounce_risk < 0.3 && features.engagement_score > 70.0 {
            state.scores.add(Category::Intent, 2.0);
        }
    }
}

/// Pure feature derivation from the session counters
pub fn derive_features(state: &PersonaState, elapsed: f64) -> Option<BehaviorFeatures> {
    if elapsed < MIN_ELAPSED_SECS {
        return None;
    }

    let metrics = &state.session_metrics;
    let scroll_velocity = metrics.total_scroll_distance / elapsed;
    let click_rate = (metrics.total_clicks as f64 / elapsed) * 60.0;
    let avg_time_per_page = elapsed / (metrics.page_count.max(1) as f64);
    let mouse_movement_rate = metrics.mouse_events as f64 / elapsed;
    let reading_pattern = compute_reading_pattern(scroll_velocity, avg_time_per_page);
    let bounce_risk = compute_bounce_risk(scroll_velocity, elapsed);
    let engagement_score =
        compute_engagement_score(bounce_risk, avg_time_per_page, click_rate, reading_pattern);

    Some(BehaviorFeatures {
        scroll_velocity,
        avg_time_per_page,
        bounce_risk,
        click_rate,
        mouse_movement_rate,
        hover_duration: metrics.hover_duration_ms,
        reading_pattern,
        engagement_score,
    })
}

/// Slow scrolling with long dwell is reading; fast scrolling or short dwell is
/// scanning; anything else is skimming.
fn compute_reading_pattern(scroll_velocity: f64, avg_time_per_page: f64) -> ReadingPattern {
    if scroll_velocity < 50.0 && avg_time_per_page > 30.0 {
        ReadingPattern::Read
    } else if scroll_velocity > 200.0 || avg_time_per_page < 10.0 {
        ReadingPattern::Scan
    } else {
        ReadingPattern::Skim
    }
}

/// Formula: `clamp01(velocity/500 × 0.5 + (1 − clamp01(elapsed/30)) × 0.5)`
fn compute_bounce_risk(scroll_velocity: f64, elapsed: f64) -> f64 {
    let velocity_term = (scroll_velocity / 500.0) * 0.5;
    let freshness_term = (1.0 - (elapsed / 30.0).clamp(0.0, 1.0)) * 0.5;
    (velocity_term + freshness_term).clamp(0.0, 1.0)
}

/// Composite 0-100 score:
///
/// ```text
/// (1 − bounce) × 30 + min(30, avg_time) + min(20, click_rate × 5) + pattern bonus
/// ```
fn compute_engagement_score(
    bounce_risk: f64,
    avg_time_per_page: f64,
    click_rate: f64,
    reading_pattern: ReadingPattern,
) -> f64 {
    let score = (1.0 - bounce_risk) * 30.0
        + avg_time_per_page.min(30.0)
        + (click_rate * 5.0).min(20.0)
        + reading_pattern.engagement_bonus();
    score.round().clamp(0.0, 100.0)
}
