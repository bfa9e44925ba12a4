//! Instant signal extraction
//!
//! Pure classifiers that turn page-load context (referrer, UTM parameters,
//! entry path, viewport, local hour) into categorical labels, and the one-shot
//! extractor that folds them into the session's scores.

use tracing::debug;

use crate::config::{PersonaConfig, SignalTable};
use crate::normalizer::PageUrl;
use crate::state::PersonaState;
use crate::types::{Category, DeviceType, PageCategory, PersonaSnapshot, TimeOfDay};

const MOBILE_MAX_WIDTH: u32 = 768;
const TABLET_MAX_WIDTH: u32 = 1024;
const BUSINESS_HOURS: std::ops::RangeInclusive<u32> = 9..=17;

/// Category of a page path; `General` when no pattern matches
pub fn categorize_path(path: &str, table: &SignalTable) -> PageCategory {
    table
        .classify(path)
        .map(PageCategory::from)
        .unwrap_or(PageCategory::General)
}

pub fn classify_referrer(referrer: &str, config: &PersonaConfig) -> Option<Category> {
    if referrer.is_empty() {
        return None;
    }
    config.referrer_signals.classify(referrer)
}

/// `"source medium campaign"` from the page URL, lower-cased
pub fn utm_string(url: &PageUrl) -> String {
    let source = url.query_param("utm_source").unwrap_or_default();
    let medium = url.query_param("utm_medium").unwrap_or_default();
    let campaign = url.query_param("utm_campaign").unwrap_or_default();
    format!("{source} {medium} {campaign}").to_lowercase()
}

pub fn classify_utm(utm: &str, config: &PersonaConfig) -> Option<Category> {
    if utm.trim().is_empty() {
        return None;
    }
    config.utm_signals.classify(utm)
}

pub fn classify_device(width: u32) -> DeviceType {
    if width < MOBILE_MAX_WIDTH {
        DeviceType::Mobile
    } else if width < TABLET_MAX_WIDTH {
        DeviceType::Tablet
    } else {
        DeviceType::Desktop
    }
}

pub fn classify_time_of_day(local_hour: u32) -> TimeOfDay {
    if BUSINESS_HOURS.contains(&local_hour) {
        TimeOfDay::Business
    } else {
        TimeOfDay::Personal
    }
}

/// Raw page-load inputs for instant extraction
#[derive(Debug, Clone)]
pub struct InstantInputs<'a> {
    pub url: &'a PageUrl,
    pub referrer: &'a str,
    pub viewport_width: u32,
    pub local_hour: u32,
    /// Snapshot read from local storage, if any
    pub stored: Option<PersonaSnapshot>,
}

/// Populate `state.instant_signals` and apply the instant score boosts.
///
/// Returns `true` when at least one category was boosted. Referrer, UTM and
/// entry page are classified independently of one another.
pub fn extract_instant_signals(
    state: &mut PersonaState,
    inputs: InstantInputs<'_>,
    config: &PersonaConfig,
) -> bool {
    let mut boosted = false;

    // 1. Returning visitor
    if let Some(stored) = inputs.stored {
        if stored.confidence > config.returning_threshold {
            state.instant_signals.stored_persona = Some(stored.persona);
            state.instant_signals.is_returning = true;
            state.persona = stored.persona;
            state.confidence = stored.confidence.min(config.returning_confidence_cap);
            debug!(
                persona = %stored.persona,
                confidence = state.confidence,
                "seeded returning visitor"
            );
        }
    }

    // 2. Referrer
    if let Some(category) = classify_referrer(inputs.referrer, config) {
        state.instant_signals.referrer_category = Some(category);
        state.scores.add(category, config.boosts.referrer);
        boosted = true;
    }

    // 3. Campaign parameters
    if let Some(category) = classify_utm(&utm_string(inputs.url), config) {
        state.instant_signals.utm_category = Some(category);
        state.scores.add(category, config.boosts.utm);
        boosted = true;
    }

    // 4. Entry page
    let entry = categorize_path(&inputs.url.path, &config.categories);
    state.instant_signals.entry_page_category = Some(entry);
    if let Some(category) = entry.category() {
        state.scores.add(category, config.boosts.entry_page);
        boosted = true;
    }

    // 5. Informational only
    state.instant_signals.device_type = Some(classify_device(inputs.viewport_width));
    state.instant_signals.time_of_day = Some(classify_time_of_day(inputs.local_hour));

    boosted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CategoryScores, Persona};
    use chrono::{TimeZone, Utc};

    fn state() -> PersonaState {
        PersonaState::new(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
    }

    fn inputs<'a>(url: &'a PageUrl, referrer: &'a str) -> InstantInputs<'a> {
        InstantInputs {
            url,
            referrer,
            viewport_width: 1440,
            local_hour: 11,
            stored: None,
        }
    }

    #[test]
    fn test_categorize_path() {
        let table = PersonaConfig::default().categories;
        assert_eq!(categorize_path("/pricing", &table), PageCategory::Value);
        assert_eq!(categorize_path("/Case-Studies/acme", &table), PageCategory::Trust);
        assert_eq!(categorize_path("/get-started", &table), PageCategory::Intent);
        assert_eq!(categorize_path("/blog/post", &table), PageCategory::General);
    }

    #[test]
    fn test_device_and_time_thresholds() {
        assert_eq!(classify_device(767), DeviceType::Mobile);
        assert_eq!(classify_device(768), DeviceType::Tablet);
        assert_eq!(classify_device(1023), DeviceType::Tablet);
        assert_eq!(classify_device(1024), DeviceType::Desktop);

        assert_eq!(classify_time_of_day(8), TimeOfDay::Personal);
        assert_eq!(classify_time_of_day(9), TimeOfDay::Business);
        assert_eq!(classify_time_of_day(17), TimeOfDay::Business);
        assert_eq!(classify_time_of_day(18), TimeOfDay::Personal);
    }

    #[test]
    fn test_google_search_on_pricing_scores_value() {
        let config = PersonaConfig::default();
        let url = PageUrl::parse("https://acme.io/pricing").unwrap();
        let mut state = state();

        let boosted = extract_instant_signals(
            &mut state,
            inputs(&url, "https://www.google.com/search?q=acme"),
            &config,
        );

        assert!(boosted);
        assert_eq!(state.instant_signals.referrer_category, Some(Category::Value));
        assert_eq!(state.instant_signals.entry_page_category, Some(PageCategory::Value));
        assert_eq!(state.instant_signals.utm_category, None);
        assert!(state.scores.value >= 8.0);
        assert_eq!(state.scores.solution, 0.0);
    }

    #[test]
    fn test_utm_outweighs_referrer() {
        let config = PersonaConfig::default();
        let url =
            PageUrl::parse("https://acme.io/?utm_source=linkedin&utm_campaign=free-trial").unwrap();
        let mut state = state();

        extract_instant_signals(&mut state, inputs(&url, "https://www.linkedin.com/"), &config);

        assert_eq!(state.instant_signals.referrer_category, Some(Category::Trust));
        // "free-trial" hits the intent table; "linkedin" is not a utm pattern
        assert_eq!(state.instant_signals.utm_category, Some(Category::Intent));
        assert_eq!(state.scores.trust, 5.0);
        assert_eq!(state.scores.intent, 8.0);
        assert_eq!(state.instant_signals.entry_page_category, Some(PageCategory::General));
    }

    #[test]
    fn test_returning_visitor_is_seeded_and_capped() {
        let config = PersonaConfig::default();
        let url = PageUrl::parse("https://acme.io/").unwrap();
        let mut state = state();
        let stored = PersonaSnapshot {
            persona: Persona::TrustSeeker,
            confidence: 80,
            scores: CategoryScores::default(),
            timestamp: 0,
        };

        let boosted = extract_instant_signals(
            &mut state,
            InstantInputs {
                stored: Some(stored),
                ..inputs(&url, "")
            },
            &config,
        );

        assert!(!boosted);
        assert!(state.instant_signals.is_returning);
        assert_eq!(state.instant_signals.stored_persona, Some(Persona::TrustSeeker));
        assert_eq!(state.persona, Persona::TrustSeeker);
        assert_eq!(state.confidence, 70);
    }

    #[test]
    fn test_low_confidence_snapshot_is_ignored() {
        let config = PersonaConfig::default();
        let url = PageUrl::parse("https://acme.io/").unwrap();
        let mut state = state();
        let stored = PersonaSnapshot {
            persona: Persona::ValueSeeker,
            confidence: 50,
            scores: CategoryScores::default(),
            timestamp: 0,
        };

        extract_instant_signals(
            &mut state,
            InstantInputs {
                stored: Some(stored),
                ..inputs(&url, "")
            },
            &config,
        );

        assert!(!state.instant_signals.is_returning);
        assert_eq!(state.persona, Persona::Explorer);
    }
}
