//! Session-scoped persona state
//!
//! One `PersonaState` exists per page session. It is owned by the tracker and
//! lent to the extractors, meter and engine; nothing here is global.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::PersonaConfig;
use crate::signals::categorize_path;
use crate::types::{
    BehaviorFeatures, CategoryScores, CurrentPage, InstantSignals, PageCategory, PageVisit,
    Persona, SessionMetrics,
};

/// Page visits grouped by page category
pub type PageVisits = BTreeMap<PageCategory, Vec<PageVisit>>;

/// Mutable classifier state for a single page session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaState {
    /// Accumulated signal scores (instant signals, clicks, behavior feedback)
    pub scores: CategoryScores,
    /// Derived; only the engine writes it
    pub persona: Persona,
    /// Derived; only the engine writes it
    pub confidence: u8,
    pub page_visits: PageVisits,
    pub current_page: CurrentPage,
    pub instant_signals: InstantSignals,
    pub behavior_features: BehaviorFeatures,
    pub session_metrics: SessionMetrics,
}

impl PersonaState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            scores: CategoryScores::default(),
            persona: Persona::Explorer,
            confidence: 0,
            page_visits: PageVisits::new(),
            current_page: CurrentPage {
                path: String::new(),
                start_time: now,
                max_scroll: 0,
            },
            instant_signals: InstantSignals::default(),
            behavior_features: BehaviorFeatures::default(),
            session_metrics: SessionMetrics::new(now),
        }
    }

    /// Seconds since session start (never negative)
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        seconds_between(self.session_metrics.start_time, now)
    }

    /// Begin timing `path` as the current page
    pub fn start_page(&mut self, path: &str, now: DateTime<Utc>) {
        self.current_page = CurrentPage {
            path: path.to_string(),
            start_time: now,
            max_scroll: 0,
        };
        self.session_metrics.page_count += 1;
    }

    /// Flush the current page's dwell time since its last checkpoint into
    /// `page_visits` and restart its interval at `now`.
    ///
    /// Repeated checkpoints only ever add the time between them, so a page is
    /// never counted twice and the interval preceding a navigation is never
    /// lost.
    pub fn checkpoint_page(&mut self, now: DateTime<Utc>, config: &PersonaConfig) {
        if self.current_page.path.is_empty() {
            return;
        }

        let time_spent = seconds_between(self.current_page.start_time, now);
        let max_scroll = self.current_page.max_scroll;
        let category = categorize_path(&self.current_page.path, &config.categories);
        let visits = self.page_visits.entry(category).or_default();

        match visits.iter_mut().find(|v| v.path == self.current_page.path) {
            Some(existing) => {
                existing.time_spent += time_spent;
                existing.scroll_depth = existing.scroll_depth.max(max_scroll);
            }
            None => visits.push(PageVisit {
                path: self.current_page.path.clone(),
                time_spent,
                scroll_depth: max_scroll,
            }),
        }

        self.current_page.start_time = now;
    }

    /// Record a scroll depth (0-100) seen on the current page
    pub fn record_scroll_depth(&mut self, depth: u32) {
        if depth > self.current_page.max_scroll {
            self.current_page.max_scroll = depth.min(100);
        }
    }

    /// Paths visited so far, in category then visit order
    pub fn visited_paths(&self) -> Vec<String> {
        self.page_visits
            .values()
            .flatten()
            .map(|v| v.path.clone())
            .collect()
    }

    pub fn has_visits_in(&self, category: PageCategory) -> bool {
        self.page_visits
            .get(&category)
            .map(|visits| !visits.is_empty())
            .unwrap_or(false)
    }
}

pub(crate) fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let millis = (end - start).num_milliseconds();
    (millis.max(0) as f64) / 1000.0
}
