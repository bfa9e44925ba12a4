//! Core data types for the persona classifier
//!
//! Categories, personas, scores, page visits, behavioral features and the
//! persisted snapshot. Wire names follow the tracker payload format (camelCase
//! fields, kebab-case persona labels).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PersonaError;

/// One of the four intent categories a visitor accumulates score in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Value,
    Solution,
    Trust,
    Intent,
}

impl Category {
    /// Fixed iteration order. Also the tie-break order when ranking scores.
    pub const ALL: [Category; 4] = [
        Category::Value,
        Category::Solution,
        Category::Trust,
        Category::Intent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Value => "value",
            Category::Solution => "solution",
            Category::Trust => "trust",
            Category::Intent => "intent",
        }
    }

    /// Persona assigned when this category leads the ranking.
    pub fn persona(self) -> Persona {
        match self {
            Category::Value => Persona::ValueSeeker,
            Category::Solution => Persona::SolutionSeeker,
            Category::Trust => Persona::TrustSeeker,
            Category::Intent => Persona::ReadyBuyer,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a page path. `General` pages never score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageCategory {
    Value,
    Solution,
    Trust,
    Intent,
    General,
}

impl PageCategory {
    pub fn category(self) -> Option<Category> {
        match self {
            PageCategory::Value => Some(Category::Value),
            PageCategory::Solution => Some(Category::Solution),
            PageCategory::Trust => Some(Category::Trust),
            PageCategory::Intent => Some(Category::Intent),
            PageCategory::General => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PageCategory::General => "general",
            other => other.category().map(|c| c.as_str()).unwrap_or("general"),
        }
    }
}

impl From<Category> for PageCategory {
    fn from(category: Category) -> Self {
        match category {
            Category::Value => PageCategory::Value,
            Category::Solution => PageCategory::Solution,
            Category::Trust => PageCategory::Trust,
            Category::Intent => PageCategory::Intent,
        }
    }
}

/// Visitor intent persona (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Persona {
    ValueSeeker,
    SolutionSeeker,
    TrustSeeker,
    ReadyBuyer,
    #[default]
    Explorer,
}

impl Persona {
    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::ValueSeeker => "value-seeker",
            Persona::SolutionSeeker => "solution-seeker",
            Persona::TrustSeeker => "trust-seeker",
            Persona::ReadyBuyer => "ready-buyer",
            Persona::Explorer => "explorer",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Persona {
    type Err = PersonaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "value-seeker" => Ok(Persona::ValueSeeker),
            "solution-seeker" => Ok(Persona::SolutionSeeker),
            "trust-seeker" => Ok(Persona::TrustSeeker),
            "ready-buyer" => Ok(Persona::ReadyBuyer),
            "explorer" => Ok(Persona::Explorer),
            other => Err(PersonaError::ParseError(format!("unknown persona: {other}"))),
        }
    }
}

/// Per-category scores. Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CategoryScores {
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub solution: f64,
    #[serde(default)]
    pub trust: f64,
    #[serde(default)]
    pub intent: f64,
}

impl CategoryScores {
    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::Value => self.value,
            Category::Solution => self.solution,
            Category::Trust => self.trust,
            Category::Intent => self.intent,
        }
    }

    fn slot(&mut self, category: Category) -> &mut f64 {
        match category {
            Category::Value => &mut self.value,
            Category::Solution => &mut self.solution,
            Category::Trust => &mut self.trust,
            Category::Intent => &mut self.intent,
        }
    }

    /// Add `points` to a category. Negative or non-finite points are ignored.
    pub fn add(&mut self, category: Category, points: f64) {
        if points.is_finite() && points > 0.0 {
            *self.slot(category) += points;
        }
    }

    pub fn total(&self) -> f64 {
        Category::ALL.iter().map(|c| self.get(*c)).sum()
    }

    pub fn is_empty(&self) -> bool {
        Category::ALL.iter().all(|c| self.get(*c) <= 0.0)
    }

    /// Categories ordered by score, highest first. Ties keep `Category::ALL` order.
    pub fn ranked(&self) -> [(Category, f64); 4] {
        let mut ranked = Category::ALL.map(|c| (c, self.get(c)));
        // sort_by is stable, so equal scores stay in declaration order
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    pub fn combined(&self, other: &CategoryScores) -> CategoryScores {
        let mut out = *self;
        for category in Category::ALL {
            out.add(category, other.get(category));
        }
        out
    }
}

/// A recorded visit to one page path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVisit {
    pub path: String,
    /// Accumulated dwell time in seconds
    pub time_spent: f64,
    /// Maximum scroll depth seen, 0-100
    pub scroll_depth: u32,
}

/// The page currently being timed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPage {
    pub path: String,
    /// Start of the not-yet-flushed dwell interval
    pub start_time: DateTime<Utc>,
    pub max_scroll: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Business,
    Personal,
}

/// Signals available at page load, computed exactly once per session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantSignals {
    pub referrer_category: Option<Category>,
    pub utm_category: Option<Category>,
    pub entry_page_category: Option<PageCategory>,
    pub is_returning: bool,
    pub stored_persona: Option<Persona>,
    pub device_type: Option<DeviceType>,
    pub time_of_day: Option<TimeOfDay>,
}

/// How the visitor consumes content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingPattern {
    #[default]
    Scan,
    Skim,
    Read,
}

impl ReadingPattern {
    /// Engagement bonus points
    pub fn engagement_bonus(self) -> f64 {
        match self {
            ReadingPattern::Read => 20.0,
            ReadingPattern::Skim => 10.0,
            ReadingPattern::Scan => 0.0,
        }
    }

    /// Numeric code used in the feature vector
    pub fn code(self) -> f64 {
        match self {
            ReadingPattern::Read => 1.0,
            ReadingPattern::Skim => 0.5,
            ReadingPattern::Scan => 0.0,
        }
    }
}

/// Derived behavioral metrics
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorFeatures {
    /// Pixels scrolled per second
    pub scroll_velocity: f64,
    /// Seconds per page
    pub avg_time_per_page: f64,
    /// Probability-like bounce estimate (0-1)
    pub bounce_risk: f64,
    /// Clicks per minute
    pub click_rate: f64,
    /// Counted mouse moves per second
    pub mouse_movement_rate: f64,
    /// Running average hover time on interactive elements (ms)
    pub hover_duration: f64,
    pub reading_pattern: ReadingPattern,
    /// Composite 0-100
    pub engagement_score: f64,
}

/// A conversion-like interaction recorded during the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub time: DateTime<Utc>,
    pub text: String,
}

/// Monotonic counters since session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub start_time: DateTime<Utc>,
    pub page_count: u32,
    pub total_clicks: u32,
    pub total_scroll_distance: f64,
    pub last_scroll_y: f64,
    pub last_scroll_time: Option<DateTime<Utc>>,
    pub mouse_events: u32,
    /// Last counted mouse move, for throttling
    #[serde(skip)]
    pub last_mouse_event: Option<DateTime<Utc>>,
    /// Running hover average in milliseconds
    pub hover_duration_ms: f64,
    pub conversion_events: Vec<ConversionEvent>,
}

impl SessionMetrics {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            page_count: 0,
            total_clicks: 0,
            total_scroll_distance: 0.0,
            last_scroll_y: 0.0,
            last_scroll_time: None,
            mouse_events: 0,
            last_mouse_event: None,
            hover_duration_ms: 0.0,
            conversion_events: Vec::new(),
        }
    }
}

/// Compact record persisted in browser-local storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaSnapshot {
    pub persona: Persona,
    pub confidence: u8,
    pub scores: CategoryScores,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// Where a persona event originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Instant,
    Behavioral,
}

/// Payload delivered to persona-change listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaEvent {
    pub persona: Persona,
    pub confidence: u8,
    pub scores: CategoryScores,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavior_features: Option<BehaviorFeatures>,
    pub source: EventSource,
}

/// Read-only view returned by `get_persona`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaView {
    pub persona: Persona,
    pub confidence: u8,
    pub scores: CategoryScores,
    pub features: BehaviorFeatures,
}

/// How a content variant mutates its target element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
    Html,
    Class,
    Attribute,
}

/// Server-supplied replacement content for one selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentVariant {
    pub selector: String,
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_serialization() {
        let json = serde_json::to_string(&Persona::ReadyBuyer).unwrap();
        assert_eq!(json, "\"ready-buyer\"");

        let parsed: Persona = serde_json::from_str("\"trust-seeker\"").unwrap();
        assert_eq!(parsed, Persona::TrustSeeker);
        assert_eq!("value-seeker".parse::<Persona>().unwrap(), Persona::ValueSeeker);
        assert!("buyer".parse::<Persona>().is_err());
    }

    #[test]
    fn test_category_persona_mapping() {
        assert_eq!(Category::Value.persona(), Persona::ValueSeeker);
        assert_eq!(Category::Solution.persona(), Persona::SolutionSeeker);
        assert_eq!(Category::Trust.persona(), Persona::TrustSeeker);
        assert_eq!(Category::Intent.persona(), Persona::ReadyBuyer);
    }

    #[test]
    fn test_scores_ignore_negative_points() {
        let mut scores = CategoryScores::default();
        scores.add(Category::Trust, -4.0);
        scores.add(Category::Trust, f64::NAN);
        assert!(scores.is_empty());

        scores.add(Category::Trust, 2.5);
        assert_eq!(scores.trust, 2.5);
        assert_eq!(scores.total(), 2.5);
    }

    #[test]
    fn test_ranked_ties_follow_declaration_order() {
        let scores = CategoryScores {
            value: 3.0,
            solution: 5.0,
            trust: 5.0,
            intent: 3.0,
        };
        let ranked = scores.ranked();
        assert_eq!(ranked[0].0, Category::Solution);
        assert_eq!(ranked[1].0, Category::Trust);
        assert_eq!(ranked[2].0, Category::Value);
        assert_eq!(ranked[3].0, Category::Intent);
    }

    #[test]
    fn test_scores_wire_format() {
        let scores = CategoryScores {
            value: 8.0,
            ..Default::default()
        };
        let json = serde_json::to_value(scores).unwrap();
        assert_eq!(json["value"], 8.0);
        assert_eq!(json["intent"], 0.0);
    }

    #[test]
    fn test_content_variant_deserialization() {
        let json = r##"{"selector": "#hero h1", "content": "Save 20%", "contentType": "text", "pagePath": "/"}"##;
        let variant: ContentVariant = serde_json::from_str(json).unwrap();
        assert_eq!(variant.selector, "#hero h1");
        assert_eq!(variant.content_type, ContentType::Text);
        assert_eq!(variant.page_path.as_deref(), Some("/"));
    }

    #[test]
    fn test_page_category_keys() {
        assert_eq!(PageCategory::General.as_str(), "general");
        assert_eq!(PageCategory::from(Category::Intent).as_str(), "intent");
        assert_eq!(PageCategory::General.category(), None);
    }
}
