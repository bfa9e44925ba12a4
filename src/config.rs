//! Configuration types
//!
//! `TrackerConfig` mirrors the attributes declared on the embedding script tag.
//! `PersonaConfig` holds the classifier's pattern tables and thresholds; it has
//! sensible defaults and can be loaded from JSON with any subset of fields.

use serde::{Deserialize, Serialize};

use crate::error::PersonaError;
use crate::types::Category;

/// Script-tag attribute prefix
pub const ATTRIBUTE_PREFIX: &str = "data-";

/// Tracker options declared on the script tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerConfig {
    /// Website identifier (required for anything to be sent)
    pub website_id: Option<String>,
    /// Collector base URL
    pub host_url: Option<String>,
    /// Name of a registered hook that may transform or veto payloads
    pub before_send: Option<String>,
    pub tag: Option<String>,
    /// Track the initial page view and start the persona pipeline on load
    pub auto_track: bool,
    /// Honor the browser's Do-Not-Track setting
    pub do_not_track: bool,
    pub exclude_search: bool,
    pub exclude_hash: bool,
    /// Hostname allow-list; empty means any host
    pub domains: Vec<String>,
    pub fetch_credentials: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            website_id: None,
            host_url: None,
            before_send: None,
            tag: None,
            auto_track: true,
            do_not_track: false,
            exclude_search: false,
            exclude_hash: false,
            domains: Vec::new(),
            fetch_credentials: "omit".to_string(),
        }
    }
}

impl TrackerConfig {
    /// Build the config from script-tag attributes.
    ///
    /// Names may carry the `data-` prefix or not. Unknown attributes are ignored.
    /// Boolean flags follow the tag semantics: `auto-track` is on unless set to
    /// `"false"`, the others are off unless set to `"true"`.
    pub fn from_attributes<I, K, V>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (name, value) in attributes {
            let name = name.as_ref();
            let name = name.strip_prefix(ATTRIBUTE_PREFIX).unwrap_or(name);
            let value = value.as_ref();

            match name {
                "website-id" => config.website_id = non_empty(value),
                "host-url" => config.host_url = non_empty(value),
                "before-send" => config.before_send = non_empty(value),
                "tag" => config.tag = non_empty(value),
                "auto-track" => config.auto_track = value != "false",
                "do-not-track" => config.do_not_track = value == "true",
                "exclude-search" => config.exclude_search = value == "true",
                "exclude-hash" => config.exclude_hash = value == "true",
                "domains" => {
                    config.domains = value
                        .split(',')
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty())
                        .collect();
                }
                "fetch-credentials" => {
                    config.fetch_credentials =
                        non_empty(value).unwrap_or_else(|| "omit".to_string());
                }
                _ => {}
            }
        }

        config
    }

    /// Check the options a deployment cannot work without
    pub fn validate(&self) -> Result<(), PersonaError> {
        if self.website_id.is_none() {
            return Err(PersonaError::MissingField("website-id".to_string()));
        }
        match self.fetch_credentials.as_str() {
            "omit" | "same-origin" | "include" => Ok(()),
            other => Err(PersonaError::InvalidConfig(format!(
                "fetch-credentials must be omit, same-origin or include (got {other})"
            ))),
        }
    }

    /// Whether `hostname` passes the domain allow-list
    pub fn allows_host(&self, hostname: &str) -> bool {
        self.domains.is_empty() || self.domains.iter().any(|d| d == hostname)
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Substring patterns per category. Matching walks categories in
/// `Category::ALL` order and the first category with a hit wins.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalTable {
    #[serde(default)]
    pub value: Vec<String>,
    #[serde(default)]
    pub solution: Vec<String>,
    #[serde(default)]
    pub trust: Vec<String>,
    #[serde(default)]
    pub intent: Vec<String>,
}

impl SignalTable {
    pub fn new(value: &[&str], solution: &[&str], trust: &[&str], intent: &[&str]) -> Self {
        let owned = |patterns: &[&str]| patterns.iter().map(|p| p.to_string()).collect();
        Self {
            value: owned(value),
            solution: owned(solution),
            trust: owned(trust),
            intent: owned(intent),
        }
    }

    pub fn patterns(&self, category: Category) -> &[String] {
        match category {
            Category::Value => &self.value,
            Category::Solution => &self.solution,
            Category::Trust => &self.trust,
            Category::Intent => &self.intent,
        }
    }

    /// First category with a pattern contained in `haystack` (lower-cased first)
    pub fn classify(&self, haystack: &str) -> Option<Category> {
        let haystack = haystack.to_lowercase();
        Category::ALL.into_iter().find(|category| {
            self.patterns(*category)
                .iter()
                .any(|p| !p.is_empty() && haystack.contains(p.as_str()))
        })
    }
}

/// Score boosts applied by the instant signal extractors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalBoosts {
    pub referrer: f64,
    pub utm: f64,
    pub entry_page: f64,
}

impl Default for SignalBoosts {
    fn default() -> Self {
        Self {
            referrer: 5.0,
            utm: 8.0,
            entry_page: 3.0,
        }
    }
}

/// Classifier tables and thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// Page path patterns
    pub categories: SignalTable,
    /// Referrer patterns
    pub referrer_signals: SignalTable,
    /// UTM source/medium/campaign patterns
    pub utm_signals: SignalTable,
    pub boosts: SignalBoosts,
    /// Dwell seconds above which a visit earns time points
    pub engagement_threshold: f64,
    /// Scroll depth above which a visit earns scroll points
    pub scroll_threshold: f64,
    /// Classification + emit cycle
    pub update_interval_ms: u64,
    /// Behavior feature refresh cycle
    pub behavior_interval_ms: u64,
    /// Minimum spacing between counted mouse moves
    pub mouse_throttle_ms: i64,
    /// Delay before an SPA navigation is tracked as a page view
    pub navigation_delay_ms: u64,
    /// Quiet period after the last scroll before variants are re-applied
    pub variant_scroll_debounce_ms: u64,
    pub storage_key: String,
    /// Storage key whose presence opts the browser out of tracking
    pub disabled_key: String,
    /// Snapshots are persisted only above this confidence
    pub persist_threshold: u8,
    /// Stored snapshots seed a returning visitor only above this confidence
    pub returning_threshold: u8,
    /// Seeded confidence cap for returning visitors
    pub returning_confidence_cap: u8,
    /// Persona telemetry is only sent at or above this confidence
    pub min_emit_confidence: u8,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            categories: SignalTable::new(
                &["/pricing", "/plans", "/cost", "/roi", "/compare", "/discount", "/free", "/trial"],
                &[
                    "/features",
                    "/how-it-works",
                    "/solutions",
                    "/use-cases",
                    "/product",
                    "/demo",
                    "/tour",
                ],
                &[
                    "/case-studies",
                    "/testimonials",
                    "/customers",
                    "/about",
                    "/team",
                    "/reviews",
                    "/press",
                ],
                &["/signup", "/register", "/start", "/contact", "/book", "/schedule", "/get-started"],
            ),
            referrer_signals: SignalTable::new(
                &["google.com/search", "bing.com", "price", "cost", "cheap", "compare", "vs"],
                &["stackoverflow", "github", "reddit.com/r/", "producthunt", "how to", "tutorial"],
                &["linkedin", "twitter", "facebook", "review", "g2.com", "capterra", "trustpilot"],
                &["email", "newsletter", "utm_medium=email", "retarget"],
            ),
            utm_signals: SignalTable::new(
                &["pricing", "deal", "discount", "offer", "sale"],
                &["demo", "webinar", "guide", "howto", "tutorial"],
                &["case-study", "testimonial", "customer", "success"],
                &["trial", "signup", "start", "convert", "bottom"],
            ),
            boosts: SignalBoosts::default(),
            engagement_threshold: 5.0,
            scroll_threshold: 30.0,
            update_interval_ms: 5_000,
            behavior_interval_ms: 2_000,
            mouse_throttle_ms: 100,
            navigation_delay_ms: 300,
            variant_scroll_debounce_ms: 100,
            storage_key: "persona.snapshot".to_string(),
            disabled_key: "persona.disabled".to_string(),
            persist_threshold: 40,
            returning_threshold: 50,
            returning_confidence_cap: 70,
            min_emit_confidence: 10,
        }
    }
}

impl PersonaConfig {
    /// Load from JSON; omitted fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, PersonaError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PersonaError> {
        if self.update_interval_ms == 0 || self.behavior_interval_ms == 0 {
            return Err(PersonaError::InvalidConfig(
                "update intervals must be positive".to_string(),
            ));
        }
        if self.storage_key.is_empty() {
            return Err(PersonaError::InvalidConfig(
                "storage_key must not be empty".to_string(),
            ));
        }
        if self.persist_threshold > 100 || self.returning_confidence_cap > 100 {
            return Err(PersonaError::InvalidConfig(
                "confidence thresholds must be within 0-100".to_string(),
            ));
        }
        Ok(())
    }
}
