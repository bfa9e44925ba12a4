//! Collect payload encoding
//!
//! Builds the JSON envelopes the tracker hands to the transport. Every payload
//! starts from the same standard fields (website, screen, language, title,
//! hostname, url, referrer, tag, identity) and adds event-specific data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::TrackerConfig;
use crate::context::BrowserContext;
use crate::error::PersonaError;
use crate::features::FeatureVector;
use crate::normalizer::{PageUrl, UrlNormalizer};
use crate::state::PageVisits;
use crate::types::{BehaviorFeatures, CategoryScores, Persona};

/// Envelope `type` discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Event,
    Identify,
    Personality,
    Conversion,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Event => "event",
            EventKind::Identify => "identify",
            EventKind::Personality => "personality",
            EventKind::Conversion => "conversion",
        }
    }
}

/// `{type, payload}` body posted to the collect endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Value,
    /// Session cache token, sent as a request header rather than in the body
    #[serde(skip)]
    pub cache: Option<String>,
}

impl Envelope {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Option<String>) -> Self {
        self.cache = cache;
        self
    }

    /// `payload.name`, for named events
    pub fn name(&self) -> Option<&str> {
        self.payload.get("name").and_then(Value::as_str)
    }

    pub fn data(&self) -> Option<&Value> {
        self.payload.get("data")
    }
}

/// Collector reply to a delivered envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectResponse {
    /// Stop sending for the rest of the page session
    #[serde(default)]
    pub disabled: bool,
    /// Opaque session cache token echoed back on later sends
    #[serde(default)]
    pub cache: Option<String>,
    /// Server-side session id, needed to fetch content variants
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `data` of a personality envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityData {
    pub persona: Persona,
    pub confidence: u8,
    pub scores: CategoryScores,
    pub page_visits: PageVisits,
    pub behavior_features: BehaviorFeatures,
    pub feature_vector: FeatureVector,
    /// Seconds since session start
    pub session_duration: f64,
}

/// `data` of a conversion envelope, before caller extras are merged in
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionData {
    pub event_type: String,
    pub event_value: Option<Value>,
    pub persona: Persona,
    pub confidence: u8,
    pub pages_before: Vec<String>,
    /// Whole seconds since session start
    pub time_to_convert: i64,
}

/// Standard payload builder. Tracks the current and previous URL as the
/// visitor navigates.
#[derive(Debug, Clone)]
pub struct PayloadEncoder {
    website: Option<String>,
    screen: String,
    language: String,
    title: String,
    hostname: String,
    tag: Option<String>,
    identity: Option<String>,
    normalizer: UrlNormalizer,
    location: Option<PageUrl>,
    url: String,
    referrer: String,
}

impl PayloadEncoder {
    pub fn new(config: &TrackerConfig, context: &BrowserContext) -> Self {
        let normalizer = UrlNormalizer::new(config.exclude_search, config.exclude_hash);
        let location = context.page_url();
        let hostname = location
            .as_ref()
            .map(|u| u.hostname().to_string())
            .unwrap_or_default();

        // Same-origin referrers are internal navigation, not a traffic source
        let same_origin = location
            .as_ref()
            .map(|u| context.referrer.starts_with(&u.origin()))
            .unwrap_or(false);
        let raw_referrer = if same_origin { "" } else { context.referrer.as_str() };

        let url = normalizer.normalize(&context.url, location.as_ref());
        let referrer = normalizer.normalize(raw_referrer, location.as_ref());

        Self {
            website: config.website_id.clone(),
            screen: context.screen(),
            language: context.language.clone(),
            title: context.title.clone(),
            hostname,
            tag: config.tag.clone(),
            identity: None,
            normalizer,
            location,
            url,
            referrer,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn referrer(&self) -> &str {
        &self.referrer
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn set_identity(&mut self, id: impl Into<String>) {
        self.identity = Some(id.into());
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    /// Move to `raw` (absolute or relative to the current location).
    ///
    /// The previous URL becomes the referrer. Returns whether the normalized
    /// URL changed.
    pub fn navigate(&mut self, raw: &str) -> bool {
        let resolved = match &self.location {
            Some(base) => base.join(raw).ok(),
            None => PageUrl::parse(raw).ok(),
        };
        let next = match &resolved {
            Some(url) => self.normalizer.normalize(&url.to_string(), None),
            None => raw.to_string(),
        };
        if resolved.is_some() {
            self.location = resolved;
        }

        self.referrer = std::mem::replace(&mut self.url, next);
        self.url != self.referrer
    }

    /// Current location, parsed
    pub fn location(&self) -> Option<&PageUrl> {
        self.location.as_ref()
    }

    /// Standard payload fields. `tag` and `id` are omitted when unset.
    pub fn standard(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("website".into(), json_opt(self.website.as_deref()));
        map.insert("screen".into(), Value::String(self.screen.clone()));
        map.insert("language".into(), Value::String(self.language.clone()));
        map.insert("title".into(), Value::String(self.title.clone()));
        map.insert("hostname".into(), Value::String(self.hostname.clone()));
        map.insert("url".into(), Value::String(self.url.clone()));
        map.insert("referrer".into(), Value::String(self.referrer.clone()));
        if let Some(tag) = &self.tag {
            map.insert("tag".into(), Value::String(tag.clone()));
        }
        if let Some(id) = &self.identity {
            map.insert("id".into(), Value::String(id.clone()));
        }
        map
    }

    /// Page view: the standard fields alone
    pub fn page_view(&self) -> Value {
        Value::Object(self.standard())
    }

    /// Named event with optional data
    pub fn event(&self, name: &str, data: Option<Value>) -> Value {
        let mut map = self.standard();
        map.insert("name".into(), Value::String(name.to_string()));
        if let Some(data) = data {
            map.insert("data".into(), data);
        }
        Value::Object(map)
    }

    pub fn identify(&self, data: Option<Value>) -> Value {
        let mut map = self.standard();
        if let Some(data) = data {
            map.insert("data".into(), data);
        }
        Value::Object(map)
    }

    pub fn personality(&self, data: &PersonalityData) -> Result<Value, PersonaError> {
        let mut map = self.standard();
        map.insert("data".into(), serde_json::to_value(data)?);
        Ok(Value::Object(map))
    }

    /// Conversion payload named `conversion:<type>`. Caller extras are merged
    /// last and win over the built-in fields.
    pub fn conversion(
        &self,
        data: &ConversionData,
        extra: &Map<String, Value>,
    ) -> Result<Value, PersonaError> {
        let mut body = match serde_json::to_value(data)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in extra {
            body.insert(key.clone(), value.clone());
        }

        let mut map = self.standard();
        map.insert(
            "name".into(),
            Value::String(format!("conversion:{}", data.event_type)),
        );
        map.insert("data".into(), Value::Object(body));
        Ok(Value::Object(map))
    }
}

fn json_opt(value: Option<&str>) -> Value {
    value
        .map(|v| Value::String(v.to_string()))
        .unwrap_or(Value::Null)
}
