//! persona.session.v1 schema definition
//!
//! A recorded page session: the page context and script-tag attributes the
//! tracker started with, the collaborator replies the host saw, and the
//! timed stream of host events. Replaying it drives a tracker exactly as a
//! browser would.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::PersonaConfig;
use crate::context::{BrowserContext, ClickEvent, FormInfo, ScrollSample, Visibility};
use crate::encoder::CollectResponse;
use crate::host::MemoryDocument;
use crate::navigation::Navigation;
use crate::normalizer::PageUrl;
use crate::types::ContentType;

/// Current schema version
pub const SCHEMA_VERSION: &str = "persona.session.v1";

/// Seconds in a day; UTC offsets must stay strictly inside it
const DAY_SECS: u32 = 86_400;

/// Session header plus its events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedSession {
    pub schema_version: String,
    /// Page load instant; event offsets count from here
    pub started_at: DateTime<Utc>,
    /// Visitor's local UTC offset, for the time-of-day signal
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Script-tag attributes (`data-` prefix optional)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub context: BrowserContext,
    /// Classifier overrides; omitted fields keep their defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_config: Option<PersonaConfig>,
    /// Content surface the variants are applied to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<MemoryDocument>,
    /// Reply the collector gave to every send
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect: Option<CollectResponse>,
    /// Raw variant API reply; absent means the API was unreachable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants: Option<Value>,
    /// Local storage contents at page load
    #[serde(default)]
    pub storage: BTreeMap<String, String>,
    /// Keep running timers until this offset, if later than the last event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub events: Vec<TimedEvent>,
}

impl RecordedSession {
    pub fn new(context: BrowserContext, started_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            started_at,
            utc_offset_minutes: 0,
            attributes: BTreeMap::new(),
            context,
            persona_config: None,
            document: None,
            collect: None,
            variants: None,
            storage: BTreeMap::new(),
            duration_ms: None,
            events: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_event(mut self, at_ms: u64, event: SessionEvent) -> Self {
        self.events.push(TimedEvent { at: at_ms, event });
        self
    }

    /// Visitor's local offset; `None` when out of range
    pub fn local_offset(&self) -> Option<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }

    /// Absolute instant of an event offset
    pub fn instant(&self, at_ms: u64) -> DateTime<Utc> {
        self.started_at + Duration::milliseconds(at_ms.min(i64::MAX as u64) as i64)
    }

    /// Offset at which replay stops
    pub fn end_ms(&self) -> u64 {
        let last = self.events.iter().map(|e| e.at).max().unwrap_or(0);
        self.duration_ms.map_or(last, |d| d.max(last))
    }

    /// Check the header fields
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }
        if PageUrl::parse(&self.context.url).is_err() {
            return Err(ValidationError::InvalidPageUrl(self.context.url.clone()));
        }
        if self.utc_offset_minutes.saturating_mul(60).unsigned_abs() >= DAY_SECS {
            return Err(ValidationError::InvalidOffset(self.utc_offset_minutes));
        }
        Ok(())
    }
}

/// One host event, `at` milliseconds after page load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub at: u64,
    #[serde(flatten)]
    pub event: SessionEvent,
}

impl TimedEvent {
    pub fn new(at: u64, event: SessionEvent) -> Self {
        Self { at, event }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.event {
            SessionEvent::Scroll(sample) => {
                let finite = [sample.scroll_y, sample.viewport_height, sample.document_height]
                    .iter()
                    .all(|v| v.is_finite());
                if !finite {
                    return Err(ValidationError::InvalidField {
                        field: "scroll".to_string(),
                        reason: "positions must be finite".to_string(),
                    });
                }
                Ok(())
            }
            SessionEvent::Click(click) if click.element.tag.is_empty() => {
                Err(ValidationError::InvalidField {
                    field: "element.tag".to_string(),
                    reason: "must not be empty".to_string(),
                })
            }
            SessionEvent::Navigate(navigation) if navigation.url.trim().is_empty() => {
                Err(ValidationError::InvalidField {
                    field: "url".to_string(),
                    reason: "must not be empty".to_string(),
                })
            }
            SessionEvent::Track { name: Some(name), .. } if name.trim().is_empty() => {
                Err(ValidationError::InvalidField {
                    field: "name".to_string(),
                    reason: "omit the name for a page view".to_string(),
                })
            }
            SessionEvent::Conversion { event_type, .. } if event_type.trim().is_empty() => {
                Err(ValidationError::InvalidField {
                    field: "eventType".to_string(),
                    reason: "must not be empty".to_string(),
                })
            }
            SessionEvent::SwitchContent { selector, .. } if selector.trim().is_empty() => {
                Err(ValidationError::InvalidField {
                    field: "selector".to_string(),
                    reason: "must not be empty".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Host events a recorded session may contain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Scroll(ScrollSample),
    Click(ClickEvent),
    MouseMove,
    HoverStart,
    HoverEnd,
    Submit(FormInfo),
    /// `history.pushState` / `history.replaceState`
    Navigate(Navigation),
    Visibility {
        state: Visibility,
    },
    /// Page view when `name` is absent
    Track {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        data: Option<Value>,
    },
    Identify {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        data: Option<Value>,
    },
    Conversion {
        #[serde(rename = "eventType")]
        event_type: String,
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        data: Map<String, Value>,
    },
    SwitchContent {
        selector: String,
        content: String,
        #[serde(rename = "contentType", default)]
        content_type: Option<ContentType>,
    },
    /// Let timers run up to this offset
    Tick,
    Shutdown,
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Scroll(_) => "scroll",
            SessionEvent::Click(_) => "click",
            SessionEvent::MouseMove => "mouse_move",
            SessionEvent::HoverStart => "hover_start",
            SessionEvent::HoverEnd => "hover_end",
            SessionEvent::Submit(_) => "submit",
            SessionEvent::Navigate(_) => "navigate",
            SessionEvent::Visibility { .. } => "visibility",
            SessionEvent::Track { .. } => "track",
            SessionEvent::Identify { .. } => "identify",
            SessionEvent::Conversion { .. } => "conversion",
            SessionEvent::SwitchContent { .. } => "switch_content",
            SessionEvent::Tick => "tick",
            SessionEvent::Shutdown => "shutdown",
        }
    }
}

/// Schema validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Page URL cannot be parsed: {0}")]
    InvalidPageUrl(String),

    #[error("UTC offset out of range: {0} minutes")]
    InvalidOffset(i32),

    #[error("Event at {at}ms comes before the previous event at {previous}ms")]
    OutOfOrder { at: u64, previous: u64 },

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_deserialize_session() {
        let json = r#"{
            "schemaVersion": "persona.session.v1",
            "startedAt": "2024-03-01T10:00:00Z",
            "utcOffsetMinutes": 120,
            "attributes": {"data-website-id": "site-1"},
            "context": {"url": "https://acme.io/pricing", "screenWidth": 1440, "screenHeight": 900},
            "collect": {"sessionId": "sess-9"},
            "events": [
                {"at": 1200, "type": "scroll", "scrollY": 600, "viewportHeight": 800, "documentHeight": 2000},
                {"at": 3000, "type": "click", "element": {"tag": "button", "text": "Start Free Trial"}},
                {"at": 4000, "type": "navigate", "url": "/features", "kind": "push"},
                {"at": 5000, "type": "visibility", "state": "hidden"},
                {"at": 6000, "type": "conversion", "eventType": "signup", "value": 49}
            ]
        }"#;

        let session: RecordedSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.validate(), Ok(()));
        assert_eq!(session.local_offset(), FixedOffset::east_opt(7_200));
        assert_eq!(session.collect.as_ref().unwrap().session_id.as_deref(), Some("sess-9"));
        assert_eq!(session.end_ms(), 6000);

        let kinds: Vec<_> = session.events.iter().map(|e| e.event.kind()).collect();
        assert_eq!(kinds, vec!["scroll", "click", "navigate", "visibility", "conversion"]);
        assert_eq!(
            session.events[2].event,
            SessionEvent::Navigate(Navigation::push("/features"))
        );
        match &session.events[4].event {
            SessionEvent::Conversion { event_type, value, data } => {
                assert_eq!(event_type, "signup");
                assert_eq!(value, &Some(serde_json::json!(49)));
                assert!(data.is_empty());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_serialize_event_is_flat() {
        let event = TimedEvent::new(
            250,
            SessionEvent::Visibility {
                state: Visibility::Hidden,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"at": 250, "type": "visibility", "state": "hidden"})
        );
    }

    #[test]
    fn test_header_validation() {
        let mut session =
            RecordedSession::new(BrowserContext::new("https://acme.io/", 1280, 800), started());
        assert_eq!(session.validate(), Ok(()));

        session.schema_version = "persona.session.v0".to_string();
        assert!(matches!(
            session.validate(),
            Err(ValidationError::InvalidSchemaVersion { .. })
        ));

        session.schema_version = SCHEMA_VERSION.to_string();
        session.context.url = "not a url".to_string();
        assert!(matches!(session.validate(), Err(ValidationError::InvalidPageUrl(_))));

        session.context.url = "https://acme.io/".to_string();
        session.utc_offset_minutes = 24 * 60;
        assert_eq!(session.validate(), Err(ValidationError::InvalidOffset(1440)));
    }

    #[test]
    fn test_event_validation() {
        let blank_nav = TimedEvent::new(0, SessionEvent::Navigate(Navigation::push(" ")));
        assert!(blank_nav.validate().is_err());

        let blank_name = TimedEvent::new(
            0,
            SessionEvent::Track {
                name: Some(String::new()),
                data: None,
            },
        );
        assert!(blank_name.validate().is_err());

        let page_view = TimedEvent::new(0, SessionEvent::Track { name: None, data: None });
        assert_eq!(page_view.validate(), Ok(()));
    }

    #[test]
    fn test_end_respects_duration() {
        let session = RecordedSession {
            duration_ms: Some(30_000),
            ..RecordedSession::new(BrowserContext::new("https://acme.io/", 1280, 800), started())
        }
        .with_event(4_000, SessionEvent::Tick);
        assert_eq!(session.end_ms(), 30_000);
        assert_eq!(session.instant(1_500), started() + Duration::milliseconds(1_500));
    }
}
