//! Pipeline orchestration
//!
//! Replays recorded page sessions through a tracker wired to in-memory
//! collaborators and reports what it would have sent.

use chrono::{DateTime, Offset, Utc};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::{debug, info};

use crate::config::{PersonaConfig, TrackerConfig};
use crate::encoder::Envelope;
use crate::error::PersonaError;
use crate::features::FeatureVector;
use crate::host::{
    Clock, KeyValueStore, ManualClock, MemoryDocument, MemoryStorage, RecordingTransport,
    SharedDocument, StaticVariantSource,
};
use crate::navigation::{History, NavigationKind};
use crate::schema::{RecordedSession, SessionEvent, SessionReader};
use crate::switcher::{RemoteProfile, VariantResponse};
use crate::tracker::{HostBindings, PersonaTracker};
use crate::types::{PersonaEvent, PersonaView};
use crate::{PERSONA_FLUX_VERSION, PRODUCER_NAME};

/// Who produced a report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Outcome of replaying one session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub producer: Producer,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Page URL when the replay stopped
    pub url: String,
    pub session_id: Option<String>,
    /// Everything the transport accepted, in order
    pub envelopes: Vec<Envelope>,
    /// Every event delivered to persona-change listeners
    pub persona_events: Vec<PersonaEvent>,
    pub persona: PersonaView,
    pub features: FeatureVector,
    pub applied_variants: Vec<String>,
    pub remote_profile: Option<RemoteProfile>,
    /// Content surface after variants were applied, when one was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<MemoryDocument>,
}

/// Replay a recorded session (JSON or NDJSON) and return the report as JSON.
///
/// # Example
/// ```ignore
/// let report_json = replay_session(&std::fs::read_to_string("visit.ndjson")?)?;
/// ```
pub fn replay_session(input: &str) -> Result<String, PersonaError> {
    let session = SessionReader::parse(input)?;
    let report = replay(&session, MemoryStorage::new(), None)?;
    Ok(serde_json::to_string(&report)?)
}

/// Replay a parsed session against `storage`.
///
/// `config` overrides the session's own classifier config.
pub fn replay(
    session: &RecordedSession,
    storage: MemoryStorage,
    config: Option<&PersonaConfig>,
) -> Result<ReplayReport, PersonaError> {
    SessionReader::check(session)?;

    let tracker_config = TrackerConfig::from_attributes(&session.attributes);
    let persona_config = config
        .cloned()
        .or_else(|| session.persona_config.clone())
        .unwrap_or_default();

    let clock = ManualClock::new(session.started_at)
        .with_offset(session.local_offset().unwrap_or_else(|| Utc.fix()));

    let mut seeded = storage;
    for (key, value) in &session.storage {
        seeded.set(key, value)?;
    }

    let mut transport = RecordingTransport::new();
    if let Some(response) = &session.collect {
        transport = transport.with_response(response.clone());
    }
    let log = transport.log();

    let variants = match &session.variants {
        Some(raw) => match VariantResponse::from_value(raw) {
            Ok(response) => StaticVariantSource::new(response),
            Err(e) => {
                debug!(error = %e, "recorded variant reply unusable");
                StaticVariantSource::failing()
            }
        },
        None => StaticVariantSource::failing(),
    };

    let document: SharedDocument = Rc::new(RefCell::new(
        session
            .document
            .clone()
            .unwrap_or_else(|| MemoryDocument::new(f64::from(session.context.screen_height))),
    ));

    let host = HostBindings {
        clock: Rc::new(clock.clone()),
        storage: Box::new(seeded),
        transport: Box::new(transport),
        variants: Box::new(variants),
        surface: Box::new(Rc::clone(&document)),
    };
    let mut tracker =
        PersonaTracker::new(tracker_config, persona_config, session.context.clone(), host)?;

    let persona_events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&persona_events);
    tracker.on_persona_change(move |event| sink.borrow_mut().push(event.clone()));

    let mut history = History::new(session.context.url.as_str());
    tracker.attach(&mut history);

    info!(
        instance_id = tracker.instance_id(),
        events = session.events.len(),
        "replaying session"
    );
    tracker.start();

    for timed in &session.events {
        advance_to(&mut tracker, &clock, session.instant(timed.at));
        apply_event(&mut tracker, &mut history, &document, &timed.event);
    }
    let ended_at = session.instant(session.end_ms());
    advance_to(&mut tracker, &clock, ended_at);

    let mut applied_variants: Vec<String> = tracker
        .switcher()
        .applied_selectors()
        .map(str::to_string)
        .collect();
    applied_variants.sort();

    let envelopes = log.borrow().clone();
    let persona_events = persona_events.borrow().clone();
    debug!(envelopes = envelopes.len(), "replay finished");

    Ok(ReplayReport {
        producer: Producer {
            name: PRODUCER_NAME.to_string(),
            version: PERSONA_FLUX_VERSION.to_string(),
            instance_id: tracker.instance_id().to_string(),
        },
        started_at: session.started_at,
        ended_at,
        url: tracker.current_url().to_string(),
        session_id: tracker.session_id().map(str::to_string),
        envelopes,
        persona_events,
        persona: tracker.get_persona(),
        features: tracker.get_features(),
        applied_variants,
        remote_profile: tracker.switcher().remote_profile().cloned(),
        document: session.document.as_ref().map(|_| document.borrow().clone()),
    })
}

/// Fire every timer up to `target`, each at its own deadline, then leave the
/// clock at `target`
fn advance_to(tracker: &mut PersonaTracker, clock: &ManualClock, target: DateTime<Utc>) {
    while let Some(deadline) = tracker.next_deadline() {
        if deadline > target {
            break;
        }
        clock.set(deadline.max(clock.now()));
        tracker.tick();
    }
    if target > clock.now() {
        clock.set(target);
    }
    tracker.tick();
}

fn apply_event(
    tracker: &mut PersonaTracker,
    history: &mut History,
    document: &SharedDocument,
    event: &SessionEvent,
) {
    match event {
        SessionEvent::Scroll(sample) => {
            document.borrow_mut().scroll_to(sample.scroll_y);
            tracker.handle_scroll(*sample);
        }
        SessionEvent::Click(click) => tracker.handle_click(click),
        SessionEvent::MouseMove => tracker.handle_mouse_move(),
        SessionEvent::HoverStart => tracker.handle_hover_start(),
        SessionEvent::HoverEnd => tracker.handle_hover_end(),
        SessionEvent::Submit(form) => tracker.handle_submit(form),
        SessionEvent::Navigate(navigation) => {
            match navigation.kind {
                NavigationKind::Push => history.push_state(navigation.url.as_str()),
                NavigationKind::Replace => history.replace_state(navigation.url.as_str()),
            }
            tracker.tick();
        }
        SessionEvent::Visibility { state } => tracker.handle_visibility(*state),
        SessionEvent::Track { name, data } => tracker.track(name.as_deref(), data.clone()),
        SessionEvent::Identify { id, data } => tracker.identify(id.as_deref(), data.clone()),
        SessionEvent::Conversion {
            event_type,
            value,
            data,
        } => tracker.track_conversion(event_type, value.clone(), data.clone()),
        SessionEvent::SwitchContent {
            selector,
            content,
            content_type,
        } => {
            tracker.switch_content(selector, content, *content_type);
        }
        SessionEvent::Tick => {}
        SessionEvent::Shutdown => tracker.shutdown(),
    }
}

/// Stateful replayer whose local storage survives between sessions.
///
/// Use this to follow one browser across visits: a snapshot persisted in one
/// session makes the next one a returning visitor.
pub struct ReplayProcessor {
    storage: MemoryStorage,
    config: Option<PersonaConfig>,
}

impl Default for ReplayProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayProcessor {
    /// Create a processor with empty storage
    pub fn new() -> Self {
        Self {
            storage: MemoryStorage::new(),
            config: None,
        }
    }

    /// Classifier config applied to every session, overriding theirs
    pub fn with_config(config: PersonaConfig) -> Self {
        Self {
            storage: MemoryStorage::new(),
            config: Some(config),
        }
    }

    /// Replace storage with a JSON object of string entries
    pub fn load_storage(&mut self, json: &str) -> Result<(), PersonaError> {
        let entries: HashMap<String, String> = serde_json::from_str(json)
            .map_err(|e| PersonaError::StorageError(e.to_string()))?;
        self.storage.load(entries);
        Ok(())
    }

    /// Storage contents as a JSON object
    pub fn save_storage(&self) -> Result<String, PersonaError> {
        let entries: BTreeMap<_, _> = self.storage.entries().into_iter().collect();
        Ok(serde_json::to_string(&entries)?)
    }

    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    /// Replay a recorded session (JSON or NDJSON) and return the report as
    /// JSON
    pub fn replay(&mut self, input: &str) -> Result<String, PersonaError> {
        let session = SessionReader::parse(input)?;
        let report = self.replay_session(&session)?;
        Ok(serde_json::to_string(&report)?)
    }

    pub fn replay_session(&mut self, session: &RecordedSession) -> Result<ReplayReport, PersonaError> {
        replay(session, self.storage.clone(), self.config.as_ref())
    }
}
