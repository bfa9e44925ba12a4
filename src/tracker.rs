//! Persona tracker
//!
//! The orchestrator that owns one page session: it wires the signal
//! extractors, behavior meter, engine and content switcher to host events
//! and timers, and turns the results into collect envelopes.
//!
//! Everything is single-threaded. Hosts forward DOM events through the
//! `handle_*` methods and call [`PersonaTracker::tick`] whenever a deadline
//! from [`PersonaTracker::next_deadline`] has passed.

use chrono::{DateTime, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::config::{PersonaConfig, TrackerConfig};
use crate::context::{BrowserContext, ClickEvent, ElementInfo, FormInfo, ScrollSample, Visibility};
use crate::encoder::{ConversionData, EventKind, Envelope, PayloadEncoder, PersonalityData};
use crate::engine::{effective_scores, PersonaEngine};
use crate::error::PersonaError;
use crate::features::{FeatureVector, FeatureVectorBuilder};
use crate::host::{Clock, ContentSurface, KeyValueStore, Transport, VariantSource};
use crate::meter::BehaviorMeter;
use crate::navigation::{Navigation, NavigationKind, NavigationListener, NavigationObserver};
use crate::scheduler::{Scheduler, Task};
use crate::signals::{extract_instant_signals, InstantInputs};
use crate::snapshot::SnapshotStore;
use crate::state::PersonaState;
use crate::switcher::{ContentSwitcher, VariantRequest};
use crate::types::{ContentType, ContentVariant, EventSource, Persona, PersonaEvent, PersonaView};

/// Attribute naming the event a click on an element tracks
pub const EVENT_ATTRIBUTE: &str = "data-persona-event";
/// Prefix of attributes carrying event data (`data-persona-event-<key>`)
pub const EVENT_DATA_PREFIX: &str = "data-persona-event-";

/// Form keyword tables, checked in order; the first hit names the conversion
static FORM_CONVERSIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)signup|register|join", "signup"),
        (r"(?i)contact|inquiry|message", "contact"),
        (r"(?i)demo|book|schedule", "demo_request"),
        (r"(?i)newsletter|subscribe", "newsletter"),
        (r"(?i)checkout|payment|purchase", "purchase"),
    ]
    .into_iter()
    .map(|(pattern, kind)| (Regex::new(pattern).expect("valid form pattern"), kind))
    .collect()
});

const DEFAULT_FORM_CONVERSION: &str = "form_submit";

/// Hook that may rewrite a payload or veto it by returning `None`
pub type BeforeSendHook = Box<dyn FnMut(EventKind, Value) -> Option<Value>>;

/// Callback receiving every persona event
pub type PersonaListener = Box<dyn FnMut(&PersonaEvent)>;

/// Collaborators the tracker needs from its host
pub struct HostBindings {
    pub clock: Rc<dyn Clock>,
    pub storage: Box<dyn KeyValueStore>,
    pub transport: Box<dyn Transport>,
    pub variants: Box<dyn VariantSource>,
    pub surface: Box<dyn ContentSurface>,
}

/// Conversion type inferred from a submitted form's action, id and class
pub fn infer_conversion_type(form: &FormInfo) -> &'static str {
    let haystack = format!("{} {} {}", form.action, form.id, form.class_name).to_lowercase();
    FORM_CONVERSIONS
        .iter()
        .find(|(pattern, _)| pattern.is_match(&haystack))
        .map(|(_, kind)| *kind)
        .unwrap_or(DEFAULT_FORM_CONVERSION)
}

/// Event name and data declared on an element through `data-persona-event*`
/// attributes
pub fn declared_event(element: &ElementInfo) -> Option<(String, Map<String, Value>)> {
    let name = element.attribute(EVENT_ATTRIBUTE)?.trim();
    if name.is_empty() {
        return None;
    }

    let data = element
        .attributes
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(EVENT_DATA_PREFIX)
                .filter(|k| !k.is_empty())
                .map(|k| (k.to_string(), Value::String(value.clone())))
        })
        .collect();

    Some((name.to_string(), data))
}

pub struct PersonaTracker {
    config: TrackerConfig,
    persona_config: PersonaConfig,
    context: BrowserContext,
    host: HostBindings,
    encoder: PayloadEncoder,
    state: PersonaState,
    persona_active: bool,
    switcher: ContentSwitcher,
    scheduler: Scheduler,
    initialized: bool,
    disabled: bool,
    cache: Option<String>,
    session_id: Option<String>,
    hooks: HashMap<String, BeforeSendHook>,
    listeners: Vec<PersonaListener>,
    /// Navigations heard from the observer, with the instant they happened
    inbox: Rc<RefCell<Vec<(Navigation, DateTime<Utc>)>>>,
    hover_started: Option<DateTime<Utc>>,
    instance_id: String,
}

impl PersonaTracker {
    pub fn new(
        config: TrackerConfig,
        persona_config: PersonaConfig,
        context: BrowserContext,
        host: HostBindings,
    ) -> Result<Self, PersonaError> {
        persona_config.validate()?;

        let now = host.clock.now();
        let encoder = PayloadEncoder::new(&config, &context);

        Ok(Self {
            config,
            persona_config,
            context,
            host,
            encoder,
            state: PersonaState::new(now),
            persona_active: false,
            switcher: ContentSwitcher::new(),
            scheduler: Scheduler::new(),
            initialized: false,
            disabled: false,
            cache: None,
            session_id: None,
            hooks: HashMap::new(),
            listeners: Vec::new(),
            inbox: Rc::default(),
            hover_started: None,
            instance_id: Uuid::new_v4().to_string(),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn state(&self) -> &PersonaState {
        &self.state
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn persona_config(&self) -> &PersonaConfig {
        &self.persona_config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether the persona pipeline is running
    pub fn is_persona_active(&self) -> bool {
        self.persona_active
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn cache(&self) -> Option<&str> {
        self.cache.as_deref()
    }

    pub fn switcher(&self) -> &ContentSwitcher {
        &self.switcher
    }

    /// Current page URL as reported in payloads
    pub fn current_url(&self) -> &str {
        self.encoder.url()
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Page load. Initializes unless auto-tracking is off or tracking is
    /// disabled for this browser.
    pub fn start(&mut self) {
        if !self.config.auto_track {
            debug!("auto-track off, waiting for explicit init");
            return;
        }
        if self.tracking_disabled() {
            info!("tracking disabled, tracker idle");
            return;
        }
        self.init();
    }

    /// Track the initial page view and start the persona pipeline. Runs once.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        info!(instance_id = %self.instance_id, url = %self.encoder.url(), "tracker initialized");

        // Signals are extracted before anything leaves the page; the instant
        // persona event waits for the page view so the variant fetch carries
        // the session id the collector hands out.
        let instant = self.start_persona();
        self.track(None, None);
        if let Some(event) = instant {
            self.dispatch(event);
        }
    }

    /// Extract instant signals, classify and start the timers. Returns the
    /// instant persona event to dispatch, if any.
    fn start_persona(&mut self) -> Option<PersonaEvent> {
        if self.config.do_not_track && self.context.has_do_not_track() {
            debug!("do-not-track set, persona pipeline skipped");
            return None;
        }
        if self.opted_out() {
            debug!("opted out, persona pipeline skipped");
            return None;
        }
        let Some(url) = self.context.page_url() else {
            debug!(url = %self.context.url, "unparseable page url, persona pipeline skipped");
            return None;
        };

        let now = self.host.clock.now();
        let local_hour = now.with_timezone(&self.host.clock.local_offset()).hour();
        let stored = SnapshotStore::new(self.persona_config.storage_key.as_str())
            .load(self.host.storage.as_ref());

        self.state = PersonaState::new(now);
        let boosted = extract_instant_signals(
            &mut self.state,
            InstantInputs {
                url: &url,
                referrer: &self.context.referrer,
                viewport_width: self.context.screen_width,
                local_hour,
                stored,
            },
            &self.persona_config,
        );

        if boosted {
            let storage: &mut dyn KeyValueStore = self.host.storage.as_mut();
            PersonaEngine::calculate_persona(&mut self.state, &self.persona_config, now, Some(storage));
        }

        self.state.start_page(&url.path, now);
        self.persona_active = true;

        self.scheduler
            .every(Task::ClassifyEmit, self.persona_config.update_interval_ms, now);
        self.scheduler
            .every(Task::BehaviorRefresh, self.persona_config.behavior_interval_ms, now);

        let signalled =
            self.state.persona != Persona::Explorer || self.state.instant_signals.is_returning;
        signalled.then(|| PersonaEvent {
            persona: self.state.persona,
            confidence: self.state.confidence,
            scores: effective_scores(&self.state, &self.persona_config),
            behavior_features: None,
            source: EventSource::Instant,
        })
    }

    /// Run every task that is due
    pub fn tick(&mut self) {
        self.process_navigations();
        let now = self.host.clock.now();

        for task in self.scheduler.due(now) {
            trace!(?task, "task due");
            match task {
                Task::ClassifyEmit => self.classify_emit(),
                Task::BehaviorRefresh => {
                    if self.persona_active {
                        BehaviorMeter::extract_features(&mut self.state, now);
                    }
                }
                Task::PageView => self.track(None, None),
                Task::ApplyVariants => {
                    self.apply_variants();
                }
            }
        }
    }

    /// Earliest pending timer
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.scheduler.next_deadline()
    }

    /// Cancel all timers. Event handlers keep updating state but nothing is
    /// scheduled any more.
    pub fn shutdown(&mut self) {
        self.scheduler.cancel();
        info!(instance_id = %self.instance_id, "tracker shut down");
    }

    /// Listener that queues navigations for this tracker, stamped with the
    /// instant they happened; they are processed on the next handler call or
    /// tick
    pub fn navigation_listener(&self) -> NavigationListener {
        let inbox = Rc::clone(&self.inbox);
        let clock = Rc::clone(&self.host.clock);
        Box::new(move |navigation: &Navigation| {
            inbox.borrow_mut().push((navigation.clone(), clock.now()))
        })
    }

    /// Subscribe to a host's navigation observer
    pub fn attach(&self, observer: &mut dyn NavigationObserver) {
        observer.subscribe(self.navigation_listener());
    }

    fn process_navigations(&mut self) {
        let pending = std::mem::take(&mut *self.inbox.borrow_mut());
        for (navigation, at) in pending {
            self.navigate_at(navigation, at);
        }
    }

    // ---------------------------------------------------------------------
    // Host events
    // ---------------------------------------------------------------------

    pub fn handle_scroll(&mut self, sample: ScrollSample) {
        self.process_navigations();
        let now = self.host.clock.now();

        if self.persona_active {
            BehaviorMeter::record_scroll(&mut self.state, sample, now);
        }
        self.scheduler.debounce(
            Task::ApplyVariants,
            self.persona_config.variant_scroll_debounce_ms,
            now,
        );
    }

    pub fn handle_click(&mut self, event: &ClickEvent) {
        self.process_navigations();
        let now = self.host.clock.now();

        if self.initialized {
            let target = match &event.actionable {
                None => Some(&event.element),
                Some(parent) if parent.attribute(EVENT_ATTRIBUTE).is_some() => Some(parent),
                Some(_) => None,
            };
            if let Some((name, data)) = target.and_then(declared_event) {
                self.track(Some(&name), Some(Value::Object(data)));
            }
        }

        if self.persona_active {
            BehaviorMeter::record_click(&mut self.state, event, now);
        }
    }

    pub fn handle_mouse_move(&mut self) {
        if self.persona_active {
            let now = self.host.clock.now();
            BehaviorMeter::record_mouse_move(
                &mut self.state,
                now,
                self.persona_config.mouse_throttle_ms,
            );
        }
    }

    /// Pointer entered an interactive element
    pub fn handle_hover_start(&mut self) {
        self.hover_started = Some(self.host.clock.now());
    }

    /// Pointer left an interactive element
    pub fn handle_hover_end(&mut self) {
        let Some(started) = self.hover_started.take() else {
            return;
        };
        if self.persona_active {
            let duration_ms = (self.host.clock.now() - started).num_milliseconds() as f64;
            BehaviorMeter::record_hover(&mut self.state, duration_ms);
        }
    }

    pub fn handle_submit(&mut self, form: &FormInfo) {
        self.process_navigations();
        let kind = infer_conversion_type(form);
        let mut extra = Map::new();
        extra.insert("formId".into(), Value::String(form.id.clone()));
        self.track_conversion(kind, None, extra);
    }

    /// A history push or replace. Pushes flush the outgoing page into the
    /// visit log before the incoming one starts timing; both schedule a page
    /// view when the URL changed.
    pub fn handle_navigation(&mut self, navigation: Navigation) {
        self.process_navigations();
        let now = self.host.clock.now();
        self.navigate_at(navigation, now);
    }

    /// Apply a navigation that happened at `now`
    fn navigate_at(&mut self, navigation: Navigation, now: DateTime<Utc>) {
        let is_push = navigation.kind == NavigationKind::Push;

        if is_push && self.persona_active {
            self.state.checkpoint_page(now, &self.persona_config);
        }

        if !navigation.url.is_empty() {
            let changed = self.encoder.navigate(&navigation.url);
            if changed && self.initialized {
                self.scheduler
                    .once(Task::PageView, self.persona_config.navigation_delay_ms, now);
            }
        }

        if is_push && self.persona_active {
            let path = self.current_path();
            self.state.start_page(&path, now);
            trace!(path = %path, "page started");
        }
    }

    pub fn handle_visibility(&mut self, visibility: Visibility) {
        self.process_navigations();
        if self.scheduler.visibility_changed(visibility) {
            debug!("page hidden, flushing persona");
            self.classify_emit();
        }
    }

    // ---------------------------------------------------------------------
    // Public API
    // ---------------------------------------------------------------------

    /// Page view when `name` is `None`, otherwise a named event
    pub fn track(&mut self, name: Option<&str>, data: Option<Value>) {
        let payload = match name {
            Some(name) => self.encoder.event(name, data),
            None => self.encoder.page_view(),
        };
        self.send(EventKind::Event, payload);
    }

    /// Send a caller-built payload as is
    pub fn track_payload(&mut self, payload: Value) {
        self.send(EventKind::Event, payload);
    }

    /// Send the payload `build` derives from the standard fields
    pub fn track_with<F>(&mut self, build: F)
    where
        F: FnOnce(Value) -> Value,
    {
        let payload = build(self.encoder.page_view());
        self.send(EventKind::Event, payload);
    }

    /// Attach an identity to every later payload and send an identify event.
    /// Clears the session cache.
    pub fn identify(&mut self, id: Option<&str>, data: Option<Value>) {
        if let Some(id) = id {
            self.encoder.set_identity(id);
        }
        self.cache = None;
        let payload = self.encoder.identify(data);
        self.send(EventKind::Identify, payload);
    }

    /// Send a conversion envelope followed by a regular `conversion:<type>`
    /// event
    pub fn track_conversion(
        &mut self,
        event_type: &str,
        value: Option<Value>,
        extra: Map<String, Value>,
    ) {
        let now = self.host.clock.now();
        let data = ConversionData {
            event_type: event_type.to_string(),
            event_value: value.clone(),
            persona: self.state.persona,
            confidence: self.state.confidence,
            pages_before: self.state.visited_paths(),
            time_to_convert: self.state.elapsed_secs(now).round() as i64,
        };

        match self.encoder.conversion(&data, &extra) {
            Ok(payload) => self.send(EventKind::Conversion, payload),
            Err(e) => debug!(error = %e, "conversion payload failed"),
        }

        let name = format!("conversion:{event_type}");
        let summary = json!({ "value": value, "persona": self.state.persona });
        self.track(Some(&name), Some(summary));
    }

    pub fn get_persona(&self) -> PersonaView {
        PersonaView {
            persona: self.state.persona,
            confidence: self.state.confidence,
            scores: effective_scores(&self.state, &self.persona_config),
            features: self.state.behavior_features,
        }
    }

    pub fn get_features(&self) -> FeatureVector {
        FeatureVectorBuilder::build(&self.state, &self.persona_config, self.host.clock.now())
    }

    pub fn on_persona_change<F>(&mut self, callback: F)
    where
        F: FnMut(&PersonaEvent) + 'static,
    {
        self.listeners.push(Box::new(callback));
    }

    /// Apply content to the first element matching `selector`, regardless of
    /// its position. Returns whether an element was found.
    pub fn switch_content(
        &mut self,
        selector: &str,
        content: &str,
        content_type: Option<ContentType>,
    ) -> bool {
        let element = match self.host.surface.query(selector) {
            Ok(Some(element)) => element,
            Ok(None) => {
                debug!(selector, "switch_content: no match");
                return false;
            }
            Err(e) => {
                debug!(selector, error = %e, "switch_content: bad selector");
                return false;
            }
        };

        let variant = ContentVariant {
            selector: selector.to_string(),
            content: content.to_string(),
            content_type: content_type.unwrap_or_default(),
            page_path: None,
        };
        ContentSwitcher::apply_variant(
            self.host.surface.as_mut(),
            element,
            &variant,
            self.state.persona,
        );
        true
    }

    /// Register the hook the `before-send` option names
    pub fn register_before_send<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: FnMut(EventKind, Value) -> Option<Value> + 'static,
    {
        self.hooks.insert(name.into(), Box::new(hook));
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    /// Server said stop, no website id, opted out, host not allowed, or
    /// Do-Not-Track honored and set
    pub fn tracking_disabled(&self) -> bool {
        self.disabled
            || self.config.website_id.is_none()
            || self.opted_out()
            || !self.config.allows_host(self.encoder.hostname())
            || (self.config.do_not_track && self.context.has_do_not_track())
    }

    fn opted_out(&self) -> bool {
        match self.host.storage.get(&self.persona_config.disabled_key) {
            Ok(value) => value.is_some(),
            Err(e) => {
                trace!(error = %e, "opt-out check failed");
                false
            }
        }
    }

    fn send(&mut self, kind: EventKind, payload: Value) {
        if self.tracking_disabled() {
            return;
        }

        let payload = match self.config.before_send.as_deref() {
            Some(name) => match self.hooks.get_mut(name) {
                Some(hook) => hook(kind, payload),
                None => Some(payload),
            },
            None => Some(payload),
        };
        let Some(payload) = payload.filter(|p| !p.is_null()) else {
            trace!(kind = kind.as_str(), "payload vetoed");
            return;
        };

        let envelope = Envelope::new(kind, payload).with_cache(self.cache.clone());
        match self.host.transport.send(&envelope) {
            Ok(Some(response)) => {
                self.disabled = response.disabled;
                self.cache = response.cache;
                if response.session_id.is_some() {
                    self.session_id = response.session_id;
                }
            }
            Ok(None) => {}
            Err(e) => debug!(kind = kind.as_str(), error = %e, "send failed"),
        }
    }

    /// Flush the page, refresh features, classify, emit telemetry and the
    /// behavioral persona event
    fn classify_emit(&mut self) {
        if !self.persona_active {
            return;
        }
        let now = self.host.clock.now();

        self.state.checkpoint_page(now, &self.persona_config);
        BehaviorMeter::extract_features(&mut self.state, now);
        let storage: &mut dyn KeyValueStore = self.host.storage.as_mut();
        let result =
            PersonaEngine::calculate_persona(&mut self.state, &self.persona_config, now, Some(storage));

        if result.confidence < self.persona_config.min_emit_confidence {
            trace!(confidence = result.confidence, "below emit threshold");
            return;
        }

        let data = PersonalityData {
            persona: result.persona,
            confidence: result.confidence,
            scores: result.scores,
            page_visits: self.state.page_visits.clone(),
            behavior_features: self.state.behavior_features,
            feature_vector: FeatureVectorBuilder::build(&self.state, &self.persona_config, now),
            session_duration: self.state.elapsed_secs(now),
        };
        match self.encoder.personality(&data) {
            Ok(payload) => self.send(EventKind::Personality, payload),
            Err(e) => debug!(error = %e, "personality payload failed"),
        }

        self.dispatch(PersonaEvent {
            persona: result.persona,
            confidence: result.confidence,
            scores: result.scores,
            behavior_features: Some(self.state.behavior_features),
            source: EventSource::Behavioral,
        });
    }

    fn dispatch(&mut self, event: PersonaEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }

        let request = match (&self.config.website_id, &self.session_id) {
            (Some(website_id), Some(session_id)) => Some(VariantRequest {
                website_id: website_id.clone(),
                session_id: session_id.clone(),
            }),
            _ => None,
        };
        let path = self.current_path();
        self.switcher.on_persona_event(
            self.host.variants.as_mut(),
            request,
            self.host.surface.as_mut(),
            self.state.persona,
            &path,
        );
    }

    fn apply_variants(&mut self) -> usize {
        let path = self.current_path();
        self.switcher
            .apply_variants(self.host.surface.as_mut(), self.state.persona, &path)
    }

    fn current_path(&self) -> String {
        self.encoder
            .location()
            .map(|url| url.path.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::CollectResponse;
    use crate::host::{
        EnvelopeLog, ManualClock, MemoryDocument, MemoryElement, MemoryStorage,
        RecordingTransport, SharedDocument, StaticVariantSource,
    };
    use crate::navigation::History;
    use crate::switcher::{VariantResponse, VARIANT_ATTRIBUTE};
    use crate::types::{Category, CategoryScores, PersonaSnapshot};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    struct Harness {
        tracker: PersonaTracker,
        clock: ManualClock,
        log: EnvelopeLog,
        storage: MemoryStorage,
        document: SharedDocument,
        variants: StaticVariantSource,
    }

    impl Harness {
        fn advance(&mut self, ms: i64) {
            self.clock.advance(Duration::milliseconds(ms));
            self.tracker.tick();
        }

        fn sent(&self, kind: EventKind) -> Vec<Envelope> {
            self.log
                .borrow()
                .iter()
                .filter(|e| e.kind == kind)
                .cloned()
                .collect()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn site() -> TrackerConfig {
        TrackerConfig {
            website_id: Some("site-1".to_string()),
            ..Default::default()
        }
    }

    fn pricing_from_google() -> BrowserContext {
        BrowserContext::new("https://acme.io/pricing", 1440, 900)
            .with_referrer("https://www.google.com/search?q=acme+pricing")
            .with_title("Pricing")
    }

    fn harness_with(config: TrackerConfig, context: BrowserContext, storage: MemoryStorage) -> Harness {
        let collect = CollectResponse {
            disabled: false,
            cache: Some("cache-token".to_string()),
            session_id: Some("sess-1".to_string()),
        };
        harness_collecting(config, context, storage, collect)
    }

    fn harness_collecting(
        config: TrackerConfig,
        context: BrowserContext,
        storage: MemoryStorage,
        collect: CollectResponse,
    ) -> Harness {
        let clock = ManualClock::new(t0());
        let transport = RecordingTransport::new().with_response(collect);
        let log = transport.log();

        let mut page = MemoryDocument::new(900.0);
        page.push(MemoryElement::new(&["#hero"], 80.0).with_text("Ship faster"));
        page.push(MemoryElement::new(&["#cta"], 1800.0).with_text("Get started"));
        let document: SharedDocument = Rc::new(RefCell::new(page));

        let variants = StaticVariantSource::new(VariantResponse {
            persona: Some(Persona::ValueSeeker),
            confidence: Some(40),
            scores: None,
            variants: vec![ContentVariant {
                selector: "#cta".to_string(),
                content: "Compare plans".to_string(),
                content_type: ContentType::Text,
                page_path: None,
            }],
        });

        let host = HostBindings {
            clock: Rc::new(clock.clone()),
            storage: Box::new(storage.clone()),
            transport: Box::new(transport),
            variants: Box::new(variants.clone()),
            surface: Box::new(Rc::clone(&document)),
        };
        let tracker =
            PersonaTracker::new(config, PersonaConfig::default(), context, host).unwrap();

        Harness {
            tracker,
            clock,
            log,
            storage,
            document,
            variants,
        }
    }

    fn harness(context: BrowserContext) -> Harness {
        harness_with(site(), context, MemoryStorage::new())
    }

    #[test]
    fn test_google_pricing_visitor_is_value_seeker_immediately() {
        let mut h = harness(pricing_from_google());
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        h.tracker.on_persona_change(move |e| sink.borrow_mut().push(e.clone()));

        h.tracker.start();

        let view = h.tracker.get_persona();
        assert_eq!(view.persona, Persona::ValueSeeker);
        assert!(view.scores.value >= 8.0);
        assert_eq!(
            h.tracker.state().instant_signals.referrer_category,
            Some(Category::Value)
        );

        let events = events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, EventSource::Instant);
        assert_eq!(events[0].persona, Persona::ValueSeeker);

        let page_views = h.sent(EventKind::Event);
        assert_eq!(page_views.len(), 1);
        assert_eq!(page_views[0].payload["url"], "https://acme.io/pricing");
        assert_eq!(page_views[0].name(), None);
    }

    /// Storage and transport that note every call in one shared log
    struct Ordered<T> {
        inner: T,
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl KeyValueStore for Ordered<MemoryStorage> {
        fn get(&self, key: &str) -> Result<Option<String>, PersonaError> {
            self.calls.borrow_mut().push(format!("get:{key}"));
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), PersonaError> {
            self.calls.borrow_mut().push(format!("set:{key}"));
            self.inner.set(key, value)
        }

        fn remove(&mut self, key: &str) -> Result<(), PersonaError> {
            self.inner.remove(key)
        }
    }

    impl Transport for Ordered<RecordingTransport> {
        fn send(
            &mut self,
            envelope: &Envelope,
        ) -> Result<Option<crate::encoder::CollectResponse>, PersonaError> {
            self.calls
                .borrow_mut()
                .push(format!("send:{}", envelope.kind.as_str()));
            self.inner.send(envelope)
        }
    }

    #[test]
    fn test_instant_signals_are_extracted_before_first_send() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let host = HostBindings {
            clock: Rc::new(ManualClock::new(t0())),
            storage: Box::new(Ordered {
                inner: MemoryStorage::new(),
                calls: Rc::clone(&calls),
            }),
            transport: Box::new(Ordered {
                inner: RecordingTransport::new(),
                calls: Rc::clone(&calls),
            }),
            variants: Box::new(StaticVariantSource::empty()),
            surface: Box::new(MemoryDocument::new(900.0)),
        };
        let mut tracker =
            PersonaTracker::new(site(), PersonaConfig::default(), pricing_from_google(), host)
                .unwrap();

        tracker.start();

        let calls = calls.borrow();
        let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
        let first_send = position("send:event");
        assert!(position("get:persona.snapshot") < first_send);
        // the instant classification already persisted its snapshot
        assert!(position("set:persona.snapshot") < first_send);
        assert_eq!(tracker.get_persona().persona, Persona::ValueSeeker);
    }

    #[test]
    fn test_returning_visitor_is_seeded_from_storage() {
        let storage = MemoryStorage::new();
        let snapshot = PersonaSnapshot {
            persona: Persona::TrustSeeker,
            confidence: 80,
            scores: CategoryScores::default(),
            timestamp: 0,
        };
        storage
            .clone()
            .set("persona.snapshot", &serde_json::to_string(&snapshot).unwrap())
            .unwrap();
        let mut h = harness_with(site(), BrowserContext::new("https://acme.io/", 1440, 900), storage);
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        h.tracker.on_persona_change(move |e| sink.borrow_mut().push(e.clone()));

        h.tracker.start();

        let view = h.tracker.get_persona();
        assert_eq!(view.persona, Persona::TrustSeeker);
        assert_eq!(view.confidence, 70);
        assert!(h.tracker.state().instant_signals.is_returning);
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn test_cta_click_boosts_intent() {
        let mut h = harness(BrowserContext::new("https://acme.io/", 1440, 900));
        h.tracker.start();

        h.tracker
            .handle_click(&ClickEvent::on(ElementInfo::new("button", "Start Free Trial")));

        let state = h.tracker.state();
        assert_eq!(state.scores.intent, 5.0);
        assert_eq!(state.session_metrics.total_clicks, 1);
        let conversions = &state.session_metrics.conversion_events;
        assert_eq!(conversions.len(), 1);
        assert_eq!(conversions[0].kind, "cta_click");
        assert_eq!(conversions[0].text, "start free trial");
    }

    #[test]
    fn test_periodic_emit_sends_personality() {
        let mut h = harness(pricing_from_google());
        h.tracker.start();

        h.advance(5_000);

        let sent = h.sent(EventKind::Personality);
        assert_eq!(sent.len(), 1);
        let data = sent[0].data().unwrap();
        assert_eq!(data["persona"], "value-seeker");
        assert!(data["confidence"].as_u64().unwrap() >= 10);
        assert_eq!(data["pageVisits"]["value"][0]["path"], "/pricing");
        assert_eq!(data["featureVector"]["referrerCategory"], "value");
        assert_eq!(data["sessionDuration"], 5.0);
        assert_eq!(sent[0].cache.as_deref(), Some("cache-token"));
    }

    #[test]
    fn test_low_confidence_is_not_emitted() {
        let mut h = harness(BrowserContext::new("https://acme.io/blog", 1440, 900));
        h.tracker.start();

        h.advance(5_000);

        assert_eq!(h.tracker.get_persona().persona, Persona::Explorer);
        assert!(h.sent(EventKind::Personality).is_empty());
    }

    #[test]
    fn test_do_not_track_disables_everything() {
        let config = TrackerConfig {
            do_not_track: true,
            ..site()
        };
        let context = pricing_from_google().with_do_not_track("1");
        let mut h = harness_with(config, context, MemoryStorage::new());

        h.tracker.start();
        h.advance(10_000);

        assert!(h.tracker.tracking_disabled());
        assert!(!h.tracker.is_persona_active());
        assert!(h.log.borrow().is_empty());
        assert_eq!(h.tracker.get_persona().persona, Persona::Explorer);
    }

    #[test]
    fn test_opt_out_and_domain_allow_list() {
        let storage = MemoryStorage::new();
        storage.clone().set("persona.disabled", "1").unwrap();
        let mut h = harness_with(site(), pricing_from_google(), storage);
        h.tracker.start();
        assert!(h.log.borrow().is_empty());

        let config = TrackerConfig {
            domains: vec!["acme.com".to_string()],
            ..site()
        };
        let mut h = harness_with(config, pricing_from_google(), MemoryStorage::new());
        h.tracker.start();
        assert!(h.tracker.tracking_disabled());
        assert!(h.log.borrow().is_empty());
    }

    #[test]
    fn test_missing_website_id_sends_nothing() {
        let mut h = harness_with(
            TrackerConfig::default(),
            pricing_from_google(),
            MemoryStorage::new(),
        );
        h.tracker.init();
        h.tracker.track(Some("manual"), None);
        assert!(h.log.borrow().is_empty());
    }

    #[test]
    fn test_before_send_hook_can_veto_and_rewrite() {
        let config = TrackerConfig {
            before_send: Some("scrub".to_string()),
            ..site()
        };
        let mut h = harness_with(config, pricing_from_google(), MemoryStorage::new());
        h.tracker.register_before_send("scrub", |kind, mut payload| {
            if kind == EventKind::Personality {
                return None;
            }
            payload["referrer"] = Value::String(String::new());
            Some(payload)
        });

        h.tracker.start();
        h.advance(5_000);

        assert!(h.sent(EventKind::Personality).is_empty());
        let page_views = h.sent(EventKind::Event);
        assert_eq!(page_views[0].payload["referrer"], "");
    }

    #[test]
    fn test_spa_navigation_flushes_page_and_tracks_view() {
        let mut h = harness(pricing_from_google());
        let mut history = History::new("https://acme.io/pricing");
        h.tracker.attach(&mut history);
        h.tracker.start();

        h.clock.advance(Duration::seconds(12));
        history.push_state("/about");
        h.tracker.tick();
        h.advance(300);

        let state = h.tracker.state();
        assert_eq!(state.current_page.path, "/about");
        assert_eq!(state.session_metrics.page_count, 2);
        let pricing = &state.page_visits[&crate::types::PageCategory::Value][0];
        assert!((pricing.time_spent - 12.0).abs() < 1e-9);

        let page_views: Vec<_> = h
            .sent(EventKind::Event)
            .into_iter()
            .filter(|e| e.name().is_none())
            .collect();
        assert_eq!(page_views.len(), 2);
        assert_eq!(page_views[1].payload["url"], "https://acme.io/about");
        assert_eq!(page_views[1].payload["referrer"], "https://acme.io/pricing");
    }

    #[test]
    fn test_late_navigation_splits_dwell_time_where_it_happened() {
        let mut h = harness(BrowserContext::new("https://acme.io/", 1440, 900));
        let mut history = History::new("https://acme.io/");
        h.tracker.attach(&mut history);
        h.tracker.start();

        h.clock.advance(Duration::seconds(10));
        history.push_state("/pricing");

        // the host forwards nothing else until much later
        h.clock.advance(Duration::seconds(20));
        h.tracker.handle_scroll(ScrollSample {
            scroll_y: 300.0,
            viewport_height: 900.0,
            document_height: 3_000.0,
        });

        let state = h.tracker.state();
        assert_eq!(state.current_page.path, "/pricing");
        assert_eq!(state.current_page.start_time, t0() + Duration::seconds(10));
        let home = &state.page_visits[&crate::types::PageCategory::General][0];
        assert_eq!(home.path, "/");
        assert!((home.time_spent - 10.0).abs() < 1e-9);

        h.advance(0);
        let pricing = &h.tracker.state().page_visits[&crate::types::PageCategory::Value][0];
        assert!((pricing.time_spent - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_replace_state_tracks_view_without_new_page() {
        let mut h = harness(pricing_from_google());
        h.tracker.start();

        h.tracker.handle_navigation(Navigation::replace("/pricing?plan=team"));
        h.advance(300);

        assert_eq!(h.tracker.state().session_metrics.page_count, 1);
        assert_eq!(h.sent(EventKind::Event).len(), 2);

        // same URL again: nothing new
        h.tracker.handle_navigation(Navigation::replace("/pricing?plan=team"));
        h.advance(300);
        assert_eq!(h.sent(EventKind::Event).len(), 2);
    }

    #[test]
    fn test_hide_flushes_once() {
        let mut h = harness(pricing_from_google());
        h.tracker.start();
        h.clock.advance(Duration::seconds(3));

        h.tracker.handle_visibility(Visibility::Hidden);
        h.tracker.handle_visibility(Visibility::Hidden);

        assert_eq!(h.sent(EventKind::Personality).len(), 1);
    }

    #[test]
    fn test_form_submit_is_a_conversion() {
        let mut h = harness(pricing_from_google());
        h.tracker.start();
        h.clock.advance(Duration::seconds(42));

        h.tracker.handle_submit(&FormInfo {
            action: "https://acme.io/api/register".to_string(),
            id: "signup-form".to_string(),
            class_name: String::new(),
        });

        let conversions = h.sent(EventKind::Conversion);
        assert_eq!(conversions.len(), 1);
        assert_eq!(conversions[0].name(), Some("conversion:signup"));
        let data = conversions[0].data().unwrap();
        assert_eq!(data["eventType"], "signup");
        assert_eq!(data["formId"], "signup-form");
        assert_eq!(data["timeToConvert"], 42);
        assert_eq!(data["persona"], "value-seeker");

        let follow_up = h
            .sent(EventKind::Event)
            .into_iter()
            .find(|e| e.name() == Some("conversion:signup"))
            .unwrap();
        assert_eq!(follow_up.payload["data"]["persona"], "value-seeker");
        assert_eq!(follow_up.payload["data"]["value"], Value::Null);
    }

    #[test]
    fn test_infer_conversion_type() {
        let form = |action: &str, id: &str, class_name: &str| FormInfo {
            action: action.to_string(),
            id: id.to_string(),
            class_name: class_name.to_string(),
        };
        assert_eq!(infer_conversion_type(&form("/join", "", "")), "signup");
        assert_eq!(infer_conversion_type(&form("", "inquiry", "")), "contact");
        assert_eq!(infer_conversion_type(&form("", "", "Book-Demo")), "demo_request");
        assert_eq!(infer_conversion_type(&form("/subscribe", "", "")), "newsletter");
        assert_eq!(infer_conversion_type(&form("/checkout", "", "")), "purchase");
        assert_eq!(infer_conversion_type(&form("/search", "q", "")), "form_submit");
    }

    #[test]
    fn test_first_persona_event_applies_variants_below_fold() {
        let mut h = harness(pricing_from_google());
        h.tracker.start();

        let requests = h.variants.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].session_id, "sess-1");

        let doc = h.document.borrow();
        assert_eq!(doc.element(0).text, "Ship faster");
        assert_eq!(doc.element(1).text, "Compare plans");
        assert_eq!(doc.element(1).attribute(VARIANT_ATTRIBUTE), Some("value-seeker"));
        drop(doc);

        // later persona events do not refetch
        h.advance(5_000);
        assert_eq!(h.variants.requests().len(), 1);

        // the server's view is kept aside, never written into local state
        let remote = h.tracker.switcher().remote_profile().unwrap();
        assert_eq!(remote.confidence, Some(40));
        assert_eq!(h.tracker.state().persona, Persona::ValueSeeker);
    }

    #[test]
    fn test_persona_event_without_session_spends_variant_fetch() {
        let collect = CollectResponse {
            cache: Some("cache-token".to_string()),
            ..Default::default()
        };
        let mut h = harness_collecting(site(), pricing_from_google(), MemoryStorage::new(), collect);
        h.tracker.start();

        assert_eq!(h.tracker.session_id(), None);
        assert!(h.variants.requests().is_empty());

        // later persona events do not retry, even once a session exists
        h.tracker.session_id = Some("sess-late".to_string());
        h.advance(5_000);
        assert!(!h.sent(EventKind::Personality).is_empty());
        assert!(h.variants.requests().is_empty());
        assert_eq!(h.document.borrow().element(1).text, "Get started");
        assert_eq!(h.tracker.switcher().applied_selectors().count(), 0);
    }

    #[test]
    fn test_server_disable_stops_sending() {
        let mut h = harness(pricing_from_google());
        h.tracker.start();
        let before = h.log.borrow().len();

        h.tracker.track_payload(json!({"website": "site-1", "name": "x"}));
        assert_eq!(h.log.borrow().len(), before + 1);

        // simulate a collector answer that disables tracking
        h.tracker.disabled = true;
        h.tracker.track(Some("ignored"), None);
        assert_eq!(h.log.borrow().len(), before + 1);
    }

    #[test]
    fn test_identify_sets_id_and_clears_cache() {
        let mut h = harness(pricing_from_google());
        h.tracker.start();
        assert_eq!(h.tracker.cache(), Some("cache-token"));

        h.tracker.identify(Some("user-7"), Some(json!({"plan": "pro"})));

        let identify = &h.sent(EventKind::Identify)[0];
        assert_eq!(identify.payload["id"], "user-7");
        assert_eq!(identify.payload["data"]["plan"], "pro");
        assert_eq!(identify.cache, None);
    }

    #[test]
    fn test_declared_click_events() {
        let mut h = harness(pricing_from_google());
        h.tracker.start();

        let button = ElementInfo::new("button", "Download")
            .with_attribute(EVENT_ATTRIBUTE, "download-report")
            .with_attribute("data-persona-event-format", "pdf");
        h.tracker.handle_click(&ClickEvent::on(button));

        // a link without the attribute swallows declarations on its children
        let child = ElementInfo::new("span", "Docs").with_attribute(EVENT_ATTRIBUTE, "docs");
        h.tracker.handle_click(&ClickEvent {
            element: child,
            actionable: Some(ElementInfo::new("a", "Docs").with_href("/docs")),
        });

        let named: Vec<_> = h
            .sent(EventKind::Event)
            .into_iter()
            .filter_map(|e| e.name().map(str::to_string).map(|n| (n, e.payload["data"].clone())))
            .collect();
        assert_eq!(named, vec![("download-report".to_string(), json!({"format": "pdf"}))]);
    }

    #[test]
    fn test_switch_content_targets_first_match() {
        let mut h = harness(BrowserContext::new("https://acme.io/", 1440, 900));
        h.tracker.start();

        assert!(h.tracker.switch_content("#hero", "Built for teams", None));
        assert!(!h.tracker.switch_content("#missing", "x", None));

        let doc = h.document.borrow();
        assert_eq!(doc.element(0).text, "Built for teams");
        assert_eq!(doc.element(0).attribute(VARIANT_ATTRIBUTE), Some("explorer"));
    }

    #[test]
    fn test_shutdown_cancels_timers() {
        let mut h = harness(pricing_from_google());
        h.tracker.start();
        h.tracker.shutdown();

        h.advance(60_000);

        assert_eq!(h.tracker.next_deadline(), None);
        assert!(h.sent(EventKind::Personality).is_empty());
    }

    #[test]
    fn test_snapshot_persisted_above_threshold() {
        let mut h = harness(pricing_from_google());
        h.tracker.start();

        // 8 value points alone lead with confidence 44
        assert!(h.tracker.get_persona().confidence > 40);
        let stored = SnapshotStore::new("persona.snapshot").load(&h.storage).unwrap();
        assert_eq!(stored.persona, Persona::ValueSeeker);
    }
}
