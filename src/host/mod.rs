//! Host collaborators
//!
//! The classifier runs inside someone else's page. Everything it needs from that
//! environment (time, local storage, the collect endpoint, the variant API and
//! the DOM) is reached through the traits below. In-memory implementations are
//! provided for replay, tests and embedding hosts that bridge to a real browser.

mod clock;
mod document;
mod storage;
mod transport;
mod variants;

pub use clock::{ManualClock, SystemClock};
pub use document::{MemoryDocument, MemoryElement, SharedDocument};
pub use storage::{DisabledStorage, MemoryStorage};
pub use transport::{EnvelopeLog, RecordingTransport};
pub use variants::StaticVariantSource;

use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::encoder::{CollectResponse, Envelope};
use crate::error::PersonaError;
use crate::switcher::{VariantRequest, VariantResponse};

/// Source of the current instant
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    /// Local UTC offset, used for the time-of-day signal
    fn local_offset(&self) -> FixedOffset {
        Utc.fix()
    }
}

/// Browser-local key-value storage (`localStorage`)
///
/// Every call may fail: storage can be disabled, full or unavailable in
/// private browsing.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersonaError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), PersonaError>;
    fn remove(&mut self, key: &str) -> Result<(), PersonaError>;
}

/// Fire-and-forget delivery of tracker envelopes to the collect endpoint
pub trait Transport {
    /// Deliver one envelope. A collector may answer with a response that
    /// disables tracking or hands out a session cache token.
    fn send(&mut self, envelope: &Envelope) -> Result<Option<CollectResponse>, PersonaError>;
}

/// Server API returning content variants for the visitor's session
pub trait VariantSource {
    fn fetch(&mut self, request: &VariantRequest) -> Result<VariantResponse, PersonaError>;
}

/// Opaque reference to an element returned by [`ContentSurface::query_all`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub usize);

/// Current scroll position and viewport size
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    /// `window.scrollY`
    pub scroll_y: f64,
    /// `window.innerHeight`
    pub inner_height: f64,
}

/// The slice of the DOM the content switcher reads and mutates
pub trait ContentSurface {
    fn viewport(&self) -> Viewport;

    /// All elements matching `selector`, in document order
    fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>, PersonaError>;

    /// First element matching `selector`
    fn query(&self, selector: &str) -> Result<Option<ElementHandle>, PersonaError> {
        Ok(self.query_all(selector)?.into_iter().next())
    }

    /// `getBoundingClientRect().top`, relative to the viewport
    fn bounding_top(&self, element: ElementHandle) -> f64;

    fn set_text(&mut self, element: ElementHandle, text: &str);
    fn set_html(&mut self, element: ElementHandle, html: &str);
    fn set_class_name(&mut self, element: ElementHandle, class_name: &str);

    /// Set an attribute. `None` is an absent value, which browser hosts coerce
    /// to the string `"undefined"`.
    fn set_attribute(&mut self, element: ElementHandle, name: &str, value: Option<&str>);
}
