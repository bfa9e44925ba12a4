//! Content variant switcher
//!
//! Swaps page content for persona-specific variants served by the variant
//! API. A variant is only ever applied to regions the visitor has not seen yet
//! (below the fold) and each selector is consumed after its first successful
//! application, so content never changes under the visitor's eyes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, trace};

use crate::error::PersonaError;
use crate::host::{ContentSurface, ElementHandle, VariantSource};
use crate::types::{CategoryScores, ContentType, ContentVariant, Persona};

/// Attribute stamped on every element a variant was applied to
pub const VARIANT_ATTRIBUTE: &str = "data-persona-variant";

/// Query sent to the variant API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantRequest {
    pub website_id: String,
    pub session_id: String,
}

impl VariantRequest {
    /// `websiteId=..&sessionId=..`
    pub fn query_string(&self) -> String {
        format!("websiteId={}&sessionId={}", self.website_id, self.session_id)
    }
}

/// Variant API reply: the server's view of the session and the variants for
/// its persona
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantResponse {
    #[serde(default)]
    pub persona: Option<Persona>,
    #[serde(default)]
    pub confidence: Option<u8>,
    #[serde(default)]
    pub scores: Option<CategoryScores>,
    #[serde(default)]
    pub variants: Vec<ContentVariant>,
}

impl VariantResponse {
    /// Lenient parse: malformed variant entries are dropped, a missing or
    /// non-array `variants` field yields none, and an unknown persona is
    /// treated as absent.
    pub fn from_value(value: &Value) -> Result<Self, PersonaError> {
        let object = value.as_object().ok_or_else(|| {
            PersonaError::VariantFetchError("variant response is not an object".to_string())
        })?;

        let variants = object
            .get("variants")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match serde_json::from_value(item.clone()) {
                        Ok(variant) => Some(variant),
                        Err(e) => {
                            debug!(error = %e, "dropping malformed variant");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            persona: object
                .get("persona")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            confidence: object
                .get("confidence")
                .and_then(Value::as_u64)
                .map(|c| c.min(100) as u8),
            scores: object
                .get("scores")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            variants,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, PersonaError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }
}

/// Server-side persona view reported alongside the variants. Informational;
/// the local classification is never overwritten by it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteProfile {
    pub persona: Option<Persona>,
    pub confidence: Option<u8>,
    pub scores: Option<CategoryScores>,
}

/// Holds the fetched variants and the set of consumed selectors
#[derive(Debug, Default)]
pub struct ContentSwitcher {
    variants: Vec<ContentVariant>,
    applied: HashSet<String>,
    handled_first_event: bool,
    remote: Option<RemoteProfile>,
}

impl ContentSwitcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variants(&self) -> &[ContentVariant] {
        &self.variants
    }

    pub fn set_variants(&mut self, variants: Vec<ContentVariant>) {
        self.variants = variants;
    }

    pub fn is_applied(&self, selector: &str) -> bool {
        self.applied.contains(selector)
    }

    pub fn applied_selectors(&self) -> impl Iterator<Item = &str> {
        self.applied.iter().map(String::as_str)
    }

    pub fn remote_profile(&self) -> Option<&RemoteProfile> {
        self.remote.as_ref()
    }

    /// React to a persona event. Only the first event is handled: it fetches
    /// the variants when none are loaded and a session is known, then applies
    /// them. Returns whether this call handled the event.
    pub fn on_persona_event(
        &mut self,
        source: &mut dyn VariantSource,
        request: Option<VariantRequest>,
        surface: &mut dyn ContentSurface,
        persona: Persona,
        path: &str,
    ) -> bool {
        if self.handled_first_event {
            return false;
        }
        self.handled_first_event = true;

        if self.variants.is_empty() {
            match request {
                Some(request) => self.fetch_variants(source, &request),
                None => debug!("no session id yet, skipping variant fetch"),
            }
        }

        self.apply_variants(surface, persona, path);
        true
    }

    /// Load variants from `source`. Failures leave the list empty.
    pub fn fetch_variants(&mut self, source: &mut dyn VariantSource, request: &VariantRequest) {
        match source.fetch(request) {
            Ok(response) => {
                debug!(count = response.variants.len(), "fetched content variants");
                self.variants = response.variants;
                self.remote = Some(RemoteProfile {
                    persona: response.persona,
                    confidence: response.confidence,
                    scores: response.scores,
                });
            }
            Err(e) => {
                debug!(error = %e, "variant fetch failed");
                self.variants.clear();
            }
        }
    }

    /// Apply every unconsumed variant to its off-screen matches.
    ///
    /// Variants bound to another page path are skipped. Safe to call
    /// repeatedly. Returns the number of elements changed.
    pub fn apply_variants(
        &mut self,
        surface: &mut dyn ContentSurface,
        persona: Persona,
        path: &str,
    ) -> usize {
        let viewport = surface.viewport();
        let viewport_bottom = viewport.scroll_y + viewport.inner_height;
        let mut changed = 0;

        for variant in &self.variants {
            if self.applied.contains(&variant.selector) {
                continue;
            }
            if let Some(page_path) = &variant.page_path {
                if page_path != path {
                    continue;
                }
            }

            let elements = match surface.query_all(&variant.selector) {
                Ok(elements) => elements,
                Err(e) => {
                    debug!(selector = %variant.selector, error = %e, "skipping variant");
                    continue;
                }
            };

            for element in elements {
                let top = surface.bounding_top(element);
                let element_top = top + viewport.scroll_y;

                if element_top > viewport_bottom || top > viewport.inner_height {
                    Self::apply_variant(surface, element, variant, persona);
                    self.applied.insert(variant.selector.clone());
                    changed += 1;
                }
            }
        }

        if changed > 0 {
            trace!(changed, "applied content variants");
        }
        changed
    }

    /// Mutate one element according to the variant's content type and stamp
    /// it with the persona
    pub fn apply_variant(
        surface: &mut dyn ContentSurface,
        element: ElementHandle,
        variant: &ContentVariant,
        persona: Persona,
    ) {
        match variant.content_type {
            ContentType::Text => surface.set_text(element, &variant.content),
            ContentType::Html => surface.set_html(element, &variant.content),
            ContentType::Class => surface.set_class_name(element, &variant.content),
            ContentType::Attribute => {
                let (name, value) = split_attribute(&variant.content);
                if name.is_empty() {
                    debug!(content = %variant.content, "attribute variant without a name");
                } else {
                    surface.set_attribute(element, name, value);
                }
            }
        }
        surface.set_attribute(element, VARIANT_ATTRIBUTE, Some(persona.as_str()));
    }
}

/// `name=value` split on `=`: the name is the first segment and the value the
/// second. Further segments are dropped; a missing value is `None`.
fn split_attribute(content: &str) -> (&str, Option<&str>) {
    let mut parts = content.split('=');
    let name = parts.next().unwrap_or_default();
    (name, parts.next())
}
