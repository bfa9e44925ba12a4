//! Host page context and input event types
//!
//! The tracker never touches a real browser. The host describes the page once
//! (`BrowserContext`) and then forwards scroll, click, form and visibility
//! events using the plain data types below.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::normalizer::PageUrl;

/// Page-load snapshot of the browser environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserContext {
    /// Full location href
    pub url: String,
    /// `document.referrer`
    #[serde(default)]
    pub referrer: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Viewport width used for device classification
    pub screen_width: u32,
    pub screen_height: u32,
    /// Raw Do-Not-Track value (`navigator.doNotTrack` and friends)
    #[serde(default)]
    pub do_not_track: Option<String>,
}

fn default_language() -> String {
    "en-US".to_string()
}

impl BrowserContext {
    pub fn new(url: impl Into<String>, screen_width: u32, screen_height: u32) -> Self {
        Self {
            url: url.into(),
            referrer: String::new(),
            title: String::new(),
            language: default_language(),
            screen_width,
            screen_height,
            do_not_track: None,
        }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = referrer.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_do_not_track(mut self, value: impl Into<String>) -> Self {
        self.do_not_track = Some(value.into());
        self
    }

    /// `"WxH"` as reported in every payload
    pub fn screen(&self) -> String {
        format!("{}x{}", self.screen_width, self.screen_height)
    }

    /// Whether the browser asks not to be tracked
    pub fn has_do_not_track(&self) -> bool {
        matches!(self.do_not_track.as_deref(), Some("1") | Some("yes"))
    }

    pub fn page_url(&self) -> Option<PageUrl> {
        PageUrl::parse(&self.url).ok()
    }
}

/// Scroll position report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollSample {
    /// `window.scrollY`
    pub scroll_y: f64,
    /// `window.innerHeight`
    pub viewport_height: f64,
    /// `document.body.scrollHeight`
    pub document_height: f64,
}

impl ScrollSample {
    /// Percentage of the document seen so far, rounded
    pub fn depth_percent(&self) -> u32 {
        if self.document_height <= 0.0 {
            return 0;
        }
        let depth = ((self.scroll_y + self.viewport_height) / self.document_height * 100.0).round();
        depth.clamp(0.0, 100.0) as u32
    }
}

/// Element description forwarded with clicks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Lower-case tag name
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ElementInfo {
    pub fn new(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_lowercase(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// A click, with the clicked element and its nearest `a`/`button` ancestor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub element: ElementInfo,
    /// `element.closest('a, button')`
    #[serde(default)]
    pub actionable: Option<ElementInfo>,
}

impl ClickEvent {
    /// Click on a link or button that is its own target
    pub fn on(element: ElementInfo) -> Self {
        Self {
            actionable: Some(element.clone()),
            element,
        }
    }
}

/// Submitted form attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormInfo {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub class_name: String,
}

/// `document.visibilityState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_do_not_track_values() {
        let ctx = BrowserContext::new("https://e.com/", 1280, 800);
        assert!(!ctx.has_do_not_track());
        assert!(ctx.clone().with_do_not_track("1").has_do_not_track());
        assert!(ctx.clone().with_do_not_track("yes").has_do_not_track());
        assert!(!ctx.with_do_not_track("0").has_do_not_track());
    }

    #[test]
    fn test_scroll_depth() {
        let sample = ScrollSample {
            scroll_y: 600.0,
            viewport_height: 800.0,
            document_height: 2000.0,
        };
        assert_eq!(sample.depth_percent(), 70);

        let empty = ScrollSample {
            scroll_y: 0.0,
            viewport_height: 800.0,
            document_height: 0.0,
        };
        assert_eq!(empty.depth_percent(), 0);
    }

    #[test]
    fn test_context_deserialization_defaults() {
        let json = r#"{"url": "https://e.com/pricing", "screenWidth": 390, "screenHeight": 844}"#;
        let ctx: BrowserContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.language, "en-US");
        assert_eq!(ctx.screen(), "390x844");
        assert_eq!(ctx.page_url().unwrap().path, "/pricing");
    }
}
