//! In-memory content surface
//!
//! A flat list of elements, each tagged with the selectors it answers to and
//! its top offset in document coordinates. Good enough to drive the content
//! switcher from tests and recorded sessions.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::{ContentSurface, ElementHandle, Viewport};
use crate::error::PersonaError;

/// Value browsers store when `setAttribute` receives `undefined`
const UNDEFINED_ATTRIBUTE: &str = "undefined";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryElement {
    /// Selectors this element matches (`#id`, `.class`, `tag`, ...)
    pub selectors: Vec<String>,
    /// Offset of the element's top edge from the top of the document
    pub top: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl MemoryElement {
    pub fn new(selectors: &[&str], top: f64) -> Self {
        Self {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            top,
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn matches(&self, selector: &str) -> bool {
        self.selectors.iter().any(|s| s == selector)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDocument {
    pub elements: Vec<MemoryElement>,
    #[serde(default)]
    pub scroll_y: f64,
    pub inner_height: f64,
}

impl MemoryDocument {
    pub fn new(inner_height: f64) -> Self {
        Self {
            elements: Vec::new(),
            scroll_y: 0.0,
            inner_height,
        }
    }

    pub fn push(&mut self, element: MemoryElement) -> ElementHandle {
        self.elements.push(element);
        ElementHandle(self.elements.len() - 1)
    }

    pub fn scroll_to(&mut self, scroll_y: f64) {
        self.scroll_y = scroll_y.max(0.0);
    }

    /// Panics when `index` is out of range
    pub fn element(&self, index: usize) -> &MemoryElement {
        &self.elements[index]
    }

    pub fn element_mut(&mut self, index: usize) -> &mut MemoryElement {
        &mut self.elements[index]
    }

    fn get_mut(&mut self, element: ElementHandle) -> Option<&mut MemoryElement> {
        self.elements.get_mut(element.0)
    }
}

impl ContentSurface for MemoryDocument {
    fn viewport(&self) -> Viewport {
        Viewport {
            scroll_y: self.scroll_y,
            inner_height: self.inner_height,
        }
    }

    /// Comma-separated selector lists match any of their parts
    fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>, PersonaError> {
        let parts: Vec<&str> = selector
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            return Err(PersonaError::InvalidSelector(selector.to_string()));
        }

        Ok(self
            .elements
            .iter()
            .enumerate()
            .filter(|(_, el)| parts.iter().any(|p| el.matches(p)))
            .map(|(i, _)| ElementHandle(i))
            .collect())
    }

    fn bounding_top(&self, element: ElementHandle) -> f64 {
        self.elements
            .get(element.0)
            .map(|el| el.top - self.scroll_y)
            .unwrap_or(0.0)
    }

    fn set_text(&mut self, element: ElementHandle, text: &str) {
        if let Some(el) = self.get_mut(element) {
            el.text = text.to_string();
        }
    }

    fn set_html(&mut self, element: ElementHandle, html: &str) {
        if let Some(el) = self.get_mut(element) {
            el.html = html.to_string();
        }
    }

    fn set_class_name(&mut self, element: ElementHandle, class_name: &str) {
        if let Some(el) = self.get_mut(element) {
            el.class_name = class_name.to_string();
        }
    }

    fn set_attribute(&mut self, element: ElementHandle, name: &str, value: Option<&str>) {
        if let Some(el) = self.get_mut(element) {
            el.attributes.insert(
                name.to_string(),
                value.unwrap_or(UNDEFINED_ATTRIBUTE).to_string(),
            );
        }
    }
}

/// Document shared between a tracker and whoever inspects it afterwards
pub type SharedDocument = Rc<RefCell<MemoryDocument>>;

impl ContentSurface for SharedDocument {
    fn viewport(&self) -> Viewport {
        self.borrow().viewport()
    }

    fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>, PersonaError> {
        self.borrow().query_all(selector)
    }

    fn bounding_top(&self, element: ElementHandle) -> f64 {
        self.borrow().bounding_top(element)
    }

    fn set_text(&mut self, element: ElementHandle, text: &str) {
        self.borrow_mut().set_text(element, text);
    }

    fn set_html(&mut self, element: ElementHandle, html: &str) {
        self.borrow_mut().set_html(element, html);
    }

    fn set_class_name(&mut self, element: ElementHandle, class_name: &str) {
        self.borrow_mut().set_class_name(element, class_name);
    }

    fn set_attribute(&mut self, element: ElementHandle, name: &str, value: Option<&str>) {
        self.borrow_mut().set_attribute(element, name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_and_bounding_box() {
        let mut doc = MemoryDocument::new(800.0);
        doc.push(MemoryElement::new(&["#hero"], 120.0));
        doc.push(MemoryElement::new(&[".cta", "button"], 1500.0));

        assert_eq!(doc.query_all(".cta").unwrap(), vec![ElementHandle(1)]);
        assert_eq!(doc.query_all("#hero, button").unwrap().len(), 2);
        assert_eq!(doc.query("#missing").unwrap(), None);
        assert!(doc.query_all(" , ").is_err());

        doc.scroll_to(1000.0);
        assert_eq!(doc.bounding_top(ElementHandle(1)), 500.0);
    }

    #[test]
    fn test_document_from_json() {
        let doc: MemoryDocument = serde_json::from_str(
            r##"{"innerHeight": 900, "elements": [{"selectors": ["#cta"], "top": 1400}]}"##,
        )
        .unwrap();
        assert_eq!(doc.viewport().inner_height, 900.0);
        assert_eq!(doc.element(0).top, 1400.0);
    }
}
