//! Structured page snapshots produced by the page observer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::surface::Point;

/// Viewport height assumed when a snapshot does not report one.
pub const DEFAULT_VIEWPORT_HEIGHT: i64 = 800;

/// Snapshot of the interactive surface of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    #[serde(alias = "interactiveElements")]
    pub elements: Vec<PageElement>,
    pub forms: Vec<FormInfo>,
    pub page_text: String,
    pub viewport: Viewport,
}

/// One candidate interactive element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageElement {
    /// Lower-case tag name.
    #[serde(rename = "type")]
    pub tag: String,
    pub label: String,
    pub selector: String,
    /// Centre of the element in viewport coordinates.
    pub position: Point,
    pub attributes: HashMap<String, String>,
    pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormInfo {
    pub action: String,
    pub method: String,
    pub inputs: Vec<FormInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormInput {
    #[serde(rename = "type")]
    pub input_type: String,
    pub name: String,
    pub placeholder: String,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Viewport {
    pub width: i64,
    pub height: i64,
    pub scroll_x: i64,
    pub scroll_y: i64,
}

impl PageSnapshot {
    /// Resolve a CSS-like locator to the centre of a snapshot element.
    ///
    /// Matching is done against the snapshot, never the live page: an exact
    /// selector match wins, then `#id` against the element's id attribute.
    pub fn locate(&self, selector: &str) -> Option<Point> {
        let selector = selector.trim();
        if selector.is_empty() {
            return None;
        }

        if let Some(element) = self.elements.iter().find(|e| e.selector == selector) {
            return Some(element.position);
        }

        let id = selector.strip_prefix('#')?;
        self.elements
            .iter()
            .find(|e| e.attributes.get("id").map(String::as_str) == Some(id))
            .map(|e| e.position)
    }

    /// Height of one scroll page.
    pub fn page_height(&self) -> i64 {
        if self.viewport.height > 0 {
            self.viewport.height
        } else {
            DEFAULT_VIEWPORT_HEIGHT
        }
    }
}

impl PageElement {
    pub fn new(tag: impl Into<String>, selector: impl Into<String>, position: Point) -> Self {
        Self {
            tag: tag.into(),
            selector: selector.into(),
            position,
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> PageSnapshot {
        PageSnapshot {
            url: "https://example.com".to_string(),
            elements: vec![
                PageElement::new("button", ".search-btn", Point::new(10, 20)).with_label("Search"),
                PageElement::new("input", "[data-testid=\"q\"]", Point::new(30, 40))
                    .with_attribute("id", "query"),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_locate_exact_selector() {
        assert_eq!(snapshot().locate(".search-btn"), Some(Point::new(10, 20)));
        assert_eq!(snapshot().locate("  .search-btn "), Some(Point::new(10, 20)));
    }

    #[test]
    fn test_locate_by_id_attribute() {
        assert_eq!(snapshot().locate("#query"), Some(Point::new(30, 40)));
    }

    #[test]
    fn test_locate_missing() {
        assert_eq!(snapshot().locate("#missing"), None);
        assert_eq!(snapshot().locate(""), None);
        assert_eq!(snapshot().locate("div.nothing"), None);
    }

    #[test]
    fn test_page_height_fallback() {
        let mut snap = snapshot();
        assert_eq!(snap.page_height(), DEFAULT_VIEWPORT_HEIGHT);
        snap.viewport.height = 900;
        assert_eq!(snap.page_height(), 900);
    }

    #[test]
    fn test_deserialize_scanner_payload() {
        let snap: PageSnapshot = serde_json::from_str(
            r##"{
                "url": "https://shop.example",
                "title": "Shop",
                "interactiveElements": [
                    {"type": "a", "label": "Cart", "selector": "#cart",
                     "position": {"x": 5, "y": 6}, "attributes": {"id": "cart"}, "index": 3}
                ],
                "forms": [{"action": "/search", "method": "get",
                           "inputs": [{"type": "text", "name": "q", "placeholder": "", "required": false}]}],
                "pageText": "Welcome",
                "viewport": {"width": 1024, "height": 768, "scrollX": 0, "scrollY": 120}
            }"##,
        )
        .unwrap();
        assert_eq!(snap.elements.len(), 1);
        assert_eq!(snap.elements[0].tag, "a");
        assert_eq!(snap.forms[0].inputs[0].name, "q");
        assert_eq!(snap.viewport.scroll_y, 120);
        assert_eq!(snap.locate("#cart"), Some(Point::new(5, 6)));
    }
}
