//! Capturing a rendered page from the browser
//!
//! The browser owns layout and the cascade, so instead of re-deriving styles
//! the page serializes its own element tree together with each element's
//! computed style. The snapshot is rebuilt into a [`Document`] and the
//! extraction runs on the Rust side.

use crate::dom::{Document, Element, NodeId};
use crate::style::ComputedStyle;
use crate::{Result, VislinkError};
use chromiumoxide::Page;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// JavaScript evaluated in the page to serialize the rendered tree.
///
/// Elements are listed in document order, so a parent always precedes its
/// children. `parent` is `null` for the document element.
pub const SNAPSHOT_SCRIPT: &str = r#"
    (() => {
        const all = Array.from(document.getElementsByTagName('*'));
        const index = new Map(all.map((el, i) => [el, i]));
        const nodes = all.map(el => {
            const s = window.getComputedStyle(el);
            const isAnchor = el.tagName === 'A';
            return {
                tag: el.tagName,
                parent: el.parentElement ? index.get(el.parentElement) : null,
                href: isAnchor ? el.getAttribute('href') : null,
                text: isAnchor ? el.innerText : null,
                style: {
                    display: s.display,
                    visibility: s.visibility,
                    opacity: s.opacity,
                    fontSize: s.fontSize,
                    fontWeight: s.fontWeight,
                    fontFamily: s.fontFamily,
                    color: s.color,
                    font: s.font,
                    padding: s.padding,
                    margin: s.margin,
                    backgroundColor: s.backgroundColor
                }
            };
        });
        return {
            location: document.location.href,
            body: document.body ? index.get(document.body) : null,
            nodes
        };
    })()
"#;

/// One element as serialized by [`SNAPSHOT_SCRIPT`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub tag: String,
    pub parent: Option<usize>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    pub style: Option<ComputedStyle>,
}

/// The rendered page as serialized by [`SNAPSHOT_SCRIPT`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub location: String,
    pub body: Option<usize>,
    pub nodes: Vec<SnapshotNode>,
}

impl PageSnapshot {
    /// Rebuild the element tree.
    ///
    /// Fails when a node references a parent that does not come before it.
    pub fn into_document(self) -> Result<Document> {
        let mut doc = Document::new(self.location);
        let mut ids: Vec<NodeId> = Vec::with_capacity(self.nodes.len());

        for (i, node) in self.nodes.into_iter().enumerate() {
            let parent = match node.parent {
                None => Document::ROOT,
                Some(p) if p < i => ids[p],
                Some(p) => {
                    return Err(VislinkError::SnapshotError(format!(
                        "node {} references parent {} that does not precede it",
                        i, p
                    )))
                }
            };

            let mut element = Element::new(node.tag).with_text(node.text.unwrap_or_default());
            if let Some(href) = node.href {
                element = element.with_attr("href", href);
            }
            element.style = node.style;
            ids.push(doc.append_element(parent, element));
        }

        if let Some(body) = self.body {
            let id = ids.get(body).copied().ok_or_else(|| {
                VislinkError::SnapshotError(format!("body index {} out of range", body))
            })?;
            doc.set_body(id);
        }

        Ok(doc)
    }
}

/// Serialize the rendered tree of `page`
pub async fn capture(page: &Page) -> Result<PageSnapshot> {
    let snapshot: PageSnapshot = page
        .evaluate(SNAPSHOT_SCRIPT)
        .await
        .map_err(|e| {
            VislinkError::BrowserError(format!("Failed to evaluate snapshot script: {}", e))
        })?
        .into_value()
        .map_err(|e| VislinkError::SnapshotError(e.to_string()))?;

    debug!(
        "Captured snapshot of {} with {} elements",
        snapshot.location,
        snapshot.nodes.len()
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::extract_links;

    fn snapshot_json() -> serde_json::Value {
        let style = serde_json::to_value(ComputedStyle::default()).unwrap();
        let mut hidden = style.clone();
        hidden["display"] = "none".into();
        serde_json::json!({
            "location": "https://example.com/a/b",
            "body": 2,
            "nodes": [
                { "tag": "HTML", "parent": null, "href": null, "text": null, "style": style },
                { "tag": "HEAD", "parent": 0, "href": null, "text": null, "style": hidden },
                { "tag": "BODY", "parent": 0, "href": null, "text": null, "style": style },
                { "tag": "DIV", "parent": 2, "href": null, "text": null, "style": style },
                { "tag": "A", "parent": 3, "href": "../c", "text": "Go\u{a0}Home", "style": style }
            ]
        })
    }

    #[test]
    fn test_snapshot_into_document() {
        let snapshot: PageSnapshot = serde_json::from_value(snapshot_json()).unwrap();
        let mut doc = snapshot.into_document().unwrap();
        assert_eq!(doc.tag_name(doc.body().unwrap()), Some("BODY"));

        let links = extract_links(&mut doc).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].css_sel, "html > body > div > a");
        assert_eq!(links[0].url, "https://example.com/c");
        assert_eq!(links[0].text, "Go Home");
    }

    #[test]
    fn test_snapshot_rejects_forward_parent() {
        let mut json = snapshot_json();
        json["nodes"][3]["parent"] = 4.into();
        let snapshot: PageSnapshot = serde_json::from_value(json).unwrap();
        assert!(matches!(
            snapshot.into_document(),
            Err(VislinkError::SnapshotError(_))
        ));
    }

    #[test]
    fn test_snapshot_bad_body_index() {
        let mut json = snapshot_json();
        json["body"] = 99.into();
        let snapshot: PageSnapshot = serde_json::from_value(json).unwrap();
        assert!(snapshot.into_document().is_err());
    }

    #[test]
    fn test_snapshot_missing_style_surfaces_in_extraction() {
        let mut json = snapshot_json();
        json["nodes"][4]["style"] = serde_json::Value::Null;
        let snapshot: PageSnapshot = serde_json::from_value(json).unwrap();
        let mut doc = snapshot.into_document().unwrap();
        assert!(extract_links(&mut doc).is_err());
    }
}
