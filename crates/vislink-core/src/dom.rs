//! Rendered document tree
//!
//! An index-stable arena of elements under a single document root. Node ids
//! never move: detaching an element only cuts its link to the parent, so a
//! snapshot of ids taken before a pass stays valid while the pass prunes.

use crate::style::ComputedStyle;
use std::fmt;

/// Stable handle to a node in a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An element as supplied by the rendering host
#[derive(Debug, Clone, Default)]
pub struct Element {
    /// Tag name as the host reports it (browsers use upper case for HTML)
    pub tag: String,
    /// Authored attributes in source order
    pub attributes: Vec<(String, String)>,
    /// Rendered text (`innerText`); only meaningful for anchors
    pub inner_text: String,
    /// Computed style, `None` when the host could not provide one
    pub style: Option<ComputedStyle>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.inner_text = text.into();
        self
    }

    pub fn with_style(mut self, style: ComputedStyle) -> Self {
        self.style = Some(style);
        self
    }

    /// Attribute value by case-insensitive name
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether this element is an HTML anchor (`tagName === "A"`).
    ///
    /// SVG `<a>` reports a lowercase tag and is not one.
    pub fn is_anchor(&self) -> bool {
        self.tag == "A"
    }
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    element: Option<Element>,
}

/// A rendered document: a parentless root with an element tree beneath it
#[derive(Debug, Clone)]
pub struct Document {
    location: String,
    nodes: Vec<Node>,
    body: Option<NodeId>,
}

impl Document {
    /// The document root, which is not an element
    pub const ROOT: NodeId = NodeId(0);

    /// Create an empty document at the given address
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                element: None,
            }],
            body: None,
        }
    }

    /// The document's current address, used to resolve relative links
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Append an element as the last child of `parent`
    pub fn append_element(&mut self, parent: NodeId, element: Element) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            element: Some(element),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Mark an element as the document body
    pub fn set_body(&mut self, id: NodeId) {
        self.body = Some(id);
    }

    pub fn body(&self) -> Option<NodeId> {
        self.body
    }

    /// Number of nodes, the root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id.0).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// The element at `id`, `None` for the document root
    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.nodes.get(id.0).and_then(|n| n.element.as_ref())
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        self.nodes.get_mut(id.0).and_then(|n| n.element.as_mut())
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.tag.as_str())
    }

    /// All elements below `root` in tree order, `root` itself excluded.
    ///
    /// The returned list is a copy; detaching elements afterwards does not
    /// change it.
    pub fn elements_under(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if self.element(id).is_some() {
                out.push(id);
            }
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// Remove `id` from its parent. Detaching twice is a no-op.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        self.nodes[parent.0].children.retain(|&c| c != id);
        self.nodes[id.0].parent = None;
    }

    /// Whether walking parents from `id` reaches the document root
    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == Self::ROOT {
                return true;
            }
            match self.parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Document, NodeId, NodeId, NodeId, NodeId) {
        let mut doc = Document::new("https://example.com/");
        let body = doc.append_element(Document::ROOT, Element::new("BODY"));
        doc.set_body(body);
        let div = doc.append_element(body, Element::new("DIV"));
        let a = doc.append_element(div, Element::new("A").with_attr("HREF", "/x"));
        let p = doc.append_element(body, Element::new("P"));
        (doc, body, div, a, p)
    }

    #[test]
    fn test_elements_under_is_tree_order() {
        let (doc, body, div, a, p) = sample();
        assert_eq!(doc.elements_under(body), vec![div, a, p]);
        assert_eq!(doc.elements_under(Document::ROOT), vec![body, div, a, p]);
    }

    #[test]
    fn test_detach_keeps_ids_stable() {
        let (mut doc, body, div, a, p) = sample();
        let snapshot = doc.elements_under(body);

        doc.detach(div);
        assert_eq!(doc.parent(div), None);
        assert_eq!(doc.children(body), &[p]);
        // the subtree keeps its own links
        assert_eq!(doc.parent(a), Some(div));
        assert!(!doc.is_connected(a));
        assert!(doc.is_connected(p));
        assert_eq!(doc.tag_name(a), Some("A"));
        assert_eq!(snapshot, vec![div, a, p]);

        doc.detach(div);
        assert_eq!(doc.children(body), &[p]);
    }

    #[test]
    fn test_attr_lookup_is_case_insensitive() {
        let (doc, _, _, a, _) = sample();
        let el = doc.element(a).unwrap();
        assert_eq!(el.attr("href"), Some("/x"));
        assert!(el.is_anchor());
        assert!(!Element::new("a").is_anchor());
        assert!(doc.element(Document::ROOT).is_none());
    }
}
