//! Building a [`Document`] from raw markup
//!
//! Used when no browser renders the page. Styles come from the
//! [`StaticStyleResolver`]; anchor text is an approximation of `innerText`.

use crate::dom::{Document, Element, NodeId};
use crate::style::{ComputedStyle, StaticStyleResolver};
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Parse an HTML document located at `location`
pub fn parse_html(html: &str, location: &Url) -> Document {
    let parsed = Html::parse_document(html);
    let resolver = StaticStyleResolver::new();
    let mut doc = Document::new(location.as_str());

    for child in parsed.tree.root().children() {
        if let Some(el) = ElementRef::wrap(child) {
            append(&mut doc, &resolver, Document::ROOT, el, None);
        }
    }

    debug!(
        "Parsed {} bytes of HTML into {} nodes (body: {})",
        html.len(),
        doc.len(),
        doc.body().is_some()
    );
    doc
}

fn append(
    doc: &mut Document,
    resolver: &StaticStyleResolver,
    parent: NodeId,
    el: ElementRef,
    parent_style: Option<&ComputedStyle>,
) {
    let value = el.value();
    let style = resolver.resolve(value.name(), |name| value.attr(name), parent_style);

    // Only HTML elements report an uppercase tag name; SVG and MathML keep theirs
    let tag = if &*value.name.ns == HTML_NAMESPACE {
        value.name().to_ascii_uppercase()
    } else {
        value.name().to_string()
    };
    let mut element = Element::new(tag);
    element.attributes = value
        .attrs()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect();
    if element.is_anchor() {
        element.inner_text = rendered_text(resolver, el, &style);
    }
    element.style = Some(style.clone());

    let id = doc.append_element(parent, element);
    if value.name() == "body" && doc.body().is_none() {
        doc.set_body(id);
    }

    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            append(doc, resolver, id, child_el, Some(&style));
        }
    }
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t\r\n\x0C]+").expect("whitespace pattern is valid"))
}

/// Text a viewer would see inside `el`: whitespace collapsed, `<br>` as a
/// line break, hidden descendants left out.
fn rendered_text(resolver: &StaticStyleResolver, el: ElementRef, style: &ComputedStyle) -> String {
    let mut out = String::new();
    collect_text(resolver, el, style, &mut out);
    trim_line_end(&mut out);
    out
}

fn collect_text(
    resolver: &StaticStyleResolver,
    el: ElementRef,
    style: &ComputedStyle,
    out: &mut String,
) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                if style.visibility != "hidden" {
                    push_collapsed(out, text);
                }
            }
            Node::Element(value) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                let child_style =
                    resolver.resolve(value.name(), |name| value.attr(name), Some(style));
                if child_style.display == "none" {
                    continue;
                }
                if value.name() == "br" {
                    trim_line_end(out);
                    out.push('\n');
                } else {
                    collect_text(resolver, child_el, &child_style, out);
                }
            }
            _ => {}
        }
    }
}

/// Append `text` with its whitespace runs collapsed, also across what is
/// already in `out`; no space starts a line.
fn push_collapsed(out: &mut String, text: &str) {
    let collapsed = whitespace_re().replace_all(text, " ");
    let at_line_start = out.is_empty() || out.ends_with(|c: char| c == '\n' || c == ' ');
    out.push_str(if at_line_start {
        collapsed.trim_start_matches(' ')
    } else {
        &collapsed
    });
}

fn trim_line_end(out: &mut String) {
    let len = out.trim_end_matches(' ').len();
    out.truncate(len);
}
