//! Visible link extraction
//!
//! One pass over every element under `<body>` in tree order. Each element is
//! checked against its computed style; invisible elements are detached on the
//! spot, and anchors are turned into [`LinkRecord`]s. Pruning and collection
//! are interleaved, so an element's visibility is decided with the tree as it
//! stands when the element is reached.

use crate::dom::{Document, NodeId};
use crate::style::ComputedStyle;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

const NBSP: char = '\u{a0}';

/// A single visible hyperlink and where and how it is shown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRecord {
    /// Ordinal among all anchors visited, including ones that were not emitted
    pub pos: usize,
    /// Lower-case ancestor path, e.g. `body > div > a`
    pub css_sel: String,
    pub text: String,
    /// The `href` attribute as authored
    pub href: String,
    /// `href` resolved against the document address
    pub url: String,
    /// Pixel font size; `None` when the computed value has no leading digits
    pub font_size: Option<i64>,
    /// Numeric font weight; `None` when the computed value has no leading digits
    pub font_weight: Option<i64>,
    pub color: String,
    pub font: String,
    pub parent_padding: String,
    pub parent_margin: String,
    pub parent_bg_color: String,
    pub words: Vec<String>,
}

/// The one failure kind of an extraction pass
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExtractionFailure {
    message: String,
}

impl ExtractionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<url::ParseError> for ExtractionFailure {
    fn from(err: url::ParseError) -> Self {
        Self::new(format!("invalid URL: {}", err))
    }
}

/// Result envelope handed back to the host.
///
/// Serializes either as the bare array of records or as
/// `{"err": ["<message>"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractionOutcome {
    Links(Vec<LinkRecord>),
    Failed { err: Vec<String> },
}

impl ExtractionOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            err: vec![message.into()],
        }
    }

    /// The failure message, if this is an error envelope
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Links(_) => None,
            Self::Failed { err } => err.first().map(String::as_str),
        }
    }
}

impl From<Result<Vec<LinkRecord>, ExtractionFailure>> for ExtractionOutcome {
    fn from(result: Result<Vec<LinkRecord>, ExtractionFailure>) -> Self {
        match result {
            Ok(links) => Self::Links(links),
            Err(err) => Self::failed(err.to_string()),
        }
    }
}

/// Run the extraction and wrap the result in the host-facing envelope
pub fn run(doc: &mut Document) -> ExtractionOutcome {
    extract_links(doc).into()
}

/// Extract every visible link from `doc`, pruning invisible elements as it goes.
///
/// Either all records are returned or the first failure is; there is no
/// partial result.
pub fn extract_links(doc: &mut Document) -> Result<Vec<LinkRecord>, ExtractionFailure> {
    let body = doc
        .body()
        .ok_or_else(|| ExtractionFailure::new("document has no body"))?;
    let base = Url::parse(doc.location())?;

    let mut links = Vec::new();
    let mut pos = 0;
    let mut pruned = 0;

    for id in doc.elements_under(body) {
        // inside a subtree that was pruned earlier in this pass
        if !doc.is_connected(id) {
            continue;
        }

        let style = computed_style(doc, id)?;
        if is_hidden(style) {
            doc.detach(id);
            pruned += 1;
            continue;
        }

        let Some(element) = doc.element(id).filter(|e| e.is_anchor()) else {
            continue;
        };
        let text = element.inner_text.trim_matches(is_js_whitespace);
        let href = element.attr("href").unwrap_or_default();
        if !text.is_empty() && !href.is_empty() {
            let parent = doc
                .parent(id)
                .filter(|&p| doc.element(p).is_some())
                .ok_or_else(|| {
                    ExtractionFailure::new(format!("anchor {} has no parent element", id))
                })?;
            let parent_style = computed_style(doc, parent)?;
            let text = replace_nbsp(text);
            let words = split_into_words(&text);

            links.push(LinkRecord {
                pos,
                css_sel: css_selector(doc, id),
                text,
                href: href.to_string(),
                url: base.join(href)?.to_string(),
                font_size: parse_font_size(&style.font_size),
                font_weight: parse_font_weight(&style.font_weight),
                color: style.color.clone(),
                font: style.font.clone(),
                parent_padding: parent_style.padding.clone(),
                parent_margin: parent_style.margin.clone(),
                parent_bg_color: parent_style.background_color.clone(),
                words,
            });
        }
        pos += 1;
    }

    debug!(
        "Extracted {} links from {} anchors, pruned {} hidden elements",
        links.len(),
        pos,
        pruned
    );
    Ok(links)
}

fn computed_style(doc: &Document, id: NodeId) -> Result<&ComputedStyle, ExtractionFailure> {
    doc.element(id)
        .and_then(|e| e.style.as_ref())
        .ok_or_else(|| {
            ExtractionFailure::new(format!("computed style unavailable for element {}", id))
        })
}

/// Whether a computed style hides its element.
///
/// Opacity is compared as a string: only `"0"` and `"0.0"` count.
pub fn is_hidden(style: &ComputedStyle) -> bool {
    style.display == "none"
        || style.visibility == "hidden"
        || style.opacity == "0"
        || style.opacity == "0.0"
}

/// Lower-case tag path from the outermost attached ancestor down to `id`.
///
/// An element without a parent contributes nothing, so the document root
/// and detached elements never appear in a path.
pub fn css_selector(doc: &Document, id: NodeId) -> String {
    let mut path = Vec::new();
    let mut current = id;
    while let Some(parent) = doc.parent(current) {
        path.push(doc.tag_name(current).unwrap_or_default());
        current = parent;
    }
    path.reverse();
    path.join(" > ").to_lowercase()
}

/// Pixel value of a computed font size: `p` and `x` are stripped, then the
/// leading integer is parsed.
pub fn parse_font_size(value: &str) -> Option<i64> {
    let stripped: String = value.chars().filter(|c| !matches!(c, 'p' | 'x')).collect();
    parse_leading_int(&stripped)
}

/// Numeric prefix of a computed font weight
pub fn parse_font_weight(value: &str) -> Option<i64> {
    parse_leading_int(value)
}

/// Base-10 integer prefix after optional whitespace and sign, `None` without digits
fn parse_leading_int(value: &str) -> Option<i64> {
    let value = value.trim_start_matches(is_js_whitespace);
    let (negative, rest) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    // saturate rather than fail on absurd lengths
    let magnitude = rest[..digits].parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -magnitude } else { magnitude })
}

/// Replace non-breaking spaces with plain spaces
pub fn replace_nbsp(text: &str) -> String {
    text.replace(NBSP, " ")
}

/// JavaScript's whitespace set (`\s`, `trim`, `parseInt`): Unicode
/// `White_Space` plus U+FEFF, minus U+0085.
pub fn is_js_whitespace(c: char) -> bool {
    c == '\u{FEFF}' || (c != '\u{85}' && c.is_whitespace())
}

/// Split text into non-empty words on runs of whitespace
pub fn split_into_words(text: &str) -> Vec<String> {
    replace_nbsp(text)
        .split(is_js_whitespace)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Element;

    fn visible() -> ComputedStyle {
        ComputedStyle::default()
    }

    fn styled(f: impl FnOnce(&mut ComputedStyle)) -> ComputedStyle {
        let mut style = ComputedStyle::default();
        f(&mut style);
        style
    }

    fn anchor(href: &str, text: &str) -> Element {
        Element::new("A")
            .with_attr("href", href)
            .with_text(text)
            .with_style(visible())
    }

    fn container(tag: &str) -> Element {
        Element::new(tag).with_style(visible())
    }

    fn doc_with_body(location: &str) -> (Document, NodeId) {
        let mut doc = Document::new(location);
        let body = doc.append_element(Document::ROOT, container("BODY"));
        doc.set_body(body);
        (doc, body)
    }

    #[test]
    fn test_nested_anchor_selector() {
        let (mut doc, body) = doc_with_body("https://example.com/");
        let div = doc.append_element(body, container("DIV"));
        let span = doc.append_element(div, container("SPAN"));
        doc.append_element(span, anchor("/home", "Home"));

        let links = extract_links(&mut doc).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].css_sel, "body > div > span > a");
        assert_eq!(links[0].url, "https://example.com/home");
    }

    #[test]
    fn test_css_selector_of_parentless_element_is_empty() {
        let (doc, _) = doc_with_body("https://example.com/");
        assert_eq!(css_selector(&doc, Document::ROOT), "");
    }

    #[test]
    fn test_hidden_elements_are_pruned() {
        let (mut doc, body) = doc_with_body("https://example.com/");
        let none = doc.append_element(
            body,
            Element::new("DIV").with_style(styled(|s| s.display = "none".into())),
        );
        doc.append_element(none, anchor("/a", "inside display none"));
        doc.append_element(
            body,
            Element::new("A")
                .with_attr("href", "/b")
                .with_text("invisible")
                .with_style(styled(|s| s.visibility = "hidden".into())),
        );
        doc.append_element(
            body,
            Element::new("A")
                .with_attr("href", "/c")
                .with_text("transparent")
                .with_style(styled(|s| s.opacity = "0.0".into())),
        );
        doc.append_element(body, anchor("/d", "shown"));

        let links = extract_links(&mut doc).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].href, "/d");
        // anchors inside a pruned subtree are never visited; pruned anchors are not counted
        assert_eq!(links[0].pos, 0);
        assert_eq!(doc.children(body).len(), 1);
    }

    #[test]
    fn test_opacity_is_compared_as_string() {
        assert!(is_hidden(&styled(|s| s.opacity = "0".into())));
        assert!(is_hidden(&styled(|s| s.opacity = "0.0".into())));
        assert!(!is_hidden(&styled(|s| s.opacity = "0.00".into())));
        assert!(!is_hidden(&styled(|s| s.opacity = "0e0".into())));
        assert!(!is_hidden(&visible()));
    }

    #[test]
    fn test_pruned_ancestor_never_in_selector() {
        let (mut doc, body) = doc_with_body("https://example.com/");
        let hidden = doc.append_element(
            body,
            Element::new("SECTION").with_style(styled(|s| s.display = "none".into())),
        );
        let nested = doc.append_element(hidden, container("DIV"));
        let a = doc.append_element(nested, anchor("/x", "x"));

        extract_links(&mut doc).unwrap();
        assert_eq!(css_selector(&doc, a), "div > a");
    }

    #[test]
    fn test_pos_counts_skipped_anchors() {
        let (mut doc, body) = doc_with_body("https://example.com/");
        doc.append_element(body, anchor("/first", "First"));
        doc.append_element(body, anchor("", "Empty href"));
        doc.append_element(body, anchor("/blank", "  \n "));
        doc.append_element(body, Element::new("A").with_text("No href").with_style(visible()));
        doc.append_element(body, anchor("/last", "Last"));

        let links = extract_links(&mut doc).unwrap();
        let positions: Vec<usize> = links.iter().map(|l| l.pos).collect();
        assert_eq!(positions, vec![0, 4]);
    }

    #[test]
    fn test_svg_anchor_is_not_counted() {
        let (mut doc, body) = doc_with_body("https://example.com/");
        doc.append_element(body, anchor("/1", "One"));
        let svg = doc.append_element(body, container("svg"));
        doc.append_element(
            svg,
            Element::new("a")
                .with_attr("href", "/shape")
                .with_text("Shape")
                .with_style(visible()),
        );
        doc.append_element(body, anchor("/2", "Two"));

        let links = extract_links(&mut doc).unwrap();
        let positions: Vec<usize> = links.iter().map(|l| l.pos).collect();
        assert_eq!(positions, vec![0, 1]);
        assert_eq!(links[1].href, "/2");
    }

    #[test]
    fn test_nbsp_handling() {
        let (mut doc, body) = doc_with_body("https://example.com/");
        doc.append_element(body, anchor("/", "\u{a0}Go\u{a0}Home "));

        let links = extract_links(&mut doc).unwrap();
        assert_eq!(links[0].text, "Go Home");
        assert_eq!(links[0].words, vec!["Go", "Home"]);
    }

    #[test]
    fn test_url_resolution() {
        let (mut doc, body) = doc_with_body("https://example.com/a/b");
        doc.append_element(body, anchor("../c", "up"));

        let links = extract_links(&mut doc).unwrap();
        assert_eq!(links[0].href, "../c");
        assert_eq!(links[0].url, "https://example.com/c");
    }

    #[test]
    fn test_parent_style_and_metrics() {
        let (mut doc, body) = doc_with_body("https://example.com/");
        let nav = doc.append_element(
            body,
            Element::new("NAV").with_style(styled(|s| {
                s.padding = "4px 8px".into();
                s.margin = "0px".into();
                s.background_color = "rgb(255, 255, 255)".into();
            })),
        );
        doc.append_element(
            nav,
            Element::new("A")
                .with_attr("href", "/")
                .with_text("Home")
                .with_style(styled(|s| {
                    s.font_size = "13.5px".into();
                    s.font_weight = "700".into();
                    s.color = "rgb(51, 51, 51)".into();
                })),
        );

        let link = &extract_links(&mut doc).unwrap()[0];
        assert_eq!(link.font_size, Some(13));
        assert_eq!(link.font_weight, Some(700));
        assert_eq!(link.color, "rgb(51, 51, 51)");
        assert_eq!(link.parent_padding, "4px 8px");
        assert_eq!(link.parent_margin, "0px");
        assert_eq!(link.parent_bg_color, "rgb(255, 255, 255)");
    }

    #[test]
    fn test_failure_discards_partial_results() {
        let (mut doc, body) = doc_with_body("https://example.com/");
        for i in 0..10 {
            let mut a = anchor(&format!("/{}", i), "link");
            if i == 3 {
                a.style = None;
            }
            doc.append_element(body, a);
        }

        let outcome = run(&mut doc);
        assert!(matches!(outcome, ExtractionOutcome::Failed { .. }));
        assert!(outcome.error().unwrap().contains("computed style unavailable"));
    }

    #[test]
    fn test_unresolvable_href_fails() {
        let (mut doc, body) = doc_with_body("about:blank");
        doc.append_element(body, anchor("relative", "r"));
        assert!(extract_links(&mut doc).is_err());
    }

    #[test]
    fn test_missing_body_fails() {
        let mut doc = Document::new("https://example.com/");
        let err = extract_links(&mut doc).unwrap_err();
        assert_eq!(err.message(), "document has no body");
    }

    #[test]
    fn test_envelope_shape() {
        let json = serde_json::to_value(ExtractionOutcome::failed("TypeError: x")).unwrap();
        assert_eq!(json, serde_json::json!({ "err": ["TypeError: x"] }));

        let (mut doc, body) = doc_with_body("https://example.com/");
        doc.append_element(body, anchor("/", "Home"));
        let json = serde_json::to_value(run(&mut doc)).unwrap();
        assert_eq!(json[0]["cssSel"], "body > a");
        assert_eq!(json[0]["parentBgColor"], "rgba(0, 0, 0, 0)");
        assert_eq!(json[0]["fontSize"], 16);
    }

    #[test]
    fn test_nan_sentinel_serializes_as_null() {
        assert_eq!(parse_font_weight("bold"), None);
        let (mut doc, body) = doc_with_body("https://example.com/");
        doc.append_element(
            body,
            Element::new("A")
                .with_attr("href", "/")
                .with_text("Home")
                .with_style(styled(|s| s.font_weight = "bold".into())),
        );
        let json = serde_json::to_value(run(&mut doc)).unwrap();
        assert!(json[0]["fontWeight"].is_null());
    }

    #[test]
    fn test_parse_font_size() {
        assert_eq!(parse_font_size("12px"), Some(12));
        assert_eq!(parse_font_size("16.5px"), Some(16));
        assert_eq!(parse_font_size(" 9px"), Some(9));
        assert_eq!(parse_font_size("1.2em"), Some(1));
        assert_eq!(parse_font_size("medium"), None);
        assert_eq!(parse_font_size(""), None);
    }

    #[test]
    fn test_parse_font_weight() {
        assert_eq!(parse_font_weight("400"), Some(400));
        assert_eq!(parse_font_weight("-5"), Some(-5));
        assert_eq!(parse_font_weight("normal"), None);
    }

    #[test]
    fn test_split_into_words() {
        assert_eq!(split_into_words("  a\r\n b\tc  "), vec!["a", "b", "c"]);
        assert!(split_into_words(" \n ").is_empty());
        assert_eq!(split_into_words("go go"), vec!["go", "go"]);

        let words = split_into_words("one\n two \u{a0} three");
        assert_eq!(split_into_words(&words.join(" ")), words);
    }

    #[test]
    fn test_javascript_whitespace_set() {
        assert!(is_js_whitespace('\u{FEFF}'));
        assert!(is_js_whitespace('\u{2028}'));
        assert!(!is_js_whitespace('\u{85}'));
        assert_eq!(split_into_words("a\u{FEFF}b\u{85}c"), vec!["a", "b\u{85}c"]);

        let (mut doc, body) = doc_with_body("https://example.com/");
        doc.append_element(body, anchor("/", "\u{FEFF}Home\u{85}"));
        let links = extract_links(&mut doc).unwrap();
        assert_eq!(links[0].text, "Home\u{85}");
        assert_eq!(parse_font_weight("\u{FEFF}700"), Some(700));
    }
}
