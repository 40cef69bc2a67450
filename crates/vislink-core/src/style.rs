//! Computed style view and a static resolver for pages without a browser
//!
//! A real browser is the authority on computed style. When vislink works
//! from raw markup instead (HTTP-only mode, HTML on stdin), the
//! [`StaticStyleResolver`] approximates it from user-agent defaults, inline
//! `style` attributes and CSS inheritance. Stylesheets are not evaluated.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// The resolved presentation properties of one element
///
/// Field names follow the browser's `CSSStyleDeclaration` properties so a
/// snapshot taken in the page deserializes directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: String,
    pub font_size: String,
    pub font_weight: String,
    #[serde(default)]
    pub font_family: String,
    pub color: String,
    pub font: String,
    pub padding: String,
    pub margin: String,
    pub background_color: String,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "inline".to_string(),
            visibility: "visible".to_string(),
            opacity: "1".to_string(),
            font_size: "16px".to_string(),
            font_weight: "400".to_string(),
            font_family: DEFAULT_FONT_FAMILY.to_string(),
            color: "rgb(0, 0, 0)".to_string(),
            font: format!("16px {}", DEFAULT_FONT_FAMILY),
            padding: "0px".to_string(),
            margin: "0px".to_string(),
            background_color: TRANSPARENT.to_string(),
        }
    }
}

const DEFAULT_FONT_FAMILY: &str = "\"Times New Roman\"";
const TRANSPARENT: &str = "rgba(0, 0, 0, 0)";
const LINK_COLOR: &str = "rgb(0, 0, 238)";
const ROOT_FONT_PX: f64 = 16.0;

/// Elements the user-agent stylesheet never renders
const NON_RENDERED_TAGS: &[&str] = &[
    "head", "script", "style", "template", "noscript", "title", "meta", "link", "base",
];

const BLOCK_TAGS: &[&str] = &[
    "html", "body", "address", "article", "aside", "blockquote", "dd", "details", "dialog",
    "div", "dl", "dt", "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "hgroup", "hr", "main", "menu", "nav", "ol", "p", "pre",
    "section", "summary", "ul",
];

const BOLD_TAGS: &[&str] = &["b", "strong", "h1", "h2", "h3", "h4", "h5", "h6", "th"];

/// Resolves computed style from markup alone
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticStyleResolver;

impl StaticStyleResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the style of an element given its parent's resolved style.
    ///
    /// `attr` looks up an attribute of the element being resolved.
    pub fn resolve<'a, F>(
        &self,
        tag: &str,
        attr: F,
        parent: Option<&ComputedStyle>,
    ) -> ComputedStyle
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let tag = tag.to_ascii_lowercase();
        let root = ComputedStyle::default();
        let parent = parent.unwrap_or(&root);
        let parent_px = px_value(&parent.font_size).unwrap_or(ROOT_FONT_PX);

        // User-agent defaults, then inheritance
        let mut display = user_agent_display(&tag, &attr).to_string();
        let mut visibility = parent.visibility.clone();
        let mut opacity = "1".to_string();
        let mut font_px = match tag.as_str() {
            "h1" => parent_px * 2.0,
            "h2" => parent_px * 1.5,
            "h3" => parent_px * 1.17,
            "h5" => parent_px * 0.83,
            "h6" => parent_px * 0.67,
            "small" => parent_px / 1.2,
            _ => parent_px,
        };
        let mut font_weight = if BOLD_TAGS.contains(&tag.as_str()) {
            "700".to_string()
        } else {
            parent.font_weight.clone()
        };
        let mut font_family = parent.font_family.clone();
        let mut color = if tag == "a" && attr("href").is_some() {
            LINK_COLOR.to_string()
        } else {
            parent.color.clone()
        };
        let mut background_color = TRANSPARENT.to_string();
        let mut margin = match tag.as_str() {
            "body" => BoxSides::uniform("8px"),
            "p" => BoxSides::vertical(&format_px(font_px)),
            _ => BoxSides::uniform("0px"),
        };
        let mut padding = match tag.as_str() {
            "ul" | "ol" => BoxSides::new(["0px", "0px", "0px", "40px"]),
            _ => BoxSides::uniform("0px"),
        };

        // Inline declarations override the user-agent sheet
        for (property, value) in attr("style").map(parse_declarations).unwrap_or_default() {
            let inherit = value == "inherit";
            match property.as_str() {
                "display" => {
                    display = if inherit { parent.display.clone() } else { value };
                }
                "visibility" => {
                    if !inherit {
                        visibility = value;
                    }
                }
                "opacity" => {
                    opacity = if inherit { parent.opacity.clone() } else { value };
                }
                "font-size" => {
                    if let Some(px) = resolve_font_size(&value, parent_px) {
                        font_px = px;
                    }
                }
                "font-weight" => {
                    if let Some(weight) = resolve_font_weight(&value, &parent.font_weight) {
                        font_weight = weight;
                    }
                }
                "font-family" => {
                    if !inherit {
                        font_family = value;
                    }
                }
                "color" => {
                    color = if inherit { parent.color.clone() } else { value };
                }
                "background-color" => background_color = value,
                "background" if !value.contains(char::is_whitespace) => background_color = value,
                "margin" => margin.apply_shorthand(&value),
                "padding" => padding.apply_shorthand(&value),
                other => {
                    if let Some(side) = other.strip_prefix("margin-") {
                        margin.set_side(side, &value);
                    } else if let Some(side) = other.strip_prefix("padding-") {
                        padding.set_side(side, &value);
                    }
                }
            }
        }

        let font_size = format_px(font_px);
        let font = if font_weight == "400" {
            format!("{} {}", font_size, font_family)
        } else {
            format!("{} {} {}", font_weight, font_size, font_family)
        };

        ComputedStyle {
            display,
            visibility,
            opacity,
            font_size,
            font_weight,
            font_family,
            color,
            font,
            padding: padding.to_string(),
            margin: margin.to_string(),
            background_color,
        }
    }
}

fn user_agent_display<'a, F>(tag: &str, attr: &F) -> &'static str
where
    F: Fn(&str) -> Option<&'a str>,
{
    let hidden_input = tag == "input"
        && attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden"));
    if NON_RENDERED_TAGS.contains(&tag) || attr("hidden").is_some() || hidden_input {
        return "none";
    }
    match tag {
        "li" => "list-item",
        "table" => "table",
        "tr" => "table-row",
        "td" | "th" => "table-cell",
        t if BLOCK_TAGS.contains(&t) => "block",
        _ => "inline",
    }
}

/// Parse a `style` attribute into lowercase property names and trimmed values.
///
/// `!important` is dropped; declarations without a colon are ignored.
pub fn parse_declarations(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|decl| {
            let (property, value) = decl.split_once(':')?;
            let property = property.trim().to_ascii_lowercase();
            let value = value.trim();
            let value = value
                .strip_suffix("!important")
                .map(str::trim_end)
                .unwrap_or(value);
            if property.is_empty() || value.is_empty() {
                None
            } else {
                Some((property, value.to_string()))
            }
        })
        .collect()
}

fn length_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([+-]?(?:\d+\.?\d*|\.\d+))(px|em|rem|%|pt)?$")
            .expect("length pattern is valid")
    })
}

fn px_value(value: &str) -> Option<f64> {
    value.strip_suffix("px")?.trim().parse().ok()
}

/// Resolve a `font-size` value to pixels, or `None` when the declaration is invalid
fn resolve_font_size(value: &str, parent_px: f64) -> Option<f64> {
    let value = value.trim().to_ascii_lowercase();
    let keyword = match value.as_str() {
        "xx-small" => Some(9.0),
        "x-small" => Some(10.0),
        "small" => Some(13.0),
        "medium" => Some(16.0),
        "large" => Some(18.0),
        "x-large" => Some(24.0),
        "xx-large" => Some(32.0),
        "xxx-large" => Some(48.0),
        "smaller" => Some(parent_px / 1.2),
        "larger" => Some(parent_px * 1.2),
        "inherit" => Some(parent_px),
        _ => None,
    };
    if keyword.is_some() {
        return keyword;
    }

    let caps = length_re().captures(&value)?;
    let number: f64 = caps[1].parse().ok()?;
    let px = match caps.get(2).map(|m| m.as_str()) {
        Some("px") => number,
        Some("em") => number * parent_px,
        Some("rem") => number * ROOT_FONT_PX,
        Some("%") => number * parent_px / 100.0,
        Some("pt") => number * 4.0 / 3.0,
        // unitless zero is the only valid bare number
        _ if number == 0.0 => 0.0,
        _ => return None,
    };
    (px >= 0.0).then_some(px)
}

/// Resolve a `font-weight` value to its numeric form
fn resolve_font_weight(value: &str, parent: &str) -> Option<String> {
    let parent_weight: u32 = parent.parse().unwrap_or(400);
    let weight = match value.trim().to_ascii_lowercase().as_str() {
        "normal" => 400,
        "bold" => 700,
        "inherit" => parent_weight,
        "bolder" => match parent_weight {
            w if w < 350 => 400,
            w if w < 550 => 700,
            w if w < 900 => 900,
            w => w,
        },
        "lighter" => match parent_weight {
            w if w < 100 => w,
            w if w < 550 => 100,
            w if w < 750 => 400,
            _ => 700,
        },
        numeric => match numeric.parse::<u32>() {
            Ok(w) if (1..=1000).contains(&w) => w,
            _ => return None,
        },
    };
    Some(weight.to_string())
}

/// Format a pixel length the way browsers serialize computed lengths
fn format_px(px: f64) -> String {
    let rounded = (px * 1000.0).round() / 1000.0;
    if rounded.fract() == 0.0 {
        format!("{}px", rounded as i64)
    } else {
        format!("{}px", rounded)
    }
}

/// Four box sides in top, right, bottom, left order
#[derive(Debug, Clone, PartialEq, Eq)]
struct BoxSides([String; 4]);

impl BoxSides {
    fn new(sides: [&str; 4]) -> Self {
        Self(sides.map(str::to_string))
    }

    fn uniform(value: &str) -> Self {
        Self::new([value; 4])
    }

    fn vertical(value: &str) -> Self {
        Self::new([value, "0px", value, "0px"])
    }

    fn apply_shorthand(&mut self, value: &str) {
        let parts: Vec<&str> = value.split_whitespace().collect();
        let sides = match parts.as_slice() {
            [all] => [*all; 4],
            [v, h] => [*v, *h, *v, *h],
            [t, h, b] => [*t, *h, *b, *h],
            [t, r, b, l] => [*t, *r, *b, *l],
            _ => return,
        };
        *self = Self::new(sides.map(normalize_zero));
    }

    fn set_side(&mut self, side: &str, value: &str) {
        let index = match side {
            "top" => 0,
            "right" => 1,
            "bottom" => 2,
            "left" => 3,
            _ => return,
        };
        self.0[index] = normalize_zero(value).to_string();
    }
}

fn normalize_zero(value: &str) -> &str {
    if value == "0" {
        "0px"
    } else {
        value
    }
}

impl std::fmt::Display for BoxSides {
    /// Shortest shorthand form, as `getComputedStyle` reports it
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [t, r, b, l] = &self.0;
        if r == l {
            if t == b {
                if t == r {
                    write!(f, "{}", t)
                } else {
                    write!(f, "{} {}", t, r)
                }
            } else {
                write!(f, "{} {} {}", t, r, b)
            }
        } else {
            write!(f, "{} {} {} {}", t, r, b, l)
        }
    }
}
