//! Last-price extraction from symbol page markup.
//!
//! The page renders the last traded price inside an element marked with the
//! `js-symbol-last` class, or on newer layouts with
//! `data-name="last-price-value"`. Digits are often split across nested
//! spans, so the whole element body is flattened to text before parsing.

use std::sync::OnceLock;

use regex::Regex;

use crate::application::ports::SourceError;

/// Markers tried in order. Each matches the opening tag of a price element.
const PRICE_ELEMENT_PATTERNS: [&str; 2] = [
    r#"<[a-zA-Z][a-zA-Z0-9]*\b[^>]*\bclass\s*=\s*["'](?:[^"']*\s)?js-symbol-last(?:\s[^"']*)?["'][^>]*>"#,
    r#"<[a-zA-Z][a-zA-Z0-9]*\b[^>]*\bdata-name\s*=\s*["']last-price-value["'][^>]*>"#,
];

const VOID_ELEMENTS: [&str; 6] = ["br", "img", "input", "meta", "link", "hr"];

#[allow(clippy::expect_used)] // Patterns are compile-time constants
fn element_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        PRICE_ELEMENT_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("price element pattern is valid"))
            .collect()
    })
}

#[allow(clippy::expect_used)] // Pattern is a compile-time constant
fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)\b[^>]*?(/?)>").expect("tag pattern is valid")
    })
}

#[allow(clippy::expect_used)] // Pattern is a compile-time constant
fn number_pattern() -> &'static Regex {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    NUMBER.get_or_init(|| Regex::new(r"-?[0-9]+(?:\.[0-9]+)?").expect("number pattern is valid"))
}

#[allow(clippy::expect_used)] // Pattern is a compile-time constant
fn entity_pattern() -> &'static Regex {
    static ENTITY: OnceLock<Regex> = OnceLock::new();
    ENTITY.get_or_init(|| Regex::new(r"&[a-zA-Z0-9#]+;").expect("entity pattern is valid"))
}

/// Extract the last price from a symbol page.
///
/// # Errors
///
/// Returns [`SourceError::MalformedSample`] if no price element is present
/// or none of them contains a number.
pub fn extract_last_price(html: &str) -> Result<f64, SourceError> {
    let mut seen = None;

    for pattern in element_patterns() {
        for open in pattern.find_iter(html) {
            let Some(inner) = element_body(html, open.end()) else {
                continue;
            };
            let text = flatten_text(inner);
            if let Some(price) = parse_price_text(&text) {
                return Ok(price);
            }
            seen.get_or_insert(text);
        }
    }

    Err(SourceError::MalformedSample(
        seen.unwrap_or_else(|| "no price element".to_string()),
    ))
}

/// Parse display text such as `"67,123.45 USD"` into a price.
///
/// Thousands separators, whitespace and currency symbols are ignored. The
/// first decimal number wins.
#[must_use]
pub fn parse_price_text(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .map(|c| if c == '\u{2212}' { '-' } else { c })
        .collect();

    number_pattern()
        .find(&cleaned)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|price| price.is_finite())
}

/// Body of the element whose opening tag ends at `start`, up to its
/// matching close tag.
fn element_body(html: &str, start: usize) -> Option<&str> {
    let mut depth = 1usize;

    for tag in tag_pattern().captures_iter(&html[start..]) {
        let closing = !tag[1].is_empty();
        let self_closing = !tag[3].is_empty();
        let name = tag[2].to_ascii_lowercase();

        if closing {
            depth -= 1;
            if depth == 0 {
                let end = start + tag.get(0)?.start();
                return Some(&html[start..end]);
            }
        } else if !self_closing && !VOID_ELEMENTS.contains(&name.as_str()) {
            depth += 1;
        }
    }

    None
}

fn flatten_text(fragment: &str) -> String {
    let without_tags = tag_pattern().replace_all(fragment, "");
    entity_pattern().replace_all(&without_tags, "").into_owned()
}
