//! CSS selectors for link and form-control extraction
//!
//! Selectors are compiled once on first use. A selector that fails to
//! compile is skipped with a warning instead of aborting extraction.

use scraper::Selector;
use std::sync::OnceLock;

/// Element/attribute pairs whose values are outbound links
const LINK_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("a", &["href"]),
    ("img", &["src"]),
    ("link", &["href"]),
    ("script", &["src"]),
    ("source", &["src", "srcset"]),
    ("video", &["src"]),
    ("form", &["action"]),
    ("iframe", &["src"]),
    ("object", &["data"]),
    ("embed", &["src"]),
    ("audio", &["src"]),
    ("base", &["href"]),
    ("area", &["href"]),
    ("input", &["src"]),
    ("param", &["value"]),
    ("blockquote", &["cite"]),
    ("q", &["cite"]),
    ("del", &["cite"]),
    ("ins", &["cite"]),
    ("track", &["src"]),
];

/// Form controls recorded as inputs
const INPUT_SELECTOR: &str = "input, textarea, select, option, button, datalist";

/// A compiled selector and the attribute it yields
pub struct LinkSelector {
    pub selector: Selector,
    pub attribute: &'static str,
}

fn parse_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            tracing::warn!(selector = css, error = ?e, "Invalid CSS selector");
            None
        }
    }
}

/// Table-driven link selectors, followed by a generic `[href]` selector
pub fn link_selectors() -> &'static [LinkSelector] {
    static SELECTORS: OnceLock<Vec<LinkSelector>> = OnceLock::new();
    SELECTORS.get_or_init(|| {
        let mut selectors: Vec<LinkSelector> = LINK_ATTRIBUTES
            .iter()
            .flat_map(|(tag, attributes)| attributes.iter().map(move |attr| (*tag, *attr)))
            .filter_map(|(tag, attribute)| {
                parse_selector(&format!("{tag}[{attribute}]"))
                    .map(|selector| LinkSelector { selector, attribute })
            })
            .collect();
        if let Some(selector) = parse_selector("[href]") {
            selectors.push(LinkSelector {
                selector,
                attribute: "href",
            });
        }
        selectors
    })
}

/// `<loc>` elements of sitemap-style XML
pub fn loc_selector() -> Option<&'static Selector> {
    static LOC: OnceLock<Option<Selector>> = OnceLock::new();
    LOC.get_or_init(|| parse_selector("loc")).as_ref()
}

pub fn input_selector() -> Option<&'static Selector> {
    static INPUTS: OnceLock<Option<Selector>> = OnceLock::new();
    INPUTS.get_or_init(|| parse_selector(INPUT_SELECTOR)).as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_selectors_compile() {
        let expected: usize = LINK_ATTRIBUTES.iter().map(|(_, attrs)| attrs.len()).sum();
        assert_eq!(link_selectors().len(), expected + 1);
        assert!(loc_selector().is_some());
        assert!(input_selector().is_some());
    }
}
