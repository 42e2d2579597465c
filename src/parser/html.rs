//! Markup extraction for HTML and sitemap-style XML documents.

use super::selectors::{input_selector, link_selectors, loc_selector};
use crate::crawler::url::resolve;
use crate::models::InputField;
use scraper::Html;
use std::collections::BTreeSet;
use url::Url;

/// Absolute links found in element attributes and `<loc>` text
pub fn extract_links(markup: &str, base: &Url) -> BTreeSet<String> {
    let document = Html::parse_document(markup);
    let mut links = BTreeSet::new();

    for entry in link_selectors() {
        for element in document.select(&entry.selector) {
            let Some(value) = element.value().attr(entry.attribute) else {
                continue;
            };
            if entry.attribute == "srcset" {
                links.extend(srcset_urls(value).filter_map(|u| resolve(base, u)));
            } else if let Some(url) = resolve(base, value) {
                links.insert(url);
            }
        }
    }

    if let Some(loc) = loc_selector() {
        for element in document.select(loc) {
            let text: String = element.text().collect();
            if let Some(url) = resolve(base, text.trim()) {
                links.insert(url);
            }
        }
    }

    links
}

/// URL candidates of a `srcset` value, descriptors dropped
fn srcset_urls(srcset: &str) -> impl Iterator<Item = &str> {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
}

/// Form controls with their opening tag, `name` and `value`
pub fn extract_inputs(markup: &str) -> Vec<InputField> {
    let Some(selector) = input_selector() else {
        return Vec::new();
    };
    let document = Html::parse_document(markup);

    document
        .select(selector)
        .map(|element| {
            let outer = element.html();
            let tag = match outer.find('>') {
                Some(end) => outer[..=end].to_string(),
                None => format!("{outer}>"),
            };
            InputField {
                tag,
                name: element.value().attr("name").unwrap_or_default().to_string(),
                value: element.value().attr("value").unwrap_or_default().to_string(),
            }
        })
        .collect()
}
