use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::first_hit;
use crate::parser::html::{Locator, Page};
use crate::vin::{normalize_opt, Vin};

static VIN_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-HJ-NPR-Z0-9]{17}\b").unwrap());

/// Where a detail page keeps its VIN, in priority order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VinLocators {
    /// Element carrying the VIN in an attribute, e.g. `meta[property="vehicle:vin"]`.
    #[serde(default)]
    pub meta_css: Option<String>,
    #[serde(default = "default_meta_attr")]
    pub meta_attr: String,
    #[serde(default)]
    pub primary: Option<Locator>,
    #[serde(default)]
    pub alternatives: Vec<Locator>,
}

fn default_meta_attr() -> String {
    "content".to_string()
}

/// First VIN-shaped token in `text` that survives validation. The scan runs on
/// an uppercased copy so lowercase VINs in markup are found too.
pub fn find_vin(text: &str) -> Option<Vin> {
    let upper = text.to_uppercase();
    VIN_TOKEN_RE
        .find_iter(&upper)
        .find_map(|m| Vin::parse_strict(m.as_str()).ok())
}

/// Every VIN-shaped token in `text` (case-sensitive) with its byte offset,
/// keeping only tokens with at least `min_digits` digits. Repeats are kept;
/// callers own deduplication.
pub fn scan_vins(text: &str, min_digits: usize) -> Vec<(Vin, usize)> {
    VIN_TOKEN_RE
        .find_iter(text)
        .filter_map(|m| {
            let vin = Vin::parse_strict(m.as_str()).ok()?;
            (vin.digit_count() >= min_digits).then_some((vin, m.start()))
        })
        .collect()
}

/// Text-only chain: a caller-supplied metadata value, normalized like any
/// other VIN input, then a scan of `text`.
pub fn extract_vin_from_text(metadata: Option<&str>, text: &str) -> Option<Vin> {
    let from_meta = || normalize_opt(metadata).ok();
    let from_scan = || find_vin(text);
    first_hit(&[&from_meta, &from_scan])
}

/// Four-layer chain over a parsed detail page: metadata attribute, primary
/// labelled element, alternative elements, whole-page scan.
pub fn extract_vin(page: &Page, locators: &VinLocators) -> Option<Vin> {
    let from_meta = || {
        let css = locators.meta_css.as_deref()?;
        let value = page.attr(css, &locators.meta_attr)?;
        extract_vin_from_text(Some(value.as_str()), &value)
    };
    let from_primary = || {
        let loc = locators.primary.as_ref()?;
        find_vin(&page.locate_text(loc)?)
    };
    let from_alternatives = || {
        locators
            .alternatives
            .iter()
            .find_map(|loc| page.locate_text(loc).and_then(|t| find_vin(&t)))
    };
    let from_page = || find_vin(&page.text());
    first_hit(&[&from_meta, &from_primary, &from_alternatives, &from_page])
}
